//! Azure NetApp Files volumes
//!
//! `size` is the usage threshold in GiB and is the only attribute that can
//! change on an existing volume. When present, the result carries the
//! volume's creation token as `msg` and its NFS mount path.

use super::connection::AzureConnection;
use crate::clients::AzureClient;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::{parse_args, required_if, schema_of, ModuleArgs, ReconcileHelper, ONE_GIB};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::azure_netapp_capacity_pool::ServiceLevel;

pub const NAME: &str = "azure_netapp_volume";

const DEFAULT_SIZE_GIB: u64 = 100;

/// Parameters of `azure_netapp_volume`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VolumeArgs {
    #[serde(flatten)]
    pub connection: AzureConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    pub account_name: String,
    pub pool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Unique file path, used as the creation token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Name of the delegated subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network: Option<String>,
    /// Usage threshold in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_level: Option<ServiceLevel>,
}

impl ModuleArgs for VolumeArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[
                ("location", self.location.is_some()),
                ("file_path", self.file_path.is_some()),
                ("subnet_id", self.subnet_id.is_some()),
                ("virtual_network", self.virtual_network.is_some()),
            ],
        )
    }
}

/// The `azure_netapp_volume` module
pub struct AzureNetAppVolume;

#[async_trait]
impl Module for AzureNetAppVolume {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<VolumeArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: VolumeArgs = parse_args(NAME, args)?;
        let client = args.connection.client(ctx);
        let volume = VolumeReconciler {
            path: client.volume_path(
                &args.connection.resource_group,
                &args.account_name,
                &args.pool_name,
                &args.name,
            ),
            client,
            helper: ReconcileHelper::from_args(&args)?,
            args,
        };
        volume.apply(ctx.check_mode).await
    }
}

struct VolumeReconciler {
    client: AzureClient,
    path: String,
    args: VolumeArgs,
    helper: ReconcileHelper,
}

impl VolumeReconciler {
    async fn get_volume(&self) -> Result<Option<Value>> {
        self.client.get(&self.path).await.map_err(|e| {
            e.context(format!(
                "Error getting volume {} for Azure NetApp account {}",
                self.args.name, self.args.account_name
            ))
        })
    }

    async fn create_volume(&self) -> Result<()> {
        let subnet_id = self.client.subnet_id(
            &self.args.connection.resource_group,
            self.args.virtual_network.as_deref().unwrap_or_default(),
            self.args.subnet_id.as_deref().unwrap_or_default(),
        );
        let body = json!({
            "location": self.args.location,
            "properties": {
                "creationToken": self.args.file_path,
                "serviceLevel": self.args.service_level.unwrap_or(ServiceLevel::Premium),
                "usageThreshold": self.args.size.unwrap_or(DEFAULT_SIZE_GIB).saturating_mul(ONE_GIB),
                "subnetId": subnet_id,
            }
        });
        self.client.put(&self.path, body, "volume").await.map_err(|e| {
            e.context(format!(
                "Error creating volume {} for Azure NetApp account {}",
                self.args.name, self.args.account_name
            ))
        })
    }

    async fn resize_volume(&self, size: u64) -> Result<()> {
        let body = json!({"properties": {"usageThreshold": size.saturating_mul(ONE_GIB)}});
        self.client.patch(&self.path, body, "volume").await.map_err(|e| {
            e.context(format!(
                "Error modifying volume {} for Azure NetApp account {}",
                self.args.name, self.args.account_name
            ))
        })
    }

    async fn delete_volume(&self) -> Result<()> {
        self.client.delete(&self.path, "volume").await.map_err(|e| {
            e.context(format!(
                "Error deleting volume {} for Azure NetApp account {}",
                self.args.name, self.args.account_name
            ))
        })
    }

    /// Attributes of an existing volume that differ from the parameters
    fn modifications(&mut self, current: &Value) -> Result<Option<u64>> {
        let properties = current.get("properties").cloned().unwrap_or(Value::Null);
        let mut current_attrs = Map::new();
        let mut desired_attrs = Map::new();
        if let Some(threshold) = properties.get("usageThreshold").and_then(Value::as_u64) {
            current_attrs.insert("size".into(), json!(threshold / ONE_GIB));
        }
        if let Some(token) = properties.get("creationToken") {
            current_attrs.insert("file_path".into(), token.clone());
        }
        if let Some(level) = properties.get("serviceLevel") {
            current_attrs.insert("service_level".into(), level.clone());
        }
        for key in ["size", "file_path", "service_level"] {
            if let Some(value) = self.helper.param(key) {
                desired_attrs.insert(key.to_string(), value.clone());
            }
        }

        let modified = self
            .helper
            .get_modified_attributes(Some(&current_attrs), &desired_attrs);
        let unmodifiable: Vec<String> = modified
            .keys()
            .filter(|k| k.as_str() != "size")
            .cloned()
            .collect();
        if !unmodifiable.is_empty() {
            return Err(Error::UnmodifiableAttributes(unmodifiable));
        }
        Ok(modified.get("size").and_then(Value::as_u64))
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let current = self.get_volume().await?;
        let desired = self.helper.parameters.clone();
        let cd_action = self.helper.get_cd_action(current.as_ref(), &desired);

        let mut resize = None;
        if let (None, Some(current), State::Present) = (cd_action, &current, self.args.state) {
            resize = self.modifications(current)?;
        }

        if self.helper.changed && !check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(volume = %self.args.name, "creating volume");
                    self.create_volume().await?;
                }
                Some(CdAction::Delete) => {
                    info!(volume = %self.args.name, "deleting volume");
                    self.delete_volume().await?;
                }
                None => {
                    if let Some(size) = resize {
                        info!(volume = %self.args.name, size, "resizing volume");
                        self.resize_volume(size).await?;
                    }
                }
            }
        }

        let mut result = ModuleResult::new(self.helper.changed);
        if self.args.state == State::Present {
            let volume = if self.helper.changed && !check_mode {
                self.get_volume().await?
            } else {
                current
            };
            match volume {
                Some(volume) => {
                    let token = volume
                        .pointer("/properties/creationToken")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if let Some(mount_path) = mount_path(&volume) {
                        result = result.with_value("mount_path", mount_path);
                    }
                    result = result.with_msg(token);
                }
                None if check_mode => result = result.with_msg(""),
                None => {
                    return Err(Error::Internal(format!(
                        "volume {} was created successfully, but cannot be found",
                        self.args.name
                    )))
                }
            }
        }
        Ok(result)
    }
}

/// `<ip>:/<creation token>` of the first mount target
fn mount_path(volume: &Value) -> Option<String> {
    let ip = volume
        .pointer("/properties/mountTargets/0/ipAddress")
        .and_then(Value::as_str)?;
    let token = volume
        .pointer("/properties/creationToken")
        .and_then(Value::as_str)?;
    Some(format!("{}:/{}", ip, token))
}
