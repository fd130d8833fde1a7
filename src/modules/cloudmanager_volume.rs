//! Cloud Volumes ONTAP volumes through Cloud Manager
//!
//! Create goes through a quote, which picks the aggregate and the number of
//! disks to add. Only the export policy and the snapshot policy can be
//! changed on an existing volume.

use super::connection::CloudManagerConnection;
use crate::clients::cloudmanager::api_root_path;
use crate::clients::CloudManagerClient;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::{
    convert_module_args_to_api, ensure, parse_args, schema_of, Modifications, ModuleArgs,
    ReconcileHelper,
};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

pub const NAME: &str = "cloudmanager_volume";

const MODIFIABLE: [&str; 3] = [
    "export_policy_ip",
    "export_policy_nfs_version",
    "snapshot_policy_name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum VolumeSizeUnit {
    #[default]
    GB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CapacityTier {
    #[serde(rename = "NONE")]
    None,
    S3,
    Blob,
    #[serde(rename = "cloudStorage")]
    CloudStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TieringPolicy {
    None,
    SnapshotOnly,
    Auto,
    All,
}

/// Parameters of `cloudmanager_volume`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VolumeArgs {
    #[serde(flatten)]
    pub connection: CloudManagerConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_environment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_environment_name: Option<String>,
    /// Connector client ID
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default)]
    pub size_unit: VolumeSizeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_deduplication: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_thin_provisioning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_compression: Option<bool>,
    /// Defaults to the SVM of the working environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_tier: Option<CapacityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiering_policy: Option<TieringPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_policy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_policy_ip: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_policy_nfs_version: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u64>,
}

impl ModuleArgs for VolumeArgs {
    fn validate(&self) -> Result<()> {
        ensure(
            self.working_environment_id.is_some() || self.working_environment_name.is_some(),
            "one of the following is required: working_environment_name, working_environment_id",
        )?;
        ensure(
            self.capacity_tier != Some(CapacityTier::S3) || self.tiering_policy.is_some(),
            "Error: tiering policy is required when capacity tier is S3",
        )?;
        ensure(
            self.provider_volume_type.is_none() || self.iops.is_some(),
            "Error: iops is required when provider_volume_type is io1",
        )
    }
}

/// The `cloudmanager_volume` module
pub struct CloudManagerVolume;

#[async_trait]
impl Module for CloudManagerVolume {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<VolumeArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: VolumeArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);

        let working_environment = client
            .resolve_working_environment(
                args.working_environment_id.as_deref(),
                args.working_environment_name.as_deref(),
            )
            .await?;

        let mut helper = ReconcileHelper::from_args(&args)?;
        if let Some(id) = working_environment.get("publicId") {
            helper
                .parameters
                .insert("working_environment_id".into(), id.clone());
        }
        if args.svm_name.is_none() {
            if let Some(svm) = working_environment.get("svmName") {
                helper.parameters.insert("svm_name".into(), svm.clone());
            }
        }

        let volume = VolumeReconciler {
            headers: client.agent_headers()?,
            client,
            root: api_root_path(&working_environment),
            helper,
        };
        volume.apply(ctx.check_mode).await
    }
}

struct VolumeReconciler {
    client: CloudManagerClient,
    root: String,
    headers: BTreeMap<String, String>,
    helper: ReconcileHelper,
}

impl VolumeReconciler {
    fn param(&self, key: &str) -> Option<&Value> {
        self.helper.param(key)
    }

    fn param_str(&self, key: &str) -> &str {
        self.helper.param_str(key).unwrap_or_default()
    }

    /// Volume path: `<root>/volumes/<we>/<svm>/<name>`
    fn volume_api(&self) -> String {
        format!(
            "{}/volumes/{}/{}/{}",
            self.root,
            self.param_str("working_environment_id"),
            urlencoding::encode(self.param_str("svm_name")),
            urlencoding::encode(self.param_str("name"))
        )
    }

    /// Current volume in parameter terms
    async fn get_volume(&self) -> Result<Option<Map<String, Value>>> {
        let api = format!(
            "{}/volumes?workingEnvironmentId={}",
            self.root,
            self.param_str("working_environment_id")
        );
        let reply = self
            .client
            .get(&api, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error getting volume"))?;

        let Some(volumes) = reply.json().as_array() else {
            return Ok(None);
        };
        let Some(volume) = volumes
            .iter()
            .find(|v| v.get("name").and_then(Value::as_str) == Some(self.param_str("name")))
        else {
            return Ok(None);
        };

        let field = |key: &str| volume.get(key).cloned().unwrap_or(Value::Null);
        let mut current = Map::new();
        current.insert("name".into(), field("name"));
        current.insert("enable_deduplication".into(), field("deduplication"));
        current.insert("enable_thin_provisioning".into(), field("thinProvisioning"));
        current.insert("enable_compression".into(), field("compression"));

        if let Some(export) = volume.get("exportPolicyInfo").filter(|e| !e.is_null()) {
            let export_field = |key: &str| export.get(key).cloned().unwrap_or(Value::Null);
            if self.param("export_policy_nfs_version").is_some() {
                current.insert("export_policy_nfs_version".into(), export_field("nfsVersion"));
            }
            if self.param("export_policy_ip").is_some() {
                current.insert("export_policy_ip".into(), export_field("ips"));
            }
            if self.param("export_policy_type").is_some() {
                current.insert("export_policy_type".into(), export_field("policyType"));
            }
        }
        for (param, key) in [
            ("snapshot_policy_name", "snapshotPolicy"),
            ("provider_volume_type", "providerVolumeType"),
            ("capacity_tier", "capacityTier"),
            ("tiering_policy", "tieringPolicy"),
        ] {
            if self.param(param).is_some() {
                current.insert(param.into(), field(key));
            }
        }
        Ok(Some(current))
    }

    async fn create_volume(&self) -> Result<()> {
        let size = self
            .param("size")
            .cloned()
            .ok_or_else(|| Error::MissingParameters(vec!["size".into()]))?;
        let unit = self.param_str("size_unit").to_string();

        let mut quote = convert_module_args_to_api(
            &self.helper.parameters,
            &[
                "refresh_token",
                "state",
                "working_environment_name",
                "client_id",
                "size_unit",
                "export_policy_type",
                "export_policy_ip",
                "export_policy_nfs_version",
                "capacity_tier",
            ],
        );
        quote.insert("verifyNameUniqueness".into(), json!(true));
        quote.insert("unit".into(), json!(unit));
        quote.insert("size".into(), json!({"size": size, "unit": unit}));

        let reply = self
            .client
            .post(
                &format!("{}/volumes/quote", self.root),
                Value::Object(quote.clone()),
                Some(&self.headers),
            )
            .await
            .map_err(|e| e.context("Error getting volume quote"))?;
        let response = reply.json();
        quote.insert(
            "aggregateName".into(),
            response.get("aggregateName").cloned().unwrap_or(Value::Null),
        );
        quote.insert(
            "maxNumOfDisksApprovedToAdd".into(),
            response.get("numOfDisks").cloned().unwrap_or(Value::Null),
        );

        let mut export_policy = Map::new();
        for (param, key) in [
            ("export_policy_type", "policyType"),
            ("export_policy_ip", "ips"),
            ("export_policy_nfs_version", "nfsVersion"),
        ] {
            if let Some(value) = self.param(param) {
                export_policy.insert(key.into(), value.clone());
            }
        }
        quote.insert("exportPolicyInfo".into(), Value::Object(export_policy));

        for (param, key) in [
            ("enable_deduplication", "deduplication"),
            ("enable_thin_provisioning", "thinProvisioning"),
            ("enable_compression", "compression"),
        ] {
            if self.param(param) == Some(&Value::Bool(true)) {
                quote.insert(key.into(), json!(true));
            }
        }
        for (param, key) in [
            ("snapshot_policy_name", "snapshotPolicy"),
            ("tiering_policy", "tieringPolicy"),
            ("provider_volume_type", "providerVolumeType"),
            ("iops", "iops"),
        ] {
            if let Some(value) = self.param(param) {
                quote.insert(key.into(), value.clone());
            }
        }
        if let Some(tier) = self.helper.param_str("capacity_tier").filter(|t| *t != "NONE") {
            quote.insert("capacityTier".into(), json!(tier));
        }

        self.client
            .post(
                &format!("{}/volumes?createAggregateIfNotFound=True", self.root),
                Value::Object(quote),
                Some(&self.headers),
            )
            .await
            .map_err(|e| e.context("Error creating volume"))?;
        Ok(())
    }

    async fn modify_volume(&self, modify: &Modifications) -> Result<()> {
        let mut export_policy = Map::new();
        for (param, key) in [
            ("export_policy_type", "policyType"),
            ("export_policy_ip", "ips"),
            ("export_policy_nfs_version", "nfsVersion"),
        ] {
            if let Some(value) = self.param(param) {
                export_policy.insert(key.into(), value.clone());
            }
        }
        let mut body = json!({"exportPolicyInfo": export_policy});
        if modify.contains_key("snapshot_policy_name") {
            body["snapshotPolicyName"] = self.param("snapshot_policy_name").cloned().unwrap_or(Value::Null);
        }

        self.client
            .put(&self.volume_api(), body, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error modifying volume"))?;
        Ok(())
    }

    async fn delete_volume(&self) -> Result<()> {
        self.client
            .delete(&self.volume_api(), None, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error deleting volume"))?;
        Ok(())
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let current = self.get_volume().await?;
        let desired = self.helper.parameters.clone();

        let current_value = current.clone().map(Value::Object);
        let cd_action = self.helper.get_cd_action(current_value.as_ref(), &desired);

        let mut modify = Modifications::new();
        if cd_action.is_none() {
            modify = self.helper.get_modified_attributes(current.as_ref(), &desired);
            let unmodifiable: Vec<String> = modify
                .keys()
                .filter(|attr| !MODIFIABLE.contains(&attr.as_str()))
                .cloned()
                .collect();
            if !unmodifiable.is_empty() {
                return Err(Error::UnmodifiableAttributes(unmodifiable));
            }
        }

        if self.helper.changed && !check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(volume = self.param_str("name"), "creating volume");
                    self.create_volume().await?;
                }
                Some(CdAction::Delete) => {
                    info!(volume = self.param_str("name"), "deleting volume");
                    self.delete_volume().await?;
                }
                None if !modify.is_empty() => {
                    info!(volume = self.param_str("name"), "modifying volume");
                    self.modify_volume(&modify).await?;
                }
                None => {}
            }
        }

        Ok(ModuleResult::new(self.helper.changed))
    }
}
