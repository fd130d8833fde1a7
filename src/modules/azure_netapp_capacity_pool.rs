//! Azure NetApp Files capacity pools
//!
//! `size` is expressed in TiB. Only the size of an existing pool can change.

use super::connection::AzureConnection;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::{parse_args, required_if, schema_of, ModuleArgs, ReconcileHelper, ONE_TIB};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const NAME: &str = "azure_netapp_capacity_pool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ServiceLevel {
    Standard,
    Premium,
    Ultra,
}

fn default_size() -> u64 {
    1
}

/// Parameters of `azure_netapp_capacity_pool`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapacityPoolArgs {
    #[serde(flatten)]
    pub connection: AzureConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    pub account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Provisioned size in TiB
    #[serde(default = "default_size")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_level: Option<ServiceLevel>,
}

impl ModuleArgs for CapacityPoolArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[
                ("location", self.location.is_some()),
                ("service_level", self.service_level.is_some()),
            ],
        )
    }
}

/// The `azure_netapp_capacity_pool` module
pub struct AzureNetAppCapacityPool;

#[async_trait]
impl Module for AzureNetAppCapacityPool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<CapacityPoolArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: CapacityPoolArgs = parse_args(NAME, args)?;
        let client = args.connection.client(ctx);
        let mut helper = ReconcileHelper::from_args(&args)?;
        let path = client.pool_path(&args.connection.resource_group, &args.account_name, &args.name);
        let size_bytes = args.size.saturating_mul(ONE_TIB);

        let current = client
            .get(&path)
            .await
            .map_err(|e| e.context(format!("Error getting capacity pool {}", args.name)))?;
        let desired = helper.parameters.clone();
        let cd_action = helper.get_cd_action(current.as_ref(), &desired);

        let mut resize = false;
        if let (None, Some(current), State::Present) = (cd_action, &current, args.state) {
            let properties = current.get("properties").cloned().unwrap_or(Value::Null);
            let mut current_attrs = Map::new();
            current_attrs.insert("size".into(), properties.get("size").cloned().unwrap_or(Value::Null));
            current_attrs.insert(
                "service_level".into(),
                properties.get("serviceLevel").cloned().unwrap_or(Value::Null),
            );
            let mut desired_attrs = Map::new();
            desired_attrs.insert("size".into(), json!(size_bytes));
            desired_attrs.insert("service_level".into(), json!(args.service_level));

            let modified = helper.get_modified_attributes(Some(&current_attrs), &desired_attrs);
            let unmodifiable: Vec<String> = modified
                .keys()
                .filter(|k| k.as_str() != "size")
                .cloned()
                .collect();
            if !unmodifiable.is_empty() {
                return Err(Error::UnmodifiableAttributes(unmodifiable));
            }
            resize = modified.contains_key("size");
        }

        if helper.changed && !ctx.check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(pool = %args.name, size = args.size, "creating capacity pool");
                    let body = json!({
                        "location": args.location,
                        "properties": {
                            "serviceLevel": args.service_level,
                            "size": size_bytes,
                        }
                    });
                    client
                        .put(&path, body, "capacity pool")
                        .await
                        .map_err(|e| e.context(format!("Error creating capacity pool {}", args.name)))?;
                }
                Some(CdAction::Delete) => {
                    info!(pool = %args.name, "deleting capacity pool");
                    client
                        .delete(&path, "capacity pool")
                        .await
                        .map_err(|e| e.context(format!("Error deleting capacity pool {}", args.name)))?;
                }
                None if resize => {
                    info!(pool = %args.name, size = args.size, "resizing capacity pool");
                    let body = json!({
                        "location": args.location,
                        "properties": {"size": size_bytes}
                    });
                    client
                        .patch(&path, body, "capacity pool")
                        .await
                        .map_err(|e| e.context(format!("Error updating capacity pool {}", args.name)))?;
                }
                None => {}
            }
        }

        Ok(ModuleResult::new(helper.changed))
    }
}
