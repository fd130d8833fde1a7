//! Azure NetApp Files accounts

use super::connection::AzureConnection;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::Result;
use crate::reconcile::{parse_args, required_if, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

pub const NAME: &str = "azure_netapp_account";

/// Parameters of `azure_netapp_account`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountArgs {
    #[serde(flatten)]
    pub connection: AzureConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl ModuleArgs for AccountArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[("location", self.location.is_some())],
        )
    }
}

/// The `azure_netapp_account` module
pub struct AzureNetAppAccount;

#[async_trait]
impl Module for AzureNetAppAccount {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<AccountArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: AccountArgs = parse_args(NAME, args)?;
        let client = args.connection.client(ctx);
        let mut helper = ReconcileHelper::from_args(&args)?;
        let path = client.account_path(&args.connection.resource_group, &args.name);

        let current = client
            .get(&path)
            .await
            .map_err(|e| e.context(format!("Error getting Azure NetApp account {}", args.name)))?;
        let desired = helper.parameters.clone();
        let cd_action = helper.get_cd_action(current.as_ref(), &desired);

        let mut modify = None;
        if let (None, Some(current), Some(tags)) = (cd_action, &current, &args.tags) {
            let mut current_tags = Map::new();
            current_tags.insert(
                "tags".into(),
                current.get("tags").cloned().unwrap_or_else(|| json!({})),
            );
            let mut desired_tags = Map::new();
            desired_tags.insert("tags".into(), json!(tags));
            let modified = helper.get_modified_attributes(Some(&current_tags), &desired_tags);
            modify = modified.get("tags").cloned();
        }

        if helper.changed && !ctx.check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(account = %args.name, "creating Azure NetApp account");
                    let body = json!({
                        "location": args.location,
                        "tags": args.tags.clone().unwrap_or_default(),
                    });
                    client
                        .put(&path, body, "account")
                        .await
                        .map_err(|e| e.context(format!("Error creating Azure NetApp account {}", args.name)))?;
                }
                Some(CdAction::Delete) => {
                    info!(account = %args.name, "deleting Azure NetApp account");
                    client
                        .delete(&path, "account")
                        .await
                        .map_err(|e| e.context(format!("Error deleting Azure NetApp account {}", args.name)))?;
                }
                None => {
                    if let Some(tags) = modify {
                        info!(account = %args.name, "updating Azure NetApp account tags");
                        client
                            .patch(&path, json!({"tags": tags}), "account")
                            .await
                            .map_err(|e| {
                                e.context(format!("Error updating Azure NetApp account {}", args.name))
                            })?;
                    }
                }
            }
        }

        Ok(ModuleResult::new(helper.changed))
    }
}
