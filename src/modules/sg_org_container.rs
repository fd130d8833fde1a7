//! StorageGRID buckets (S3) and containers (Swift) of a tenant
//!
//! Only creation and compliance updates are supported.

use super::connection::StorageGridConnection;
use crate::clients::StorageGridClient;
use crate::domain::ports::{Module, ModuleContext, ModuleResult};
use crate::error::Result;
use crate::reconcile::{parse_args, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const NAME: &str = "sg_org_container";

const CONTAINERS_API: &str = "api/v3/org/containers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    #[default]
    Present,
}

/// S3 Object Lock compliance settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Compliance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period_minutes: Option<u64>,
}

impl Compliance {
    /// API representation, set values only
    fn to_api(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(v) = self.auto_delete {
            out.insert("autoDelete".into(), json!(v));
        }
        if let Some(v) = self.legal_hold {
            out.insert("legalHold".into(), json!(v));
        }
        if let Some(v) = self.retention_period_minutes {
            out.insert("retentionPeriodMinutes".into(), json!(v));
        }
        out
    }
}

/// Parameters of `sg_org_container`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OrgContainerArgs {
    #[serde(flatten)]
    pub connection: StorageGridConnection,
    #[serde(default)]
    pub state: ContainerState,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Compliance>,
}

impl ModuleArgs for OrgContainerArgs {}

/// The `sg_org_container` module
pub struct SgOrgContainer;

#[async_trait]
impl Module for SgOrgContainer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<OrgContainerArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: OrgContainerArgs = parse_args(NAME, args)?;
        let container = ContainerReconciler {
            client: args.connection.client(ctx),
            helper: ReconcileHelper::from_args(&args)?,
            compliance: args.compliance.as_ref().map(Compliance::to_api),
            args,
        };
        container.apply(ctx.check_mode).await
    }
}

struct ContainerReconciler {
    client: StorageGridClient,
    args: OrgContainerArgs,
    compliance: Option<Map<String, Value>>,
    helper: ReconcileHelper,
}

impl ContainerReconciler {
    async fn get_container(&self) -> Result<Option<Value>> {
        let response = self
            .client
            .get(CONTAINERS_API, &[("include", "compliance,region")])
            .await
            .map_err(|e| e.context("Error getting containers"))?;
        Ok(response
            .get("data")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find(|c| c.get("name").and_then(Value::as_str) == Some(self.args.name.as_str()))
            })
            .cloned())
    }

    async fn create_container(&self) -> Result<Value> {
        let mut body = json!({"name": self.args.name, "region": self.args.region});
        if let Some(compliance) = &self.compliance {
            body["compliance"] = Value::Object(compliance.clone());
        }
        let response = self
            .client
            .post(CONTAINERS_API, body)
            .await
            .map_err(|e| e.context("Error creating container"))?;
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn update_compliance(&self, compliance: &Map<String, Value>) -> Result<Value> {
        let api = format!(
            "{}/{}/compliance",
            CONTAINERS_API,
            urlencoding::encode(&self.args.name)
        );
        let response = self
            .client
            .put(&api, Value::Object(compliance.clone()))
            .await
            .map_err(|e| e.context("Error updating container compliance"))?;
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Desired compliance settings that differ from the current ones
    fn compliance_differs(current: &Value, desired: &Map<String, Value>) -> bool {
        let current = current.get("compliance");
        desired
            .iter()
            .any(|(key, value)| current.and_then(|c| c.get(key)) != Some(value))
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let current = self.get_container().await?;
        let desired = self.helper.parameters.clone();
        let cd_action = self.helper.get_cd_action(current.as_ref(), &desired);

        let mut update_compliance = None;
        if let (None, Some(current), Some(compliance)) = (cd_action, &current, &self.compliance) {
            if !compliance.is_empty() && Self::compliance_differs(current, compliance) {
                update_compliance = Some(compliance.clone());
                self.helper.changed = true;
            }
        }

        let mut msg = String::new();
        let mut resp = current.clone().unwrap_or(Value::Null);
        if self.helper.changed && !check_mode {
            if cd_action.is_some() {
                info!(container = %self.args.name, "creating container");
                resp = self.create_container().await?;
                msg = "Org Container created".into();
            } else if let Some(compliance) = &update_compliance {
                info!(container = %self.args.name, "updating container compliance");
                resp = self.update_compliance(compliance).await?;
                msg = "Org Container updated".into();
            }
        }

        Ok(ModuleResult::new(self.helper.changed)
            .with_msg(msg)
            .with_value("resp", resp))
    }
}
