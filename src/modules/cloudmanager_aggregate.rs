//! Cloud Volumes ONTAP aggregates through Cloud Manager
//!
//! An existing aggregate can only grow: a larger `number_of_disks` adds the
//! difference, a smaller one fails.

use super::connection::CloudManagerConnection;
use crate::clients::cloudmanager::api_root_path;
use crate::clients::CloudManagerClient;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::{ensure, parse_args, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

pub const NAME: &str = "cloudmanager_aggregate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DiskSizeUnit {
    #[default]
    GB,
    TB,
}

/// Parameters of `cloudmanager_aggregate`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AggregateArgs {
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
    pub number_of_disks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_size: Option<u64>,
    #[serde(default)]
    pub disk_size_unit: DiskSizeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u64>,
}

impl ModuleArgs for AggregateArgs {
    fn validate(&self) -> Result<()> {
        ensure(
            self.working_environment_id.is_some() || self.working_environment_name.is_some(),
            "one of the following is required: working_environment_name, working_environment_id",
        )
    }
}

/// The `cloudmanager_aggregate` module
pub struct CloudManagerAggregate;

#[async_trait]
impl Module for CloudManagerAggregate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<AggregateArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: AggregateArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);
        let working_environment = client
            .resolve_working_environment(
                args.working_environment_id.as_deref(),
                args.working_environment_name.as_deref(),
            )
            .await?;
        let working_environment_id = working_environment
            .get("publicId")
            .and_then(Value::as_str)
            .or(args.working_environment_id.as_deref())
            .unwrap_or_default()
            .to_string();

        let aggregate = AggregateReconciler {
            headers: client.agent_headers()?,
            root: api_root_path(&working_environment),
            client,
            working_environment_id,
            helper: ReconcileHelper::from_args(&args)?,
            args,
        };
        aggregate.apply(ctx.check_mode).await
    }
}

struct AggregateReconciler {
    client: CloudManagerClient,
    root: String,
    headers: BTreeMap<String, String>,
    working_environment_id: String,
    args: AggregateArgs,
    helper: ReconcileHelper,
}

impl AggregateReconciler {
    async fn get_aggregate(&self) -> Result<Option<Value>> {
        let api = format!("{}/aggregates/{}", self.root, self.working_environment_id);
        let reply = self
            .client
            .get(&api, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error getting aggregate"))?;

        Ok(reply
            .json()
            .as_array()
            .and_then(|aggregates| {
                aggregates
                    .iter()
                    .find(|a| a.get("name").and_then(Value::as_str) == Some(self.args.name.as_str()))
            })
            .cloned())
    }

    async fn create_aggregate(&self) -> Result<()> {
        self.helper
            .require_parameters(&["number_of_disks", "disk_size_size", "disk_size_unit"])?;
        let mut body = json!({
            "name": self.args.name,
            "workingEnvironmentId": self.working_environment_id,
            "numberOfDisks": self.args.number_of_disks,
            "diskSize": {
                "size": self.args.disk_size_size,
                "unit": self.args.disk_size_unit,
            },
        });
        if let Some(home_node) = &self.args.home_node {
            body["homeNode"] = json!(home_node);
        }
        if let Some(provider_volume_type) = &self.args.provider_volume_type {
            body["providerVolumeType"] = json!(provider_volume_type);
        }
        if let Some(capacity_tier) = &self.args.capacity_tier {
            body["capacityTier"] = json!(capacity_tier);
        }
        if let Some(iops) = self.args.iops {
            body["iops"] = json!(iops);
        }

        self.client
            .post(&format!("{}/aggregates", self.root), body, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error creating aggregate"))?;
        Ok(())
    }

    async fn add_disks(&self, count: u32) -> Result<()> {
        let api = format!(
            "{}/aggregates/{}/{}/disks",
            self.root,
            self.working_environment_id,
            urlencoding::encode(&self.args.name)
        );
        self.client
            .post(&api, json!({"numberOfDisks": count}), Some(&self.headers))
            .await
            .map_err(|e| e.context("Error updating aggregate"))?;
        Ok(())
    }

    async fn delete_aggregate(&self) -> Result<()> {
        let api = format!(
            "{}/aggregates/{}/{}",
            self.root,
            self.working_environment_id,
            urlencoding::encode(&self.args.name)
        );
        self.client
            .delete(&api, None, Some(&self.headers))
            .await
            .map_err(|e| e.context("Error deleting aggregate"))?;
        Ok(())
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let current = self.get_aggregate().await?;
        let desired = self.helper.parameters.clone();
        let cd_action = self.helper.get_cd_action(current.as_ref(), &desired);

        let mut disks_to_add = 0;
        if let (None, Some(current), Some(wanted)) = (cd_action, &current, self.args.number_of_disks) {
            let have = current
                .get("disks")
                .and_then(Value::as_array)
                .map_or(0, |d| u32::try_from(d.len()).unwrap_or(u32::MAX));
            if wanted < have {
                return Err(Error::InvalidParameter(
                    "Error: Only add disk support. number_of_disks cannot be reduced".into(),
                ));
            }
            if wanted > have {
                disks_to_add = wanted - have;
                self.helper.changed = true;
            }
        }

        if self.helper.changed && !check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(aggregate = %self.args.name, "creating aggregate");
                    self.create_aggregate().await?;
                }
                Some(CdAction::Delete) => {
                    info!(aggregate = %self.args.name, "deleting aggregate");
                    self.delete_aggregate().await?;
                }
                None if disks_to_add > 0 => {
                    info!(aggregate = %self.args.name, disks_to_add, "adding disks");
                    self.add_disks(disks_to_add).await?;
                }
                None => {}
            }
        }

        Ok(ModuleResult::new(self.helper.changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::HttpMethod;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;

    const ROOT: &str = "https://cloudmanager.cloud.netapp.com/occm/api/aws/ha";
    const WE: &str = "VsaWorkingEnvironment-abcdefg12345";

    fn default_args() -> Value {
        json!({
            "state": "present",
            "name": "TestA",
            "working_environment_id": WE,
            "client_id": "Nw4Q2O1kdnLtvhwegGalFnodEHUfPJWh",
            "number_of_disks": 2,
            "disk_size_size": 100,
            "disk_size_unit": "GB",
            "refresh_token": "myrefresh_token"
        })
    }

    fn with_aggregates(mock: &MockTransport, aggregates: Value) {
        mock.token()
            .reply(
                200,
                json!({"publicId": WE, "cloudProviderName": "Amazon", "isHA": true}),
            )
            .reply(200, aggregates);
    }

    fn existing() -> Value {
        json!([{
            "name": "TestA",
            "state": "online",
            "disks": [
                {"device": "xvdh vol-313", "position": "data", "name": "testAWSa-01-i-12h"},
                {"device": "xvdi vol-314", "position": "data", "name": "testAWSa-01-i-12i"}
            ],
            "homeNode": "testAWSa-01"
        }])
    }

    #[tokio::test]
    async fn test_create_aggregate() {
        let mock = MockTransport::new();
        with_aggregates(&mock, json!([]));
        mock.reply(200, json!({}));

        let result = CloudManagerAggregate.run(default_args(), &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls()[2], (HttpMethod::Get, format!("{}/aggregates/{}", ROOT, WE)));
        assert_eq!(mock.calls()[3], (HttpMethod::Post, format!("{}/aggregates", ROOT)));
        let body = mock.requests()[3].json_body().cloned().unwrap();
        assert_eq!(body["numberOfDisks"], 2);
        assert_eq!(body["diskSize"], json!({"size": 100, "unit": "GB"}));
        assert_eq!(body["workingEnvironmentId"], WE);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let mock = MockTransport::new();
        with_aggregates(&mock, existing());
        let result = CloudManagerAggregate.run(default_args(), &mock.context()).await.unwrap();
        assert!(!result.changed);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_add_disks() {
        let mock = MockTransport::new();
        with_aggregates(&mock, existing());
        mock.reply(200, json!({}));

        let mut args = default_args();
        args["number_of_disks"] = json!(3);
        let result = CloudManagerAggregate.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(
            mock.calls()[3],
            (HttpMethod::Post, format!("{}/aggregates/{}/TestA/disks", ROOT, WE))
        );
        assert_eq!(mock.requests()[3].json_body().unwrap()["numberOfDisks"], 1);
    }

    #[tokio::test]
    async fn test_missing_disk_list_counts_as_empty() {
        let mock = MockTransport::new();
        with_aggregates(&mock, json!([{"name": "TestA", "state": "online"}]));
        mock.reply(200, json!({}));

        let result = CloudManagerAggregate.run(default_args(), &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.requests()[3].json_body().unwrap()["numberOfDisks"], 2);
    }

    #[tokio::test]
    async fn test_cannot_remove_disks() {
        let mock = MockTransport::new();
        with_aggregates(&mock, existing());
        let mut args = default_args();
        args["number_of_disks"] = json!(1);
        let err = CloudManagerAggregate.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
    }

    #[tokio::test]
    async fn test_delete_aggregate() {
        let mock = MockTransport::new();
        with_aggregates(&mock, existing());
        mock.reply(200, json!({}));

        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerAggregate.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(
            mock.calls()[3],
            (HttpMethod::Delete, format!("{}/aggregates/{}/TestA", ROOT, WE))
        );
    }

    #[tokio::test]
    async fn test_create_requires_disks() {
        let mock = MockTransport::new();
        with_aggregates(&mock, json!([]));
        let mut args = default_args();
        args.as_object_mut().unwrap().remove("number_of_disks");
        let err = CloudManagerAggregate.run(args, &mock.context()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing required arguments: number_of_disks");
    }

    #[tokio::test]
    async fn test_check_mode() {
        let mock = MockTransport::new();
        with_aggregates(&mock, existing());
        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerAggregate
            .run(args, &mock.context().with_check_mode(true))
            .await
            .unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls().len(), 3);
    }
}
