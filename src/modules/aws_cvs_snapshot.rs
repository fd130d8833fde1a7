//! Snapshots of AWS Cloud Volumes Service file systems
//!
//! Every mutation returns a job that is polled until it is `done`.
//! A snapshot is renamed in place when `from_name` names an existing one.

use super::connection::AwsCvsConnection;
use crate::clients::AwsCvsClient;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::poll::AWS_CVS_JOB;
use crate::reconcile::{parse_args, required_if, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

pub const NAME: &str = "aws_cvs_snapshot";

/// Parameters of `aws_cvs_snapshot`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotArgs {
    #[serde(flatten)]
    pub connection: AwsCvsConnection,
    #[serde(default)]
    pub state: State,
    pub region: String,
    pub name: String,
    /// File system ID or creation token
    #[serde(rename = "fileSystemId", default, skip_serializing_if = "Option::is_none")]
    pub file_system_id: Option<String>,
    /// Existing snapshot to rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
}

impl ModuleArgs for SnapshotArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[("fileSystemId", self.file_system_id.is_some())],
        )
    }
}

/// The `aws_cvs_snapshot` module
pub struct AwsCvsSnapshot;

#[async_trait]
impl Module for AwsCvsSnapshot {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<SnapshotArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: SnapshotArgs = parse_args(NAME, args)?;
        let snapshot = SnapshotReconciler {
            client: args.connection.client(ctx),
            helper: ReconcileHelper::from_args(&args)?,
            args,
        };
        snapshot.apply(ctx.check_mode).await
    }
}

struct SnapshotReconciler {
    client: AwsCvsClient,
    args: SnapshotArgs,
    helper: ReconcileHelper,
}

impl SnapshotReconciler {
    async fn get_snapshot(&self, name: &str) -> Result<Option<Value>> {
        let snapshots = self
            .client
            .get("Snapshots")
            .await
            .map_err(|e| e.context("Error getting snapshots"))?;
        Ok(snapshots
            .as_array()
            .and_then(|list| {
                list.iter()
                    .find(|s| s.get("name").and_then(Value::as_str) == Some(name))
            })
            .cloned())
    }

    /// Resolve the file system from its ID or creation token
    async fn get_file_system_id(&self) -> Result<String> {
        let wanted = self.args.file_system_id.as_deref().unwrap_or_default();
        let file_systems = self
            .client
            .get("FileSystems")
            .await
            .map_err(|e| e.context("Error getting file systems"))?;
        file_systems
            .as_array()
            .and_then(|list| {
                list.iter().find(|fs| {
                    fs.get("fileSystemId").and_then(Value::as_str) == Some(wanted)
                        || fs.get("creationToken").and_then(Value::as_str) == Some(wanted)
                })
            })
            .and_then(|fs| fs.get("fileSystemId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "filesystem".into(),
                name: wanted.to_string(),
            })
    }

    /// Poll the first job of a mutation response
    async fn wait_for_job(&self, response: &Value, task: &str) -> Result<()> {
        let Some(job_id) = response
            .pointer("/jobs/0/jobId")
            .and_then(Value::as_str)
        else {
            return Ok(());
        };
        self.client
            .get_state(job_id, "snapshot", task, AWS_CVS_JOB)
            .await
    }

    async fn create_snapshot(&self, file_system_id: &str) -> Result<()> {
        let api = format!("FileSystems/{}/Snapshots", file_system_id);
        let body = json!({"name": self.args.name, "region": self.args.region});
        let response = self
            .client
            .post(&api, body)
            .await
            .map_err(|e| e.context("Error creating snapshot"))?;
        self.wait_for_job(&response, "create").await
    }

    async fn rename_snapshot(&self, file_system_id: &str, snapshot_id: &str) -> Result<()> {
        let api = format!("FileSystems/{}/Snapshots/{}", file_system_id, snapshot_id);
        let body = json!({"name": self.args.name, "region": self.args.region});
        let response = self
            .client
            .put(&api, body)
            .await
            .map_err(|e| e.context("Error renaming snapshot"))?;
        self.wait_for_job(&response, "rename").await
    }

    async fn delete_snapshot(&self, file_system_id: &str, snapshot_id: &str) -> Result<()> {
        let api = format!("FileSystems/{}/Snapshots/{}", file_system_id, snapshot_id);
        let response = self
            .client
            .delete(&api)
            .await
            .map_err(|e| e.context("Error deleting snapshot"))?;
        self.wait_for_job(&response, "delete").await
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let current = self.get_snapshot(&self.args.name).await?;
        let desired = self.helper.parameters.clone();
        let mut cd_action = self.helper.get_cd_action(current.as_ref(), &desired);

        let mut rename_from = None;
        if cd_action == Some(CdAction::Create) {
            if let Some(from_name) = &self.args.from_name {
                let source = self.get_snapshot(from_name).await?.ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "Error renaming snapshot: {} - no snapshot with from_name: {}",
                        self.args.name, from_name
                    ))
                })?;
                rename_from = Some(source);
                cd_action = None;
            }
        }

        if self.helper.changed && !check_mode {
            let field = |s: &Value, key: &str| s.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            match (cd_action, &rename_from, &current) {
                (Some(CdAction::Create), _, _) => {
                    let file_system_id = self.get_file_system_id().await?;
                    info!(snapshot = %self.args.name, file_system = %file_system_id, "creating snapshot");
                    self.create_snapshot(&file_system_id).await?;
                }
                (None, Some(source), _) => {
                    let file_system_id = self.get_file_system_id().await?;
                    let snapshot_id = field(source, "snapshotId");
                    info!(snapshot = %self.args.name, snapshot_id = %snapshot_id, "renaming snapshot");
                    self.rename_snapshot(&file_system_id, &snapshot_id).await?;
                }
                (Some(CdAction::Delete), _, Some(current)) => {
                    let file_system_id = field(current, "fileSystemId");
                    let snapshot_id = field(current, "snapshotId");
                    info!(snapshot = %self.args.name, snapshot_id = %snapshot_id, "deleting snapshot");
                    self.delete_snapshot(&file_system_id, &snapshot_id).await?;
                }
                _ => {}
            }
        }

        Ok(ModuleResult::new(self.helper.changed))
    }
}
