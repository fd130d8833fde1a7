//! Node inventory from Active IQ Unified Manager

use super::connection::UnifiedManagerConnection;
use crate::domain::ports::{Module, ModuleContext, ModuleResult};
use crate::error::Result;
use crate::reconcile::{parse_args, schema_of, ModuleArgs};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const NAME: &str = "um_list_nodes";

const NODES_API: &str = "datacenter/cluster/nodes";

/// Parameters of `um_list_nodes`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListNodesArgs {
    #[serde(flatten)]
    pub connection: UnifiedManagerConnection,
}

impl ModuleArgs for ListNodesArgs {}

/// The `um_list_nodes` module
pub struct UmListNodes;

#[async_trait]
impl Module for UmListNodes {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<ListNodesArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: ListNodesArgs = parse_args(NAME, args)?;
        let client = args.connection.client(ctx);

        let records = client.get_records(NODES_API).await;
        for (status, content) in client.debug_logs() {
            debug!(?status, content = %content, "unified manager exchange");
        }
        let records = records.map_err(|e| e.context("Error fetching nodes"))?;

        // info modules always report a change
        Ok(ModuleResult::new(true).with_value("records", records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn default_args() -> Value {
        json!({
            "hostname": "um.example.com",
            "username": "admin",
            "password": "secret",
            "validate_certs": false
        })
    }

    #[tokio::test]
    async fn test_list_nodes_follows_pages() {
        let mock = MockTransport::new();
        mock.reply(
            200,
            json!({
                "records": [{"name": "node1"}],
                "_links": {"next": {"href": "/api/datacenter/cluster/nodes?max_records=1&offset=1"}}
            }),
        )
        .reply(200, json!({"records": [{"name": "node2"}], "_links": {}}));

        let result = UmListNodes.run(default_args(), &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.extra["records"], json!([{"name": "node1"}, {"name": "node2"}]));

        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://um.example.com/api/datacenter/cluster/nodes");
        assert_eq!(
            requests[0].basic_auth,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert!(!requests[0].verify_tls);
        assert!(requests[1].query.contains(&("offset".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_list_nodes_error() {
        let mock = MockTransport::new();
        mock.reply(200, json!({"error": {"message": "access denied"}}));
        let err = UmListNodes.run(default_args(), &mock.context()).await.unwrap_err();
        assert!(err.to_string().starts_with("Error fetching nodes"), "{}", err);
    }

    #[tokio::test]
    async fn test_custom_port() {
        let mock = MockTransport::new();
        mock.reply(200, json!({"records": []}));
        let mut args = default_args();
        args["http_port"] = json!(8443);
        let result = UmListNodes.run(args, &mock.context()).await.unwrap();
        assert_eq!(result.extra["records"], json!([]));
        assert!(mock.calls()[0].1.starts_with("https://um.example.com:8443/api/"));
    }
}
