//! NetApp Support Site accounts registered in Cloud Manager

use super::connection::CloudManagerConnection;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::{parse_args, required_if, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const NAME: &str = "cloudmanager_nss_account";

/// Parameters of `cloudmanager_nss_account`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NssAccountArgs {
    #[serde(flatten)]
    pub connection: CloudManagerConnection,
    #[serde(default)]
    pub state: State,
    /// Account name as shown in Cloud Manager
    pub name: String,
    /// Connector client ID
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
}

impl ModuleArgs for NssAccountArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[
                ("username", self.username.is_some()),
                ("password", self.password.is_some()),
            ],
        )
    }
}

/// The `cloudmanager_nss_account` module
pub struct CloudManagerNssAccount;

#[async_trait]
impl Module for CloudManagerNssAccount {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<NssAccountArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: NssAccountArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);
        let headers = client.agent_headers()?;
        let mut helper = ReconcileHelper::from_args(&args)?;

        let reply = client
            .get("/occm/api/accounts", Some(&headers))
            .await
            .map_err(|e| e.context("Error getting NSS accounts"))?;
        let current = reply
            .json()
            .get("nssAccounts")
            .and_then(Value::as_array)
            .and_then(|accounts| {
                accounts
                    .iter()
                    .find(|a| a.get("accountName").and_then(Value::as_str) == Some(args.name.as_str()))
            })
            .map(|account| {
                let mut current = Map::new();
                current.insert("name".into(), account["accountName"].clone());
                current.insert("username".into(), account["nssUserName"].clone());
                current.insert("public_id".into(), account["publicId"].clone());
                Value::Object(current)
            });

        let desired = helper.parameters.clone();
        let cd_action = helper.get_cd_action(current.as_ref(), &desired);

        if helper.changed && !ctx.check_mode {
            match cd_action {
                Some(CdAction::Create) => {
                    info!(account = %args.name, "creating NSS account");
                    let body = json!({
                        "accountName": args.name,
                        "providerKeys": {
                            "nssUserName": args.username,
                            "nssPassword": args.password,
                        }
                    });
                    client
                        .post("/occm/api/accounts/nss", body, Some(&headers))
                        .await
                        .map_err(|e| e.context("Error creating NSS account"))?;
                }
                Some(CdAction::Delete) => {
                    let public_id = args
                        .public_id
                        .as_deref()
                        .or_else(|| current.as_ref().and_then(|c| c["public_id"].as_str()))
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| {
                            Error::api(
                                "Error deleting NSS account",
                                format!("account {} has no publicId", args.name),
                            )
                        })?;
                    info!(account = %args.name, public_id, "deleting NSS account");
                    client
                        .delete(
                            &format!("/occm/api/accounts/{}", urlencoding::encode(public_id)),
                            None,
                            Some(&headers),
                        )
                        .await
                        .map_err(|e| e.context("Error deleting NSS account"))?;
                }
                None => {}
            }
        }

        Ok(ModuleResult::new(helper.changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::HttpMethod;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;

    fn default_args() -> Value {
        json!({
            "state": "present",
            "name": "test_nss_account",
            "username": "username",
            "password": "password",
            "client_id": "client_id",
            "refresh_token": "refrsh_token"
        })
    }

    fn accounts() -> Value {
        json!({
            "nssAccounts": [{
                "accountName": "test_nss_account",
                "nssUserName": "TESTCLOUD1",
                "publicId": "be2f3cac-352a-46b9-a341-a446c35b61c9"
            }]
        })
    }

    #[tokio::test]
    async fn test_create_account() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"nssAccounts": []})).reply(200, json!({}));

        let result = CloudManagerNssAccount
            .run(default_args(), &mock.context())
            .await
            .unwrap();
        assert!(result.changed);

        let requests = mock.requests();
        assert!(requests[2].url.ends_with("/occm/api/accounts/nss"));
        assert_eq!(
            requests[2].json_body().cloned().unwrap(),
            json!({
                "accountName": "test_nss_account",
                "providerKeys": {"nssUserName": "username", "nssPassword": "password"}
            })
        );
        assert_eq!(requests[2].headers["X-Agent-Id"], "client_idclients");
    }

    #[tokio::test]
    async fn test_existing_account_is_unchanged() {
        let mock = MockTransport::new();
        mock.token().reply(200, accounts());
        let result = CloudManagerNssAccount
            .run(default_args(), &mock.context())
            .await
            .unwrap();
        assert!(!result.changed);
    }

    #[tokio::test]
    async fn test_delete_account() {
        let mock = MockTransport::new();
        mock.token().reply(200, accounts()).reply(200, json!({}));

        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerNssAccount.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls()[2].0, HttpMethod::Delete);
        assert!(mock.calls()[2]
            .1
            .ends_with("/occm/api/accounts/be2f3cac-352a-46b9-a341-a446c35b61c9"));
    }

    #[tokio::test]
    async fn test_delete_without_public_id_fails() {
        let mock = MockTransport::new();
        mock.token().reply(
            200,
            json!({"nssAccounts": [{"accountName": "test_nss_account", "nssUserName": "TESTCLOUD1"}]}),
        );

        let mut args = default_args();
        args["state"] = json!("absent");
        let err = CloudManagerNssAccount.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::Api { .. });
        assert!(err.to_string().contains("has no publicId"), "{}", err);
        assert!(mock.calls().iter().all(|(method, _)| *method != HttpMethod::Delete));
    }

    #[tokio::test]
    async fn test_present_requires_credentials() {
        let mock = MockTransport::new();
        let mut args = default_args();
        args.as_object_mut().unwrap().remove("password");
        let err = CloudManagerNssAccount.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
        assert_eq!(
            err.to_string(),
            "state is present but all of the following are missing: password"
        );
    }

    #[tokio::test]
    async fn test_check_mode_skips_delete() {
        let mock = MockTransport::new();
        mock.token().reply(200, accounts());

        let mut args = default_args();
        args["state"] = json!("absent");
        let ctx = mock.context().with_check_mode(true);
        let result = CloudManagerNssAccount.run(args, &ctx).await.unwrap();
        assert!(result.changed);
        assert!(mock.calls().iter().all(|(method, _)| *method != HttpMethod::Delete));
    }
}
