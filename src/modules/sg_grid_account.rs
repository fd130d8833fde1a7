//! StorageGRID tenant accounts, managed from the grid administration API
//!
//! The account is looked up by name. Capabilities and policy (identity
//! source, platform services, quota) are updated in place. The root user
//! password is only sent on creation unless `update_password` is `always`.

use super::connection::StorageGridConnection;
use crate::clients::StorageGridClient;
use crate::domain::ports::{CdAction, Module, ModuleContext, ModuleResult, State};
use crate::error::Result;
use crate::reconcile::{parse_args, required_if, schema_of, size_to_bytes, ModuleArgs, ReconcileHelper, SizeUnit};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const NAME: &str = "sg_grid_account";

const ACCOUNTS_API: &str = "api/v3/grid/accounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    S3,
    Swift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePassword {
    Always,
    #[default]
    OnCreate,
}

fn default_true() -> bool {
    true
}

/// Parameters of `sg_grid_account`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GridAccountArgs {
    #[serde(flatten)]
    pub connection: StorageGridConnection,
    #[serde(default)]
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Grant access to the tenant manager
    #[serde(default = "default_true")]
    pub management: bool,
    #[serde(default)]
    pub use_own_identity_source: bool,
    #[serde(default)]
    pub allow_platform_services: bool,
    /// Group granted root access on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_access_group: Option<String>,
    /// Storage quota, 0 for unlimited
    #[serde(default)]
    pub quota_size: u64,
    #[serde(default)]
    pub quota_size_unit: SizeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub update_password: UpdatePassword,
}

impl ModuleArgs for GridAccountArgs {
    fn validate(&self) -> Result<()> {
        required_if(
            self.state == State::Present,
            "state is present",
            &[("name", self.name.is_some()), ("protocol", self.protocol.is_some())],
        )?;
        required_if(
            self.state == State::Absent,
            "state is absent",
            &[("name", self.name.is_some() || self.account_id.is_some())],
        )
    }
}

impl GridAccountArgs {
    /// Account document as the grid API represents it
    fn account_data(&self) -> Map<String, Value> {
        let mut capabilities = Vec::new();
        if self.management {
            capabilities.push(json!("management"));
        }
        if let Some(protocol) = self.protocol {
            capabilities.push(json!(protocol));
        }

        let quota = match self.quota_size {
            0 => Value::Null,
            size => json!(size_to_bytes(size, self.quota_size_unit)),
        };

        let mut data = Map::new();
        if let Some(name) = &self.name {
            data.insert("name".into(), json!(name));
        }
        data.insert("capabilities".into(), Value::Array(capabilities));
        data.insert(
            "policy".into(),
            json!({
                "useAccountIdentitySource": self.use_own_identity_source,
                "allowPlatformServices": self.allow_platform_services,
                "quotaObjectBytes": quota,
            }),
        );
        data
    }
}

/// The `sg_grid_account` module
pub struct SgGridAccount;

#[async_trait]
impl Module for SgGridAccount {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<GridAccountArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: GridAccountArgs = parse_args(NAME, args)?;
        let account = GridAccountReconciler {
            client: args.connection.client(ctx),
            helper: ReconcileHelper::from_args(&args)?,
            data: args.account_data(),
            args,
        };
        account.apply(ctx.check_mode).await
    }
}

struct GridAccountReconciler {
    client: StorageGridClient,
    args: GridAccountArgs,
    data: Map<String, Value>,
    helper: ReconcileHelper,
}

impl GridAccountReconciler {
    /// Account ID from the parameters or a name search
    async fn get_account_id(&self) -> Result<Option<String>> {
        if let Some(id) = &self.args.account_id {
            return Ok(Some(id.clone()));
        }
        let response = self
            .client
            .get(ACCOUNTS_API, &[("limit", "350")])
            .await
            .map_err(|e| e.context("Error getting grid accounts"))?;
        Ok(response
            .get("data")
            .and_then(Value::as_array)
            .and_then(|accounts| {
                accounts
                    .iter()
                    .find(|a| a.get("name").and_then(Value::as_str) == self.args.name.as_deref())
            })
            .and_then(|a| a.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn get_account(&self, id: &str) -> Result<Option<Value>> {
        let api = format!("{}/{}", ACCOUNTS_API, id);
        let response = self
            .client
            .get(&api, &[])
            .await
            .map_err(|e| e.context("Error getting grid account"))?;
        Ok(response.get("data").filter(|d| !d.is_null()).cloned())
    }

    async fn create_account(&self) -> Result<Value> {
        let mut body = Value::Object(self.data.clone());
        if let Some(password) = &self.args.password {
            body["password"] = json!(password);
        }
        if let Some(group) = &self.args.root_access_group {
            body["grantRootAccessToGroup"] = json!(group);
        }
        let response = self
            .client
            .post(ACCOUNTS_API, body)
            .await
            .map_err(|e| e.context("Error creating grid account"))?;
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn update_account(&self, id: &str) -> Result<Value> {
        let api = format!("{}/{}", ACCOUNTS_API, id);
        let response = self
            .client
            .put(&api, Value::Object(self.data.clone()))
            .await
            .map_err(|e| e.context("Error updating grid account"))?;
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn set_root_password(&self, id: &str) -> Result<()> {
        let api = format!("{}/{}/change-password", ACCOUNTS_API, id);
        let body = json!({"password": self.args.password});
        self.client
            .post(&api, body)
            .await
            .map_err(|e| e.context("Error setting grid account root password"))?;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<()> {
        let api = format!("{}/{}", ACCOUNTS_API, id);
        self.client
            .delete(&api)
            .await
            .map_err(|e| e.context("Error deleting grid account"))?;
        Ok(())
    }

    async fn apply(mut self, check_mode: bool) -> Result<ModuleResult> {
        let account_id = self.get_account_id().await?;
        let current = match &account_id {
            Some(id) => self.get_account(id).await?,
            None => None,
        };

        let desired = self.helper.parameters.clone();
        let cd_action = self.helper.get_cd_action(current.as_ref(), &desired);

        let mut modify = false;
        let mut change_password = false;
        if cd_action.is_none() && self.args.state == State::Present {
            let current_map = current.as_ref().and_then(Value::as_object);
            modify = !self
                .helper
                .get_modified_attributes(current_map, &self.data)
                .is_empty();
            if self.args.update_password == UpdatePassword::Always && self.args.password.is_some() {
                change_password = true;
                self.helper.changed = true;
            }
        }

        let mut resp = current.clone().unwrap_or(Value::Null);
        let mut msg = "No changes required".to_string();

        if self.helper.changed && !check_mode {
            let id = account_id.as_deref().unwrap_or_default();
            match cd_action {
                Some(CdAction::Create) => {
                    info!(account = ?self.args.name, "creating grid account");
                    resp = self.create_account().await?;
                    msg = "Tenant Account created".into();
                }
                Some(CdAction::Delete) => {
                    info!(account = %id, "deleting grid account");
                    self.delete_account(id).await?;
                    resp = Value::Null;
                    msg = "Tenant Account deleted".into();
                }
                None => {
                    let mut done = Vec::new();
                    if modify {
                        info!(account = %id, "updating grid account");
                        resp = self.update_account(id).await?;
                        done.push("Tenant Account updated");
                    }
                    if change_password {
                        info!(account = %id, "setting root password");
                        self.set_root_password(id).await?;
                        done.push("Tenant Account root password updated");
                    }
                    msg = done.join(", ");
                }
            }
        }

        Ok(ModuleResult::new(self.helper.changed)
            .with_msg(msg)
            .with_value("resp", resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::HttpMethod;
    use crate::error::Error;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;

    const ID: &str = "12345678901234567890";

    fn default_args() -> Value {
        json!({
            "state": "present",
            "name": "TestTenantAccount",
            "protocol": "s3",
            "management": true,
            "use_own_identity_source": true,
            "allow_platform_services": false,
            "password": "abc123",
            "quota_size": 0,
            "api_url": "gmi.example.com",
            "auth_token": "01234567-5678-9abc-78de-9fgabc123def",
            "validate_certs": false
        })
    }

    fn record(quota: Value) -> Value {
        json!({
            "name": "TestTenantAccount",
            "capabilities": ["management", "s3"],
            "policy": {
                "useAccountIdentitySource": true,
                "allowPlatformServices": false,
                "quotaObjectBytes": quota
            },
            "id": ID
        })
    }

    fn accounts() -> Value {
        json!({"data": [record(Value::Null)]})
    }

    #[tokio::test]
    async fn test_create_account() {
        let mock = MockTransport::new();
        mock.reply(200, json!({"data": []}))
            .reply(200, json!({"data": record(Value::Null)}));

        let result = SgGridAccount.run(default_args(), &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.msg.as_deref(), Some("Tenant Account created"));
        assert_eq!(result.extra["resp"]["id"], ID);

        let requests = mock.requests();
        assert_eq!(requests[0].query, vec![("limit".to_string(), "350".to_string())]);
        let body = requests[1].json_body().cloned().unwrap();
        assert_eq!(body["capabilities"], json!(["management", "s3"]));
        assert_eq!(body["password"], "abc123");
        assert_eq!(body["policy"]["quotaObjectBytes"], Value::Null);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let mock = MockTransport::new();
        mock.reply(200, accounts())
            .reply(200, json!({"data": record(Value::Null)}));
        let result = SgGridAccount.run(default_args(), &mock.context()).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.extra["resp"]["name"], "TestTenantAccount");
    }

    #[tokio::test]
    async fn test_update_quota() {
        let mock = MockTransport::new();
        mock.reply(200, accounts())
            .reply(200, json!({"data": record(json!(10_737_418_240u64))}))
            .reply(200, json!({"data": record(json!(21_474_836_480u64))}));

        let mut args = default_args();
        args["quota_size"] = json!(20480);
        args["quota_size_unit"] = json!("mb");
        let result = SgGridAccount.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);

        let requests = mock.requests();
        assert_eq!(requests[2].method, HttpMethod::Put);
        assert!(requests[2].url.ends_with(&format!("api/v3/grid/accounts/{}", ID)));
        assert_eq!(
            requests[2].json_body().unwrap()["policy"]["quotaObjectBytes"],
            json!(21_474_836_480u64)
        );
        assert!(requests[2].json_body().unwrap().get("password").is_none());
    }

    #[tokio::test]
    async fn test_update_and_set_password() {
        let mock = MockTransport::new();
        mock.reply(200, accounts())
            .reply(200, json!({"data": record(json!(10_737_418_240u64))}))
            .reply(200, json!({"data": record(json!(21_474_836_480u64))}))
            .reply(204, Value::Null);

        let mut args = default_args();
        args["quota_size"] = json!(20480);
        args["quota_size_unit"] = json!("mb");
        args["update_password"] = json!("always");
        let result = SgGridAccount.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(
            result.msg.as_deref(),
            Some("Tenant Account updated, Tenant Account root password updated")
        );
        assert!(mock.calls()[3].1.ends_with("/change-password"));
    }

    #[tokio::test]
    async fn test_set_password_only() {
        let mock = MockTransport::new();
        mock.reply(200, accounts())
            .reply(200, json!({"data": record(Value::Null)}))
            .reply(204, Value::Null);

        let mut args = default_args();
        args["update_password"] = json!("always");
        let result = SgGridAccount.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls().len(), 3);
        assert_eq!(
            mock.requests()[2].json_body().cloned().unwrap(),
            json!({"password": "abc123"})
        );
    }

    #[tokio::test]
    async fn test_delete_account() {
        let mock = MockTransport::new();
        mock.reply(200, accounts())
            .reply(200, json!({"data": record(Value::Null)}))
            .reply(204, Value::Null);

        let args = json!({
            "state": "absent",
            "name": "TestTenantAccount",
            "protocol": "s3",
            "api_url": "gmi.example.com",
            "auth_token": "01234567-5678-9abc-78de-9fgabc123def",
            "validate_certs": false
        });
        let result = SgGridAccount.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls()[2].0, HttpMethod::Delete);
    }

    #[tokio::test]
    async fn test_check_mode() {
        let mock = MockTransport::new();
        mock.reply(200, json!({"data": []}));
        let ctx = mock.context().with_check_mode(true);
        let result = SgGridAccount.run(default_args(), &ctx).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_api_url() {
        let mock = MockTransport::new();
        let mut args = default_args();
        args.as_object_mut().unwrap().remove("api_url");
        let err = SgGridAccount.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::MissingParameters(ref names) if names == &vec!["api_url".to_string()]);
    }
}
