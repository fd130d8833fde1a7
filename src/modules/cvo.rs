//! Cloud Volumes ONTAP working environments
//!
//! The per-provider CVO modules differ only in their parameters and in the
//! creation request they build. Looking the working environment up, resolving
//! the workspace and NSS account, and tracking the create or delete audit
//! task are the same for every provider and live here.

use crate::clients::CloudManagerClient;
use crate::domain::ports::{CdAction, ModuleResult, State};
use crate::error::{Error, Result};
use crate::reconcile::poll::{CVO_CREATE, CVO_DELETE};
use crate::reconcile::{ensure, ReconcileHelper};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Cloud provider hosting a working environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvoProvider {
    Aws,
    Azure,
    Gcp,
}

impl CvoProvider {
    /// Key of this provider's list in `/occm/api/working-environments`
    pub fn list_key(self) -> &'static str {
        match self {
            CvoProvider::Aws => "vsaWorkingEnvironments",
            CvoProvider::Azure => "azureVsaWorkingEnvironments",
            CvoProvider::Gcp => "gcpVsaWorkingEnvironments",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CvoProvider::Aws => "AWS",
            CvoProvider::Azure => "Azure",
            CvoProvider::Gcp => "GCP",
        }
    }
}

/// What a provider module contributes to a CVO run
pub trait CvoRequest {
    fn name(&self) -> &str;
    fn state(&self) -> State;
    fn workspace_id(&self) -> Option<&str>;
    fn nss_account(&self) -> Option<&str>;

    /// Checks that only apply to a creation request
    fn validate_for_create(&self) -> Result<()>;

    /// BYOL licenses with real serial numbers are bound to an NSS account
    fn needs_nss_account(&self) -> bool;

    /// Collection the creation request is posted to
    fn create_api(&self) -> String;

    /// Collection holding `current` when deleting it
    fn delete_api(&self, current: &Value) -> String {
        let _ = current;
        self.create_api()
    }

    /// Creation request body
    fn create_body(&self, tenant_id: &str, nss_account: Option<&str>) -> Value;
}

/// `ontap_version` is only meaningful when the latest version is not forced
pub fn validate_version(use_latest_version: bool, ontap_version: &str) -> Result<()> {
    ensure(
        !(use_latest_version && ontap_version != "latest"),
        "ontap_version parameter not required when having use_latest_version as true",
    )
}

/// A serial number that is set and is not an evaluation serial
pub fn is_licensed_serial(serial: Option<&str>) -> bool {
    serial.is_some_and(|s| !s.starts_with("Eval-"))
}

/// Cloud Manager calls shared by the CVO modules
pub struct CvoClient {
    client: CloudManagerClient,
    headers: BTreeMap<String, String>,
    provider: CvoProvider,
}

impl CvoClient {
    pub fn new(client: CloudManagerClient, provider: CvoProvider) -> Result<Self> {
        Ok(Self {
            headers: client.agent_headers()?,
            client,
            provider,
        })
    }

    pub async fn get_working_environment(&self, name: &str) -> Result<Option<Value>> {
        let reply = self
            .client
            .get("/occm/api/working-environments", Some(&self.headers))
            .await
            .map_err(|e| e.context(format!("Error getting {} CVO", self.provider.label())))?;
        Ok(reply
            .json()
            .get(self.provider.list_key())
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find(|we| we.get("name").and_then(Value::as_str) == Some(name))
            })
            .cloned())
    }

    /// First workspace of the account
    pub async fn get_tenant(&self) -> Result<String> {
        let reply = self
            .client
            .get("/occm/api/tenants", Some(&self.headers))
            .await
            .map_err(|e| e.context(format!("Error getting tenant for {} CVO", self.provider.label())))?;
        reply
            .json()
            .get(0)
            .and_then(|t| t.get("publicId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "tenant".into(),
                name: "workspace".into(),
            })
    }

    /// First NSS account of the account
    pub async fn get_nss(&self) -> Result<String> {
        let reply = self
            .client
            .get("/occm/api/accounts", Some(&self.headers))
            .await
            .map_err(|e| e.context(format!("Error getting NSS account for {} CVO", self.provider.label())))?;
        reply
            .json()
            .get("nssAccounts")
            .and_then(|a| a.get(0))
            .and_then(|a| a.get("publicId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::api("GET /occm/api/accounts", "could not find any NSS account"))
    }

    /// Create the working environment and wait for its audit task
    pub async fn create<R: CvoRequest + ?Sized>(&self, request: &R) -> Result<String> {
        let label = self.provider.label();
        request.validate_for_create()?;

        let tenant_id = match request.workspace_id() {
            Some(id) => id.to_string(),
            None => self.get_tenant().await?,
        };
        let nss_account = match request.nss_account() {
            Some(nss) => Some(nss.to_string()),
            None if request.needs_nss_account() => Some(self.get_nss().await?),
            None => None,
        };
        let body = request.create_body(&tenant_id, nss_account.as_deref());

        let reply = self
            .client
            .post(&request.create_api(), body, Some(&self.headers))
            .await
            .map_err(|e| e.context(format!("Error creating {} CVO", label)))?;
        let working_environment_id = reply
            .json()
            .get("publicId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::api(
                    format!("Error creating {} CVO", label),
                    "response carries no publicId",
                )
            })?;

        let task_api = CloudManagerClient::active_task_api(reply.request_id.as_deref());
        self.client
            .wait_on_completion(&task_api, "CVO", "create", CVO_CREATE)
            .await
            .map_err(|e| e.context(format!("Error waiting for {} CVO creation", label)))?;
        Ok(working_environment_id)
    }

    /// Delete `current` and wait for its audit task
    pub async fn delete<R: CvoRequest + ?Sized>(&self, request: &R, current: &Value) -> Result<()> {
        let label = self.provider.label();
        let public_id = current
            .get("publicId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::api(
                    format!("Error deleting {} CVO", label),
                    format!("working environment {} has no publicId", request.name()),
                )
            })?;

        info!(cvo = %request.name(), public_id, "deleting {} CVO", label);
        let api = format!("{}/{}", request.delete_api(current), urlencoding::encode(public_id));
        let reply = self
            .client
            .delete(&api, None, Some(&self.headers))
            .await
            .map_err(|e| e.context(format!("Error deleting {} CVO", label)))?;

        let task_api = CloudManagerClient::active_task_api(reply.request_id.as_deref());
        self.client
            .wait_on_completion(&task_api, "CVO", "delete", CVO_DELETE)
            .await
            .map_err(|e| e.context(format!("Error waiting for {} CVO deletion", label)))
    }

    /// Create or delete the working environment of `request` as needed
    ///
    /// The result carries the ID of a newly created working environment,
    /// null otherwise. An existing working environment is never modified.
    pub async fn apply<R: CvoRequest + ?Sized>(
        &self,
        request: &R,
        helper: &mut ReconcileHelper,
        check_mode: bool,
    ) -> Result<ModuleResult> {
        let current = self.get_working_environment(request.name()).await?;
        let desired = helper.parameters.clone();
        let cd_action = helper.get_cd_action(current.as_ref(), &desired);

        let mut working_environment_id = Value::Null;
        if helper.changed && !check_mode {
            match (cd_action, &current) {
                (Some(CdAction::Create), _) => {
                    info!(cvo = %request.name(), "creating {} CVO", self.provider.label());
                    working_environment_id = json!(self.create(request).await?);
                }
                (Some(CdAction::Delete), Some(current)) => {
                    self.delete(request, current).await?;
                }
                _ => {}
            }
        }

        let mut result = ModuleResult::new(helper.changed)
            .with_value("working_environment_id", working_environment_id);
        if request.state() == State::Present && cd_action.is_none() {
            warn!(cvo = %request.name(), "working environment already exists");
            result = result.with_warning(format!("{} already exists", request.name()));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CloudManagerConfig;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;
    use std::time::Duration;

    struct Request {
        state: State,
    }

    impl CvoRequest for Request {
        fn name(&self) -> &str {
            "we1"
        }
        fn state(&self) -> State {
            self.state
        }
        fn workspace_id(&self) -> Option<&str> {
            Some("workspace-1")
        }
        fn nss_account(&self) -> Option<&str> {
            None
        }
        fn validate_for_create(&self) -> Result<()> {
            Ok(())
        }
        fn needs_nss_account(&self) -> bool {
            false
        }
        fn create_api(&self) -> String {
            "/occm/api/gcp/vsa/working-environments".into()
        }
        fn create_body(&self, tenant_id: &str, _: Option<&str>) -> Value {
            json!({"name": "we1", "tenantId": tenant_id})
        }
    }

    fn cvo_client(mock: &std::sync::Arc<MockTransport>) -> CvoClient {
        let client = CloudManagerClient::new(
            CloudManagerConfig::new("refresh").with_client_id("abc"),
            mock.clone(),
        )
        .with_poll_interval(Some(Duration::ZERO));
        CvoClient::new(client, CvoProvider::Gcp).unwrap()
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version(true, "latest").is_ok());
        assert!(validate_version(false, "9.10.1").is_ok());
        assert_matches!(validate_version(true, "9.10.1"), Err(Error::InvalidParameter(_)));
    }

    #[test]
    fn test_licensed_serial() {
        assert!(is_licensed_serial(Some("90920130000000001020")));
        assert!(!is_licensed_serial(Some("Eval-90920130000000001020")));
        assert!(!is_licensed_serial(None));
    }

    #[tokio::test]
    async fn test_lookup_uses_provider_list() {
        let mock = MockTransport::new();
        mock.token().reply(
            200,
            json!({
                "vsaWorkingEnvironments": [{"name": "we1", "publicId": "aws-1"}],
                "gcpVsaWorkingEnvironments": [{"name": "we1", "publicId": "gcp-1"}]
            }),
        );
        let found = cvo_client(&mock).get_working_environment("we1").await.unwrap();
        assert_eq!(found.unwrap()["publicId"], "gcp-1");
    }

    #[tokio::test]
    async fn test_delete_requires_public_id() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"gcpVsaWorkingEnvironments": [{"name": "we1"}]}));

        let request = Request { state: State::Absent };
        let mut helper = ReconcileHelper::new();
        helper.parameters.insert("state".into(), json!("absent"));
        let err = cvo_client(&mock)
            .apply(&request, &mut helper, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no publicId"), "{}", err);
        assert!(mock.calls().iter().all(|(method, _)| *method != crate::domain::ports::HttpMethod::Delete));
    }

    #[tokio::test]
    async fn test_create_requires_public_id() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"gcpVsaWorkingEnvironments": []}))
            .reply(200, json!({}));

        let request = Request { state: State::Present };
        let mut helper = ReconcileHelper::new();
        let err = cvo_client(&mock)
            .apply(&request, &mut helper, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no publicId"), "{}", err);
    }
}
