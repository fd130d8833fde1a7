//! Cloud Manager REST Client
//!
//! Talks to the Cloud Manager (OCCM) control plane. Authentication uses an
//! Auth0 refresh token exchanged for a short-lived access token. Calls routed
//! through a Connector carry the `X-Agent-Id` header derived from its client
//! ID.

use crate::domain::ports::{ApiRequest, HttpMethod, TransportRef};
use crate::error::{Error, Result};
use crate::reconcile::poll::{
    self, PollPolicy, StatusSource, TaskStatus, STATUS_NETWORK_DELAY, STATUS_NETWORK_RETRIES,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const CLOUD_MANAGER_HOST: &str = "https://cloudmanager.cloud.netapp.com";
pub const AUTH0_DOMAIN: &str = "netapp-cloud-account.auth0.com";
pub const AUTH0_CLIENT: &str = "Mu0V1ywgYteI6w1MbD15fKfVIUrNXGWC";
pub const AUTH0_AUDIENCE: &str = "https://api.cloud.netapp.com";

const WORKING_ENVIRONMENT_KINDS: [&str; 4] = [
    "onPremWorkingEnvironments",
    "gcpVsaWorkingEnvironments",
    "azureVsaWorkingEnvironments",
    "vsaWorkingEnvironments",
];

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Cloud Manager client
#[derive(Debug, Clone)]
pub struct CloudManagerConfig {
    /// Auth0 refresh token
    pub refresh_token: String,
    /// Connector client ID, required for agent-routed calls
    pub client_id: Option<String>,
    /// Control plane base URL
    pub base_url: String,
    /// OAuth token endpoint
    pub auth_url: String,
}

impl CloudManagerConfig {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            client_id: None,
            base_url: CLOUD_MANAGER_HOST.to_string(),
            auth_url: format!("https://{}/oauth/token", AUTH0_DOMAIN),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Successful reply from the control plane
#[derive(Debug, Clone, Default)]
pub struct RestReply {
    /// Parsed JSON body, if the body was JSON
    pub body: Option<Value>,
    /// Value of the `OnCloud-Request-Id` header, used to track async tasks
    pub request_id: Option<String>,
}

impl RestReply {
    /// Body or JSON null
    pub fn json(&self) -> &Value {
        self.body.as_ref().unwrap_or(&Value::Null)
    }
}

/// Cached access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token_type: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Still usable for at least another minute
    pub fn is_fresh(&self) -> bool {
        self.expires_at - ChronoDuration::seconds(60) > Utc::now()
    }
}

// =============================================================================
// Cloud Manager Client
// =============================================================================

/// Client for the Cloud Manager REST API
pub struct CloudManagerClient {
    config: CloudManagerConfig,
    transport: TransportRef,
    token: RwLock<Option<AccessToken>>,
    poll_interval_override: Option<Duration>,
}

impl CloudManagerClient {
    /// Create a new client
    pub fn new(config: CloudManagerConfig, transport: TransportRef) -> Self {
        Self {
            config,
            transport,
            token: RwLock::new(None),
            poll_interval_override: None,
        }
    }

    /// Replace polling intervals (task status, network retries)
    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval_override = interval;
        self
    }

    /// Exchange the refresh token for an access token
    pub async fn get_token(&self) -> Result<AccessToken> {
        let request = ApiRequest::new(HttpMethod::Post, &self.config.auth_url).json(json!({
            "grant_type": "refresh_token",
            "refresh_token": self.config.refresh_token,
            "client_id": AUTH0_CLIENT,
            "audience": AUTH0_AUDIENCE,
        }));

        let response = self.transport.send(request).await?;
        let body = response.json().unwrap_or(Value::Null);
        if !response.is_success() {
            let message = body
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.status.to_string());
            return Err(Error::api("Error getting access token", message));
        }

        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::api("Error getting access token", "no access_token in response"))?;
        let token_type = body
            .get("token_type")
            .and_then(Value::as_str)
            .unwrap_or("Bearer");
        let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(3600);

        Ok(AccessToken {
            token_type: token_type.to_string(),
            token: token.to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        })
    }

    /// Cached access token, refreshed when close to expiry
    async fn authorization(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh() {
                return Ok(format!("{} {}", token.token_type, token.token));
            }
        }

        let token = self.get_token().await?;
        let header = format!("{} {}", token.token_type, token.token);
        *self.token.write().await = Some(token);
        Ok(header)
    }

    /// `X-Agent-Id` header for calls routed through the Connector
    pub fn agent_headers(&self) -> Result<BTreeMap<String, String>> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or_else(|| Error::MissingParameters(vec!["client_id".into()]))?;
        let mut headers = BTreeMap::new();
        headers.insert("X-Agent-Id".to_string(), format!("{}clients", client_id));
        Ok(headers)
    }

    /// Send a request and process the response, including error payloads
    ///
    /// Status codes outside 2xx fail with the status code and raw body.
    /// A JSON body on 2xx codes other than 200/201/202 is checked for a
    /// vendor `message`.
    pub async fn send_request(
        &self,
        method: HttpMethod,
        api: &str,
        body: Option<Value>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RestReply> {
        let url = format!("{}{}", self.config.base_url, api);
        let mut request = ApiRequest::new(method, url)
            .header("Content-type", "application/json")
            .header("Referer", "Ansible_NetApp")
            .header("Authorization", self.authorization().await?);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.transport.send(request).await?;
        let context = format!("{} {}", method, api);

        if !response.is_success() {
            let message = if response.body.is_empty() {
                response.status.to_string()
            } else {
                format!("{}, {}", response.status, response.body)
            };
            return Err(Error::api(context, message));
        }

        let json = response.json();
        if !matches!(response.status, 200 | 201 | 202) {
            if let Some(message) = json
                .as_ref()
                .and_then(|j| j.get("message"))
                .and_then(Value::as_str)
            {
                return Err(Error::api(context, message));
            }
        }

        let request_id = response
            .header("OnCloud-Request-Id")
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(RestReply {
            body: json,
            request_id,
        })
    }

    pub async fn get(&self, api: &str, headers: Option<&BTreeMap<String, String>>) -> Result<RestReply> {
        self.send_request(HttpMethod::Get, api, None, headers).await
    }

    pub async fn post(
        &self,
        api: &str,
        body: Value,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RestReply> {
        self.send_request(HttpMethod::Post, api, Some(body), headers).await
    }

    pub async fn patch(
        &self,
        api: &str,
        body: Value,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RestReply> {
        self.send_request(HttpMethod::Patch, api, Some(body), headers).await
    }

    pub async fn put(
        &self,
        api: &str,
        body: Value,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RestReply> {
        self.send_request(HttpMethod::Put, api, Some(body), headers).await
    }

    pub async fn delete(
        &self,
        api: &str,
        body: Option<Value>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RestReply> {
        self.send_request(HttpMethod::Delete, api, body, headers).await
    }

    // =========================================================================
    // Task Tracking
    // =========================================================================

    /// Query an audit task: `status` 1 = done, -1 = failed, 0 = pending
    ///
    /// Queries that fail to reach the service are retried a few times before
    /// the error surfaces.
    pub async fn check_task_status(&self, api: &str) -> Result<TaskStatus> {
        let headers = self.agent_headers()?;
        let delay = self.poll_interval_override.unwrap_or(STATUS_NETWORK_DELAY);

        let reply = poll::with_network_retries(STATUS_NETWORK_RETRIES, delay, || {
            self.get(api, Some(&headers))
        })
        .await?;

        let body = reply.json();
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(match body.get("status").and_then(Value::as_i64) {
            Some(1) => TaskStatus::Succeeded,
            Some(-1) => TaskStatus::Failed(message),
            _ => TaskStatus::Pending,
        })
    }

    /// Poll an audit task until it completes
    pub async fn wait_on_completion(
        &self,
        api: &str,
        action_name: &str,
        task: &str,
        policy: PollPolicy,
    ) -> Result<()> {
        info!("Waiting for {} to {}", action_name, task);
        let source = AuditTask { client: self, api };
        poll::wait_on_completion(
            &source,
            action_name,
            task,
            policy.with_interval_override(self.poll_interval_override),
        )
        .await
    }

    /// Audit endpoint tracking the request with `request_id`
    pub fn active_task_api(request_id: Option<&str>) -> String {
        format!("/occm/api/audit/activeTask/{}", request_id.unwrap_or("None"))
    }

    // =========================================================================
    // Working Environments
    // =========================================================================

    /// Working environment details by public ID
    pub async fn get_working_environment_details(&self, id: &str) -> Result<Value> {
        let headers = self.agent_headers()?;
        let api = format!("/occm/api/working-environments/{}", urlencoding::encode(id));
        let reply = self.get(&api, Some(&headers)).await?;
        reply
            .body
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "working environment".into(),
                name: id.to_string(),
            })
    }

    /// Working environment details by name, searched across every provider
    pub async fn get_working_environment_details_by_name(&self, name: &str) -> Result<Option<Value>> {
        let headers = self.agent_headers()?;

        let api = format!(
            "/occm/api/working-environments/exists/{}",
            urlencoding::encode(name)
        );
        self.get(&api, Some(&headers)).await?;

        let reply = self.get("/occm/api/working-environments", Some(&headers)).await?;
        let found = find_working_environment(reply.json(), name);
        debug!(name, found = found.is_some(), "working environment lookup");
        Ok(found)
    }

    /// Resolve a working environment from an ID or, failing that, a name
    pub async fn resolve_working_environment(
        &self,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Value> {
        let details = match (id, name) {
            (Some(id), _) => Some(self.get_working_environment_details(id).await?),
            (None, Some(name)) => self.get_working_environment_details_by_name(name).await?,
            (None, None) => {
                return Err(Error::InvalidParameter(
                    "one of the following is required: working_environment_name, working_environment_id"
                        .into(),
                ))
            }
        };
        details.ok_or_else(|| Error::ResourceNotFound {
            kind: "working environment".into(),
            name: name.or(id).unwrap_or_default().to_string(),
        })
    }
}

/// Look `name` up in every working environment list of the response
pub fn find_working_environment(response: &Value, name: &str) -> Option<Value> {
    WORKING_ENVIRONMENT_KINDS
        .iter()
        .filter_map(|kind| response.get(*kind).and_then(Value::as_array))
        .flatten()
        .find(|we| we.get("name").and_then(Value::as_str) == Some(name))
        .cloned()
}

/// API root path for a working environment
pub fn api_root_path(working_environment: &Value) -> String {
    let provider = working_environment
        .get("cloudProviderName")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let is_ha = working_environment
        .get("isHA")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match (provider, is_ha) {
        ("Amazon", true) => "/occm/api/aws/ha".to_string(),
        ("Amazon", false) => "/occm/api/vsa".to_string(),
        (other, true) => format!("/occm/api/{}/ha", other.to_lowercase()),
        (other, false) => format!("/occm/api/{}/vsa", other.to_lowercase()),
    }
}

struct AuditTask<'a> {
    client: &'a CloudManagerClient,
    api: &'a str,
}

#[async_trait]
impl StatusSource for AuditTask<'_> {
    async fn status(&self) -> Result<TaskStatus> {
        self.client.check_task_status(self.api).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ApiResponse;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;

    fn client(mock: &std::sync::Arc<MockTransport>) -> CloudManagerClient {
        CloudManagerClient::new(
            CloudManagerConfig::new("refresh").with_client_id("abc"),
            mock.clone(),
        )
        .with_poll_interval(Some(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"a": 1})).reply(200, json!({"b": 2}));
        let client = client(&mock);

        client.get("/one", None).await.unwrap();
        client.get("/two", None).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].url.ends_with("/oauth/token"));
        assert_eq!(requests[0].json_body().unwrap()["grant_type"], "refresh_token");
        assert_eq!(requests[1].headers["Authorization"], "Bearer token");
        assert_eq!(requests[2].url, format!("{}/two", CLOUD_MANAGER_HOST));
    }

    #[tokio::test]
    async fn test_send_request_error_status() {
        let mock = MockTransport::new();
        mock.token()
            .reply_raw(ApiResponse::new(400, "bad request body"));
        let err = client(&mock).get("/x", None).await.unwrap_err();
        assert_eq!(err.to_string(), "GET /x: 400, bad request body");
    }

    #[tokio::test]
    async fn test_send_request_captures_request_id() {
        let mock = MockTransport::new();
        mock.token().reply_raw(
            ApiResponse::new(202, r#"{"publicId": "we-1"}"#).with_header("OnCloud-Request-Id", "req-9"),
        );
        let reply = client(&mock).post("/x", json!({}), None).await.unwrap();
        assert_eq!(reply.request_id.as_deref(), Some("req-9"));
        assert_eq!(reply.json()["publicId"], "we-1");
    }

    #[tokio::test]
    async fn test_send_request_vendor_message() {
        let mock = MockTransport::new();
        mock.token().reply(207, json!({"message": "partial failure"}));
        let err = client(&mock).get("/x", None).await.unwrap_err();
        assert_eq!(err.to_string(), "GET /x: partial failure");
    }

    #[tokio::test]
    async fn test_wait_on_completion() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"status": 0, "error": null}))
            .fail("connection reset")
            .reply(200, json!({"status": 1, "error": null}));
        let client = client(&mock);
        client
            .wait_on_completion("/occm/api/audit/activeTask/req", "CVO", "create", PollPolicy::new(5, 60))
            .await
            .unwrap();
        assert_eq!(mock.requests()[1].headers["X-Agent-Id"], "abcclients");
    }

    #[tokio::test]
    async fn test_task_status_vendor_error_is_not_retried() {
        let mock = MockTransport::new();
        mock.token().reply_raw(ApiResponse::new(500, "internal"));
        let err = client(&mock).check_task_status("/task").await.unwrap_err();
        assert_eq!(err.to_string(), "GET /task: 500, internal");
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_on_completion_failure() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"status": -1, "error": "quota exceeded"}));
        let err = client(&mock)
            .wait_on_completion("/task", "CVO", "create", PollPolicy::new(5, 60))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to create CVO, error: quota exceeded");
    }

    #[tokio::test]
    async fn test_wait_on_completion_timeout() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"status": 0}))
            .reply(200, json!({"status": 0}));
        let err = client(&mock)
            .wait_on_completion("/task", "CVO", "delete", PollPolicy::new(1, 60))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { .. });
    }

    #[tokio::test]
    async fn test_working_environment_by_name() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!(true)).reply(
            200,
            json!({
                "onPremWorkingEnvironments": [],
                "gcpVsaWorkingEnvironments": [],
                "azureVsaWorkingEnvironments": [{"name": "azwe", "publicId": "az-1"}],
                "vsaWorkingEnvironments": [{"name": "we1", "publicId": "vsa-1"}]
            }),
        );
        let found = client(&mock)
            .get_working_environment_details_by_name("we1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["publicId"], "vsa-1");
        assert!(mock.calls()[1].1.ends_with("/occm/api/working-environments/exists/we1"));
    }

    #[tokio::test]
    async fn test_agent_headers_require_client_id() {
        let mock = MockTransport::new();
        let client = CloudManagerClient::new(CloudManagerConfig::new("refresh"), mock.clone());
        assert_matches!(client.agent_headers(), Err(Error::MissingParameters(_)));
    }

    #[test]
    fn test_api_root_path() {
        assert_eq!(
            api_root_path(&json!({"cloudProviderName": "Amazon", "isHA": true})),
            "/occm/api/aws/ha"
        );
        assert_eq!(
            api_root_path(&json!({"cloudProviderName": "Amazon", "isHA": false})),
            "/occm/api/vsa"
        );
        assert_eq!(
            api_root_path(&json!({"cloudProviderName": "Azure", "isHA": true})),
            "/occm/api/azure/ha"
        );
        assert_eq!(
            api_root_path(&json!({"cloudProviderName": "GCP", "isHA": false})),
            "/occm/api/gcp/vsa"
        );
    }
}
