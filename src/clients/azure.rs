//! Azure NetApp Files Client
//!
//! Azure NetApp Files resources are managed through Azure Resource Manager.
//! Two API styles are supported:
//!
//! - `current`: api-version `2021-04-01`; mutations are long-running
//!   operations tracked through the `Azure-AsyncOperation` or `Location`
//!   response header and polled until they settle.
//! - `legacy`: api-version `2018-05-01`; mutations are fire-and-forget.

use crate::domain::ports::{ApiRequest, ApiResponse, HttpMethod, TransportRef};
use crate::error::{Error, Result};
use crate::reconcile::poll::{self, StatusSource, TaskStatus, AZURE_OPERATION};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const RESOURCE_MANAGER: &str = "https://management.azure.com";
pub const LOGIN_HOST: &str = "https://login.microsoftonline.com";

// =============================================================================
// API Style
// =============================================================================

/// Resource Manager API generation to talk to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    #[default]
    Current,
    Legacy,
}

impl ApiStyle {
    pub fn api_version(&self) -> &'static str {
        match self {
            ApiStyle::Current => "2021-04-01",
            ApiStyle::Legacy => "2018-05-01",
        }
    }

    /// Whether mutations are followed until the operation settles
    pub fn polls_operations(&self) -> bool {
        matches!(self, ApiStyle::Current)
    }
}

impl std::fmt::Display for ApiStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiStyle::Current => write!(f, "current"),
            ApiStyle::Legacy => write!(f, "legacy"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Credentials and scope of the Azure client
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    pub secret: Option<String>,
    /// Pre-acquired bearer token, used instead of the client credentials
    pub auth_token: Option<String>,
    pub base_url: String,
    pub login_url: String,
    pub api_style: ApiStyle,
}

impl AzureConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            tenant: None,
            client_id: None,
            secret: None,
            auth_token: None,
            base_url: RESOURCE_MANAGER.to_string(),
            login_url: LOGIN_HOST.to_string(),
            api_style: ApiStyle::default(),
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

// =============================================================================
// Azure Client
// =============================================================================

/// Client for the Microsoft.NetApp resource provider
pub struct AzureClient {
    config: AzureConfig,
    transport: TransportRef,
    token: RwLock<Option<CachedToken>>,
    poll_interval_override: Option<Duration>,
}

impl AzureClient {
    pub fn new(config: AzureConfig, transport: TransportRef) -> Self {
        Self {
            config,
            transport,
            token: RwLock::new(None),
            poll_interval_override: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval_override = interval;
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    /// Path of a NetApp account
    pub fn account_path(&self, resource_group: &str, account: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.NetApp/netAppAccounts/{}",
            self.config.subscription_id,
            urlencoding::encode(resource_group),
            urlencoding::encode(account)
        )
    }

    /// Path of a capacity pool
    pub fn pool_path(&self, resource_group: &str, account: &str, pool: &str) -> String {
        format!(
            "{}/capacityPools/{}",
            self.account_path(resource_group, account),
            urlencoding::encode(pool)
        )
    }

    /// Path of a volume
    pub fn volume_path(&self, resource_group: &str, account: &str, pool: &str, volume: &str) -> String {
        format!(
            "{}/volumes/{}",
            self.pool_path(resource_group, account, pool),
            urlencoding::encode(volume)
        )
    }

    /// Resource ID of a delegated subnet
    pub fn subnet_id(&self, resource_group: &str, virtual_network: &str, subnet: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
            self.config.subscription_id, resource_group, virtual_network, subnet
        )
    }

    async fn bearer(&self) -> Result<String> {
        if let Some(token) = &self.config.auth_token {
            return Ok(token.clone());
        }
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at - ChronoDuration::seconds(60) > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let (Some(tenant), Some(client_id), Some(secret)) =
            (&self.config.tenant, &self.config.client_id, &self.config.secret)
        else {
            return Err(Error::Configuration(
                "Azure credentials require tenant, client_id and secret, or auth_token".into(),
            ));
        };

        let form = format!(
            "grant_type=client_credentials&client_id={}&client_secret={}&scope={}",
            urlencoding::encode(client_id),
            urlencoding::encode(secret),
            urlencoding::encode(&format!("{}/.default", RESOURCE_MANAGER))
        );
        let request = ApiRequest::new(
            HttpMethod::Post,
            format!("{}/{}/oauth2/v2.0/token", self.config.login_url, tenant),
        )
        .form(form);
        let response = self.transport.send(request).await?;
        let body = response.json().unwrap_or(Value::Null);
        if !response.is_success() {
            let message = body
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.status.to_string());
            return Err(Error::api("Error getting Azure access token", message));
        }
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::api("Error getting Azure access token", "no access_token in response"))?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(3600);

        *self.token.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        });
        Ok(token)
    }

    async fn send(&self, method: HttpMethod, url: String, body: Option<Value>) -> Result<ApiResponse> {
        debug!("{} {}", method, url);
        let mut request = ApiRequest::new(method, url)
            .header("Authorization", format!("Bearer {}", self.bearer().await?));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.transport.send(request).await
    }

    fn resource_url(&self, path: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.config.base_url,
            path,
            self.config.api_style.api_version()
        )
    }

    /// Fetch a resource; `None` when it does not exist
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self.send(HttpMethod::Get, self.resource_url(path), None).await?;
        if response.status == 404 {
            return Ok(None);
        }
        check(&response, "GET", path)?;
        Ok(response.json())
    }

    /// Create or replace a resource
    pub async fn put(&self, path: &str, body: Value, action_name: &str) -> Result<()> {
        self.mutate(HttpMethod::Put, path, Some(body), action_name, "create").await
    }

    /// Update some properties of a resource
    pub async fn patch(&self, path: &str, body: Value, action_name: &str) -> Result<()> {
        self.mutate(HttpMethod::Patch, path, Some(body), action_name, "update").await
    }

    pub async fn delete(&self, path: &str, action_name: &str) -> Result<()> {
        self.mutate(HttpMethod::Delete, path, None, action_name, "delete").await
    }

    async fn mutate(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        action_name: &str,
        task: &str,
    ) -> Result<()> {
        let response = self.send(method, self.resource_url(path), body).await?;
        check(&response, &method.to_string(), path)?;

        if !self.config.api_style.polls_operations() {
            return Ok(());
        }
        let operation = response
            .header("Azure-AsyncOperation")
            .map(|url| (url.to_string(), OperationKind::AsyncOperation))
            .or_else(|| {
                response
                    .header("Location")
                    .map(|url| (url.to_string(), OperationKind::Location))
            });
        let Some((url, kind)) = operation else {
            return Ok(());
        };
        if !matches!(response.status, 201 | 202) {
            return Ok(());
        }

        info!("Waiting for {} to {}", action_name, task);
        let source = Operation {
            client: self,
            url,
            kind,
        };
        poll::wait_on_completion(
            &source,
            action_name,
            task,
            AZURE_OPERATION.with_interval_override(self.poll_interval_override),
        )
        .await
    }

    async fn operation_status(&self, url: &str, kind: OperationKind) -> Result<TaskStatus> {
        let response = self.send(HttpMethod::Get, url.to_string(), None).await?;
        check(&response, "GET", url)?;

        match kind {
            OperationKind::Location => Ok(if response.status == 202 {
                TaskStatus::Pending
            } else {
                TaskStatus::Succeeded
            }),
            OperationKind::AsyncOperation => {
                let body = response.json().unwrap_or(Value::Null);
                let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
                Ok(match status {
                    "Succeeded" => TaskStatus::Succeeded,
                    "Failed" | "Canceled" => TaskStatus::Failed(
                        body.pointer("/error/message")
                            .and_then(Value::as_str)
                            .unwrap_or(status)
                            .to_string(),
                    ),
                    _ => TaskStatus::Pending,
                })
            }
        }
    }
}

/// Fail on non-2xx with the ARM error message
fn check(response: &ApiResponse, method: &str, path: &str) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    let body = response.json();
    let message = body
        .as_ref()
        .and_then(|b| b.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}, {}", response.status, response.body));
    Err(Error::api(format!("{} {}", method, path), message))
}

#[derive(Debug, Clone, Copy)]
enum OperationKind {
    AsyncOperation,
    Location,
}

struct Operation<'a> {
    client: &'a AzureClient,
    url: String,
    kind: OperationKind,
}

#[async_trait]
impl StatusSource for Operation<'_> {
    async fn status(&self) -> Result<TaskStatus> {
        self.client.operation_status(&self.url, self.kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn client(mock: &std::sync::Arc<MockTransport>, style: ApiStyle) -> AzureClient {
        let mut config = AzureConfig::new("sub-1");
        config.auth_token = Some("arm-token".into());
        config.api_style = style;
        AzureClient::new(config, mock.clone()).with_poll_interval(Some(Duration::ZERO))
    }

    #[test]
    fn test_paths() {
        let mock = MockTransport::new();
        let client = client(&mock, ApiStyle::Current);
        assert_eq!(
            client.volume_path("rg", "acct", "pool", "vol"),
            "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.NetApp/netAppAccounts/acct/capacityPools/pool/volumes/vol"
        );
        assert_eq!(
            client.subnet_id("rg", "vnet", "default"),
            "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default"
        );
    }

    #[test]
    fn test_api_style() {
        assert_eq!(ApiStyle::default(), ApiStyle::Current);
        assert_eq!(ApiStyle::Legacy.api_version(), "2018-05-01");
        assert!(!ApiStyle::Legacy.polls_operations());
        let style: ApiStyle = serde_json::from_value(json!("legacy")).unwrap();
        assert_eq!(style, ApiStyle::Legacy);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let mock = MockTransport::new();
        mock.reply(404, json!({"error": {"code": "ResourceNotFound", "message": "gone"}}));
        let client = client(&mock, ApiStyle::Current);
        assert!(client.get("/x").await.unwrap().is_none());

        let request = &mock.requests()[0];
        assert_eq!(request.url, format!("{}/x?api-version=2021-04-01", RESOURCE_MANAGER));
        assert_eq!(request.headers["Authorization"], "Bearer arm-token");
    }

    #[tokio::test]
    async fn test_put_polls_async_operation() {
        let mock = MockTransport::new();
        mock.reply_raw(
            ApiResponse::new(201, "{}").with_header("Azure-AsyncOperation", "https://op/1"),
        )
        .reply(200, json!({"status": "InProgress"}))
        .reply(200, json!({"status": "Succeeded"}));
        client(&mock, ApiStyle::Current)
            .put("/x", json!({"location": "eastus"}), "volume")
            .await
            .unwrap();
        assert_eq!(mock.calls()[2], (HttpMethod::Get, "https://op/1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_operation_failure() {
        let mock = MockTransport::new();
        mock.reply_raw(ApiResponse::new(202, "").with_header("Azure-AsyncOperation", "https://op/2"))
            .reply(200, json!({"status": "Failed", "error": {"message": "volume busy"}}));
        let err = client(&mock, ApiStyle::Current)
            .delete("/x", "volume")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to delete volume, error: volume busy");
    }

    #[tokio::test]
    async fn test_legacy_does_not_poll() {
        let mock = MockTransport::new();
        mock.reply_raw(ApiResponse::new(202, "").with_header("Azure-AsyncOperation", "https://op/3"));
        client(&mock, ApiStyle::Legacy).delete("/x", "volume").await.unwrap();
        assert_eq!(mock.remaining(), 0);
        assert!(mock.requests()[0].url.ends_with("api-version=2018-05-01"));
    }

    #[tokio::test]
    async fn test_client_credentials() {
        let mock = MockTransport::new();
        mock.reply(200, json!({"access_token": "aad", "expires_in": 3600}))
            .reply(200, json!({"name": "acct"}))
            .reply(200, json!({"name": "acct"}));
        let mut config = AzureConfig::new("sub-1");
        config.tenant = Some("tenant-1".into());
        config.client_id = Some("app".into());
        config.secret = Some("s3cr=t".into());
        let client = AzureClient::new(config, mock.clone());

        client.get("/a").await.unwrap();
        client.get("/a").await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].url,
            format!("{}/tenant-1/oauth2/v2.0/token", LOGIN_HOST)
        );
        match &requests[0].body {
            Some(crate::domain::ports::RequestBody::Form(form)) => {
                assert!(form.contains("client_secret=s3cr%3Dt"))
            }
            other => panic!("unexpected body {:?}", other),
        }
        assert_eq!(requests[2].headers["Authorization"], "Bearer aad");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let mock = MockTransport::new();
        let client = AzureClient::new(AzureConfig::new("sub-1"), mock.clone());
        let err = client.get("/a").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
