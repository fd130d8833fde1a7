//! StorageGRID REST Client
//!
//! Grid and tenant management APIs on a StorageGRID admin node, bearer-token
//! authenticated.

use crate::domain::ports::{ApiRequest, HttpMethod, TransportRef};
use crate::error::{Error, Result};
use serde_json::{json, Value};
use tracing::debug;

/// Configuration for the StorageGRID client
#[derive(Debug, Clone)]
pub struct StorageGridConfig {
    /// Admin node host name, without scheme
    pub api_url: String,
    /// Bearer token
    pub auth_token: String,
    pub validate_certs: bool,
}

/// Client for the StorageGRID management API
pub struct StorageGridClient {
    config: StorageGridConfig,
    transport: TransportRef,
}

impl StorageGridClient {
    pub fn new(config: StorageGridConfig, transport: TransportRef) -> Self {
        Self { config, transport }
    }

    fn url(&self, api: &str) -> String {
        format!("https://{}/{}", self.config.api_url, api)
    }

    /// Send a request, returning the JSON body
    ///
    /// 204 yields `{"code": 204}`. Errors carry the vendor `text` or
    /// `message`, or the status code when neither is present.
    pub async fn send_request(
        &self,
        method: HttpMethod,
        api: &str,
        params: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = ApiRequest::new(method, self.url(api))
            .header("Authorization", format!("Bearer {}", self.config.auth_token))
            .verify_tls(self.config.validate_certs);
        for (name, value) in params {
            request = request.query(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.transport.send(request).await?;
        debug!(status = response.status, "{} {}", method, api);

        if response.status == 204 {
            return Ok(json!({"code": 204}));
        }

        let json = response.json();
        if !response.is_success() {
            let message = json
                .as_ref()
                .and_then(|j| {
                    j.get("text")
                        .or_else(|| j.get("message"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
                .unwrap_or_else(|| response.status.to_string());
            return Err(Error::api(format!("{} {}", method, api), message));
        }

        Ok(json.unwrap_or(Value::Null))
    }

    pub async fn get(&self, api: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.send_request(HttpMethod::Get, api, params, None).await
    }

    pub async fn post(&self, api: &str, body: Value) -> Result<Value> {
        self.send_request(HttpMethod::Post, api, &[], Some(body)).await
    }

    pub async fn put(&self, api: &str, body: Value) -> Result<Value> {
        self.send_request(HttpMethod::Put, api, &[], Some(body)).await
    }

    pub async fn delete(&self, api: &str) -> Result<Value> {
        self.send_request(HttpMethod::Delete, api, &[], None).await
    }
}
