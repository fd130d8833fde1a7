//! HTTP Transport
//!
//! reqwest-backed implementation of the [`Transport`] port.

use crate::domain::ports::{ApiRequest, ApiResponse, HttpMethod, RequestBody, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// Transport over reqwest with rustls
pub struct HttpTransport {
    verifying: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(config: TransportConfig) -> Result<Self> {
        let verifying = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let insecure = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            verifying,
            insecure,
        })
    }

    fn client(&self, verify_tls: bool) -> &reqwest::Client {
        if verify_tls {
            &self.verifying
        } else {
            &self.insecure
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client(request.verify_tls)
            .request(to_reqwest_method(request.method), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }
        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Form(body)) => builder
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        debug!("{} {} -> {}", request.method, request.url, status);

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
