//! Unified Manager REST Client
//!
//! Read-only access to Active IQ Unified Manager over basic auth. Besides
//! returning errors, the client keeps an error log and a debug log of
//! `(status, content)` pairs for the caller to report.

use crate::domain::ports::{ApiRequest, HttpMethod, TransportRef};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Upper bound on the `next` links followed by one collection read
pub const MAX_PAGES: usize = 1000;

/// Configuration for the Unified Manager client
#[derive(Debug, Clone)]
pub struct UnifiedManagerConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub port: Option<u16>,
    pub validate_certs: bool,
}

impl UnifiedManagerConfig {
    /// `https://<hostname>[:<port>]/api/`
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("https://{}:{}/api/", self.hostname, port),
            None => format!("https://{}/api/", self.hostname),
        }
    }
}

/// Client for the Unified Manager API
pub struct UnifiedManagerClient {
    config: UnifiedManagerConfig,
    transport: TransportRef,
    errors: Mutex<Vec<String>>,
    debug_logs: Mutex<Vec<(Option<u16>, String)>>,
}

impl UnifiedManagerClient {
    pub fn new(config: UnifiedManagerConfig, transport: TransportRef) -> Self {
        Self {
            config,
            transport,
            errors: Mutex::new(Vec::new()),
            debug_logs: Mutex::new(Vec::new()),
        }
    }

    pub async fn send_request(
        &self,
        method: HttpMethod,
        api: &str,
        params: &[(String, String)],
    ) -> Result<Value> {
        let mut request = ApiRequest::new(method, format!("{}{}", self.config.base_url(), api))
            .basic_auth(&self.config.username, &self.config.password)
            .verify_tls(self.config.validate_certs);
        for (name, value) in params {
            request = request.query(name, value);
        }

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                self.log_error(None, format!("Connection error: {}", e));
                return Err(e);
            }
        };
        let status = Some(response.status);
        let json = response.json();
        let endpoint_error = json
            .as_ref()
            .and_then(|j| j.get("error"))
            .filter(|e| !e.is_null())
            .map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        let result = match endpoint_error {
            Some(error) => {
                self.log_error(status, format!("Endpoint error: {}: {}", response.status, error));
                Err(Error::api(format!("{} {}", method, api), error))
            }
            None if !response.is_success() => {
                let message = format!("HTTP error: {}", response.status);
                self.log_error(status, message.clone());
                Err(Error::api(format!("{} {}", method, api), message))
            }
            None => Ok(json.unwrap_or(Value::Null)),
        };
        self.log_debug(status, response.body);
        result
    }

    pub async fn get(&self, api: &str, params: &[(String, String)]) -> Result<Value> {
        self.send_request(HttpMethod::Get, api, params).await
    }

    /// Fetch every page of a collection and concatenate their `records`
    ///
    /// Follows `_links.next.href`, which carries the query of the next page,
    /// for at most [`MAX_PAGES`] pages.
    pub async fn get_records(&self, api: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut params: Vec<(String, String)> = Vec::new();

        for _ in 0..MAX_PAGES {
            let page = self.get(api, &params).await?;
            if let Some(items) = page.get("records").and_then(Value::as_array) {
                records.extend(items.iter().cloned());
            }

            let next = page
                .pointer("/_links/next/href")
                .and_then(Value::as_str)
                .filter(|href| !href.is_empty());
            match next {
                Some(href) => {
                    params = next_page_params(&self.config.base_url(), href)?;
                    debug!(api, count = records.len(), "following next page");
                }
                None => return Ok(records),
            }
        }

        let message = format!("more than {} pages of records", MAX_PAGES);
        self.log_error(None, message.clone());
        Err(Error::api(format!("GET {}", api), message))
    }

    fn log_error(&self, status: Option<u16>, message: String) {
        warn!("{}", message);
        self.errors.lock().push(message.clone());
        self.debug_logs.lock().push((status, message));
    }

    fn log_debug(&self, status: Option<u16>, content: String) {
        self.debug_logs.lock().push((status, content));
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn debug_logs(&self) -> Vec<(Option<u16>, String)> {
        self.debug_logs.lock().clone()
    }
}

/// Query parameters of a `next` link, resolved against the API base
fn next_page_params(base: &str, href: &str) -> Result<Vec<(String, String)>> {
    let url = Url::parse(base)
        .and_then(|base| base.join(href))
        .map_err(|e| Error::api("next page link", format!("{}: {}", href, e)))?;
    Ok(url.query_pairs().into_owned().collect())
}
