//! Domain Ports - Core trait definitions for the storage modules
//!
//! These traits define the boundaries between the reconcile logic and the
//! vendor REST surfaces. The HTTP transport and every module implement them.

use crate::error::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Desired State
// =============================================================================

/// Desired state of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Present,
    Absent,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Present => write!(f, "present"),
            State::Absent => write!(f, "absent"),
        }
    }
}

/// Create/delete decision taken by the idempotence diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdAction {
    Create,
    Delete,
}

impl std::fmt::Display for CdAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CdAction::Create => write!(f, "create"),
            CdAction::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Transport Request/Response
// =============================================================================

/// HTTP methods used against the vendor APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// Pre-encoded `application/x-www-form-urlencoded` body
    Form(String),
}

/// A single request against a vendor endpoint
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Username and password for HTTP basic auth
    pub basic_auth: Option<(String, String)>,
    /// Verify the server TLS certificate
    pub verify_tls: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            basic_auth: None,
            verify_tls: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Form(body.into()));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// JSON body, if any
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Some(RequestBody::Json(v)) => Some(v),
            _ => None,
        }
    }
}

/// Raw response from a vendor endpoint
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are stored lower-cased
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON; an empty or non-JSON body yields `None`
    pub fn json(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

// =============================================================================
// Transport Port
// =============================================================================

/// Port for sending HTTP requests to vendor APIs
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Transport-level failures (DNS, TLS, refused, timeout)
    /// are errors; any HTTP status is a response.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

pub type TransportRef = Arc<dyn Transport>;

// =============================================================================
// Module Result
// =============================================================================

/// Result document returned to the automation tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub changed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Module-specific return values
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleResult {
    pub fn new(changed: bool) -> Self {
        Self {
            changed,
            ..Default::default()
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            failed: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

// =============================================================================
// Module Port
// =============================================================================

/// Shared run settings handed to every module
#[derive(Clone)]
pub struct ModuleContext {
    /// Transport used by the vendor clients
    pub transport: TransportRef,
    /// Compute `changed` without mutating anything
    pub check_mode: bool,
    /// Replaces every polling interval when set
    pub poll_interval_override: Option<Duration>,
    /// Azure Resource Manager API style
    pub azure_api_style: crate::clients::azure::ApiStyle,
}

impl ModuleContext {
    pub fn new(transport: TransportRef) -> Self {
        Self {
            transport,
            check_mode: false,
            poll_interval_override: None,
            azure_api_style: Default::default(),
        }
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval_override = interval;
        self
    }

    pub fn with_azure_api_style(mut self, style: crate::clients::azure::ApiStyle) -> Self {
        self.azure_api_style = style;
        self
    }
}

/// Port implemented by every module
#[async_trait]
pub trait Module: Send + Sync {
    /// Module name as used on the command line
    fn name(&self) -> &'static str;

    /// JSON Schema of the accepted parameters
    fn schema(&self) -> schemars::schema::RootSchema;

    /// Parse `args`, reconcile, and report
    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult>;
}

pub type ModuleRef = Arc<dyn Module>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", State::Present), "present");
        assert_eq!(format!("{}", State::Absent), "absent");
        assert_eq!(State::default(), State::Present);
    }

    #[test]
    fn test_response_header_lookup_ignores_case() {
        let response = ApiResponse::new(202, "{}").with_header("OnCloud-Request-Id", "req-1");
        assert_eq!(response.header("oncloud-request-id"), Some("req-1"));
        assert_eq!(response.header("ONCLOUD-REQUEST-ID"), Some("req-1"));
        assert!(response.is_success());
    }

    #[test]
    fn test_response_json_empty_body() {
        assert!(ApiResponse::new(204, "").json().is_none());
        assert!(ApiResponse::new(200, "not json").json().is_none());
        assert_eq!(
            ApiResponse::new(200, r#"{"a":1}"#).json(),
            Some(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_module_result_serialization() {
        let result = ModuleResult::new(true)
            .with_msg("created")
            .with_value("working_environment_id", "VsaWorkingEnvironment-1");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["changed"], true);
        assert_eq!(value["msg"], "created");
        assert_eq!(value["working_environment_id"], "VsaWorkingEnvironment-1");
        assert!(value.get("failed").is_none());

        let failure = serde_json::to_value(ModuleResult::failure("boom")).unwrap();
        assert_eq!(failure["failed"], true);
        assert_eq!(failure["changed"], false);
    }
}
