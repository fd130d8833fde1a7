//! Error types for the NetApp storage modules
//!
//! Every failure ends a module run with `failed = true` and the error text as
//! the result message. The variants are grouped by the category of failure
//! the caller sees.

use thiserror::Error;

/// Unified error type for module runs
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parameter Errors
    // =========================================================================
    #[error("missing required arguments: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Unsupported parameters for ({module}) module: {}", .names.join(", "))]
    UnsupportedParameters { module: String, names: Vec<String> },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{} can't be modified.", format_attributes(.0))]
    UnmodifiableAttributes(Vec<String>),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Vendor API Errors
    // =========================================================================
    #[error("{context}: {message}")]
    Api { context: String, message: String },

    #[error("Error: Cannot find {kind}: {name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Polling Errors
    // =========================================================================
    #[error("Failed to {task} {action}, error: {message}")]
    TaskFailed {
        action: String,
        task: String,
        message: String,
    },

    #[error("Taking too long for {action} to {task} or not properly setup")]
    Timeout { action: String, task: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of a failure as reported to the automation tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing parameters, detected before any vendor call
    Validation,
    /// The vendor endpoint could not be reached
    Connection,
    /// The vendor answered with an error payload
    Api,
    /// A polled task did not reach a terminal state in time
    Timeout,
    /// Everything else
    Internal,
}

impl Error {
    /// Build an API error with a short description of what was attempted
    pub fn api(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Prefix the error with what was being attempted
    ///
    /// Vendor errors keep their message under the new context. Validation
    /// and polling errors are returned unchanged; anything else becomes an
    /// API error carrying its own text.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Api { message, .. } => Error::Api {
                context: context.into(),
                message,
            },
            other @ (Error::Timeout { .. } | Error::TaskFailed { .. }) => other,
            other if other.category() == ErrorCategory::Validation => other,
            other => Error::Api {
                context: context.into(),
                message: other.to_string(),
            },
        }
    }

    /// Determine the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingParameters(_)
            | Error::UnsupportedParameters { .. }
            | Error::InvalidParameter(_)
            | Error::UnmodifiableAttributes(_)
            | Error::UnknownModule(_)
            | Error::Configuration(_) => ErrorCategory::Validation,

            Error::Connection(_) | Error::Http(_) => ErrorCategory::Connection,

            Error::Api { .. } | Error::ResourceNotFound { .. } | Error::TaskFailed { .. } => {
                ErrorCategory::Api
            }

            Error::Timeout { .. } => ErrorCategory::Timeout,

            _ => ErrorCategory::Internal,
        }
    }

    /// Check if this error is transient (worth a retry while polling)
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Connection)
    }
}

fn format_attributes(attrs: &[String]) -> String {
    let quoted: Vec<String> = attrs.iter().map(|a| format!("'{}'", a)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Result type alias for the modules
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = Error::MissingParameters(vec!["name".into()]);
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = Error::Connection("refused".into());
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.is_transient());

        let err = Error::Timeout {
            action: "CVO".into(),
            task: "create".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_context() {
        let err = Error::api("GET /x", "not found").context("Error getting volume");
        assert_eq!(err.to_string(), "Error getting volume: not found");

        let err = Error::Connection("refused".into()).context("Error getting volume");
        assert_eq!(err.to_string(), "Error getting volume: Connection error: refused");

        let err = Error::InvalidParameter("bad".into()).context("ignored");
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_error_messages() {
        let err = Error::Timeout {
            action: "CVO".into(),
            task: "create".into(),
        };
        assert_eq!(
            err.to_string(),
            "Taking too long for CVO to create or not properly setup"
        );

        let err = Error::TaskFailed {
            action: "CVO".into(),
            task: "delete".into(),
            message: "quota".into(),
        };
        assert_eq!(err.to_string(), "Failed to delete CVO, error: quota");

        let err = Error::UnmodifiableAttributes(vec!["size".into(), "iops".into()]);
        assert_eq!(err.to_string(), "['size', 'iops'] can't be modified.");

        let err = Error::MissingParameters(vec!["name".into(), "client_id".into()]);
        assert_eq!(err.to_string(), "missing required arguments: name, client_id");
    }
}
