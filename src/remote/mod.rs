//! Remote Client boundary
//!
//! The engine never talks to a transport directly. It calls an opaque
//! [`RemoteClient`] of shape `(action, params) -> response` and classifies
//! whatever [`RemoteError`] comes back.
//!
//! # Module Structure
//!
//! - [`http`] - Query-style HTTP client built on `reqwest`

pub mod http;

use crate::error::EngineError;
use crate::mapping::ParamMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Error returned by a remote call, carrying enough detail to classify it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteError {
    /// HTTP status, when the transport has one
    pub status: Option<u16>,
    /// Provider error code, e.g. `InvalidVpc.NotFound`
    pub code: Option<String>,
    pub message: String,
    /// Connection-level failure (no response received)
    pub transport: bool,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Connection-level failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transport: true,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "[{}] ", status)?;
        }
        if let Some(code) = &self.code {
            write!(f, "{}: ", code)?;
        }
        if self.transport {
            write!(f, "transport error: ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The entity is already gone
    NotFound,
    /// Network, rate-limit or service-busy failure; worth retrying
    Transient,
    /// Validation, conflict or permission failure
    Terminal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::NotFound => "not found",
            ErrorClass::Transient => "transient",
            ErrorClass::Terminal => "terminal",
        })
    }
}

const NOT_FOUND_PATTERNS: &[&str] = &["notfound", "not found", "not.found", "does not exist"];

const TRANSIENT_PATTERNS: &[&str] = &[
    "throttl",
    "ratelimit",
    "rate limit",
    "too many requests",
    "serviceunavailable",
    "service unavailable",
    "internalerror",
    "requesttimeout",
    "timed out",
    "timeout",
    "busy",
    "try again",
];

/// Maps a [`RemoteError`] to an [`ErrorClass`] from status, code and message
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    not_found: Vec<String>,
    transient: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            not_found: NOT_FOUND_PATTERNS.iter().map(|p| p.to_string()).collect(),
            transient: TRANSIENT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a case-insensitive pattern that marks an error as not-found
    pub fn with_not_found_pattern(mut self, pattern: &str) -> Self {
        self.not_found.push(pattern.to_lowercase());
        self
    }

    /// Add a case-insensitive pattern that marks an error as transient
    pub fn with_transient_pattern(mut self, pattern: &str) -> Self {
        self.transient.push(pattern.to_lowercase());
        self
    }

    pub fn classify(&self, err: &RemoteError) -> ErrorClass {
        if err.transport {
            return ErrorClass::Transient;
        }

        match err.status {
            Some(404) => return ErrorClass::NotFound,
            Some(408 | 429 | 500 | 502 | 503 | 504) => return ErrorClass::Transient,
            _ => {}
        }

        let code = err.code.as_deref().unwrap_or_default().to_lowercase();
        let message = err.message.to_lowercase();
        let matches = |patterns: &[String]| {
            patterns
                .iter()
                .any(|p| code.contains(p.as_str()) || message.contains(p.as_str()))
        };

        if matches(&self.not_found) {
            ErrorClass::NotFound
        } else if matches(&self.transient) {
            ErrorClass::Transient
        } else {
            ErrorClass::Terminal
        }
    }
}

/// Opaque remote callable: `(action, params) -> response`
///
/// Implementations must be safe for concurrent read-only use; the engine
/// shares one handle across independent operations.
pub trait RemoteClient: Send + Sync {
    fn invoke<'a>(
        &'a self,
        action: &'a str,
        params: &'a ParamMap,
    ) -> BoxFuture<'a, Result<Value, RemoteError>>;
}

impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    fn invoke<'a>(
        &'a self,
        action: &'a str,
        params: &'a ParamMap,
    ) -> BoxFuture<'a, Result<Value, RemoteError>> {
        (**self).invoke(action, params)
    }
}

/// Format an engine error for display
/// Security: remote bodies are never echoed verbatim
pub fn format_remote_error(error: &EngineError) -> String {
    let Some(remote) = error.remote() else {
        return error.to_string();
    };

    match remote.status {
        Some(401) => return "Authentication failed. Check your credentials.".to_string(),
        Some(403) => return "Permission denied. Check your access policy.".to_string(),
        Some(409) => {
            return "Resource conflict. The resource may already exist or be in use.".to_string()
        }
        Some(400) => return "Invalid request. Check your parameters.".to_string(),
        _ => {}
    }

    match error.class() {
        Some(ErrorClass::NotFound) => "Resource not found.".to_string(),
        Some(ErrorClass::Transient) if remote.status == Some(429) => {
            "Rate limit exceeded. Please try again later.".to_string()
        }
        Some(ErrorClass::Transient) if remote.transport => {
            "Request failed. Check your network connection and try again.".to_string()
        }
        Some(ErrorClass::Transient) => {
            "Service temporarily unavailable. Please try again.".to_string()
        }
        _ => {
            let sanitized = remote
                .message
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(80)
                .collect::<String>();
            if sanitized.len() < remote.message.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        }
    }
}
