//! HTTP remote client for query-style APIs
//!
//! Every call is a `GET {endpoint}?Action=<action>&<param>=<value>...`.
//! Failures come back as [`RemoteError`] so the orchestrator can classify
//! them.

use super::{RemoteClient, RemoteError};
use crate::error::{EngineError, Result};
use crate::mapping::ParamMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sanitize a response body or message for logging
/// Truncates long text and drops control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// Render a parameter value as a query string value
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull provider code and message out of an error body
///
/// Understands `{"Error": {"Code", "Message"}}`, `{"error": {...}}` and a
/// flat `{"code", "message"}`.
fn parse_error_body(body: &Value) -> Option<(Option<String>, String)> {
    let object = body
        .get("Error")
        .or_else(|| body.get("error"))
        .filter(|v| v.is_object())
        .unwrap_or(body);

    let field = |upper: &str, lower: &str| object.get(upper).or_else(|| object.get(lower));
    let code = field("Code", "code").map(query_value);
    let message = field("Message", "message").map(query_value);

    match (code, message) {
        (None, None) => None,
        (code, message) => Some((code, message.unwrap_or_default())),
    }
}

/// [`RemoteClient`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: Client,
    endpoint: Url,
    region: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| EngineError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .user_agent(concat!("cloudmap/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Endpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            region: None,
        })
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Full request URL for an action
    pub fn request_url(&self, action: &str, params: &ParamMap) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("Action", action);
            if let Some(region) = &self.region {
                query.append_pair("Region", region);
            }
            for (key, value) in params {
                query.append_pair(key, &query_value(value));
            }
        }
        url
    }

    async fn call(&self, action: &str, params: &ParamMap) -> std::result::Result<Value, RemoteError> {
        let url = self.request_url(action, params);
        tracing::debug!("GET {} ({} param(s))", action, params.len());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(format!("failed to read response body: {}", e)))?;
        let parsed: Option<Value> = if body.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&body).ok()
        };

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body
            tracing::debug!("{}: API error {} - {}", action, status, sanitize_for_log(&body));
            let mut err = match parsed.as_ref().and_then(parse_error_body) {
                Some((code, message)) => {
                    let err = RemoteError::new(message);
                    match code {
                        Some(code) => err.with_code(code),
                        None => err,
                    }
                }
                None => RemoteError::new(format!("API request failed: {}", status)),
            };
            err = err.with_status(status.as_u16());
            return Err(err);
        }

        match parsed {
            None if body.trim().is_empty() => Ok(Value::Null),
            None => Err(RemoteError::new("failed to parse response JSON")
                .with_status(status.as_u16())),
            Some(value) => match value.get("Error").filter(|e| e.is_object()) {
                // Query APIs may answer 200 with an error envelope
                Some(_) => {
                    let (code, message) = parse_error_body(&value).unwrap_or_default();
                    let err = RemoteError::new(message);
                    Err(match code {
                        Some(code) => err.with_code(code),
                        None => err,
                    })
                }
                None => Ok(value),
            },
        }
    }
}

impl RemoteClient for HttpRemoteClient {
    fn invoke<'a>(
        &'a self,
        action: &'a str,
        params: &'a ParamMap,
    ) -> BoxFuture<'a, std::result::Result<Value, RemoteError>> {
        self.call(action, params).boxed()
    }
}
