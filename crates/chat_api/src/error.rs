use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

use crate::retry::{classify_status, FailureClass};

#[derive(Debug)]
pub enum ChatApiError {
    MissingApiKey,
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status {
        status: StatusCode,
        message: String,
        retry_after: Option<Duration>,
    },
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    MalformedStream(String),
    StreamFailed {
        code: Option<String>,
        message: String,
    },
    IdleTimeout(Duration),
    Serde(JsonError),
    Cancelled,
    Unknown(String),
}

impl ChatApiError {
    /// Coarse failure class used by retry policy and by callers that map
    /// transport failures into their own taxonomy.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Status { status, .. } => classify_status(*status),
            Self::RetryExhausted { status, .. } => status
                .map(classify_status)
                .unwrap_or(FailureClass::Transient),
            Self::Request(_) | Self::IdleTimeout(_) | Self::StreamFailed { .. } => {
                FailureClass::Transient
            }
            Self::MissingApiKey => FailureClass::Auth,
            Self::MalformedStream(_) | Self::Serde(_) => FailureClass::Malformed,
            Self::InvalidBaseUrl(_)
            | Self::InvalidHeader(_)
            | Self::Cancelled
            | Self::Unknown(_) => FailureClass::Fatal,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_code")]
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

/// Providers disagree on whether `code` is a string or a number.
fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

impl ErrorPayloadFields {
    pub fn message_or_fallback(&self) -> Option<String> {
        let explicit = self.message.as_deref().and_then(non_empty_string);
        let fallback = self
            .code
            .as_deref()
            .and_then(non_empty_string)
            .or_else(|| self.type_.as_deref().and_then(non_empty_string));
        explicit.or(fallback).map(str::to_owned)
    }
}

impl fmt::Display for ChatApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "API key is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status {
                status, message, ..
            } => write!(f, "HTTP {status} {message}"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                let last_error = last_error.as_deref().unwrap_or("none");
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error})"
                )
            }
            Self::MalformedStream(message) => write!(f, "malformed stream: {message}"),
            Self::StreamFailed { code, message } => match code {
                Some(code) if !code.trim().is_empty() => {
                    write!(f, "stream failed ({code}): {message}")
                }
                _ => write!(f, "stream failed: {message}"),
            },
            Self::IdleTimeout(limit) => {
                write!(f, "no stream data received for {}s", limit.as_secs())
            }
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChatApiError {}

impl From<reqwest::Error> for ChatApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for ChatApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(ErrorPayload { value: Some(error) }) => {
            error.message_or_fallback().unwrap_or_else(fallback)
        }
        _ => fallback(),
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
