use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Maximum retry attempts after an initial request attempt.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;
/// Upper bound on any single wait, including server-provided hints.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Failure class of an HTTP status or transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connect/timeout failures, 408 and 5xx. Retried.
    Transient,
    /// HTTP 429. Retried, honoring server hints.
    RateLimited,
    /// HTTP 401/403 or a missing credential. Never retried.
    Auth,
    /// The server spoke, but not in a shape we understand.
    Malformed,
    /// Any other client error. Not retried.
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

fn retryable_text_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused")
            .expect("retry regex must compile")
    })
}

/// Classify an HTTP status code.
pub fn classify_status(status: StatusCode) -> FailureClass {
    match status.as_u16() {
        401 | 403 => FailureClass::Auth,
        429 => FailureClass::RateLimited,
        408 => FailureClass::Transient,
        code if (500..600).contains(&code) => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

/// Classify a non-success response, letting well-known overload wording in the
/// body promote an otherwise fatal 4xx to transient. Auth failures stay fatal.
pub fn classify_response(status: StatusCode, body: &str) -> FailureClass {
    match classify_status(status) {
        FailureClass::Fatal if retryable_text_regex().is_match(body) => FailureClass::Transient,
        class => class,
    }
}

/// Read `retry-after-ms` (milliseconds) or `retry-after` (seconds) hints.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };

    if let Some(ms) = header("retry-after-ms").and_then(|value| value.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_millis(ms as u64));
        }
    }
    if let Some(secs) = header("retry-after").and_then(|value| value.parse::<f64>().ok()) {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_millis((secs * 1000.0) as u64));
        }
    }
    None
}

/// Compute exponential backoff delay for a retry attempt.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    base.saturating_mul(2u32.saturating_pow(exponent))
        .min(MAX_RETRY_DELAY)
}

/// Pick the wait before the next attempt: a server hint wins when present,
/// both are capped.
pub fn next_delay(base: Duration, attempt: u32, hint: Option<Duration>) -> Duration {
    hint.map(|hint| hint.min(MAX_RETRY_DELAY))
        .unwrap_or_else(|| retry_delay(base, attempt))
}
