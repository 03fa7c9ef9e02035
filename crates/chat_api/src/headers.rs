use std::collections::BTreeMap;

use crate::config::ChatApiConfig;
use crate::error::ChatApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

const DEFAULT_USER_AGENT: &str = concat!("coding-agent/", env!("CARGO_PKG_VERSION"));

/// Build a deterministic header map for chat-completions requests.
pub fn build_headers(
    config: &ChatApiConfig,
    user_agent: Option<&str>,
) -> Result<BTreeMap<String, String>, ChatApiError> {
    let mut headers = BTreeMap::new();

    let api_key = config.api_key.trim();
    if api_key.is_empty() {
        return Err(ChatApiError::MissingApiKey);
    }

    headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {api_key}"));
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = match (user_agent, config.user_agent.as_deref()) {
        (Some(explicit), _) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        (None, Some(explicit)) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        _ => DEFAULT_USER_AGENT.to_owned(),
    };
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        let key = key.trim().to_ascii_lowercase();
        if key == HEADER_AUTHORIZATION {
            continue;
        }
        headers.insert(key, value.trim().to_owned());
    }

    Ok(headers)
}
