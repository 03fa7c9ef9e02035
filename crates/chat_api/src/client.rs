use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};

use crate::config::ChatApiConfig;
use crate::error::{parse_error_message, ChatApiError};
use crate::events::ChatStreamEvent;
use crate::headers::build_headers;
use crate::payload::ChatRequest;
use crate::retry::{classify_response, next_delay, retry_after_hint, FailureClass, MAX_RETRIES};
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

#[derive(Debug, Clone)]
pub struct StreamResult {
    pub events: Vec<ChatStreamEvent>,
    pub finish_reason: Option<String>,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        if config.api_key.trim().is_empty() {
            return Err(ChatApiError::MissingApiKey);
        }
        let endpoint = normalize_chat_url(&config.base_url);
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ChatApiError::InvalidBaseUrl(config.base_url.clone()));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self, user_agent: Option<&str>) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config, user_agent)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let headers = self.build_headers(self.config.user_agent.as_deref())?;
        let payload = request_with_transport_defaults(request);
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Send the request, retrying transient and rate-limited failures.
    ///
    /// Only the connection phase is retried; once a success status arrives the
    /// response is returned and the caller owns the stream.
    pub async fn send_with_retry(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ChatApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation).await?;

            match response {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let hint = retry_after_hint(response.headers());
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    let class = classify_response(status, &body);
                    if !class.is_retryable() {
                        return Err(ChatApiError::Status {
                            status,
                            message,
                            retry_after: hint,
                        });
                    }
                    if attempt == MAX_RETRIES {
                        break;
                    }

                    let delay = match class {
                        FailureClass::RateLimited => {
                            next_delay(self.config.retry_base_delay, attempt, hint)
                        }
                        _ => next_delay(self.config.retry_base_delay, attempt, None),
                    };
                    tracing::warn!(
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying chat completion request"
                    );
                    await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt == MAX_RETRIES {
                        break;
                    }
                    let delay = next_delay(self.config.retry_base_delay, attempt, None);
                    tracing::warn!(
                        error = %error,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "chat completion request failed; retrying"
                    );
                    await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Stream normalized events to `on_event` until the server closes the
    /// stream. Returns the finish reason, if one was seen.
    ///
    /// Provider error frames and undecodable frames end the stream with an
    /// error; they are never skipped.
    pub async fn stream_with_handler<F>(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<Option<String>, ChatApiError>
    where
        F: FnMut(ChatStreamEvent),
    {
        let response = self.send_with_retry(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut finish_reason = None;
        let idle = self.config.idle_timeout;

        loop {
            let next = await_or_cancel(tokio::time::timeout(idle, bytes.next()), cancellation)
                .await?
                .map_err(|_| ChatApiError::IdleTimeout(idle))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(ChatApiError::from)?;
            tracing::debug!(bytes = chunk.len(), "chat stream chunk");
            for event in parser.feed(&chunk) {
                process_stream_event(event, &mut finish_reason, &mut on_event)?;
            }
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
        }

        for event in parser.finish() {
            process_stream_event(event, &mut finish_reason, &mut on_event)?;
        }

        Ok(finish_reason)
    }

    pub async fn stream(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, ChatApiError> {
        let mut events = Vec::new();
        let finish_reason = self
            .stream_with_handler(request, cancellation, |event| {
                events.push(event);
            })
            .await?;

        Ok(StreamResult {
            events,
            finish_reason,
        })
    }
}

fn request_with_transport_defaults(request: &ChatRequest) -> ChatRequest {
    let mut payload = request.clone();
    payload.stream = true;
    if payload.tools.is_empty() {
        payload.tool_choice = None;
    } else if payload.tool_choice.is_none() {
        payload.tool_choice = Some("auto".to_owned());
    }
    payload
}

fn process_stream_event<F>(
    event: ChatStreamEvent,
    finish_reason: &mut Option<String>,
    on_event: &mut F,
) -> Result<(), ChatApiError>
where
    F: FnMut(ChatStreamEvent),
{
    match event {
        ChatStreamEvent::ProviderError { code, message } => {
            Err(ChatApiError::StreamFailed { code, message })
        }
        ChatStreamEvent::Malformed { detail } => Err(ChatApiError::MalformedStream(detail)),
        event => {
            if let ChatStreamEvent::Finished { reason } = &event {
                *finish_reason = Some(reason.clone());
            }
            on_event(event);
            Ok(())
        }
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{process_stream_event, request_with_transport_defaults};
    use crate::error::ChatApiError;
    use crate::events::ChatStreamEvent;
    use crate::payload::{ChatMessage, ChatRequest, ChatTool};
    use crate::sse::SseStreamParser;

    #[test]
    fn process_stream_event_emits_deltas_in_parser_order() {
        let frames = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        let mut parser = SseStreamParser::default();
        let parsed = parser.feed(frames.as_bytes());

        let mut finish = None;
        let mut observed = Vec::new();
        for event in parsed {
            process_stream_event(event, &mut finish, &mut |event| observed.push(event))
                .expect("deltas should process successfully");
        }

        assert_eq!(finish.as_deref(), Some("stop"));
        assert_eq!(
            observed,
            vec![
                ChatStreamEvent::ContentDelta {
                    delta: "A".to_string(),
                },
                ChatStreamEvent::ContentDelta {
                    delta: "B".to_string(),
                },
                ChatStreamEvent::Finished {
                    reason: "stop".to_string(),
                },
            ]
        );
    }

    #[test]
    fn process_stream_event_fails_on_malformed_frame() {
        let mut finish = None;
        let error = process_stream_event(
            ChatStreamEvent::Malformed {
                detail: "bad".to_owned(),
            },
            &mut finish,
            &mut |_| panic!("malformed frames must not reach the handler"),
        )
        .expect_err("malformed frame should fail");
        assert!(matches!(error, ChatApiError::MalformedStream(_)));
    }

    #[test]
    fn transport_defaults_force_streaming_and_auto_tool_choice() {
        let mut request = ChatRequest::new("m", vec![ChatMessage::text("user", "hi")]);
        request.stream = false;
        request.tools = vec![ChatTool::function(
            "read_file",
            "Read a file",
            serde_json::json!({"type": "object"}),
        )];

        let payload = request_with_transport_defaults(&request);
        assert!(payload.stream);
        assert_eq!(payload.tool_choice.as_deref(), Some("auto"));

        let bare = request_with_transport_defaults(&ChatRequest::new("m", Vec::new()));
        assert_eq!(bare.tool_choice, None);
    }
}
