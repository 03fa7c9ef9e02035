use serde::Deserialize;

use crate::events::ChatStreamEvent;

/// Incremental parser for chat-completions SSE streams.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
    pending_cr: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.push_normalized(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);
            parse_frame(&frame, &mut events);
        }

        events
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<ChatStreamEvent> {
        let frame = std::mem::take(&mut self.buffer);
        self.pending_cr = false;
        let mut events = Vec::new();
        parse_frame(&frame, &mut events);
        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        events.extend(parser.finish());
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    // `\r\n` and bare `\r` become `\n`; a `\r` at a chunk edge is held until
    // the next chunk shows whether a `\n` follows it.
    fn push_normalized(&mut self, text: &str) {
        for ch in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                self.buffer.push('\n');
                if ch == '\n' {
                    continue;
                }
            }
            if ch == '\r' {
                self.pending_cr = true;
            } else {
                self.buffer.push(ch);
            }
        }
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter(|line| !line.starts_with(':'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn parse_frame(frame: &str, events: &mut Vec<ChatStreamEvent>) {
    let Some(payload) = extract_data_payload(frame) else {
        return;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return;
    }
    if payload == "[DONE]" {
        events.push(ChatStreamEvent::Done);
        return;
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => map_chunk(chunk, events),
        Err(error) => events.push(ChatStreamEvent::Malformed {
            detail: format!("unparseable chunk: {error}"),
        }),
    }
}

fn map_chunk(chunk: ChunkPayload, events: &mut Vec<ChatStreamEvent>) {
    if let Some(error) = chunk.error {
        let code = error.code.and_then(|code| match code {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Number(number) => Some(number.to_string()),
            _ => None,
        });
        events.push(ChatStreamEvent::ProviderError {
            message: error
                .message
                .or_else(|| code.clone())
                .unwrap_or_else(|| "provider reported an error".to_owned()),
            code,
        });
        return;
    }

    // Only the first choice is consumed; requests never ask for `n > 1`.
    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.filter(|content| !content.is_empty()) {
            events.push(ChatStreamEvent::ContentDelta { delta: content });
        }
        for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            events.push(ChatStreamEvent::ToolCallFragment {
                index: call.index.unwrap_or(position),
                id: call.id.filter(|id| !id.is_empty()),
                name: name.filter(|name| !name.is_empty()),
                arguments,
            });
        }
    }

    if let Some(reason) = choice.finish_reason.filter(|reason| !reason.is_empty()) {
        events.push(ChatStreamEvent::Finished { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::SseStreamParser;
    use crate::events::ChatStreamEvent;

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        events.extend(parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
        ));
        assert!(events.is_empty());
        events.extend(parser.feed(b"lo\"}}]}\n\n"));
        assert_eq!(
            events,
            vec![ChatStreamEvent::ContentDelta {
                delta: "Hello".to_owned()
            }]
        );

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.last(), Some(&ChatStreamEvent::Done));
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn crlf_split_across_chunks_still_terminates_frame() {
        let mut parser = SseStreamParser::default();
        let mut events = parser.feed(b"data: [DONE]\r");
        events.extend(parser.feed(b"\n\r\n"));
        assert_eq!(events, vec![ChatStreamEvent::Done]);
    }
}
