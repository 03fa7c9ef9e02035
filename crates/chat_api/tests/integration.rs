use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use chat_api::events::ChatStreamEvent;
use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError, ChatMessage, ChatRequest};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
enum ScriptedResponse {
    Respond {
        status: u16,
        content_type: &'static str,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<ResponseChunk>,
    },
    /// Starts a 200 event stream, writes `chunks`, then drops the socket
    /// without finishing the chunked body.
    CutOff {
        chunks: Vec<ResponseChunk>,
    },
    Reset,
}

struct ScriptedServer {
    base_url: String,
    request_count: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}/v1");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let bodies = Arc::clone(&bodies);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let bodies = Arc::clone(&bodies);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, bodies).await;
                    });
                }
            }
        });

        Self {
            base_url,
            request_count,
            bodies,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().expect("bodies lock").clone()
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

fn response_sse(frames: &[&str]) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        headers: Vec::new(),
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: sse_frames(frames),
        }],
    }
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "application/json",
        headers: Vec::new(),
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn sse_frames(frames: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    body.into_bytes()
}

fn client_for(server: &ScriptedServer) -> ChatApiClient {
    let config = ChatApiConfig::new("sk-test")
        .with_base_url(&server.base_url)
        .with_retry_base_delay(Duration::from_millis(1));
    ChatApiClient::new(config).expect("client")
}

fn request() -> ChatRequest {
    ChatRequest::new("gpt-test", vec![ChatMessage::text("user", "hi")])
}

const HELLO_FRAMES: &[&str] = &[
    r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"hel"}}]}"#,
    r#"{"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
    r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
    "[DONE]",
];

#[tokio::test]
async fn stream_integration_successful_completion() {
    let server = ScriptedServer::new(vec![response_sse(HELLO_FRAMES)]).await;
    let client = client_for(&server);

    let result = client.stream(&request(), None).await.expect("stream");

    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    let text: String = result
        .events
        .iter()
        .filter_map(|event| match event {
            ChatStreamEvent::ContentDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "hello");
    assert_eq!(result.events.last(), Some(&ChatStreamEvent::Done));

    let bodies = server.bodies();
    assert_eq!(bodies.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&bodies[0]).expect("request body json");
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["content"], "hi");
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_retries_transient_status_then_succeeds() {
    let server = ScriptedServer::new(vec![
        response_json(503, r#"{"error":{"message":"overloaded"}}"#),
        ScriptedResponse::Reset,
        response_sse(HELLO_FRAMES),
    ])
    .await;
    let client = client_for(&server);

    let result = client.stream(&request(), None).await.expect("stream");
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    assert_eq!(server.request_count(), 3);
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_honors_rate_limit_hint() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::Respond {
            status: 429,
            content_type: "application/json",
            headers: vec![("retry-after-ms", "5")],
            chunks: vec![ResponseChunk {
                delay_ms: 0,
                bytes: br#"{"error":{"message":"Rate limit reached"}}"#.to_vec(),
            }],
        },
        response_sse(HELLO_FRAMES),
    ])
    .await;
    let client = client_for(&server);

    client.stream(&request(), None).await.expect("stream");
    assert_eq!(server.request_count(), 2);
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_does_not_retry_auth_failures() {
    let server = ScriptedServer::new(vec![response_json(
        401,
        r#"{"error":{"message":"Incorrect API key provided"}}"#,
    )])
    .await;
    let client = client_for(&server);

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("auth failure");
    match error {
        ChatApiError::Status {
            status, message, ..
        } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.request_count(), 1);
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_exhausts_retries() {
    let failures = (0..4)
        .map(|_| response_json(500, r#"{"error":{"message":"boom"}}"#))
        .collect();
    let server = ScriptedServer::new(failures).await;
    let client = client_for(&server);

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("retries should exhaust");
    assert!(matches!(
        error,
        ChatApiError::RetryExhausted {
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            ..
        }
    ));
    assert_eq!(server.request_count(), 4);
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_reports_malformed_frames() {
    let server = ScriptedServer::new(vec![response_sse(&[
        r#"{"choices":[{"delta":{"content":"a"}}]}"#,
        "{oops",
    ])])
    .await;
    let client = client_for(&server);

    let mut seen = Vec::new();
    let error = client
        .stream_with_handler(&request(), None, |event| seen.push(event))
        .await
        .expect_err("malformed");
    assert!(matches!(error, ChatApiError::MalformedStream(_)));
    assert_eq!(seen.len(), 1);
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_times_out_idle_stream() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        headers: Vec::new(),
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: sse_frames(&[r#"{"choices":[{"delta":{"content":"a"}}]}"#]),
            },
            ResponseChunk {
                delay_ms: 2_000,
                bytes: sse_frames(&["[DONE]"]),
            },
        ],
    }])
    .await;
    let config = ChatApiConfig::new("sk-test")
        .with_base_url(&server.base_url)
        .with_idle_timeout(Duration::from_millis(150));
    let client = ChatApiClient::new(config).expect("client");

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("idle timeout");
    assert!(matches!(error, ChatApiError::IdleTimeout(_)));
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_observes_cancellation_between_chunks() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        headers: Vec::new(),
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: sse_frames(&[r#"{"choices":[{"delta":{"content":"a"}}]}"#]),
            },
            ResponseChunk {
                delay_ms: 5_000,
                bytes: sse_frames(&["[DONE]"]),
            },
        ],
    }])
    .await;
    let client = client_for(&server);
    let cancel = Arc::new(AtomicBool::new(false));

    let trigger = Arc::clone(&cancel);
    let started = std::time::Instant::now();
    let error = client
        .stream_with_handler(&request(), Some(&cancel), move |_| {
            trigger.store(true, Ordering::Release);
        })
        .await
        .expect_err("cancelled");

    assert!(matches!(error, ChatApiError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(4));
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_does_not_retry_once_streaming_began() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::CutOff {
            chunks: vec![ResponseChunk {
                delay_ms: 0,
                bytes: sse_frames(&[r#"{"choices":[{"index":0,"delta":{"content":"par"}}]}"#]),
            }],
        },
        response_sse(HELLO_FRAMES),
    ])
    .await;
    let client = client_for(&server);

    let mut seen = Vec::new();
    let result = client
        .stream_with_handler(&request(), None, |event| seen.push(event))
        .await;

    assert!(result.is_err(), "cut-off stream reported {result:?}");
    assert_eq!(
        seen,
        vec![ChatStreamEvent::ContentDelta {
            delta: "par".to_string()
        }]
    );
    assert_eq!(server.request_count(), 1);
    server.shutdown();
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
) {
    let Ok(body) = read_request(&mut socket).await else {
        return;
    };
    bodies.lock().expect("bodies lock").push(body);

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_json(500, r#"{"error":{"message":"unexpected request"}}"#));

    let (status, content_type, headers, chunks, complete) = match response {
        ScriptedResponse::Reset => return,
        ScriptedResponse::CutOff { chunks } => (200, "text/event-stream", Vec::new(), chunks, false),
        ScriptedResponse::Respond {
            status,
            content_type,
            headers,
            chunks,
        } => (status, content_type, headers, chunks, true),
    };

    let mut head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n",
        status_reason(status),
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    for chunk in chunks {
        if chunk.delay_ms > 0 {
            sleep(Duration::from_millis(chunk.delay_ms)).await;
        }
        let prefix = format!("{:X}\r\n", chunk.bytes.len());
        if socket.write_all(prefix.as_bytes()).await.is_err() {
            return;
        }
        if socket.write_all(&chunk.bytes).await.is_err() {
            return;
        }
        if socket.write_all(b"\r\n").await.is_err() {
            return;
        }
    }

    if complete {
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(position) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while request.len() < header_end + content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }

    Ok(String::from_utf8_lossy(&request[header_end..]).into_owned())
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
