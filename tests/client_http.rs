//! The HTTP client against a scripted local server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use deepchat::{
    ChatBackend, ChatClient, ClientLogger, Error, LegacyChatRequest, Message, SessionPatch,
};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    content_type: &'static str,
    chunks: Vec<ResponseChunk>,
}

#[derive(Clone, Debug)]
struct RecordedRequest {
    method: String,
    path: String,
    body: String,
}

impl RecordedRequest {
    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

struct ScriptedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let next = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn({
            let requests = Arc::clone(&requests);
            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let script = scripts.get(index).cloned();
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, script, requests).await;
                    });
                }
            }
        });

        Self {
            base_url,
            requests,
            handle,
        }
    }

    fn client(&self) -> ChatClient {
        ChatClient::with_options(Some(self.base_url.clone()), Some(Duration::from_secs(5)))
            .expect("client")
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut socket: TcpStream,
    script: Option<ScriptedResponse>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    requests.lock().unwrap().push(request);
    let script = script.unwrap_or_else(|| response_text(500, "no script left"));

    let head = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        script.status, script.content_type
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for chunk in script.chunks {
        if chunk.delay_ms > 0 {
            sleep(Duration::from_millis(chunk.delay_ms)).await;
        }
        let mut frame = format!("{:x}\r\n", chunk.bytes.len()).into_bytes();
        frame.extend_from_slice(&chunk.bytes);
        frame.extend_from_slice(b"\r\n");
        if socket.write_all(&frame).await.is_err() || socket.flush().await.is_err() {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut scratch = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let read = socket.read(&mut scratch).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&scratch[..read]);
    };
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let read = socket.read(&mut scratch).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&scratch[..read]);
    }
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();
    Some(RecordedRequest { method, path, body })
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn response_text(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "text/plain; charset=utf-8",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn response_stream(parts: Vec<Vec<u8>>) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/plain; charset=utf-8",
        chunks: parts
            .into_iter()
            .map(|bytes| ResponseChunk {
                delay_ms: 20,
                bytes,
            })
            .collect(),
    }
}

const SESSION_JSON: &str = r#"{"id":"s1","title":"New chat","deep_think":0,"created_at":"2025-03-01 09:00:00","updated_at":"2025-03-01 09:30:00"}"#;

#[tokio::test]
async fn list_sessions_in_server_order() {
    let server = ScriptedServer::new(vec![response_json(
        200,
        r#"{"sessions":[
            {"id":"b","title":"Second","deep_think":true,"updated_at":"2025-03-02 10:00:00"},
            {"id":"a","title":"First","deep_think":false,"updated_at":"2025-03-01 09:00:00"}
        ]}"#,
    )])
    .await;

    let sessions = server.client().list_sessions().await.expect("list");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "b");
    assert!(sessions[0].deep_think);
    assert_eq!(sessions[1].title, "First");

    let requests = server.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/sessions");

    server.shutdown();
}

#[tokio::test]
async fn create_session_posts_title_and_flag() {
    let server = ScriptedServer::new(vec![response_json(200, SESSION_JSON)]).await;

    let session = server
        .client()
        .create_session("New chat", true)
        .await
        .expect("create");
    assert_eq!(session.id, "s1");

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/sessions");
    assert_eq!(
        request.json(),
        serde_json::json!({"title": "New chat", "deep_think": true})
    );

    server.shutdown();
}

#[tokio::test]
async fn update_session_sends_only_set_fields() {
    let server = ScriptedServer::new(vec![response_json(200, SESSION_JSON)]).await;

    server
        .client()
        .update_session("s1", &SessionPatch::new().with_deep_think(true))
        .await
        .expect("update");

    let request = &server.requests()[0];
    assert_eq!(request.method, "PATCH");
    assert_eq!(request.path, "/api/sessions/s1");
    assert_eq!(request.json(), serde_json::json!({"deep_think": true}));

    server.shutdown();
}

#[tokio::test]
async fn delete_ignores_the_ack_body() {
    let server =
        ScriptedServer::new(vec![response_json(200, r#"{"ok":true,"whatever":[1]}"#)]).await;

    server.client().delete_session("s1").await.expect("delete");
    let request = &server.requests()[0];
    assert_eq!(request.method, "DELETE");
    assert_eq!(request.path, "/api/sessions/s1");

    server.shutdown();
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let server =
        ScriptedServer::new(vec![response_json(404, r#"{"error":"session not found"}"#)]).await;

    let err = server.client().get_session("gone").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(err.description(), "session not found");

    server.shutdown();
}

#[tokio::test]
async fn session_ids_are_escaped_in_the_path() {
    let server = ScriptedServer::new(vec![response_json(200, r#"{"messages":[]}"#)]).await;

    server
        .client()
        .list_messages("a/b c")
        .await
        .expect("messages");
    assert_eq!(server.requests()[0].path, "/api/sessions/a%2Fb%20c/messages");

    server.shutdown();
}

fn stalled_body(status: u16, first: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "application/json",
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: first.as_bytes().to_vec(),
            },
            ResponseChunk {
                delay_ms: 30_000,
                bytes: b"]}".to_vec(),
            },
        ],
    }
}

#[tokio::test]
async fn stalled_json_body_times_out() {
    let server = ScriptedServer::new(vec![
        stalled_body(200, r#"{"sessions":["#),
        stalled_body(500, r#"{"error":"#),
    ])
    .await;
    let client =
        ChatClient::with_options(Some(server.base_url.clone()), Some(Duration::from_secs(1)))
            .expect("client");

    let err = tokio::time::timeout(Duration::from_secs(5), client.list_sessions())
        .await
        .expect("the body read is bounded")
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_transport());

    let err = tokio::time::timeout(Duration::from_secs(5), client.get_session("s1"))
        .await
        .expect("the error body read is bounded")
        .unwrap_err();
    assert!(err.is_timeout());

    server.shutdown();
}

#[tokio::test]
async fn list_messages_in_order() {
    let server = ScriptedServer::new(vec![response_json(
        200,
        r#"{"messages":[{"role":"user","content":"hello"},{"role":"assistant","content":"Hi there"}]}"#,
    )])
    .await;

    let messages = server.client().list_messages("s1").await.expect("messages");
    assert_eq!(
        messages,
        vec![Message::user("hello"), Message::assistant("Hi there")]
    );
    assert_eq!(server.requests()[0].path, "/api/sessions/s1/messages");

    server.shutdown();
}

#[tokio::test]
async fn chat_stream_concatenates_chunks() {
    let reply = "Hi there, 你好 👋";
    let bytes = reply.as_bytes();
    // Split inside the first CJK character and inside the emoji.
    let first_split = "Hi there, ".len() + 1;
    let second_split = reply.len() - 2;
    let server = ScriptedServer::new(vec![response_stream(vec![
        bytes[..first_split].to_vec(),
        bytes[first_split..second_split].to_vec(),
        bytes[second_split..].to_vec(),
    ])])
    .await;

    let stream = server
        .client()
        .chat_stream("s1", "hello")
        .await
        .expect("stream opens");
    let chunks: Vec<String> = stream.map(|chunk| chunk.expect("chunk")).collect().await;
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
    assert_eq!(chunks.concat(), reply);

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/chat_stream_v2");
    assert_eq!(
        request.json(),
        serde_json::json!({"session_id": "s1", "message": "hello"})
    );

    server.shutdown();
}

#[tokio::test]
async fn error_bodies_become_descriptions() {
    let server = ScriptedServer::new(vec![
        response_json(500, r#"{"error":"LLM call failed","detail":"quota exceeded"}"#),
        response_text(502, "upstream unavailable"),
        response_json(400, r#"{"error":"message is empty"}"#),
    ])
    .await;
    let client = server.client();

    let err = match client.chat_stream("s1", "hello").await {
        Ok(_) => panic!("stream should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, Error::InternalServer { .. }));
    assert_eq!(err.description(), "LLM call failed: quota exceeded");

    let err = match client.chat_stream("s1", "hello").await {
        Ok(_) => panic!("stream should fail"),
        Err(err) => err,
    };
    assert!(err.is_server_error());
    assert_eq!(err.status_code(), Some(502));
    assert_eq!(err.description(), "upstream unavailable");

    let err = client.list_sessions().await.unwrap_err();
    assert!(matches!(err, Error::BadRequest { .. }));
    assert_eq!(err.description(), "message is empty");

    server.shutdown();
}

#[tokio::test]
async fn legacy_chat_round_trip() {
    let server = ScriptedServer::new(vec![response_json(200, r#"{"reply":"pong"}"#)]).await;

    let request = LegacyChatRequest {
        message: "ping".to_string(),
        history: vec![Message::user("ping")],
        deep_think: true,
    };
    let reply = server.client().chat(&request).await.expect("chat");
    assert_eq!(reply, "pong");
    assert_eq!(
        server.requests()[0].json(),
        serde_json::json!({
            "message": "ping",
            "history": [{"role": "user", "content": "ping"}],
            "deep_think": true
        })
    );

    server.shutdown();
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = ChatClient::new(Some(format!("http://{addr}"))).expect("client");
    let err = client.list_sessions().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.status_code(), None);
}

#[derive(Default)]
struct CollectingLogger {
    lines: Mutex<Vec<String>>,
}

impl ClientLogger for CollectingLogger {
    fn log_request(&self, method: &str, path: &str) {
        self.lines.lock().unwrap().push(format!("request {method} {path}"));
    }

    fn log_response(&self, method: &str, path: &str, status: u16, _elapsed: f64) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("response {method} {path} {status}"));
    }

    fn log_stream_end(&self, bytes: u64, _elapsed: f64) {
        self.lines.lock().unwrap().push(format!("end {bytes}"));
    }

    fn log_error(&self, method: &str, path: &str, error: &Error) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("error {method} {path} {}", error.description()));
    }
}

#[tokio::test]
async fn logger_observes_requests() {
    let server = ScriptedServer::new(vec![
        response_stream(vec![b"abc".to_vec(), b"de".to_vec()]),
        response_json(404, r#"{"error":"nope"}"#),
    ])
    .await;
    let logger = Arc::new(CollectingLogger::default());
    let client = server.client().with_logger(logger.clone());

    let stream = client.chat_stream("s1", "hi").await.expect("stream");
    let text: String = stream.map(|chunk| chunk.expect("chunk")).collect::<Vec<_>>().await.concat();
    assert_eq!(text, "abcde");
    let _ = client.get_session("x").await;

    let lines = logger.lines.lock().unwrap().clone();
    assert_eq!(
        lines,
        vec![
            "request POST api/chat_stream_v2".to_string(),
            "response POST api/chat_stream_v2 200".to_string(),
            "end 5".to_string(),
            "request GET api/sessions/x".to_string(),
            "error GET api/sessions/x nope".to_string(),
        ]
    );

    server.shutdown();
}
