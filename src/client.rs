use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::client_logger::ClientLogger;
use crate::config::DEFAULT_BASE_URL;
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_BYTES, STREAM_CHUNKS,
    STREAM_DURATION, STREAM_ERRORS, STREAM_TTFB,
};
use crate::text_stream::{TextStream, decode_text_stream};
use crate::types::{
    ChatStreamRequest, CreateSessionParams, LegacyChatReply, LegacyChatRequest, Message,
    MessageList, Session, SessionList, SessionPatch,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable consulted when no base URL is given.
pub const BASE_URL_ENV: &str = "DEEPCHAT_BASE_URL";

/// The remote operations the chat application depends on.
///
/// Every method fails with a description-bearing [`Error`] when the server
/// answers with a non-success status or cannot be reached.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a session; the server assigns the id and timestamps.
    async fn create_session(&self, title: &str, deep_think: bool) -> Result<Session>;

    /// List sessions, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Fetch one session.  Unknown ids fail with [`Error::NotFound`].
    async fn get_session(&self, id: &str) -> Result<Session>;

    /// Apply a partial update and return the updated session.
    async fn update_session(&self, id: &str, patch: &SessionPatch) -> Result<Session>;

    /// Delete a session.  Callers reload the list rather than trusting the reply.
    async fn delete_session(&self, id: &str) -> Result<()>;

    /// Fetch a session's messages in conversation order.
    async fn list_messages(&self, id: &str) -> Result<Vec<Message>>;

    /// Post a message to a session and stream the assistant's reply as text.
    async fn chat_stream(&self, session_id: &str, message: &str) -> Result<TextStream>;

    /// Single-session, non-streaming chat.
    async fn chat(&self, request: &LegacyChatRequest) -> Result<String>;
}

/// HTTP client for the deepchat API.
#[derive(Clone)]
pub struct ChatClient {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    logger: Option<Arc<dyn ClientLogger>>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl ChatClient {
    /// Create a new client.
    ///
    /// The base URL can be provided directly or read from the DEEPCHAT_BASE_URL
    /// environment variable; without either the client talks to localhost:3000.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(base_url: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let base_url = match base_url {
            Some(url) => url,
            None => env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        };
        let base_url = parse_base_url(&base_url)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // The timeout bounds connecting, the response head and JSON bodies.  A
        // streamed reply may legitimately take longer than any fixed deadline.
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
            logger: None,
        })
    }

    /// Attach a logger that observes every request.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The base URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Error::from)
    }

    /// The URL of a session, or of one of its sub-resources, with the id escaped.
    fn session_url(&self, id: &str, tail: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::url(format!("{} cannot be a base URL", self.base_url), None))?
            .pop_if_empty()
            .extend(["api", "sessions", id])
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        self.request_accepting(method, path, "application/json")
    }

    fn request_accepting(
        &self,
        method: Method,
        path: &str,
        accept: &'static str,
    ) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        Ok(self.request_to(method, url, accept))
    }

    fn request_to(&self, method: Method, url: Url, accept: &'static str) -> RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.default_headers(accept))
    }

    /// Send a request and turn transport failures and non-success statuses into errors.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<Response> {
        CLIENT_REQUESTS.click();
        if let Some(logger) = &self.logger {
            logger.log_request(method.as_str(), path);
        }
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(sent) => sent.map_err(|e| self.transport_error(e)),
            Err(_) => Err(Error::timeout(
                format!("no response from {path}"),
                Some(self.timeout.as_secs_f64()),
            )),
        };
        let result = match result {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(self.process_error_response(path, response).await),
            Err(err) => Err(err),
        };
        let elapsed = start.elapsed().as_secs_f64();
        CLIENT_REQUEST_DURATION.add(elapsed);
        match &result {
            Ok(response) => {
                if let Some(logger) = &self.logger {
                    logger.log_response(method.as_str(), path, response.status().as_u16(), elapsed);
                }
            }
            Err(err) => {
                CLIENT_REQUEST_ERRORS.click();
                if let Some(logger) = &self.logger {
                    logger.log_error(method.as_str(), path, err);
                }
            }
        }
        result
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<T> {
        let response = self.execute(method.clone(), path, builder).await?;
        let parsed = match tokio::time::timeout(self.timeout, response.json::<T>()).await {
            Ok(parsed) => parsed.map_err(|e| {
                Error::serialization(
                    format!("Failed to parse response: {}", e),
                    Some(Box::new(e)),
                )
            }),
            Err(_) => Err(self.body_timeout(path)),
        };
        if let Err(err) = &parsed {
            CLIENT_REQUEST_ERRORS.click();
            if let Some(logger) = &self.logger {
                logger.log_error(method.as_str(), path, err);
            }
        }
        parsed
    }

    fn body_timeout(&self, path: &str) -> Error {
        Error::timeout(
            format!("response body from {path} stalled"),
            Some(self.timeout.as_secs_f64()),
        )
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(&self, path: &str, response: Response) -> Error {
        let status_code = response.status().as_u16();
        let body = match tokio::time::timeout(self.timeout, response.text()).await {
            Ok(Ok(body)) => body,
            Err(_) => return self.body_timeout(path),
            Ok(Err(e)) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };
        Error::from_status(status_code, describe_error_body(status_code, &body))
    }
}

/// Pull a human-readable description out of an error body.
///
/// Bodies are either plain text, `{"error": ...}`, or `{"error": ..., "detail": ...}`.
pub fn describe_error_body(status_code: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        detail: Option<String>,
    }

    let body = body.trim();
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body)
        && let Some(error) = parsed.error.filter(|e| !e.is_empty())
    {
        return match parsed.detail.filter(|d| !d.is_empty()) {
            Some(detail) => format!("{error}: {detail}"),
            None => error,
        };
    }
    if body.is_empty() {
        format!("HTTP {status_code}")
    } else {
        body.to_string()
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    // Url::join drops the last path segment unless it ends with a slash.
    let mut base_url = base_url.trim().to_string();
    if !base_url.ends_with('/') {
        base_url.push('/');
    }
    Url::parse(&base_url).map_err(Error::from)
}

/// The session path as it appears in logs.
fn session_path(id: &str) -> String {
    format!("api/sessions/{id}")
}

#[async_trait::async_trait]
impl ChatBackend for ChatClient {
    async fn create_session(&self, title: &str, deep_think: bool) -> Result<Session> {
        let path = "api/sessions";
        let params = CreateSessionParams::new(title, deep_think);
        let builder = self.request(Method::POST, path)?.json(&params);
        self.execute_json(Method::POST, path, builder).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let path = "api/sessions";
        let builder = self.request(Method::GET, path)?;
        let list: SessionList = self.execute_json(Method::GET, path, builder).await?;
        Ok(list.sessions)
    }

    async fn get_session(&self, id: &str) -> Result<Session> {
        let path = session_path(id);
        let url = self.session_url(id, None)?;
        let builder = self.request_to(Method::GET, url, "application/json");
        self.execute_json(Method::GET, &path, builder)
            .await
            .map_err(|err| match err {
                Error::NotFound { message, .. } => {
                    Error::not_found(message, Some("session".to_string()), Some(id.to_string()))
                }
                err => err,
            })
    }

    async fn update_session(&self, id: &str, patch: &SessionPatch) -> Result<Session> {
        let path = session_path(id);
        let url = self.session_url(id, None)?;
        let builder = self
            .request_to(Method::PATCH, url, "application/json")
            .json(patch);
        self.execute_json(Method::PATCH, &path, builder).await
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let path = session_path(id);
        let url = self.session_url(id, None)?;
        let builder = self.request_to(Method::DELETE, url, "application/json");
        self.execute(Method::DELETE, &path, builder).await?;
        Ok(())
    }

    async fn list_messages(&self, id: &str) -> Result<Vec<Message>> {
        let path = format!("{}/messages", session_path(id));
        let url = self.session_url(id, Some("messages"))?;
        let builder = self.request_to(Method::GET, url, "application/json");
        let list: MessageList = self.execute_json(Method::GET, &path, builder).await?;
        Ok(list.messages)
    }

    async fn chat_stream(&self, session_id: &str, message: &str) -> Result<TextStream> {
        let path = "api/chat_stream_v2";
        let body = ChatStreamRequest::new(session_id, message);
        let builder = self
            .request_accepting(Method::POST, path, "text/plain")?
            .json(&body);

        let start = Instant::now();
        let response = self.execute(Method::POST, path, builder).await?;

        let logger = self.logger.clone();
        let mut first_chunk = true;
        let stream = decode_text_stream(response.bytes_stream()).map(move |chunk| {
            match &chunk {
                Ok(text) => {
                    if first_chunk {
                        STREAM_TTFB.add(start.elapsed().as_secs_f64());
                        first_chunk = false;
                    }
                    STREAM_CHUNKS.click();
                    STREAM_BYTES.count(text.len() as u64);
                    if let Some(logger) = &logger {
                        logger.log_stream_chunk(text);
                    }
                }
                Err(err) => {
                    STREAM_ERRORS.click();
                    if let Some(logger) = &logger {
                        logger.log_error("POST", "api/chat_stream_v2", err);
                    }
                }
            }
            chunk
        });
        let logger = self.logger.clone();
        let stream = StreamEnd::new(stream, move |bytes| {
            let elapsed = start.elapsed().as_secs_f64();
            STREAM_DURATION.add(elapsed);
            if let Some(logger) = &logger {
                logger.log_stream_end(bytes, elapsed);
            }
        });
        Ok(Box::pin(stream))
    }

    async fn chat(&self, request: &LegacyChatRequest) -> Result<String> {
        let path = "api/chat";
        let builder = self.request(Method::POST, path)?.json(request);
        let reply: LegacyChatReply = self.execute_json(Method::POST, path, builder).await?;
        Ok(reply.reply)
    }
}

/// Wraps a text stream and reports the total byte count once it ends.
struct StreamEnd<S, F: FnOnce(u64)> {
    inner: std::pin::Pin<Box<S>>,
    bytes: u64,
    on_end: Option<F>,
}

impl<S, F: FnOnce(u64)> StreamEnd<S, F> {
    fn new(inner: S, on_end: F) -> Self {
        Self {
            inner: Box::pin(inner),
            bytes: 0,
            on_end: Some(on_end),
        }
    }
}

impl<S, F> futures::Stream for StreamEnd<S, F>
where
    S: futures::Stream<Item = Result<String>>,
    F: FnOnce(u64) + Unpin,
{
    type Item = Result<String>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(text))) => {
                this.bytes += text.len() as u64;
                std::task::Poll::Ready(Some(Ok(text)))
            }
            std::task::Poll::Ready(None) => {
                if let Some(on_end) = this.on_end.take() {
                    on_end(this.bytes);
                }
                std::task::Poll::Ready(None)
            }
            other => other,
        }
    }
}
