//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Ollama, and any endpoint that
//! exposes `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Image inputs as content parts (vision models)

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, Role};
use stepwise_core::provider::*;
use tracing::{debug, trace, warn};

const REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    ///
    /// Messages carrying images become an array of content parts.
    fn to_api_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                let content = if m.images.is_empty() {
                    Value::String(m.content.clone())
                } else {
                    let mut parts = vec![json!({"type": "text", "text": m.content})];
                    parts.extend(
                        m.images
                            .iter()
                            .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
                    );
                    Value::Array(parts)
                };
                json!({"role": role, "content": content})
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }

        body
    }

    async fn post(&self, body: &Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        check_status(response).await
    }
}

/// Map non-success HTTP statuses to provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ModelNotFound(body));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post(&Self::request_body(&request, false), false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model.unwrap_or(request.model),
            usage: api_response.usage.map(Usage::from),
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&Self::request_body(&request, true), true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward content deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseLineBuffer::default();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend(&bytes);

                while let Some(line) = buffer.next_line() {

                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx.send(Ok(final_chunk(usage))).await;
                            return;
                        }
                        SseLine::Invalid(error) => {
                            trace!(
                                provider = %provider_name,
                                error = %error,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                        SseLine::Data(stream_resp) => {
                            if let Some(u) = stream_resp.usage {
                                usage = Some(u.into());
                            }
                            let content = stream_resp
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .filter(|c| !c.is_empty());
                            if let Some(content) = content {
                                let chunk = StreamChunk {
                                    content: Some(content),
                                    done: false,
                                    usage: None,
                                };
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(final_chunk(usage))).await;
        });

        Ok(rx)
    }
}

fn final_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        content: None,
        done: true,
        usage,
    }
}

// --- SSE line parsing ---

/// Raw SSE bytes waiting to be split into lines.
///
/// A line is decoded only once its `\n` has arrived, so a multi-byte
/// character split across two network reads is reassembled first.
#[derive(Debug, Default)]
struct SseLineBuffer {
    bytes: Vec<u8>,
}

impl SseLineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

enum SseLine {
    /// Blank line, comment, or a non-data field
    Skip,
    /// The `[DONE]` end marker
    Done,
    Data(StreamResponse),
    Invalid(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamResponse>(data) {
        Ok(parsed) => SseLine::Data(parsed),
        Err(e) => SseLine::Invalid(e.to_string()),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", server.uri(), "test_key").unwrap()
    }

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest::new("gpt-4o-mini", vec![Message::user(content)])
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0]["role"], "system");
        assert_eq!(api[1]["content"], "Hello");
    }

    #[test]
    fn image_messages_become_content_parts() {
        let msg = Message::user("What is this?").with_image("https://img.example/cat.png");
        let api = OpenAiCompatProvider::to_api_messages(&[msg]);
        let parts = api[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "https://img.example/cat.png");
    }

    #[test]
    fn trailing_slash_trimmed() {
        let p = OpenAiCompatProvider::new("x", "http://localhost:1234/v1/", "").unwrap();
        assert_eq!(p.base_url(), "http://localhost:1234/v1");
    }

    // --- SSE parsing tests ---

    #[test]
    fn sse_line_variants() {
        assert!(matches!(parse_sse_line("\n"), SseLine::Skip));
        assert!(matches!(parse_sse_line(": keep-alive\n"), SseLine::Skip));
        assert!(matches!(parse_sse_line("event: message\n"), SseLine::Skip));
        assert!(matches!(parse_sse_line("data: [DONE]\r\n"), SseLine::Done));
        assert!(matches!(parse_sse_line("data: {not json"), SseLine::Invalid(_)));

        let SseLine::Data(parsed) =
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#)
        else {
            panic!("expected data line");
        };
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hel"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage: Usage = parsed.usage.unwrap().into();
        assert_eq!(usage.total_tokens, 15);
    }

    // --- Wiremock tests ---

    #[tokio::test]
    async fn complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini-2024",
                "choices": [{
                    "message": {"role": "assistant", "content": "<final_answer>4</final_answer>"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18}
            })))
            .mount(&server)
            .await;

        let response = provider(&server).complete(request("2+2?")).await.unwrap();
        assert_eq!(response.content, "<final_answer>4</final_answer>");
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert_eq!(response.usage.unwrap().total_tokens, 18);
    }

    #[tokio::test]
    async fn complete_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Invalid API key"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete(request("Hi")).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn complete_rate_limited_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
            .mount(&server)
            .await;

        let err = provider(&server).complete(request("Hi")).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: 60
            }
        ));
    }

    #[tokio::test]
    async fn complete_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = provider(&server).complete(request("Hi")).await.unwrap_err();
        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 500);
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_assembles_fragments_and_usage() {
        let server = MockServer::start().await;
        let body = [
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"<final_"}}]}"#,
            ": keep-alive",
            r#"data: {"choices":[{"delta":{"content":"answer>ok</final_answer>"}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#,
            "data: [DONE]",
            "",
        ]
        .join("\n\n");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let mut rx = provider(&server).stream(request("go")).await.unwrap();
        let mut fragments = Vec::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(text) = chunk.content.clone() {
                fragments.push(text);
            }
            if chunk.done {
                last = Some(chunk);
                break;
            }
        }

        assert_eq!(fragments, vec!["<final_", "answer>ok</final_answer>"]);
        let last = last.unwrap();
        assert_eq!(last.usage.unwrap().total_tokens, 10);
    }

    #[test]
    fn line_buffer_waits_for_split_characters() {
        let line = "data: café\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = SseLineBuffer::default();
        buffer.extend(&line[..split]);
        assert_eq!(buffer.next_line(), None);
        buffer.extend(&line[split..]);
        assert_eq!(buffer.next_line().as_deref(), Some("data: café\n"));
        assert_eq!(buffer.next_line(), None);
    }

    /// Serves one streaming response, writing `parts` as separate reads.
    async fn serve_in_parts(parts: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the request so closing the socket does not reset it
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            for part in parts {
                socket.write_all(&part).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stream_keeps_characters_split_across_reads() {
        let body = concat!(
            r#"data: {"choices":[{"delta":{"content":"café"}}]}"#,
            "\n\ndata: [DONE]\n\n"
        )
        .as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let base_url = serve_in_parts(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        let provider = OpenAiCompatProvider::new("test", base_url, "test_key").unwrap();
        let mut rx = provider.stream(request("go")).await.unwrap();
        let mut assembled = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            assembled.push_str(chunk.content.as_deref().unwrap_or(""));
            if chunk.done {
                break;
            }
        }
        assert_eq!(assembled, "café");
    }

    #[tokio::test]
    async fn stream_auth_failure_is_immediate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = provider(&server).stream(request("go")).await;
        assert!(matches!(result, Err(ProviderError::AuthenticationFailed(_))));
    }
}
