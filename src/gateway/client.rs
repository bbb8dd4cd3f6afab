//! reqwest implementation of the gateway API.

use super::sse::SseDecoder;
use super::types::{ModelList, StreamChunk};
use super::{
    ChatRequest, Completion, Gateway, GatewayError, ModelFilter, ModelInfo, StreamDelta,
};
use crate::config::Settings;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway client over HTTP.
pub struct HttpGateway {
    base_url: String,
    api_key: Option<String>,
    referer: Option<String>,
    title: Option<String>,
    timeout: Duration,
    client: Client,
}

impl HttpGateway {
    /// Create a client from resolved settings.
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| GatewayError::Transport {
                url: settings.base_url.clone(),
                source,
            })?;

        Ok(Self {
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            referer: settings.referer.clone(),
            title: settings.title.clone(),
            timeout: settings.timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Attach auth and attribution headers.
    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, GatewayError> {
        let api_key = self.api_key.as_deref().ok_or(GatewayError::MissingApiKey)?;
        let mut builder = builder.bearer_auth(api_key);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }
        Ok(builder)
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self
            .authorized(builder)?
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        debug!("{} -> {}", url, status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn complete_chat(&self, request: &ChatRequest) -> Result<Completion, GatewayError> {
        let url = self.url("chat/completions");
        debug!(
            "POST {} model={} messages={}",
            url,
            request.model,
            request.messages.len()
        );

        let body = request.clone().streaming(false);
        let builder = self.client.post(&url).timeout(self.timeout).json(&body);
        let response = self.send(&url, builder).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Completion::from_value(raw).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn FnMut(StreamDelta) + Send),
    ) -> Result<(), GatewayError> {
        let url = self.url("chat/completions");
        debug!("POST {} (stream) model={}", url, request.model);

        let body = request.clone().streaming(true);
        let builder = self.client.post(&url).json(&body);
        let response = self.send(&url, builder).await?;

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        // The timeout bounds the gap between chunks, not the whole stream.
        loop {
            let next = tokio::time::timeout(self.timeout, stream.next())
                .await
                .map_err(|_| GatewayError::Stalled(self.timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|source| GatewayError::Transport {
                url: url.clone(),
                source,
            })?;
            for payload in decoder.push(&chunk) {
                if dispatch_payload(&payload, on_delta)? {
                    return Ok(());
                }
            }
        }
        for payload in decoder.finish() {
            if dispatch_payload(&payload, on_delta)? {
                break;
            }
        }
        Ok(())
    }

    async fn list_models(&self, filter: &ModelFilter) -> Result<Vec<ModelInfo>, GatewayError> {
        let url = self.url("models");
        let mut builder = self.client.get(&url).timeout(self.timeout);
        if let Some(category) = &filter.category {
            builder = builder.query(&[("category", category)]);
        }
        let response = self.send(&url, builder).await?;

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        debug!("gateway returned {} models", list.data.len());
        Ok(list.data.into_iter().filter(|m| filter.matches(m)).collect())
    }
}

/// Handle one SSE payload. Returns `true` once the stream is done.
fn dispatch_payload(
    payload: &str,
    on_delta: &mut (dyn FnMut(StreamDelta) + Send),
) -> Result<bool, GatewayError> {
    if payload.trim() == "[DONE]" {
        return Ok(true);
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("skipping undecodable stream payload: {}", e);
            return Ok(false);
        }
    };

    if let Some(error) = chunk.error {
        let message = error.message.unwrap_or_else(|| "unknown error".to_string());
        let message = match error.code {
            Some(code) => format!("{} (code {})", message, code),
            None => message,
        };
        return Err(GatewayError::Stream(message));
    }

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            on_delta(StreamDelta::Text(text));
        }
        if !choice.delta.annotations.is_empty() {
            on_delta(StreamDelta::Annotations(choice.delta.annotations));
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Annotation, ChatMessage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request text.
    async fn serve_once(
        status: &'static str,
        content_type: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn settings(base_url: String) -> Settings {
        Settings {
            api_key: Some("sk-test".to_string()),
            base_url,
            referer: Some("https://example.com".to_string()),
            title: Some("llmgate-tests".to_string()),
            timeout: Duration::from_secs(5),
            model: "test/model".to_string(),
            max_steps: 3,
            shell: None,
            web: None,
        }
    }

    #[tokio::test]
    async fn test_complete_chat_sends_headers_and_parses() {
        let body = r#"{"id":"gen-1","choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let (base, handle) = serve_once("200 OK", "application/json", body.to_string()).await;
        let gateway = HttpGateway::new(&settings(base)).unwrap();

        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let completion = gateway.complete_chat(&request).await.unwrap();
        assert_eq!(completion.content(), Some("hello"));
        assert_eq!(completion.id.as_deref(), Some("gen-1"));

        let raw_request = handle.await.unwrap();
        let lower = raw_request.to_lowercase();
        assert!(raw_request.starts_with("POST /chat/completions"));
        assert!(lower.contains("authorization: bearer sk-test"));
        assert!(lower.contains("http-referer: https://example.com"));
        assert!(lower.contains("x-title: llmgate-tests"));
        assert!(raw_request.contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn test_non_success_surfaces_status_and_body() {
        let (base, _handle) = serve_once(
            "401 Unauthorized",
            "application/json",
            r#"{"error":{"message":"No auth credentials found"}}"#.to_string(),
        )
        .await;
        let gateway = HttpGateway::new(&settings(base)).unwrap();

        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let err = gateway.complete_chat(&request).await.unwrap_err();
        match &err {
            GatewayError::Http { status, body } => {
                assert_eq!(*status, 401);
                assert!(body.contains("No auth credentials found"));
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
        assert!(err.to_string().starts_with("HTTP 401: "));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let mut s = settings("http://127.0.0.1:9".to_string());
        s.api_key = None;
        let gateway = HttpGateway::new(&s).unwrap();
        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let err = gateway.complete_chat(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_stream_chat_collects_deltas_in_order() {
        let body = [
            ": OPENROUTER PROCESSING",
            "",
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"","annotations":[{"type":"url_citation","url_citation":{"url":"https://a.example"}}]}}]}"#,
            "",
            "data: [DONE]",
            "",
            "",
        ]
        .join("\n");
        let (base, _handle) = serve_once("200 OK", "text/event-stream", body).await;
        let gateway = HttpGateway::new(&settings(base)).unwrap();

        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let mut deltas = Vec::new();
        gateway
            .stream_chat(&request, &mut |d: StreamDelta| deltas.push(d))
            .await
            .unwrap();

        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0], StreamDelta::Text("Hel".to_string()));
        assert_eq!(deltas[1], StreamDelta::Text("lo".to_string()));
        match &deltas[2] {
            StreamDelta::Annotations(list) => {
                assert!(matches!(&list[0], Annotation::UrlCitation { url_citation } if url_citation.url == "https://a.example"));
            }
            other => panic!("expected annotations, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let mut request = Vec::new();
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket
                .write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut s = settings(format!("http://{}", addr));
        s.timeout = Duration::from_millis(300);
        let gateway = HttpGateway::new(&s).unwrap();

        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let mut deltas = Vec::new();
        let err = gateway
            .stream_chat(&request, &mut |d: StreamDelta| deltas.push(d))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Stalled(_)));
        assert_eq!(deltas, vec![StreamDelta::Text("Hi".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_error_payload() {
        let body = "data: {\"error\":{\"message\":\"overloaded\",\"code\":502}}\n\n".to_string();
        let (base, _handle) = serve_once("200 OK", "text/event-stream", body).await;
        let gateway = HttpGateway::new(&settings(base)).unwrap();

        let request = ChatRequest::new("test/model", vec![ChatMessage::user("hi")]);
        let err = gateway
            .stream_chat(&request, &mut |_: StreamDelta| {})
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stream error: overloaded (code 502)");
    }

    #[tokio::test]
    async fn test_list_models_filters_locally() {
        let body = r#"{"data":[
            {"id":"openai/gpt-4o","name":"GPT-4o","context_length":128000},
            {"id":"anthropic/claude-3.5-sonnet","name":"Claude 3.5 Sonnet"}
        ]}"#;
        let (base, handle) = serve_once("200 OK", "application/json", body.to_string()).await;
        let gateway = HttpGateway::new(&settings(base)).unwrap();

        let filter = ModelFilter {
            category: Some("programming".to_string()),
            search: Some("claude".to_string()),
        };
        let models = gateway.list_models(&filter).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "anthropic/claude-3.5-sonnet");

        let raw_request = handle.await.unwrap();
        assert!(raw_request.starts_with("GET /models?category=programming"));
    }
}
