//! Gateway client for OpenRouter-compatible chat-completion APIs.
//!
//! The [`Gateway`] trait is the seam the agent loop and the CLI consume;
//! [`HttpGateway`] is the reqwest implementation.

pub mod client;
pub mod sse;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpGateway;
pub use types::{
    Annotation, ChatMessage, ChatRequest, Completion, ModelFilter, ModelInfo, ResponseFormat,
    Role, SamplingParams, StreamDelta, WebEngine, WebSearchConfig,
};

/// Errors surfaced by gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Non-2xx response. Status and body are reported verbatim.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode gateway response: {0}")]
    Decode(String),

    /// No stream data arrived within the request timeout.
    #[error("stream stalled: no data for {}s", .0.as_secs_f64())]
    Stalled(std::time::Duration),

    /// Error object delivered inside an event stream.
    #[error("stream error: {0}")]
    Stream(String),

    #[error(
        "no API key configured. Set OPENROUTER_API_KEY, pass --api-key, \
         or add api_key to the config file"
    )]
    MissingApiKey,
}

/// Operations the rest of the crate needs from the gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a non-streaming completion request.
    async fn complete_chat(&self, request: &ChatRequest) -> Result<Completion, GatewayError>;

    /// Send a streaming completion request, delivering deltas in order.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn FnMut(StreamDelta) + Send),
    ) -> Result<(), GatewayError>;

    /// List available models.
    async fn list_models(&self, filter: &ModelFilter) -> Result<Vec<ModelInfo>, GatewayError>;
}
