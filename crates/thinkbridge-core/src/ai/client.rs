//! Upstream chat-completions client
//!
//! Sends translated requests to an OpenAI-compatible endpoint. Streaming
//! replies are handed back as a raw byte stream for the pipeline to parse.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tracing::{error, info};

use crate::ai::format::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::constants;

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Upstream HTTP failure
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the upstream sent back
pub enum UpstreamReply {
    /// Raw SSE bytes
    Stream(BoxStream<'static, Result<Bytes, ClientError>>),
    Complete(ChatCompletionResponse),
}

/// Anything that can answer a chat-completions request
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: &ChatCompletionRequest) -> anyhow::Result<UpstreamReply>;
}

/// reqwest-backed client for an OpenAI-compatible provider
pub struct ChatCompletionsClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Create the HTTP client with configuration suited to long SSE streams
    fn create_http_client() -> Client {
        Client::builder()
            .user_agent(concat!("thinkbridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(constants::http::STREAM_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            })
    }

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_http(Self::create_http_client(), base_url, api_key)
    }

    /// Use a preconfigured reqwest client
    pub fn with_http(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Full chat-completions URL; a base that already names the endpoint is used as is
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with(CHAT_COMPLETIONS_PATH) {
            base.to_string()
        } else {
            format!("{}{}", base, CHAT_COMPLETIONS_PATH)
        }
    }

    async fn post(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        info!("Upstream response: {} for {}", status, request.model);
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("API error response: {} - {}", status, body);
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Upstream for ChatCompletionsClient {
    async fn send(&self, request: &ChatCompletionRequest) -> anyhow::Result<UpstreamReply> {
        let response = self.post(request).await?;
        if request.stream {
            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::from))
                .boxed();
            return Ok(UpstreamReply::Stream(bytes));
        }
        let body = response.bytes().await.map_err(ClientError::from)?;
        let parsed = serde_json::from_slice(&body).map_err(ClientError::from)?;
        Ok(UpstreamReply::Complete(parsed))
    }
}
