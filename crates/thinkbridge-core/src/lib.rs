//! Thinkbridge Core - Anthropic Messages to OpenAI chat-completions bridge
//!
//! This crate lets an Anthropic-protocol coding client talk to OpenAI-style
//! chat-completions backends:
//! - Request rewriting with reasoning and locale prompt enforcement
//! - Incremental SSE frame parsing of upstream streams
//! - Re-emission of Anthropic stream events with `text`, `thinking` and
//!   `tool_use` content blocks, including per-block thinking signatures
//! - Opt-in per-request diagnostic capture

pub mod ai;
pub mod config;
pub mod constants;
pub mod paths;

// Re-exports for convenience
pub use ai::accumulator::{BlockAccumulator, BlockKind, ContentBlock, LoopState};
pub use ai::client::{ChatCompletionsClient, ClientError, Upstream, UpstreamReply};
pub use ai::format::anthropic::{MessagesRequest, MessagesResponse, StreamEvent};
pub use ai::format::openai::{ChatCompletionRequest, ChatCompletionResponse};
pub use ai::pipeline::{forward, pump, spawn_pump, BridgeReply, PipelineError, PumpOutcome};
pub use ai::sse::{SseParser, WireEvent};
pub use ai::transform::{
    ReasoningOptions, ResponseContext, StreamState, TransformedRequest, Transformer,
};
pub use ai::types::{ContentPart, Message, MessageContent, Role};
pub use config::{ConfigError, Effort, TransformerConfig};
