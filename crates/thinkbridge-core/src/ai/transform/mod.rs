//! Protocol transformer
//!
//! Orchestrates one request end to end:
//! - `transform_request`: Anthropic request -> enforcers -> OpenAI request
//! - `transform_delta` / `finalize_delta`: upstream stream -> Anthropic events
//! - `transform_response`: complete upstream payload -> Anthropic response
//!
//! The transformer itself holds only immutable configuration and can be shared
//! across requests; all per-request state lives in [`StreamState`].

mod request;
mod response;
mod stream;

#[cfg(test)]
mod tests;

pub use request::{extract_thinking_directive, ThinkingDirective};
pub use stream::StreamState;

use tracing::info;

use crate::ai::accumulator::ContentBlock;
use crate::ai::diagnostics::{DebugLog, RequestLog};
use crate::ai::format::anthropic::{Delta, StreamEvent, Usage};
use crate::ai::format::openai::{ChatCompletionRequest, ChatUsage};
use crate::ai::prompts::{LocaleEnforcer, ReasoningEnforcer};
use crate::ai::signature::Signature;
use crate::config::{debug_env_enabled, Effort, TransformerConfig};

/// Reasoning choices resolved by the caller's config layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReasoningOptions {
    pub thinking: Option<bool>,
    pub effort: Option<Effort>,
}

/// Result of [`Transformer::transform_request`]
#[derive(Debug, Clone)]
pub struct TransformedRequest {
    pub openai: ChatCompletionRequest,
    /// Whether upstream reasoning was switched on
    pub thinking: bool,
    pub effort: Effort,
    /// Id announced to the client for this message
    pub message_id: String,
    /// Model name the client asked for; echoed back in responses
    pub model: String,
    pub log: RequestLog,
}

impl TransformedRequest {
    pub fn response_context(&self) -> ResponseContext {
        ResponseContext {
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            log: self.log.clone(),
        }
    }
}

/// Per-request data the non-streaming path needs
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub message_id: String,
    pub model: String,
    pub log: RequestLog,
}

impl ResponseContext {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            log: RequestLog::disabled(),
        }
    }
}

/// Anthropic <-> OpenAI protocol transformer
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformerConfig,
    reasoning: ReasoningEnforcer,
    locale: LocaleEnforcer,
    debug_log: DebugLog,
}

impl Transformer {
    /// Build a transformer; the debug environment toggle is read here and only here
    pub fn new(config: TransformerConfig) -> Self {
        Self::with_debug_override(config, debug_env_enabled())
    }

    /// Build a transformer with an explicit value for the debug environment toggle
    pub fn with_debug_override(config: TransformerConfig, env_debug: bool) -> Self {
        let debug_enabled = config.debug_log || env_debug;
        if debug_enabled {
            info!(
                "Diagnostics enabled, writing to {}",
                config.debug_log_dir.display()
            );
        }
        Self {
            reasoning: ReasoningEnforcer::new(
                config.reasoning_enabled,
                config.custom_prompts.clone(),
            ),
            locale: LocaleEnforcer::new(config.force_locale),
            debug_log: DebugLog::new(debug_enabled, config.debug_log_dir.clone()),
            config,
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_log.is_enabled()
    }

    /// Signature for a closed block
    ///
    /// The only place signatures are produced. Non-thinking and empty blocks
    /// never get one: announcing a signature for a block with no content would
    /// leave clients showing a verified but blank thinking section.
    pub fn thinking_signature(&self, block: &ContentBlock) -> Option<Signature> {
        if !block.kind.is_thinking() {
            return None;
        }
        Signature::compute(&block.buffer)
    }

    /// `thinking_signature_delta` event for a closed block, if one is due
    pub fn create_signature_delta_event(&self, block: &ContentBlock) -> Option<StreamEvent> {
        self.thinking_signature(block)
            .map(|signature| StreamEvent::ContentBlockDelta {
                index: block.index,
                delta: Delta::ThinkingSignatureDelta { signature },
            })
    }
}

/// Fresh Anthropic-style message id
pub(crate) fn new_message_id() -> String {
    format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24])
}

pub(crate) fn convert_usage(usage: &ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: usage.cached_tokens(),
    }
}
