//! Protocol bridge layer
//!
//! Translates between the Anthropic Messages protocol spoken by the client and
//! the OpenAI chat-completions protocol spoken by the backend.

// Wire formats
pub mod format;
pub mod sse;
pub mod types;

// Request shaping
pub mod prompts;

// Stream state
pub mod accumulator;
pub mod signature;

// Orchestration
pub mod client;
pub mod diagnostics;
pub mod pipeline;
pub mod transform;

pub use transform::{ReasoningOptions, StreamState, Transformer};
