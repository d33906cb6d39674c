//! Prompt enforcers
//!
//! Pure message-list transformers that place a control instruction ahead of the
//! conversation. Input slices are never touched; each call returns a new list.

pub mod locale;
pub mod reasoning;

pub use locale::LocaleEnforcer;
pub use reasoning::{ReasoningEnforcer, ReasoningPromptOptions};

use crate::ai::types::{Message, Role};

/// Copy `messages` with `instruction` prepended to the system message, or to
/// the first user message when there is no system message
///
/// Lists with neither come back unchanged.
pub(crate) fn prepend_instruction(messages: &[Message], instruction: &str) -> Vec<Message> {
    let target = messages
        .iter()
        .position(|m| m.role == Role::System)
        .or_else(|| messages.iter().position(|m| m.role == Role::User));

    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            if Some(i) == target {
                Message::new(msg.role, msg.content.prepended(instruction))
            } else {
                msg.clone()
            }
        })
        .collect()
}
