//! Reasoning enforcer
//!
//! Asks reasoning-capable backends to think before answering, scaled by effort.

use std::collections::HashMap;

use super::prepend_instruction;
use crate::ai::types::Message;
use crate::config::Effort;

const LOW_PROMPT: &str = "Think briefly before answering. A few sentences of reasoning are enough; go straight to the answer for simple requests.";

const MEDIUM_PROMPT: &str = "Think step by step before answering. Work out what is being asked, consider the relevant code and constraints, then give your answer.";

const HIGH_PROMPT: &str = "Think carefully and thoroughly before answering. Break the problem into parts, examine the relevant code paths, weigh alternative approaches and check your conclusions for mistakes before you respond.";

const MAX_PROMPT: &str = "Use your maximum reasoning depth before answering. Explore the problem exhaustively: enumerate the possible approaches, trace the code paths involved, look for edge cases and failure modes, verify every step of your argument and only then write the final answer.";

/// Built-in prompt for an effort tier
pub fn builtin_prompt(effort: Effort) -> &'static str {
    match effort {
        Effort::Low => LOW_PROMPT,
        Effort::Medium => MEDIUM_PROMPT,
        Effort::High => HIGH_PROMPT,
        Effort::Max => MAX_PROMPT,
    }
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReasoningPromptOptions {
    pub thinking: bool,
    /// Defaults to `Medium`
    pub effort: Option<Effort>,
}

/// Injects the effort-tiered reasoning instruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningEnforcer {
    enabled: bool,
    custom_prompts: HashMap<Effort, String>,
}

impl ReasoningEnforcer {
    pub fn new(enabled: bool, custom_prompts: Option<HashMap<Effort, String>>) -> Self {
        Self {
            enabled,
            custom_prompts: custom_prompts.unwrap_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Prompt text for `effort`, custom text first
    pub fn prompt_for(&self, effort: Effort) -> &str {
        self.custom_prompts
            .get(&effort)
            .map(String::as_str)
            .unwrap_or_else(|| builtin_prompt(effort))
    }

    pub fn inject_instruction(
        &self,
        messages: &[Message],
        options: ReasoningPromptOptions,
    ) -> Vec<Message> {
        if !(options.thinking || self.enabled) {
            return messages.to_vec();
        }
        let effort = options.effort.unwrap_or_default();
        prepend_instruction(messages, self.prompt_for(effort))
    }
}
