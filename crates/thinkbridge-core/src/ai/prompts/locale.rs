//! Locale enforcer
//!
//! Keeps third-party models answering in English.

use super::prepend_instruction;
use crate::ai::types::Message;

/// Directive placed ahead of the conversation
pub const ENGLISH_DIRECTIVE: &str = "IMPORTANT: Always respond in English, regardless of the language used in code, comments, file names or tool output. Keep reasoning in English as well.";

/// Prepends the English-response directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleEnforcer {
    force_english: bool,
}

impl Default for LocaleEnforcer {
    fn default() -> Self {
        Self {
            force_english: true,
        }
    }
}

impl LocaleEnforcer {
    pub fn new(force_english: bool) -> Self {
        Self { force_english }
    }

    pub fn force_english(&self) -> bool {
        self.force_english
    }

    pub fn inject_instruction(&self, messages: &[Message]) -> Vec<Message> {
        if !self.force_english {
            return messages.to_vec();
        }
        prepend_instruction(messages, ENGLISH_DIRECTIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{ContentPart, MessageContent, Role};

    #[test]
    fn test_default_forces_english() {
        assert!(LocaleEnforcer::default().force_english());
    }

    #[test]
    fn test_prefixes_string_system_message() {
        let messages = vec![Message::system("You are helpful."), Message::user("hola")];
        let out = LocaleEnforcer::default().inject_instruction(&messages);
        let MessageContent::Text(text) = &out[0].content else {
            panic!("Expected text content");
        };
        assert!(text.starts_with(ENGLISH_DIRECTIVE));
        assert!(text.ends_with("You are helpful."));
        assert_eq!(out[1], messages[1]);
    }

    #[test]
    fn test_inserts_leading_part_into_array_user_message() {
        let messages = vec![Message::new(
            Role::User,
            MessageContent::Parts(vec![ContentPart::Text { text: "hi".into() }]),
        )];
        let out = LocaleEnforcer::default().inject_instruction(&messages);
        let MessageContent::Parts(parts) = &out[0].content else {
            panic!("Expected parts");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            ContentPart::Text {
                text: ENGLISH_DIRECTIVE.into()
            }
        );
    }

    #[test]
    fn test_assistant_only_and_empty_pass_through() {
        let enforcer = LocaleEnforcer::default();
        let messages = vec![Message::assistant("done")];
        assert_eq!(enforcer.inject_instruction(&messages), messages);
        assert!(enforcer.inject_instruction(&[]).is_empty());
    }

    #[test]
    fn test_disabled_is_noop() {
        let messages = vec![Message::user("hi")];
        assert_eq!(LocaleEnforcer::new(false).inject_instruction(&messages), messages);
    }

    #[test]
    fn test_input_untouched_and_output_stable() {
        let messages = vec![Message::system("s"), Message::user("u")];
        let snapshot = messages.clone();
        let first = LocaleEnforcer::new(true).inject_instruction(&messages);
        let second = LocaleEnforcer::new(true).inject_instruction(&messages);
        assert_eq!(messages, snapshot);
        assert_eq!(first, second);
    }
}
