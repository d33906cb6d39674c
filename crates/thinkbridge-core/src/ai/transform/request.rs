//! Outbound request rewriting
//!
//! Anthropic Messages request -> OpenAI chat-completions request, with the
//! reasoning and locale enforcers applied in between.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{new_message_id, ReasoningOptions, TransformedRequest, Transformer};
use crate::ai::diagnostics::Artifact;
use crate::ai::format::anthropic::{MessagesRequest, ThinkingConfig, ToolDefinition};
use crate::ai::format::openai::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage, ChatTool, FunctionCall,
    FunctionDefinition, ImageUrl, StreamOptions, ToolCall,
};
use crate::ai::prompts::ReasoningPromptOptions;
use crate::ai::types::{tool_result_text, ContentPart, Message, MessageContent, Role};
use crate::config::Effort;

/// Inline control tag: `[think:on]`, `[think:off]` or `[think:<effort>]`
static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[think:(on|off|low|medium|high|max)\]").unwrap());

/// Thinking switch found in user text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingDirective {
    On,
    Off,
    Effort(Effort),
}

impl ThinkingDirective {
    fn from_tag(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Some(ThinkingDirective::On),
            "off" => Some(ThinkingDirective::Off),
            other => other.parse().ok().map(ThinkingDirective::Effort),
        }
    }
}

/// Last control tag in `text`, and the text with every tag removed
fn scan_text(text: &str) -> (Option<ThinkingDirective>, Option<String>) {
    let directive = THINK_TAG
        .captures_iter(text)
        .last()
        .and_then(|caps| ThinkingDirective::from_tag(&caps[1]));
    if directive.is_none() {
        return (None, None);
    }
    let stripped = THINK_TAG.replace_all(text, "").trim().to_string();
    (directive, Some(stripped))
}

/// Find the thinking directive in the most recent user message
///
/// Only that message is scanned. Both string content and the text parts of array
/// content are searched; the last tag wins. Returns the directive and a copy of
/// `messages` with the tags stripped.
pub fn extract_thinking_directive(messages: &[Message]) -> (Option<ThinkingDirective>, Vec<Message>) {
    let mut out = messages.to_vec();
    let Some(pos) = out.iter().rposition(|m| m.role == Role::User) else {
        return (None, out);
    };
    let last_user = &mut out[pos];

    let mut found = None;
    match &mut last_user.content {
        MessageContent::Text(text) => {
            if let (Some(directive), Some(stripped)) = scan_text(text) {
                found = Some(directive);
                *text = stripped;
            }
        }
        MessageContent::Parts(parts) => {
            for part in parts.iter_mut() {
                if let ContentPart::Text { text } = part {
                    if let (Some(directive), Some(stripped)) = scan_text(text) {
                        found = Some(directive);
                        *text = stripped;
                    }
                }
            }
        }
    }
    (found, out)
}

impl Transformer {
    /// Rewrite an Anthropic request for the upstream provider
    pub fn transform_request(
        &self,
        request: &MessagesRequest,
        options: &ReasoningOptions,
    ) -> TransformedRequest {
        let message_id = new_message_id();
        let log = self.debug_log.begin(&message_id);
        log.write_json(Artifact::InboundRequest, request);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            let text = system.text();
            if !text.is_empty() {
                messages.push(Message::system(text));
            }
        }
        messages.extend(request.messages.iter().cloned());

        let (directive, messages) = extract_thinking_directive(&messages);
        let (thinking, effort) = self.resolve_reasoning(request, options, directive);
        info!(
            "Request {}: model={}, messages={}, thinking={}, effort={}, directive={:?}",
            message_id,
            request.model,
            request.messages.len(),
            thinking,
            effort,
            directive
        );

        let messages = self.reasoning.inject_instruction(
            &messages,
            ReasoningPromptOptions {
                thinking,
                effort: Some(effort),
            },
        );
        let messages = self.locale.inject_instruction(&messages);

        let streaming = request.is_streaming();
        let openai = ChatCompletionRequest {
            model: request.model.clone(),
            messages: convert_messages(&messages),
            stream: streaming,
            stream_options: streaming.then_some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone(),
            tools: request
                .tools
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(convert_tools),
            tool_choice: request.tool_choice.as_ref().and_then(convert_tool_choice),
            enable_thinking: thinking.then_some(true),
            reasoning_effort: thinking.then(|| effort.upstream_value().to_string()),
        };
        log.write_json(Artifact::UpstreamRequest, &openai);

        TransformedRequest {
            openai,
            thinking,
            effort,
            message_id,
            model: request.model.clone(),
            log,
        }
    }

    /// Precedence: inline tag > caller options > request `thinking` field > config
    ///
    /// With nothing selecting it, thinking follows `default_thinking` (on by default).
    fn resolve_reasoning(
        &self,
        request: &MessagesRequest,
        options: &ReasoningOptions,
        directive: Option<ThinkingDirective>,
    ) -> (bool, Effort) {
        let (request_thinking, request_effort) = match &request.thinking {
            Some(ThinkingConfig::Enabled { budget_tokens }) => {
                (Some(true), budget_tokens.map(Effort::from_budget_tokens))
            }
            Some(ThinkingConfig::Disabled) => (Some(false), None),
            Some(ThinkingConfig::Unsupported) | None => (None, None),
        };

        let (tag_thinking, tag_effort) = match directive {
            Some(ThinkingDirective::On) => (Some(true), None),
            Some(ThinkingDirective::Off) => (Some(false), None),
            Some(ThinkingDirective::Effort(effort)) => (Some(true), Some(effort)),
            None => (None, None),
        };

        let thinking = tag_thinking
            .or(options.thinking)
            .or(request_thinking)
            .unwrap_or(self.config.default_thinking);
        let effort = tag_effort
            .or(options.effort)
            .or(request_effort)
            .unwrap_or(self.config.default_effort);
        (thinking, effort)
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut result = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::System => result.push(ChatMessage::text("system", msg.text())),
            Role::User => convert_user(msg, &mut result),
            Role::Assistant => convert_assistant(msg, &mut result),
        }
    }
    result
}

fn convert_user(msg: &Message, result: &mut Vec<ChatMessage>) {
    let parts = match &msg.content {
        MessageContent::Text(text) => {
            result.push(ChatMessage::text("user", text.clone()));
            return;
        }
        MessageContent::Parts(parts) => parts,
    };

    // Tool results answer the preceding assistant turn, so they go first
    for part in parts {
        if let ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = part
        {
            let mut output = tool_result_text(content);
            if is_error.unwrap_or(false) {
                output = format!("Error: {}", output);
            }
            result.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(output)),
                tool_call_id: Some(tool_use_id.clone()),
                ..Default::default()
            });
        }
    }

    let mut chat_parts = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => chat_parts.push(ChatContentPart::Text { text: text.clone() }),
            ContentPart::Image { source } => {
                if let Some(url) = image_url(source) {
                    chat_parts.push(ChatContentPart::ImageUrl {
                        image_url: ImageUrl { url },
                    });
                }
            }
            ContentPart::Thinking { .. }
            | ContentPart::ToolUse { .. }
            | ContentPart::ToolResult { .. }
            | ContentPart::Other => {}
        }
    }
    if chat_parts.is_empty() {
        return;
    }

    let has_image = chat_parts
        .iter()
        .any(|p| matches!(p, ChatContentPart::ImageUrl { .. }));
    let content = if has_image {
        ChatContent::Parts(chat_parts)
    } else {
        ChatContent::Text(
            chat_parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    result.push(ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        ..Default::default()
    });
}

fn convert_assistant(msg: &Message, result: &mut Vec<ChatMessage>) {
    let parts = match &msg.content {
        MessageContent::Text(text) => {
            result.push(ChatMessage::text("assistant", text.clone()));
            return;
        }
        MessageContent::Parts(parts) => parts,
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            // Prior reasoning is not replayed upstream
            ContentPart::Thinking { .. } => {}
            ContentPart::ToolResult { .. } | ContentPart::Image { .. } | ContentPart::Other => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        debug!("Skipping assistant message with no text or tool calls");
        return;
    }
    result.push(ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(ChatContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..Default::default()
    });
}

/// Anthropic image source -> URL (data URL for base64 sources)
fn image_url(source: &Value) -> Option<String> {
    match source.get("type").and_then(|t| t.as_str()) {
        Some("base64") => {
            let media_type = source.get("media_type")?.as_str()?;
            let data = source.get("data")?.as_str()?;
            Some(format!("data:{};base64,{}", media_type, data))
        }
        Some("url") => source.get("url")?.as_str().map(str::to_string),
        _ => None,
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|tool| ChatTool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_tool_choice(choice: &Value) -> Option<Value> {
    match choice.get("type").and_then(|t| t.as_str())? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => {
            let name = choice.get("name")?.as_str()?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}
