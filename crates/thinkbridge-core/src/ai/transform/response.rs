//! Non-streaming transform

use serde_json::{json, Value};
use tracing::{info, warn};

use super::{convert_usage, ResponseContext, Transformer};
use crate::ai::accumulator::{AccumulatorError, BlockAccumulator, BlockKind, ContentBlock};
use crate::ai::diagnostics::Artifact;
use crate::ai::format::anthropic::{MessagesResponse, ResponseBlock};
use crate::ai::format::map_finish_reason;
use crate::ai::format::openai::{ChatCompletionResponse, ToolCall};

impl Transformer {
    /// Translate a complete upstream response
    pub fn transform_response(
        &self,
        response: &ChatCompletionResponse,
        context: &ResponseContext,
    ) -> MessagesResponse {
        let mut out = MessagesResponse::new(context.message_id.clone(), context.model.clone());
        if let Some(usage) = &response.usage {
            out.usage = convert_usage(usage);
        }

        let Some(choice) = response.choices.first() else {
            warn!("Upstream response {} has no choices", context.message_id);
            out.content.push(ResponseBlock::Text {
                text: String::new(),
            });
            out.stop_reason = Some("end_turn".to_string());
            context.log.write_json(Artifact::OutboundResponse, &out);
            return out;
        };
        let message = &choice.message;

        let reasoning = message.reasoning_text().unwrap_or("");
        if !reasoning.is_empty() {
            // Same signature path as the streaming side
            match closed_thinking_block(reasoning) {
                Ok(block) => out.content.push(ResponseBlock::Thinking {
                    signature: self.thinking_signature(&block),
                    thinking: block.buffer,
                }),
                Err(e) => warn!("Cannot build thinking block: {}", e),
            }
        }

        if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
            out.content.push(ResponseBlock::Text {
                text: text.to_string(),
            });
        }

        for call in message.tool_calls.iter().flatten() {
            out.content.push(tool_use_block(call));
        }

        if out.content.is_empty() {
            out.content.push(ResponseBlock::Text {
                text: String::new(),
            });
        }

        out.stop_reason = Some(
            map_finish_reason(choice.finish_reason.as_deref().unwrap_or("stop")).to_string(),
        );
        info!(
            "Response {}: {} blocks, stop_reason={}",
            out.id,
            out.content.len(),
            out.stop_reason.as_deref().unwrap_or("none")
        );
        context.log.write_json(Artifact::OutboundResponse, &out);
        out
    }

    /// Translate a raw upstream body
    ///
    /// A body that does not parse yields a response with one empty text block.
    pub fn transform_response_body(&self, body: &[u8], context: &ResponseContext) -> MessagesResponse {
        let response = match serde_json::from_slice::<Value>(body) {
            Ok(value) => {
                context.log.write_json(Artifact::UpstreamResponse, &value);
                serde_json::from_value::<ChatCompletionResponse>(value).unwrap_or_else(|e| {
                    warn!("Unrecognized upstream response: {}", e);
                    ChatCompletionResponse::default()
                })
            }
            Err(e) => {
                warn!("Upstream response is not JSON: {}", e);
                context
                    .log
                    .write_text(Artifact::UpstreamResponse, &String::from_utf8_lossy(body));
                ChatCompletionResponse::default()
            }
        };
        self.transform_response(&response, context)
    }
}

fn closed_thinking_block(text: &str) -> Result<ContentBlock, AccumulatorError> {
    let mut accumulator = BlockAccumulator::new();
    accumulator.start_block(BlockKind::Thinking)?;
    accumulator.add_delta(text)?;
    accumulator.stop_current_block()
}

fn tool_use_block(call: &ToolCall) -> ResponseBlock {
    let input = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
            warn!("Tool call {} has invalid arguments: {}", call.id, e);
            json!({"raw": call.function.arguments})
        })
    };
    ResponseBlock::ToolUse {
        id: call.id.clone(),
        name: call.function.name.clone(),
        input,
    }
}
