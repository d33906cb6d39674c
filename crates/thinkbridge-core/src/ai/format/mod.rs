//! API format definitions
//!
//! Typed shapes of the two wire protocols the bridge sits between:
//! Anthropic Messages (client side) and OpenAI chat completions (upstream).

pub mod anthropic;
pub mod openai;

/// Map an OpenAI `finish_reason` to an Anthropic `stop_reason`
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "stop" | "end_turn" => "end_turn",
        "length" | "max_tokens" => "max_tokens",
        "tool_calls" | "function_call" | "tool_use" => "tool_use",
        "content_filter" => "refusal",
        _ => "end_turn",
    }
}
