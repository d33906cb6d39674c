use serde_json::{json, Value};

use super::*;
use crate::ai::format::anthropic::{BlockStart, MessagesRequest, MessagesResponse, ResponseBlock};
use crate::ai::format::openai::{ChatCompletionResponse, ChatContent};
use crate::ai::prompts::locale::ENGLISH_DIRECTIVE;
use crate::ai::prompts::reasoning::builtin_prompt;
use crate::ai::sse::{SseParser, WireEvent};
use crate::config::TransformerConfig;

fn transformer() -> Transformer {
    Transformer::with_debug_override(TransformerConfig::default(), false)
}

fn chunk(delta: Value) -> WireEvent {
    WireEvent::data(json!({"id": "chatcmpl-t", "choices": [{"index": 0, "delta": delta}]}))
}

fn finish(reason: &str) -> WireEvent {
    WireEvent::data(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]}))
}

fn run(t: &Transformer, frames: &[WireEvent]) -> Vec<StreamEvent> {
    let mut state = t.new_stream_state("claude-test");
    let mut events = Vec::new();
    for frame in frames {
        events.extend(t.transform_delta(frame, &mut state));
    }
    events.extend(t.finalize_delta(&mut state));
    events
}

fn signatures(events: &[StreamEvent]) -> Vec<&Signature> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta {
                delta: Delta::ThinkingSignatureDelta { signature },
                ..
            } => Some(signature),
            _ => None,
        })
        .collect()
}

fn count(events: &[StreamEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

/// Every start is matched by a stop before the next start
fn assert_one_open_block(events: &[StreamEvent]) {
    let mut open: Option<usize> = None;
    for event in events {
        match event {
            StreamEvent::ContentBlockStart { index, .. } => {
                assert!(open.is_none(), "block {} opened while {:?} open", index, open);
                open = Some(*index);
            }
            StreamEvent::ContentBlockDelta { index, .. } => assert_eq!(open, Some(*index)),
            StreamEvent::ContentBlockStop { index } => {
                assert_eq!(open, Some(*index));
                open = None;
            }
            _ => {}
        }
    }
    assert!(open.is_none());
}

fn request(value: Value) -> MessagesRequest {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_thinking_then_text_signs_with_length() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"reasoning_content": "abc"})),
            chunk(json!({"reasoning_content": "def"})),
            chunk(json!({"content": "Answer"})),
            finish("stop"),
            WireEvent::done(),
        ],
    );

    let sigs = signatures(&events);
    assert_eq!(sigs.len(), 1);
    assert_eq!(sigs[0].length, 6);
    assert_eq!(sigs[0].hash.len(), 16);
    assert_eq!(sigs[0], &Signature::compute("abcdef").unwrap());

    // Signature comes right before the thinking block's stop
    let sig_pos = events.iter().position(|e| e.is_signature()).unwrap();
    assert_eq!(events[sig_pos + 1], StreamEvent::ContentBlockStop { index: 0 });
    assert_eq!(
        events[sig_pos + 2],
        StreamEvent::ContentBlockStart {
            index: 1,
            content_block: BlockStart::Text {
                text: String::new()
            },
        }
    );
    assert_one_open_block(&events);
}

#[test]
fn test_empty_thinking_then_text_has_no_signature() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"reasoning_content": ""})),
            chunk(json!({"content": "Hello"})),
            finish("stop"),
        ],
    );
    assert!(signatures(&events).is_empty());
    // The empty thinking block and the text block both close
    assert_eq!(count(&events, "content_block_stop"), 2);
    assert_eq!(count(&events, "message_stop"), 1);
    assert_one_open_block(&events);
}

#[test]
fn test_signature_iff_non_empty_thinking() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"reasoning_content": ""})),
            chunk(json!({"content": "a"})),
            chunk(json!({"reasoning_content": "r1"})),
            chunk(json!({"content": "b"})),
            chunk(json!({"reasoning_content": ""})),
            chunk(json!({"reasoning_content": "r2"})),
        ],
    );

    let mut buffers: Vec<(usize, String)> = Vec::new();
    for event in &events {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block: BlockStart::Thinking { .. },
            } => buffers.push((*index, String::new())),
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::ThinkingDelta { thinking },
            } => {
                let entry = buffers.iter_mut().find(|(i, _)| i == index).unwrap();
                entry.1.push_str(thinking);
            }
            _ => {}
        }
    }
    let non_empty: Vec<usize> = buffers
        .iter()
        .filter(|(_, b)| !b.is_empty())
        .map(|(i, _)| *i)
        .collect();
    let signed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::ThinkingSignatureDelta { .. },
            } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(signed, non_empty);
    assert_one_open_block(&events);
}

#[test]
fn test_finish_mid_block_closes_with_signature() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"reasoning_content": "deep thought"})),
            finish("length"),
            WireEvent::done(),
        ],
    );
    assert_eq!(signatures(&events).len(), 1);
    let stop_reasons: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => delta.stop_reason.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(stop_reasons, vec!["max_tokens".to_string()]);
    assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    assert_one_open_block(&events);
}

#[test]
fn test_reasoning_only_stream_without_finish() {
    let t = transformer();
    let events = run(&t, &[chunk(json!({"reasoning_content": "only"}))]);
    assert_eq!(signatures(&events).len(), 1);
    assert_eq!(count(&events, "content_block_stop"), 1);
    assert_eq!(count(&events, "message_delta"), 1);
    assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
}

#[test]
fn test_done_only_stream_is_well_formed() {
    let t = transformer();
    let events = run(&t, &[WireEvent::done()]);
    let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "message_start",
            "content_block_start",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );
}

#[test]
fn test_finish_before_any_block_keeps_order() {
    let t = transformer();
    let events = run(&t, &[finish("content_filter"), WireEvent::done()]);
    let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "message_start",
            "content_block_start",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );
    let StreamEvent::MessageDelta { delta, .. } = &events[3] else {
        panic!("Expected message_delta");
    };
    assert_eq!(delta.stop_reason.as_deref(), Some("refusal"));
}

#[test]
fn test_chunk_with_both_reasoning_keys() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"reasoning_content": "abc", "reasoning": "abc"})),
            chunk(json!({"content": "Answer", "reasoning_content": null, "reasoning": null})),
            finish("stop"),
            WireEvent::done(),
        ],
    );
    let sigs = signatures(&events);
    assert_eq!(sigs.len(), 1);
    assert_eq!(sigs[0].length, 3);
    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
                ..
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Answer");
    assert_eq!(count(&events, "content_block_stop"), 2);
    assert_one_open_block(&events);
}

#[test]
fn test_finalize_is_idempotent() {
    let t = transformer();
    let mut state = t.new_stream_state("m");
    t.transform_delta(&chunk(json!({"content": "hi"})), &mut state);
    assert!(!t.finalize_delta(&mut state).is_empty());
    assert!(t.finalize_delta(&mut state).is_empty());
    assert!(t.transform_delta(&WireEvent::done(), &mut state).is_empty());
}

#[test]
fn test_usage_after_finish_emits_message_delta() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"content": "hi"})),
            finish("stop"),
            WireEvent::data(json!({
                "choices": [],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })),
            WireEvent::done(),
        ],
    );
    let usages: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::MessageDelta { usage, .. } => usage.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(usages.len(), 2);
    assert_eq!(usages[1].input_tokens, 12);
    assert_eq!(usages[1].output_tokens, 3);
}

#[test]
fn test_tool_call_stream() {
    let t = transformer();
    let events = run(
        &t,
        &[
            chunk(json!({"content": "Let me look"})),
            chunk(json!({"tool_calls": [{"index": 0, "id": "call_a", "function": {"name": "Read", "arguments": ""}}]})),
            chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"path\":"}}]})),
            chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "\"a.rs\"}"}}]})),
            chunk(json!({"tool_calls": [{"index": 1, "id": "call_b", "function": {"name": "Grep", "arguments": "{}"}}]})),
            // Late fragment for the first call
            chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "junk"}}]})),
            finish("tool_calls"),
        ],
    );
    assert_one_open_block(&events);

    let starts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockStart { content_block, .. } => Some(content_block.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 3);
    assert_eq!(
        starts[1],
        BlockStart::ToolUse {
            id: "call_a".into(),
            name: "Read".into(),
            input: json!({}),
        }
    );

    let json_for = |block: usize| -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta { partial_json },
                } if *index == block => Some(partial_json.as_str()),
                _ => None,
            })
            .collect()
    };
    assert_eq!(json_for(1), r#"{"path":"a.rs"}"#);
    assert_eq!(json_for(2), "{}");

    let StreamEvent::MessageDelta { delta, .. } = events
        .iter()
        .find(|e| e.event_type() == "message_delta")
        .unwrap()
    else {
        unreachable!()
    };
    assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
}

#[test]
fn test_stream_from_split_bytes() {
    let body = concat!(
        "data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"reasoning_content\":\"ab\"}}]}\n\n",
        ": keepalive\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"reasoning_content\":\"c\"}}]}\n\n",
        "data: not json\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let t = transformer();
    let mut parser = SseParser::new();
    let mut state = t.new_stream_state("m");
    let mut events = Vec::new();
    for piece in body.as_bytes().chunks(7) {
        for frame in parser.feed(piece) {
            events.extend(t.transform_delta(&frame, &mut state));
        }
    }
    assert!(state.is_finished());
    let sigs = signatures(&events);
    assert_eq!(sigs.len(), 1);
    assert_eq!(sigs[0].length, 3);
    assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    assert_one_open_block(&events);
}

#[test]
fn test_transform_request_defaults() {
    let t = transformer();
    let req = request(json!({
        "model": "glm-4.6",
        "max_tokens": 512,
        "stream": true,
        "system": "You are terse.",
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let out = t.transform_request(&req, &ReasoningOptions::default());
    assert!(out.thinking);
    assert_eq!(out.effort, Effort::Medium);
    assert_eq!(out.openai.enable_thinking, Some(true));
    assert_eq!(out.openai.reasoning_effort.as_deref(), Some("medium"));
    assert!(out.openai.stream);
    assert!(out.openai.stream_options.as_ref().unwrap().include_usage);
    assert_eq!(out.openai.messages[0].role, "system");
    let ChatContent::Text(system) = out.openai.messages[0].content.as_ref().unwrap() else {
        panic!("Expected text system prompt");
    };
    // Reasoning runs first, so the locale directive ends up outermost
    assert!(system.starts_with(ENGLISH_DIRECTIVE));
    let reasoning_at = system.find(builtin_prompt(Effort::Medium)).unwrap();
    assert!(reasoning_at > ENGLISH_DIRECTIVE.len());
    assert!(system.ends_with("You are terse."));
    assert!(out.message_id.starts_with("msg_"));
}

#[test]
fn test_transform_request_untagged_array_content_thinks() {
    let t = transformer();
    let req = request(json!({
        "model": "m",
        "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
    }));
    let out = t.transform_request(&req, &ReasoningOptions::default());
    assert!(out.thinking);
    assert_eq!(out.openai.enable_thinking, Some(true));
}

#[test]
fn test_transform_request_off_tag_suppresses_reasoning() {
    let t = transformer();
    let req = request(json!({
        "model": "m",
        "system": "You are terse.",
        "messages": [{"role": "user", "content": "hi [think:off]"}]
    }));
    let out = t.transform_request(&req, &ReasoningOptions::default());
    assert!(!out.thinking);
    assert!(out.openai.enable_thinking.is_none());
    assert!(out.openai.reasoning_effort.is_none());
    let ChatContent::Text(system) = out.openai.messages[0].content.as_ref().unwrap() else {
        panic!("Expected text system prompt");
    };
    assert!(system.starts_with(ENGLISH_DIRECTIVE));
    assert!(!system.contains(builtin_prompt(Effort::Medium)));
}

#[test]
fn test_transform_request_default_thinking_off_in_config() {
    let config = TransformerConfig {
        default_thinking: false,
        ..Default::default()
    };
    let t = Transformer::with_debug_override(config, false);
    let req = request(json!({
        "model": "m",
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let out = t.transform_request(&req, &ReasoningOptions::default());
    assert!(!out.thinking);
    assert!(out.openai.enable_thinking.is_none());
}

#[test]
fn test_transform_request_precedence() {
    let t = transformer();
    let req = request(json!({
        "model": "m",
        "thinking": {"type": "enabled", "budget_tokens": 2000},
        "messages": [{"role": "user", "content": "solve [think:max]"}]
    }));

    // Request field alone: enabled, budget maps to low
    let plain = request(json!({
        "model": "m",
        "thinking": {"type": "enabled", "budget_tokens": 2000},
        "messages": [{"role": "user", "content": "solve"}]
    }));
    let out = t.transform_request(&plain, &ReasoningOptions::default());
    assert!(out.thinking);
    assert_eq!(out.effort, Effort::Low);

    // Caller options beat the request field
    let out = t.transform_request(
        &plain,
        &ReasoningOptions {
            thinking: Some(false),
            effort: Some(Effort::High),
        },
    );
    assert!(!out.thinking);
    assert_eq!(out.effort, Effort::High);

    // Inline tag beats everything
    let out = t.transform_request(
        &req,
        &ReasoningOptions {
            thinking: Some(false),
            effort: Some(Effort::Low),
        },
    );
    assert!(out.thinking);
    assert_eq!(out.effort, Effort::Max);
    assert_eq!(out.openai.reasoning_effort.as_deref(), Some("high"));
    let last = out.openai.messages.last().unwrap();
    let ChatContent::Text(text) = last.content.as_ref().unwrap() else {
        panic!("Expected text");
    };
    assert!(text.ends_with("solve"));
    assert!(!text.to_lowercase().contains("[think:"));
}

#[test]
fn test_transform_request_maps_tools() {
    let t = transformer();
    let req = request(json!({
        "model": "m",
        "tools": [{"name": "Read", "description": "read a file", "input_schema": {"type": "object"}}],
        "tool_choice": {"type": "auto"},
        "messages": [{"role": "user", "content": "go"}]
    }));
    let out = t.transform_request(&req, &ReasoningOptions::default());
    let tools = out.openai.tools.unwrap();
    assert_eq!(tools[0].function.name, "Read");
    assert_eq!(tools[0].function.parameters, json!({"type": "object"}));
    assert_eq!(out.openai.tool_choice, Some(json!("auto")));
    assert!(!out.openai.stream);
    assert!(out.openai.stream_options.is_none());
}

#[test]
fn test_non_streaming_with_reasoning() {
    let t = transformer();
    let response: ChatCompletionResponse = serde_json::from_value(json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "42", "reasoning_content": "abcdef"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
    }))
    .unwrap();
    let out = t.transform_response(&response, &ResponseContext::new("msg_1", "claude-x"));
    assert_eq!(out.content.len(), 2);
    let ResponseBlock::Thinking {
        thinking,
        signature,
    } = &out.content[0]
    else {
        panic!("Expected thinking first");
    };
    assert_eq!(thinking, "abcdef");
    assert_eq!(signature.as_ref().unwrap().length, 6);
    assert_eq!(out.content[1], ResponseBlock::Text { text: "42".into() });
    assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
    assert_eq!(out.usage.input_tokens, 9);
    assert_eq!(out.model, "claude-x");
}

#[test]
fn test_non_streaming_empty_reasoning_has_no_thinking_block() {
    let t = transformer();
    let response: ChatCompletionResponse = serde_json::from_value(json!({
        "choices": [{"message": {"content": "", "reasoning_content": ""}, "finish_reason": "length"}]
    }))
    .unwrap();
    let out = t.transform_response(&response, &ResponseContext::new("msg_2", "m"));
    assert_eq!(out.content, vec![ResponseBlock::Text { text: String::new() }]);
    assert_eq!(out.stop_reason.as_deref(), Some("max_tokens"));
}

#[test]
fn test_non_streaming_unparseable_body() {
    let t = transformer();
    let out: MessagesResponse =
        t.transform_response_body(b"<html>bad gateway</html>", &ResponseContext::new("msg_3", "m"));
    assert_eq!(out.content, vec![ResponseBlock::Text { text: String::new() }]);
    assert!(!out.content.iter().any(|b| matches!(b, ResponseBlock::Thinking { .. })));
}

#[test]
fn test_diagnostics_streaming_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let config = TransformerConfig {
        debug_log: true,
        debug_log_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let t = Transformer::with_debug_override(config, false);
    let req = request(json!({
        "model": "m",
        "stream": true,
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let transformed = t.transform_request(&req, &ReasoningOptions::default());
    let mut state = t.stream_state_for(&transformed);

    let raw = b"data: {\"choices\":[{\"delta\":{\"content\":\"yo\"}}]}\n\ndata: [DONE]\n\n";
    state.record_raw(raw);
    let mut parser = SseParser::new();
    for frame in parser.feed(raw) {
        t.transform_delta(&frame, &mut state);
    }

    let dir = transformed.log.dir().unwrap();
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "1-inbound-request.json",
            "2-upstream-request.json",
            "3-upstream-response.txt",
            "4-outbound-response.json"
        ]
    );
    let outbound: Value =
        serde_json::from_slice(&std::fs::read(dir.join("4-outbound-response.json")).unwrap())
            .unwrap();
    let types: Vec<&str> = outbound
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(types.first(), Some(&"message_start"));
    assert_eq!(types.last(), Some(&"message_stop"));
}

#[test]
fn test_env_override_enables_diagnostics() {
    let tmp = tempfile::tempdir().unwrap();
    let config = TransformerConfig {
        debug_log_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    assert!(!Transformer::with_debug_override(config.clone(), false).debug_enabled());
    assert!(Transformer::with_debug_override(config, true).debug_enabled());
}

#[test]
fn test_signature_choke_point_rejects_non_thinking() {
    let t = transformer();
    let mut acc = crate::ai::accumulator::BlockAccumulator::new();
    acc.start_block(crate::ai::accumulator::BlockKind::Text).unwrap();
    acc.add_delta("text").unwrap();
    let block = acc.stop_current_block().unwrap();
    assert!(t.create_signature_delta_event(&block).is_none());

    acc.start_block(crate::ai::accumulator::BlockKind::Thinking).unwrap();
    let empty = acc.stop_current_block().unwrap();
    assert!(t.create_signature_delta_event(&empty).is_none());
}
