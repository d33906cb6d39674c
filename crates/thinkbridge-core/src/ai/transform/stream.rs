//! Streaming transform
//!
//! Upstream chat-completion chunks -> Anthropic stream events. One
//! [`StreamState`] per request; the transformer stays immutable.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{convert_usage, new_message_id, TransformedRequest, Transformer};
use crate::ai::accumulator::{BlockAccumulator, BlockKind};
use crate::ai::diagnostics::{Artifact, RequestLog};
use crate::ai::format::anthropic::{
    BlockStart, Delta, MessageDeltaBody, MessagesResponse, StreamEvent, Usage,
};
use crate::ai::format::map_finish_reason;
use crate::ai::format::openai::{ChatCompletionChunk, ChunkDelta, ToolCallDelta};
use crate::ai::sse::WireEvent;

/// Per-request streaming state
#[derive(Debug)]
pub struct StreamState {
    accumulator: BlockAccumulator,
    message_id: String,
    model: String,
    message_started: bool,
    message_delta_sent: bool,
    stop_reason: Option<String>,
    usage: Usage,
    /// Upstream `index` of the tool call feeding the open tool_use block
    current_tool_index: Option<u32>,
    /// Upstream tool indices whose block has already been closed
    closed_tool_indices: Vec<u32>,
    log: RequestLog,
    /// Raw upstream bytes, kept only while diagnostics are on
    raw_upstream: Option<String>,
    /// Emitted events, kept only while diagnostics are on
    outbound: Option<Vec<StreamEvent>>,
}

impl StreamState {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, log: RequestLog) -> Self {
        let capture = log.is_enabled();
        Self {
            accumulator: BlockAccumulator::new(),
            message_id: message_id.into(),
            model: model.into(),
            message_started: false,
            message_delta_sent: false,
            stop_reason: None,
            usage: Usage::default(),
            current_tool_index: None,
            closed_tool_indices: Vec::new(),
            log,
            raw_upstream: capture.then(String::new),
            outbound: capture.then(Vec::new),
        }
    }

    /// Keep raw upstream bytes for the diagnostics capture
    pub fn record_raw(&mut self, bytes: &[u8]) {
        if let Some(raw) = &mut self.raw_upstream {
            raw.push_str(&String::from_utf8_lossy(bytes));
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn accumulator(&self) -> &BlockAccumulator {
        &self.accumulator
    }

    /// Whether `message_stop` has been emitted
    pub fn is_finished(&self) -> bool {
        self.accumulator.is_finalized()
    }

    fn record(&mut self, events: &[StreamEvent]) {
        if let Some(outbound) = &mut self.outbound {
            outbound.extend_from_slice(events);
        }
    }
}

impl Transformer {
    /// Fresh stream state for `model` with diagnostics off
    pub fn new_stream_state(&self, model: impl Into<String>) -> StreamState {
        StreamState::new(new_message_id(), model, RequestLog::disabled())
    }

    /// Stream state carrying the id and diagnostics of a transformed request
    pub fn stream_state_for(&self, request: &TransformedRequest) -> StreamState {
        StreamState::new(
            request.message_id.clone(),
            request.model.clone(),
            request.log.clone(),
        )
    }

    /// Translate one upstream frame into zero or more outbound events
    pub fn transform_delta(&self, event: &WireEvent, state: &mut StreamState) -> Vec<StreamEvent> {
        if state.accumulator.is_finalized() {
            return Vec::new();
        }
        if event.is_done() {
            return self.finalize_delta(state);
        }
        let Some(data) = &event.data else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(error) = data.get("error") {
            warn!("Upstream error frame: {}", error);
            events.push(upstream_error_event(error));
            state.record(&events);
            return events;
        }

        let chunk = match ChatCompletionChunk::deserialize(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Dropping unrecognized upstream chunk: {}", e);
                return events;
            }
        };

        self.ensure_message_start(chunk.id.as_deref(), state, &mut events);
        if let Some(usage) = &chunk.usage {
            state.usage = convert_usage(usage);
        }

        for choice in &chunk.choices {
            self.apply_delta(&choice.delta, state, &mut events);
            if let Some(reason) = &choice.finish_reason {
                self.close_open_block(state, &mut events);
                self.ensure_content_block(state, &mut events);
                let stop_reason = map_finish_reason(reason).to_string();
                info!(
                    "Stream {} finished: {} -> {}",
                    state.message_id, reason, stop_reason
                );
                state.stop_reason = Some(stop_reason);
                events.push(message_delta(state));
                state.message_delta_sent = true;
            }
        }

        // Usage reported after the finish chunk
        if chunk.choices.is_empty() && chunk.usage.is_some() && state.stop_reason.is_some() {
            events.push(message_delta(state));
            state.message_delta_sent = true;
        }

        state.record(&events);
        events
    }

    /// Close the stream: open block, message_delta, message_stop
    ///
    /// Idempotent; a second call returns no events.
    pub fn finalize_delta(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        if state.accumulator.is_finalized() {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.ensure_message_start(None, state, &mut events);
        self.close_open_block(state, &mut events);

        self.ensure_content_block(state, &mut events);

        if !state.message_delta_sent {
            if state.stop_reason.is_none() {
                state.stop_reason = Some("end_turn".to_string());
            }
            events.push(message_delta(state));
            state.message_delta_sent = true;
        }
        events.push(StreamEvent::MessageStop);

        if let Some(block) = state.accumulator.finalize() {
            warn!("Block {} still open at finalize", block.index);
        }

        state.record(&events);
        info!(
            "Stream {} complete: {} blocks, stop_reason={}",
            state.message_id,
            state.accumulator.blocks_started(),
            state.stop_reason.as_deref().unwrap_or("none")
        );
        if let Some(raw) = &state.raw_upstream {
            state.log.write_text(Artifact::UpstreamResponse, raw);
        }
        if let Some(outbound) = &state.outbound {
            state.log.write_json(Artifact::OutboundResponse, outbound);
        }
        events
    }

    /// Clients expect at least one content block per message, ahead of `message_delta`
    fn ensure_content_block(&self, state: &mut StreamState, events: &mut Vec<StreamEvent>) {
        if state.accumulator.blocks_started() == 0 {
            self.open_block(BlockKind::Text, state, events);
            self.close_open_block(state, events);
        }
    }

    fn apply_delta(&self, delta: &ChunkDelta, state: &mut StreamState, events: &mut Vec<StreamEvent>) {
        let content = delta.content.as_deref().unwrap_or("");
        let has_tool_calls = delta.tool_calls.as_ref().is_some_and(|c| !c.is_empty());

        match delta.reasoning_text() {
            Some(reasoning) if !reasoning.is_empty() => {
                self.append_text(BlockKind::Thinking, reasoning, state, events);
            }
            // Reasoning channel opened but empty
            Some(_) if content.is_empty() && !has_tool_calls => {
                if state.accumulator.current_block().is_none()
                    && !state.accumulator.check_for_loop()
                    && state.stop_reason.is_none()
                {
                    self.open_block(BlockKind::Thinking, state, events);
                } else if state.accumulator.check_for_loop() {
                    debug!("Ignoring empty reasoning frame after loop trip");
                }
            }
            _ => {}
        }

        if !content.is_empty() {
            self.append_text(BlockKind::Text, content, state, events);
        }

        if let Some(calls) = &delta.tool_calls {
            for call in calls {
                self.apply_tool_call(call, state, events);
            }
        }
    }

    /// Route text into a block of `kind`, switching blocks if needed
    fn append_text(
        &self,
        kind: BlockKind,
        text: &str,
        state: &mut StreamState,
        events: &mut Vec<StreamEvent>,
    ) {
        let is_thinking = kind.is_thinking();
        let same_kind = state
            .accumulator
            .current_block()
            .is_some_and(|b| b.kind == kind);
        if !same_kind {
            self.open_block(kind, state, events);
        }
        let Some(index) = state.accumulator.current_block().map(|b| b.index) else {
            return;
        };
        if let Err(e) = state.accumulator.add_delta(text) {
            warn!("Dropping delta: {}", e);
            return;
        }
        if self.config.verbose {
            debug!(
                "Block {} +{} bytes ({})",
                index,
                text.len(),
                if is_thinking { "thinking" } else { "text" }
            );
        }
        let delta = if is_thinking {
            Delta::ThinkingDelta {
                thinking: text.to_string(),
            }
        } else {
            Delta::TextDelta {
                text: text.to_string(),
            }
        };
        events.push(StreamEvent::ContentBlockDelta { index, delta });
    }

    fn apply_tool_call(
        &self,
        call: &ToolCallDelta,
        state: &mut StreamState,
        events: &mut Vec<StreamEvent>,
    ) {
        let open_tool_id = state.accumulator.current_block().and_then(|b| match &b.kind {
            BlockKind::ToolUse { id, .. } => Some(id.clone()),
            _ => None,
        });
        let arguments = call
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or("");

        match call.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) if open_tool_id.as_deref() != Some(id) => {
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                info!("Tool call {} started: {}", id, name);
                self.open_block(
                    BlockKind::ToolUse {
                        id: id.to_string(),
                        name,
                    },
                    state,
                    events,
                );
                state.current_tool_index = call.index;
            }
            _ => {
                let same_call = open_tool_id.is_some()
                    && (call.index.is_none() || call.index == state.current_tool_index);
                if !same_call {
                    if call.index.is_some_and(|i| state.closed_tool_indices.contains(&i)) {
                        warn!(
                            "Dropping arguments for closed tool call index {:?}",
                            call.index
                        );
                    } else {
                        warn!("Dropping tool call fragment with no open call");
                    }
                    return;
                }
            }
        }

        if arguments.is_empty() {
            return;
        }
        let Some(index) = state.accumulator.current_block().map(|b| b.index) else {
            return;
        };
        if let Err(e) = state.accumulator.add_delta(arguments) {
            warn!("Dropping tool arguments: {}", e);
            return;
        }
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: arguments.to_string(),
            },
        });
    }

    fn ensure_message_start(
        &self,
        upstream_id: Option<&str>,
        state: &mut StreamState,
        events: &mut Vec<StreamEvent>,
    ) {
        if state.message_started {
            return;
        }
        if let Some(id) = upstream_id.filter(|id| !id.is_empty()) {
            state.message_id = id.to_string();
        }
        let mut message = MessagesResponse::new(state.message_id.clone(), state.model.clone());
        message.usage = state.usage.clone();
        events.push(StreamEvent::MessageStart { message });
        state.message_started = true;
        info!("Stream {} started for {}", state.message_id, state.model);
    }

    /// Close any open block, then open one of `kind`
    fn open_block(&self, kind: BlockKind, state: &mut StreamState, events: &mut Vec<StreamEvent>) {
        self.close_open_block(state, events);
        let content_block = match &kind {
            BlockKind::Text => BlockStart::Text {
                text: String::new(),
            },
            BlockKind::Thinking => BlockStart::Thinking {
                thinking: String::new(),
            },
            BlockKind::ToolUse { id, name } => BlockStart::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: json!({}),
            },
        };
        match state.accumulator.start_block(kind) {
            Ok(block) => events.push(StreamEvent::ContentBlockStart {
                index: block.index,
                content_block,
            }),
            Err(e) => warn!("Cannot open block: {}", e),
        }
    }

    /// Close the open block, announcing a signature first when one is due
    fn close_open_block(&self, state: &mut StreamState, events: &mut Vec<StreamEvent>) {
        if state.accumulator.current_block().is_none() {
            return;
        }
        let block = match state.accumulator.stop_current_block() {
            Ok(block) => block,
            Err(e) => {
                warn!("Cannot close block: {}", e);
                return;
            }
        };
        if let BlockKind::ToolUse { .. } = block.kind {
            if let Some(index) = state.current_tool_index.take() {
                state.closed_tool_indices.push(index);
            }
        }
        if let Some(signature) = self.create_signature_delta_event(&block) {
            events.push(signature);
        }
        events.push(StreamEvent::ContentBlockStop { index: block.index });
    }
}

fn message_delta(state: &StreamState) -> StreamEvent {
    StreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: state.stop_reason.clone(),
            stop_sequence: None,
        },
        usage: Some(state.usage.clone()),
    }
}

fn upstream_error_event(error: &Value) -> StreamEvent {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    let error_type = error
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("api_error");
    StreamEvent::error(error_type, message)
}
