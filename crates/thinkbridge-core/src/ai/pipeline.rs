//! Streaming pipeline
//!
//! Drives upstream bytes through the SSE parser and the transformer into a
//! bounded sink. A full sink pauses upstream reads; cancellation drops the
//! upstream stream and the request state without a closing `message_stop`.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::client::{Upstream, UpstreamReply};
use crate::ai::format::anthropic::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::ai::sse::SseParser;
use crate::ai::transform::{ReasoningOptions, StreamState, Transformer};
use crate::constants::http::SINK_CAPACITY;

/// Pump failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream read failed: {0}")]
    Upstream(String),

    #[error("event sink closed")]
    SinkClosed,
}

/// How a pump run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// `message_stop` was delivered
    Completed,
    Cancelled,
}

/// Feed `byte_stream` through `transformer` into `sink` until the message completes
///
/// An upstream that ends without `[DONE]` is finalized as if it had sent one.
/// A read error sends an `error` event and ends the run without finalizing.
pub async fn pump<S, E>(
    transformer: &Transformer,
    mut state: StreamState,
    byte_stream: S,
    sink: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<PumpOutcome, PipelineError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut parser = SseParser::new();
    tokio::pin!(byte_stream);
    let mut chunk_count = 0usize;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Stream {} cancelled after {} chunks", state.message_id(), chunk_count);
                return Ok(PumpOutcome::Cancelled);
            }
            next = byte_stream.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => {
                chunk_count += 1;
                state.record_raw(&bytes);
                let mut events = Vec::new();
                for frame in parser.feed(&bytes) {
                    events.extend(transformer.transform_delta(&frame, &mut state));
                }
                events
            }
            Some(Err(e)) => {
                warn!("Upstream read error at chunk #{}: {}", chunk_count, e);
                let error = StreamEvent::error("api_error", format!("upstream read failed: {}", e));
                // The client may already be gone; the upstream error is what gets reported
                let _ = sink.send(error).await;
                return Err(PipelineError::Upstream(e.to_string()));
            }
            None => {
                debug!("Upstream ended without [DONE], finalizing");
                transformer.finalize_delta(&mut state)
            }
        };

        for event in events {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stream {} cancelled while sending", state.message_id());
                    return Ok(PumpOutcome::Cancelled);
                }
                sent = sink.send(event) => sent.map_err(|_| PipelineError::SinkClosed)?,
            }
        }

        if state.is_finished() {
            info!(
                "Stream {} delivered after {} chunks, {} frames",
                state.message_id(),
                chunk_count,
                parser.event_count()
            );
            return Ok(PumpOutcome::Completed);
        }
    }
}

/// Run [`pump`] on a tokio task
pub fn spawn_pump<S, E>(
    transformer: Arc<Transformer>,
    state: StreamState,
    byte_stream: S,
    cancel: CancellationToken,
) -> (
    ReceiverStream<StreamEvent>,
    JoinHandle<Result<PumpOutcome, PipelineError>>,
)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SINK_CAPACITY);
    let handle = tokio::spawn(async move {
        pump(&transformer, state, byte_stream, tx, cancel).await
    });
    (ReceiverStream::new(rx), handle)
}

/// Client-facing result of [`forward`]
pub enum BridgeReply {
    Stream {
        events: ReceiverStream<StreamEvent>,
        task: JoinHandle<Result<PumpOutcome, PipelineError>>,
    },
    Complete(MessagesResponse),
}

/// Translate `request`, send it upstream and translate the reply
pub async fn forward(
    transformer: Arc<Transformer>,
    upstream: &dyn Upstream,
    request: &MessagesRequest,
    options: &ReasoningOptions,
    cancel: CancellationToken,
) -> anyhow::Result<BridgeReply> {
    let transformed = transformer.transform_request(request, options);
    match upstream.send(&transformed.openai).await? {
        UpstreamReply::Stream(bytes) => {
            let state = transformer.stream_state_for(&transformed);
            let (events, task) = spawn_pump(transformer, state, bytes, cancel);
            Ok(BridgeReply::Stream { events, task })
        }
        UpstreamReply::Complete(response) => Ok(BridgeReply::Complete(
            transformer.transform_response(&response, &transformed.response_context()),
        )),
    }
}
