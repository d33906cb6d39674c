//! Content block accumulator
//!
//! Per-request state machine over the single open content block:
//! `Idle -> Open(kind) -> Idle -> ... -> Finalized`.
//!
//! Providers sometimes open a reasoning channel and never fill it. A thinking
//! block that closes with no text is a normal outcome here, not an error; the
//! accumulator only counts them so the orchestrator can stop feeding a request
//! that keeps producing them.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::stream::EMPTY_THINKING_LOOP_LIMIT;

/// What a content block carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
}

impl BlockKind {
    pub fn is_thinking(&self) -> bool {
        matches!(self, BlockKind::Thinking)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Thinking => "thinking",
            BlockKind::ToolUse { .. } => "tool_use",
        }
    }
}

/// A content block and the text accumulated into it
#[derive(Debug, Clone)]
pub struct ContentBlock {
    pub kind: BlockKind,
    /// Append-only
    pub buffer: String,
    pub index: usize,
    pub started_at: Instant,
}

impl ContentBlock {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Empty-reasoning loop detector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    pub consecutive_empty_thinking_blocks: u32,
    /// Sticky for the rest of the request once set
    pub tripped: bool,
}

/// Accumulator misuse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error("block {0} is still open")]
    BlockAlreadyOpen(usize),

    #[error("no block is open")]
    NoOpenBlock,

    #[error("request already finalized")]
    Finalized,
}

#[derive(Debug)]
enum State {
    Idle,
    Open(ContentBlock),
    Finalized,
}

/// Per-request block state machine
#[derive(Debug)]
pub struct BlockAccumulator {
    state: State,
    next_index: usize,
    loop_state: LoopState,
}

impl Default for BlockAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            next_index: 0,
            loop_state: LoopState::default(),
        }
    }

    /// Open a new block with the next sequential index
    pub fn start_block(&mut self, kind: BlockKind) -> Result<&ContentBlock, AccumulatorError> {
        match &self.state {
            State::Open(block) => return Err(AccumulatorError::BlockAlreadyOpen(block.index)),
            State::Finalized => return Err(AccumulatorError::Finalized),
            State::Idle => {}
        }

        let index = self.next_index;
        self.next_index += 1;
        debug!("Block {} opened: {}", index, kind.label());

        self.state = State::Open(ContentBlock {
            kind,
            buffer: String::new(),
            index,
            started_at: Instant::now(),
        });
        self.current_block().ok_or(AccumulatorError::NoOpenBlock)
    }

    /// Append text to the open block
    pub fn add_delta(&mut self, text: &str) -> Result<(), AccumulatorError> {
        match &mut self.state {
            State::Open(block) => {
                block.buffer.push_str(text);
                Ok(())
            }
            State::Idle => Err(AccumulatorError::NoOpenBlock),
            State::Finalized => Err(AccumulatorError::Finalized),
        }
    }

    /// Close the open block and return it
    pub fn stop_current_block(&mut self) -> Result<ContentBlock, AccumulatorError> {
        let block = match std::mem::replace(&mut self.state, State::Idle) {
            State::Open(block) => block,
            State::Idle => return Err(AccumulatorError::NoOpenBlock),
            State::Finalized => {
                self.state = State::Finalized;
                return Err(AccumulatorError::Finalized);
            }
        };

        if block.kind.is_thinking() && block.is_empty() {
            self.loop_state.consecutive_empty_thinking_blocks += 1;
            if !self.loop_state.tripped
                && self.loop_state.consecutive_empty_thinking_blocks >= EMPTY_THINKING_LOOP_LIMIT
            {
                self.loop_state.tripped = true;
                warn!(
                    "Empty reasoning loop: {} consecutive empty thinking blocks",
                    self.loop_state.consecutive_empty_thinking_blocks
                );
            }
        } else if !block.is_empty() {
            // Only content resets; an empty text or tool block between empty
            // thinking blocks leaves the streak intact
            self.loop_state.consecutive_empty_thinking_blocks = 0;
        }

        debug!(
            "Block {} closed: {}, {} bytes after {:?}",
            block.index,
            block.kind.label(),
            block.buffer.len(),
            block.started_at.elapsed()
        );
        Ok(block)
    }

    /// Whether the empty-reasoning breaker has tripped
    pub fn check_for_loop(&self) -> bool {
        self.loop_state.tripped
    }

    /// The open block, if any
    pub fn current_block(&self) -> Option<&ContentBlock> {
        match &self.state {
            State::Open(block) => Some(block),
            _ => None,
        }
    }

    /// Enter the terminal state
    ///
    /// Returns a block that was still open; it is discarded without closing.
    pub fn finalize(&mut self) -> Option<ContentBlock> {
        match std::mem::replace(&mut self.state, State::Finalized) {
            State::Open(block) => Some(block),
            _ => None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, State::Finalized)
    }

    /// Number of blocks opened so far
    pub fn blocks_started(&self) -> usize {
        self.next_index
    }

    pub fn loop_state(&self) -> &LoopState {
        &self.loop_state
    }
}
