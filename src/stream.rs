//! Reassembly of streamed fragments into a final response.
//!
//! The assembler consumes fragments strictly in arrival order, one at a time.
//! Each fragment is appended and reported to the progress callback before the
//! next one is polled, so the callback always observes an exact prefix of the
//! final text.

use futures::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::client::ClientError;
use crate::model::{Fragment, Statistics, ToolCall};

// Re-export the fragment type next to its consumer.
pub use crate::model::Fragment as StreamFragment;

/// What the progress callback receives after each fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Only the text of the fragment just received (chat)
    Incremental,
    /// Everything received so far (generation)
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Streaming,
    Done,
    Failed,
}

/// Output of a completed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    /// Concatenation of every fragment's text, untrimmed
    pub text: String,
    pub stats: Option<Statistics>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub context: Option<Vec<i64>>,
    /// Number of fragments consumed, including the terminal one
    pub fragments: usize,
}

/// State machine turning fragments into an [`Assembled`] response.
///
/// `Idle -> Streaming -> Done` on success, `Idle | Streaming -> Failed` on error.
/// Both terminal states reject further fragments.
#[derive(Debug)]
pub struct StreamAssembler {
    mode: ProgressMode,
    state: AssemblerState,
    buffer: String,
    tool_calls: Vec<ToolCall>,
    stats: Option<Statistics>,
    context: Option<Vec<i64>>,
    fragments: usize,
}

impl StreamAssembler {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            state: AssemblerState::Idle,
            buffer: String::new(),
            tool_calls: Vec::new(),
            stats: None,
            context: None,
            fragments: 0,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Append one fragment and report progress.
    ///
    /// Returns `true` when the fragment completed the stream.
    pub fn accept<F>(&mut self, fragment: Fragment, on_progress: &mut F) -> Result<bool, ClientError>
    where
        F: FnMut(&str),
    {
        match self.state {
            AssemblerState::Done | AssemblerState::Failed => {
                return Err(ClientError::StreamingFailure(format!(
                    "fragment received after stream entered {:?} state",
                    self.state
                )));
            }
            AssemblerState::Idle => self.state = AssemblerState::Streaming,
            AssemblerState::Streaming => {}
        }

        self.buffer.push_str(&fragment.text);
        self.fragments += 1;
        trace!(
            fragment = self.fragments,
            bytes = fragment.text.len(),
            done = fragment.done,
            "Accepted stream fragment"
        );

        match self.mode {
            ProgressMode::Incremental => on_progress(&fragment.text),
            ProgressMode::Cumulative => on_progress(&self.buffer),
        }

        if let Some(calls) = fragment.tool_calls {
            self.tool_calls.extend(calls);
        }

        if fragment.done {
            self.stats = fragment.stats;
            self.context = fragment.context;
            self.state = AssemblerState::Done;
        }
        Ok(fragment.done)
    }

    /// Discard everything accumulated and enter the failed state.
    pub fn fail(&mut self) {
        self.buffer.clear();
        self.tool_calls.clear();
        self.stats = None;
        self.context = None;
        self.state = AssemblerState::Failed;
    }

    /// Produce the final output. Only valid once the stream is done.
    pub fn finish(self) -> Result<Assembled, ClientError> {
        if self.state != AssemblerState::Done {
            return Err(ClientError::StreamingFailure(format!(
                "stream is not complete (state {:?})",
                self.state
            )));
        }
        Ok(Assembled {
            text: self.buffer,
            stats: self.stats,
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls)
            },
            context: self.context,
            fragments: self.fragments,
        })
    }

    /// Drive `stream` to completion.
    ///
    /// Errors from the stream are returned unmodified. A stream that ends before a
    /// `done` fragment fails with [`ClientError::StreamingFailure`]. In both cases
    /// nothing accumulated so far is returned.
    pub async fn assemble<S, F>(mut self, stream: S, mut on_progress: F) -> Result<Assembled, ClientError>
    where
        S: Stream<Item = Result<Fragment, ClientError>>,
        F: FnMut(&str),
    {
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let fragment = match item {
                Ok(fragment) => fragment,
                Err(e) => {
                    warn!(fragments = self.fragments, error = %e, "Stream failed");
                    self.fail();
                    return Err(e);
                }
            };
            if self.accept(fragment, &mut on_progress)? {
                return self.finish();
            }
        }

        warn!(fragments = self.fragments, "Stream ended without a completion fragment");
        self.fail();
        Err(ClientError::StreamingFailure(
            "stream ended before a completion fragment was received".to_string(),
        ))
    }
}
