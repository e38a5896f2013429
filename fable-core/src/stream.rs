//! Streaming transport primitives.
//!
//! The session never talks to a network stream directly; it pulls text
//! chunks from a [`ChunkSource`] and checks a [`CancelToken`] after every
//! suspension point. Cancellation is cooperative and silent, distinct
//! from transport failure.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors from a generation stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream was deliberately cancelled; treated as silent completion.
    #[error("stream cancelled")]
    Cancelled,

    #[error("timed out waiting for stream data")]
    TimedOut,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Cooperative cancellation token.
///
/// Clones share one flag. The streaming loop checks the token after every
/// await so a superseded stream's late chunk can never overwrite newer
/// state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Pull interface over a generation stream.
///
/// `next_chunk` resolves to the next run of decoded text, `None` once the
/// stream is exhausted, or an error. Implementations exist over the
/// OpenAI delta stream and over scripted text in tests.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Option<Result<String, StreamError>>;

    /// Hand the source the active cancellation token before the first
    /// `next_chunk` call. Sources that can abort early may observe it;
    /// the default ignores it.
    fn bind_cancel(&mut self, _token: CancelToken) {}
}

/// Boxed chunk source, as returned by generators.
pub type BoxChunkSource = Box<dyn ChunkSource>;
