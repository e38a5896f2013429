//! Test doubles for exercising sessions without the live API.
//!
//! [`MockNarrator`] plays scripted pages (or a generated sample page)
//! through a [`ScriptedSource`], which delivers text in small chunks the
//! way a real completion stream would, and can inject failures, stalls,
//! and mid-stream cancellation.

use crate::narrator::{NarratorError, PageGenerator, PageRequest};
use crate::sections::{
    CHAPTER_MARKER, CHOICES_MARKER, CHOICES_PER_PAGE, NARRATIVE_MARKER, TITLE_MARKER,
};
use crate::stream::{BoxChunkSource, CancelToken, ChunkSource, StreamError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A page generator that streams scripted text instead of calling the
/// API. Scripted pages play in order; once exhausted it falls back to
/// [`sample_page`] for the requested position.
pub struct MockNarrator {
    scripted: Mutex<VecDeque<String>>,
    chunk_size: usize,
}

impl MockNarrator {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            chunk_size: 16,
        }
    }

    /// Queue a scripted page.
    pub fn with_page(self, text: impl Into<String>) -> Self {
        self.scripted
            .lock()
            .expect("mock narrator lock")
            .push_back(text.into());
        self
    }

    /// Deliver text in chunks of roughly this many bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl Default for MockNarrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageGenerator for MockNarrator {
    async fn open_stream(&self, request: &PageRequest) -> Result<BoxChunkSource, NarratorError> {
        let text = self
            .scripted
            .lock()
            .expect("mock narrator lock")
            .pop_front()
            .unwrap_or_else(|| sample_page(request.chapter, request.page));

        Ok(Box::new(ScriptedSource::from_text(text, self.chunk_size)))
    }
}

/// A chunk source over pre-split text, with optional fault injection.
pub struct ScriptedSource {
    chunks: VecDeque<String>,
    trailing_error: Option<StreamError>,
    cancel_after: Option<usize>,
    stall_after: Option<(usize, Duration)>,
    emitted: usize,
    token: Option<CancelToken>,
}

impl ScriptedSource {
    /// Split text into chunks of roughly `chunk_size` bytes, never
    /// splitting inside a character.
    pub fn from_text(text: impl Into<String>, chunk_size: usize) -> Self {
        let text = text.into();
        let chunk_size = chunk_size.max(1);

        let mut chunks = VecDeque::new();
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let mut end = chunk_size.min(rest.len());
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            if end == 0 {
                end = rest
                    .chars()
                    .next()
                    .map(|c| c.len_utf8())
                    .unwrap_or(rest.len());
            }

            let (head, tail) = rest.split_at(end);
            chunks.push_back(head.to_string());
            rest = tail;
        }

        Self {
            chunks,
            trailing_error: None,
            cancel_after: None,
            stall_after: None,
            emitted: 0,
            token: None,
        }
    }

    /// Yield this error after the scripted chunks are exhausted.
    pub fn with_trailing_error(mut self, error: StreamError) -> Self {
        self.trailing_error = Some(error);
        self
    }

    /// Cancel the bound token once this many chunks have been emitted.
    pub fn cancelling_after(mut self, chunks: usize) -> Self {
        self.cancel_after = Some(chunks);
        self
    }

    /// After this many chunks, sleep before each further delivery.
    pub fn stalling_after(mut self, chunks: usize, delay: Duration) -> Self {
        self.stall_after = Some((chunks, delay));
        self
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> Option<Result<String, StreamError>> {
        if let Some((after, delay)) = self.stall_after {
            if self.emitted >= after {
                tokio::time::sleep(delay).await;
            }
        }

        match self.chunks.pop_front() {
            Some(chunk) => {
                self.emitted += 1;
                if let (Some(after), Some(token)) = (self.cancel_after, self.token.as_ref()) {
                    if self.emitted >= after {
                        token.cancel();
                    }
                }
                Some(Ok(chunk))
            }
            None => self.trailing_error.take().map(Err),
        }
    }

    fn bind_cancel(&mut self, token: CancelToken) {
        self.token = Some(token);
    }
}

/// A well-formed page for the given position: a title on the very first
/// page, a parseable chapter heading, five paragraphs, and exactly
/// [`CHOICES_PER_PAGE`] choices.
pub fn sample_page(chapter: u32, page: u32) -> String {
    let mut text = String::new();

    if chapter == 1 && page == 1 {
        text.push_str(TITLE_MARKER);
        text.push_str("\nThe Hollow Crown\n\n");
    }

    text.push_str(CHAPTER_MARKER);
    text.push_str(&format!("\nChapter {chapter}: {}\n\n", chapter_name(chapter)));

    text.push_str(NARRATIVE_MARKER);
    text.push('\n');
    for paragraph in 1..=5 {
        text.push_str(&format!(
            "Paragraph {paragraph} of chapter {chapter}, page {page}. The road bent \
             onward and the reader followed it.\n\n"
        ));
    }

    let choices: Vec<String> = (1..=CHOICES_PER_PAGE)
        .map(|n| format!("Option {n} on chapter {chapter} page {page}"))
        .collect();
    text.push_str(CHOICES_MARKER);
    text.push('\n');
    text.push_str(&serde_json::to_string(&choices).expect("choices serialize"));
    text.push('\n');

    text
}

fn chapter_name(chapter: u32) -> &'static str {
    match chapter {
        1 => "The Gates",
        2 => "The Descent",
        3 => "The Hollow Crown",
        4 => "Embers",
        _ => "The Last Page",
    }
}
