//! StorySession - navigation and streaming state for one story.
//!
//! The session is the single owner of reading state: current chapter and
//! page, the choice the reader has selected, the content assembled from
//! completed sections, and the incremental parse state of the stream in
//! flight. It is created per story-viewing session and driven by UI
//! events; there are no ambient singletons.
//!
//! Stream-level failures never propagate as errors. They are converted
//! to a plain message in [`StorySession::error`] for the UI to render,
//! while deliberate cancellation completes silently.

use crate::context::StoryContext;
use crate::mirror::{SessionSnapshot, StateMirror};
use crate::narrator::{PageGenerator, PageRequest};
use crate::persist::{PersistError, SavedPage, SavedStory};
use crate::sections::{
    process_buffer, ChapterHeading, ChoicesSection, NarrativeSection, ProcessedContent, Sections,
    StoryPage, StoryResponse, TextSection, CHOICES_PER_PAGE,
};
use crate::story::StoryMetadata;
use crate::stream::{BoxChunkSource, CancelToken, StreamError};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A story always runs this many chapters.
pub const TOTAL_CHAPTERS: u32 = 5;
/// Each chapter always runs this many pages.
pub const PAGES_PER_CHAPTER: u32 = 5;

const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of an advance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Moved to the next page and started streaming it.
    Moved,
    /// No choice was selected (or its text was missing); nothing changed.
    NoSelection,
    /// Already at the final page of the final chapter; nothing changed.
    StoryComplete,
}

/// A fully streamed page, kept so retreating shows it again.
#[derive(Debug, Clone, Default)]
struct CachedPage {
    heading: Option<ChapterHeading>,
    paragraphs: Vec<String>,
    choices: Vec<String>,
}

/// Callback invoked after every processed chunk.
pub type StreamObserver = Box<dyn FnMut(&ProcessedContent, &StoryResponse) + Send>;

/// A reading session over one story.
pub struct StorySession {
    generator: Box<dyn PageGenerator>,
    mirrors: Vec<Box<dyn StateMirror>>,
    observer: Option<StreamObserver>,

    story_id: Uuid,
    metadata: StoryMetadata,
    title: Option<String>,

    chapter: u32,
    page: u32,
    selected_choice: Option<usize>,
    previous_choice: Option<String>,

    content: StoryResponse,
    streaming: ProcessedContent,
    page_cache: HashMap<(u32, u32), CachedPage>,
    context: Option<StoryContext>,

    is_loading: bool,
    error: Option<String>,
    cancel: Option<CancelToken>,
    chunk_timeout: Duration,
}

impl StorySession {
    /// Create a session starting at chapter 1, page 1.
    pub fn new(generator: Box<dyn PageGenerator>) -> Self {
        Self {
            generator,
            mirrors: Vec::new(),
            observer: None,
            story_id: Uuid::new_v4(),
            metadata: StoryMetadata::default(),
            title: None,
            chapter: 1,
            page: 1,
            selected_choice: None,
            previous_choice: None,
            content: StoryResponse::default(),
            streaming: ProcessedContent::default(),
            page_cache: HashMap::new(),
            context: None,
            is_loading: false,
            error: None,
            cancel: None,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Use an existing story identifier.
    pub fn with_story_id(mut self, story_id: Uuid) -> Self {
        self.story_id = story_id;
        self
    }

    /// Seed the session with story metadata.
    pub fn with_metadata(mut self, metadata: StoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the per-chunk stall timeout.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Attach a best-effort state mirror.
    pub fn with_mirror(mut self, mirror: Box<dyn StateMirror>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    /// Register a callback invoked after every processed chunk.
    pub fn set_observer(&mut self, observer: StreamObserver) {
        self.observer = Some(observer);
    }

    // ========================================================================
    // State queries
    // ========================================================================

    pub fn story_id(&self) -> Uuid {
        self.story_id
    }

    pub fn metadata(&self) -> &StoryMetadata {
        &self.metadata
    }

    /// Title discovered from the generated TITLE section, if any.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn chapter(&self) -> u32 {
        self.chapter
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// Content assembled from completed sections so far.
    pub fn content(&self) -> &StoryResponse {
        &self.content
    }

    /// Incremental parse state of the stream in flight.
    pub fn streaming(&self) -> &ProcessedContent {
        &self.streaming
    }

    pub fn context(&self) -> Option<&StoryContext> {
        self.context.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_choice(&self) -> Option<usize> {
        self.selected_choice
    }

    pub fn previous_choice(&self) -> Option<&str> {
        self.previous_choice.as_deref()
    }

    /// Choices available on the current page.
    pub fn choices(&self) -> &[String] {
        self.content
            .page
            .as_ref()
            .map(|p| p.choices.as_slice())
            .unwrap_or(&[])
    }

    /// True once the choices section has fully streamed; the UI unlocks
    /// choice selection on this.
    pub fn choices_ready(&self) -> bool {
        self.streaming
            .sections
            .choices
            .as_ref()
            .map(|c| c.is_complete)
            .unwrap_or(false)
    }

    /// True at the final page of the final chapter.
    pub fn at_final_page(&self) -> bool {
        self.chapter == TOTAL_CHAPTERS && self.page == PAGES_PER_CHAPTER
    }

    // ========================================================================
    // Choice selection and navigation
    // ========================================================================

    /// Select a choice by index. Returns false if no such choice exists.
    pub fn select_choice(&mut self, index: usize) -> bool {
        if index < self.choices().len() {
            self.selected_choice = Some(index);
            true
        } else {
            false
        }
    }

    /// Clear the current selection.
    pub fn clear_choice(&mut self) {
        self.selected_choice = None;
    }

    /// Advance to the next page using the selected choice.
    ///
    /// Requires a selection whose text exists on the current page. Page 5
    /// rolls over to the next chapter; chapter 5 page 5 is terminal and
    /// advancing there is a no-op. On success the choice is recorded in
    /// the story context, the selection cleared, the choice text becomes
    /// `previous_choice`, content is cleared, and the next page streams.
    pub async fn advance(&mut self) -> AdvanceOutcome {
        let Some(index) = self.selected_choice else {
            return AdvanceOutcome::NoSelection;
        };
        let Some(choice_text) = self
            .content
            .page
            .as_ref()
            .and_then(|p| p.choices.get(index))
            .cloned()
        else {
            return AdvanceOutcome::NoSelection;
        };

        if self.at_final_page() {
            return AdvanceOutcome::StoryComplete;
        }

        self.context
            .get_or_insert_with(|| StoryContext::new(self.chapter))
            .record_choice(self.chapter, self.page, choice_text.clone());

        if self.page < PAGES_PER_CHAPTER {
            self.page += 1;
        } else {
            self.chapter += 1;
            self.page = 1;
        }

        self.selected_choice = None;
        self.previous_choice = Some(choice_text);
        self.content = StoryResponse {
            title: self.title.clone(),
            ..StoryResponse::default()
        };
        self.streaming = ProcessedContent::default();
        self.publish_snapshot();

        self.stream_page().await;
        AdvanceOutcome::Moved
    }

    /// Step back one page.
    ///
    /// Page 1 rolls back to page 5 of the previous chapter; chapter 1
    /// page 1 is a no-op. Clears selection and `previous_choice`, never
    /// triggers generation, and restores the cached page if one exists.
    /// Returns true if the position changed.
    pub fn retreat(&mut self) -> bool {
        self.selected_choice = None;
        self.previous_choice = None;

        if self.page == 1 {
            if self.chapter == 1 {
                return false;
            }
            self.chapter -= 1;
            self.page = PAGES_PER_CHAPTER;
        } else {
            self.page -= 1;
        }

        self.restore_cached();
        self.publish_snapshot();
        true
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Generate and stream the current page.
    pub async fn stream_page(&mut self) {
        let request = PageRequest {
            chapter: self.chapter,
            page: self.page,
            previous_choice: self.previous_choice.clone(),
            context: self.context.clone(),
            genre: (!self.metadata.genre.name.is_empty()).then(|| self.metadata.genre.name.clone()),
        };

        self.is_loading = true;
        self.error = None;

        match self.generator.open_stream(&request).await {
            Ok(source) => self.stream_from(source).await,
            Err(e) => {
                self.error = Some(e.to_string());
                self.is_loading = false;
                self.publish_snapshot();
            }
        }
    }

    /// Consume an already-open chunk source for the current page.
    ///
    /// This is the streaming loop proper: each chunk is appended to one
    /// growing buffer, the whole buffer is re-parsed, and the resulting
    /// section snapshot and content updates are merged into session
    /// state. The cancellation token is checked after every suspension
    /// point; a cancelled stream discards late chunks and returns
    /// silently with no error set.
    pub async fn stream_from(&mut self, mut source: BoxChunkSource) {
        // Supersede any stream still marked in flight.
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        let token = CancelToken::new();
        self.cancel = Some(token.clone());
        source.bind_cancel(token.clone());

        self.is_loading = true;
        self.error = None;
        self.streaming = ProcessedContent::default();

        debug!(chapter = self.chapter, page = self.page, "starting page stream");
        let mut buffer = String::new();

        loop {
            let next = tokio::time::timeout(self.chunk_timeout, source.next_chunk()).await;

            if token.is_cancelled() {
                debug!("page stream cancelled, discarding late chunk");
                self.is_loading = false;
                return;
            }

            match next {
                Err(_elapsed) => {
                    self.error = Some(StreamError::TimedOut.to_string());
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(StreamError::Cancelled))) => {
                    self.is_loading = false;
                    return;
                }
                Ok(Some(Err(e))) => {
                    self.error = Some(e.to_string());
                    break;
                }
                Ok(Some(Ok(text))) => {
                    buffer.push_str(&text);

                    let outcome = process_buffer(&buffer, self.chapter, self.page);
                    self.streaming.raw = buffer.clone();
                    self.streaming.sections.merge(outcome.sections);

                    if !outcome.update.is_empty() {
                        if let Some(ref title) = outcome.update.title {
                            self.title = Some(title.clone());
                        }
                        self.content.merge(outcome.update);
                    }

                    if let Some(observer) = self.observer.as_mut() {
                        observer(&self.streaming, &self.content);
                    }
                }
            }
        }

        self.is_loading = false;
        self.cancel = None;

        if self.error.is_none() {
            self.cache_streamed_page();
        }
        self.publish_snapshot();
    }

    /// Cancel the in-flight stream, if any. Silent: clears loading and
    /// leaves no error behind.
    pub fn cancel_stream(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.is_loading = false;
    }

    /// Token for the in-flight stream, usable to cancel it from another
    /// task.
    pub fn active_cancel_token(&self) -> Option<CancelToken> {
        self.cancel.clone()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the session into a saveable story document.
    pub fn to_saved(&self) -> SavedStory {
        let mut pages: Vec<SavedPage> = self
            .page_cache
            .iter()
            .map(|(&(chapter, page), cached)| SavedPage {
                chapter,
                page,
                heading: cached.heading.clone(),
                paragraphs: cached.paragraphs.clone(),
                choices: cached.choices.clone(),
            })
            .collect();
        pages.sort_by_key(|p| (p.chapter, p.page));

        SavedStory::new(
            self.story_id,
            self.metadata.clone(),
            self.title.clone(),
            self.context.clone(),
            self.chapter,
            self.page,
            pages,
        )
    }

    /// Save the session to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        self.to_saved().save_json(path).await
    }

    /// Rebuild a session from a saved story document.
    pub fn restore(generator: Box<dyn PageGenerator>, saved: SavedStory) -> Self {
        let mut session = Self::new(generator)
            .with_story_id(saved.story_id)
            .with_metadata(saved.metadata);

        session.title = saved.discovered_title;
        session.context = saved.context;
        session.chapter = saved.current_chapter.clamp(1, TOTAL_CHAPTERS);
        session.page = saved.current_page.clamp(1, PAGES_PER_CHAPTER);

        for page in saved.pages {
            session.page_cache.insert(
                (page.chapter, page.page),
                CachedPage {
                    heading: page.heading,
                    paragraphs: page.paragraphs,
                    choices: page.choices,
                },
            );
        }

        session.restore_cached();
        session
    }

    /// Load a session from a saved story file.
    pub async fn load(
        generator: Box<dyn PageGenerator>,
        path: impl AsRef<Path>,
    ) -> Result<Self, PersistError> {
        Ok(Self::restore(generator, SavedStory::load_json(path).await?))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Cache the page that just finished streaming, keyed by position.
    /// Only pages whose choices section completed are worth keeping.
    fn cache_streamed_page(&mut self) {
        let Some(choices) = self
            .streaming
            .sections
            .choices
            .as_ref()
            .filter(|c| c.is_complete)
        else {
            return;
        };

        let paragraphs = self
            .streaming
            .sections
            .narrative
            .as_ref()
            .map(|n| n.paragraphs.clone())
            .unwrap_or_default();

        self.page_cache.insert(
            (self.chapter, self.page),
            CachedPage {
                heading: self.content.chapter.clone(),
                paragraphs,
                choices: choices.parsed.clone(),
            },
        );
    }

    /// Rebuild content and section state for the current position from
    /// the page cache, or reset to empty if nothing was cached.
    fn restore_cached(&mut self) {
        let Some(cached) = self.page_cache.get(&(self.chapter, self.page)).cloned() else {
            self.content = StoryResponse {
                title: self.title.clone(),
                ..StoryResponse::default()
            };
            self.streaming = ProcessedContent::default();
            return;
        };

        self.content = StoryResponse {
            title: self.title.clone(),
            chapter: cached.heading.clone(),
            page: Some(StoryPage {
                number: self.page,
                content: cached.paragraphs.clone(),
                choices: cached.choices.clone(),
            }),
        };

        let narrative_text = cached.paragraphs.join("\n\n");
        self.streaming = ProcessedContent {
            raw: String::new(),
            sections: Sections {
                title: self.title.clone().map(|text| TextSection {
                    text,
                    is_complete: true,
                }),
                chapter: cached.heading.as_ref().map(|h| TextSection {
                    text: format!("Chapter {}: {}", h.number, h.name),
                    is_complete: true,
                }),
                narrative: Some(NarrativeSection {
                    is_complete: !cached.paragraphs.is_empty(),
                    text: narrative_text,
                    paragraphs: cached.paragraphs,
                }),
                choices: Some(ChoicesSection {
                    text: serde_json::to_string(&cached.choices).unwrap_or_default(),
                    is_complete: cached.choices.len() == CHOICES_PER_PAGE,
                    parsed: cached.choices,
                }),
            },
        };
    }

    fn publish_snapshot(&self) {
        let snapshot = SessionSnapshot {
            story_id: self.story_id,
            chapter: self.chapter,
            page: self.page,
            previous_choice: self.previous_choice.clone(),
            is_loading: self.is_loading,
        };

        for mirror in &self.mirrors {
            mirror.record(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_page, MockNarrator, ScriptedSource};

    fn session() -> StorySession {
        StorySession::new(Box::new(MockNarrator::new()))
    }

    async fn streamed_session_at(chapter: u32, page: u32) -> StorySession {
        let mut session = session();
        session.chapter = chapter;
        session.page = page;
        session
            .stream_from(Box::new(ScriptedSource::from_text(
                sample_page(chapter, page),
                16,
            )))
            .await;
        session
    }

    #[tokio::test]
    async fn test_stream_assembles_page() {
        let session = streamed_session_at(1, 1).await;

        assert!(!session.is_loading());
        assert!(session.error().is_none());
        assert!(session.choices_ready());
        assert_eq!(session.choices().len(), 4);
        assert!(session.title().is_some());
        assert_eq!(session.content().chapter.as_ref().unwrap().number, 1);
    }

    #[tokio::test]
    async fn test_advance_requires_selection() {
        let mut session = streamed_session_at(1, 1).await;
        assert_eq!(session.advance().await, AdvanceOutcome::NoSelection);
        assert_eq!(session.chapter(), 1);
        assert_eq!(session.page(), 1);
    }

    #[tokio::test]
    async fn test_advance_moves_and_records_choice() {
        let mut session = streamed_session_at(1, 1).await;
        assert!(session.select_choice(2));

        let chosen = session.choices()[2].clone();
        assert_eq!(session.advance().await, AdvanceOutcome::Moved);

        assert_eq!(session.chapter(), 1);
        assert_eq!(session.page(), 2);
        assert_eq!(session.previous_choice(), Some(chosen.as_str()));
        assert!(session.selected_choice().is_none());

        let context = session.context().expect("context initialized on advance");
        assert_eq!(context.previous_choices.len(), 1);
        assert_eq!(context.previous_choices[0].chapter_number, 1);
        assert_eq!(context.previous_choices[0].page_number, 1);
    }

    #[tokio::test]
    async fn test_advance_wraps_chapter() {
        let mut session = streamed_session_at(4, 5).await;
        assert!(session.select_choice(0));

        assert_eq!(session.advance().await, AdvanceOutcome::Moved);
        assert_eq!(session.chapter(), 5);
        assert_eq!(session.page(), 1);
    }

    #[tokio::test]
    async fn test_advance_terminal_is_noop() {
        let mut session = streamed_session_at(5, 5).await;
        assert!(session.select_choice(0));

        assert_eq!(session.advance().await, AdvanceOutcome::StoryComplete);
        assert_eq!(session.chapter(), 5);
        assert_eq!(session.page(), 5);
        // Selection survives a terminal no-op; nothing changed.
        assert_eq!(session.selected_choice(), Some(0));
        assert!(session.context().is_none());
    }

    #[tokio::test]
    async fn test_retreat_wraps_and_clears() {
        let mut session = streamed_session_at(2, 1).await;
        session.select_choice(1);

        assert!(session.retreat());
        assert_eq!(session.chapter(), 1);
        assert_eq!(session.page(), 5);
        assert!(session.selected_choice().is_none());
        assert!(session.previous_choice().is_none());
    }

    #[tokio::test]
    async fn test_retreat_boundary_is_noop() {
        let mut session = streamed_session_at(1, 1).await;
        assert!(!session.retreat());
        assert_eq!(session.chapter(), 1);
        assert_eq!(session.page(), 1);
    }

    #[tokio::test]
    async fn test_retreat_restores_cached_page() {
        let mut session = streamed_session_at(1, 1).await;
        let first_choices: Vec<String> = session.choices().to_vec();

        session.select_choice(0);
        session.advance().await;
        assert_eq!(session.page(), 2);

        assert!(session.retreat());
        assert_eq!(session.page(), 1);
        assert!(session.choices_ready());
        assert_eq!(session.choices(), first_choices.as_slice());
        assert!(!session
            .content()
            .page
            .as_ref()
            .expect("cached page restored")
            .content
            .is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_sets_message() {
        let mut session = session();
        let source = ScriptedSource::from_text("###TITLE###\nBroken", 8)
            .with_trailing_error(StreamError::Transport("connection reset".to_string()));

        session.stream_from(Box::new(source)).await;

        assert!(!session.is_loading());
        let error = session.error().expect("transport error surfaced");
        assert!(error.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_cancellation_is_silent() {
        let mut session = session();
        let source = ScriptedSource::from_text("###TITLE###\nNever finished", 8)
            .with_trailing_error(StreamError::Cancelled);

        session.stream_from(Box::new(source)).await;

        assert!(!session.is_loading());
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_token_discards_late_chunks() {
        let mut session = session();

        // Cancel partway through; everything after the cancel point must
        // be discarded and no error surfaced.
        let source = ScriptedSource::from_text(sample_page(1, 1), 16).cancelling_after(3);
        session.stream_from(Box::new(source)).await;

        assert!(!session.is_loading());
        assert!(session.error().is_none());
        assert!(!session.choices_ready(), "late chunks must not complete choices");
    }

    #[tokio::test]
    async fn test_chunk_timeout_surfaces_error() {
        let mut session = session().with_chunk_timeout(Duration::from_millis(20));
        let source = ScriptedSource::from_text(sample_page(1, 1), 16)
            .stalling_after(2, Duration::from_secs(5));

        session.stream_from(Box::new(source)).await;

        assert!(!session.is_loading());
        assert!(session.error().expect("timeout surfaced").contains("timed out"));
    }

    #[tokio::test]
    async fn test_save_and_restore_round_trip() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("story.json");

        let mut session = streamed_session_at(1, 1).await;
        session.select_choice(0);
        session.advance().await;
        session.save(&path).await.expect("save should succeed");

        let restored = StorySession::load(Box::new(MockNarrator::new()), &path)
            .await
            .expect("load should succeed");

        assert_eq!(restored.story_id(), session.story_id());
        assert_eq!(restored.chapter(), session.chapter());
        assert_eq!(restored.page(), session.page());
        assert_eq!(
            restored.context().unwrap().previous_choices.len(),
            session.context().unwrap().previous_choices.len()
        );
        // The page that finished streaming before the save is restorable.
        assert!(restored.choices_ready());
    }
}
