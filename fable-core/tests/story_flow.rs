//! End-to-end story flow tests using the mock narrator.
//!
//! These drive a full reading session the way a UI would: stream a page,
//! pick a choice, advance, retreat, save, and resume, all without the
//! live API.

use fable_core::session::{AdvanceOutcome, StorySession, PAGES_PER_CHAPTER, TOTAL_CHAPTERS};
use fable_core::testing::{sample_page, MockNarrator, ScriptedSource};
use fable_core::{AutosaveMirror, RouteMirror, StoryMetadata, StreamError};
use std::sync::{Arc, Mutex};

fn new_session() -> StorySession {
    StorySession::new(Box::new(MockNarrator::new()))
        .with_metadata(StoryMetadata::new("Untitled").with_genre("Fantasy", "Swords and sorcery"))
}

async fn advance_once(session: &mut StorySession) {
    assert!(session.select_choice(0), "page should offer choices");
    assert_eq!(session.advance().await, AdvanceOutcome::Moved);
}

// =============================================================================
// FULL WALKTHROUGH
// =============================================================================

#[tokio::test]
async fn test_walkthrough_to_story_end() {
    let mut session = new_session();
    session.stream_page().await;

    assert_eq!(session.chapter(), 1);
    assert_eq!(session.page(), 1);
    assert_eq!(session.title(), Some("The Hollow Crown"));

    // 25 pages total; 24 advances reach the final page.
    for _ in 0..(TOTAL_CHAPTERS * PAGES_PER_CHAPTER - 1) {
        advance_once(&mut session).await;
        assert!(session.error().is_none());
        assert!(session.choices_ready());
    }

    assert!(session.at_final_page());
    assert!(session.select_choice(0));
    assert_eq!(session.advance().await, AdvanceOutcome::StoryComplete);
    assert_eq!(session.chapter(), TOTAL_CHAPTERS);
    assert_eq!(session.page(), PAGES_PER_CHAPTER);

    // Every advance was recorded in the continuity context.
    let context = session.context().expect("context accumulated");
    assert_eq!(
        context.previous_choices.len(),
        (TOTAL_CHAPTERS * PAGES_PER_CHAPTER - 1) as usize
    );
}

#[tokio::test]
async fn test_chapter_rollover_positions() {
    let mut session = new_session();
    session.stream_page().await;

    // Walk chapter 1 completely; the next advance must land on 2/1.
    for _ in 0..PAGES_PER_CHAPTER {
        advance_once(&mut session).await;
    }

    assert_eq!(session.chapter(), 2);
    assert_eq!(session.page(), 1);
    assert!(session.previous_choice().is_some());
}

// =============================================================================
// RETREAT AND PAGE CACHING
// =============================================================================

#[tokio::test]
async fn test_retreat_shows_previous_page_without_regenerating() {
    let mut session = new_session();
    session.stream_page().await;
    let page_one_choices: Vec<String> = session.choices().to_vec();

    advance_once(&mut session).await;
    assert!(session.retreat());

    assert_eq!(session.page(), 1);
    assert!(!session.is_loading(), "retreat must not trigger generation");
    assert_eq!(session.choices(), page_one_choices.as_slice());
    assert!(session.previous_choice().is_none());
}

#[tokio::test]
async fn test_retreat_across_chapter_boundary() {
    let mut session = new_session();
    session.stream_page().await;

    for _ in 0..PAGES_PER_CHAPTER {
        advance_once(&mut session).await;
    }
    assert_eq!((session.chapter(), session.page()), (2, 1));

    assert!(session.retreat());
    assert_eq!((session.chapter(), session.page()), (1, PAGES_PER_CHAPTER));
    assert!(session.choices_ready(), "cached page restored");
}

#[tokio::test]
async fn test_retreat_at_origin_is_noop() {
    let mut session = new_session();
    session.stream_page().await;

    assert!(!session.retreat());
    assert_eq!((session.chapter(), session.page()), (1, 1));
    assert!(session.choices_ready());
}

// =============================================================================
// FAILURE AND CANCELLATION
// =============================================================================

#[tokio::test]
async fn test_transport_failure_surfaces_and_recovers() {
    let mut session = new_session();

    let broken = ScriptedSource::from_text("###TITLE###\nInterrupted", 8)
        .with_trailing_error(StreamError::Transport("connection reset".to_string()));
    session.stream_from(Box::new(broken)).await;

    assert!(!session.is_loading());
    assert!(session.error().expect("error surfaced").contains("connection reset"));

    // A retry over a healthy source clears the error.
    session
        .stream_from(Box::new(ScriptedSource::from_text(sample_page(1, 1), 16)))
        .await;
    assert!(session.error().is_none());
    assert!(session.choices_ready());
}

#[tokio::test]
async fn test_mid_stream_cancel_leaves_clean_state() {
    let mut session = new_session();

    let source = ScriptedSource::from_text(sample_page(1, 1), 16).cancelling_after(2);
    session.stream_from(Box::new(source)).await;

    assert!(!session.is_loading());
    assert!(session.error().is_none(), "cancellation is not an error");
    assert!(!session.choices_ready());

    // The superseding stream proceeds normally.
    session
        .stream_from(Box::new(ScriptedSource::from_text(sample_page(1, 1), 16)))
        .await;
    assert!(session.choices_ready());
}

#[tokio::test]
async fn test_malformed_page_never_completes_choices() {
    let mut session = new_session();

    let malformed = "###CHAPTER###\nChapter 1\n\n###CHOICES###\n[\"only\",\"three\",\"choices\"]";
    session
        .stream_from(Box::new(ScriptedSource::from_text(malformed, 8)))
        .await;

    assert!(session.error().is_none(), "malformed content is not a transport error");
    assert!(!session.choices_ready());
    assert!(session.content().page.is_none());
}

// =============================================================================
// MIRRORS
// =============================================================================

#[tokio::test]
async fn test_route_mirror_follows_navigation() {
    let mirror = RouteMirror::new();
    let mut session = new_session().with_mirror(Box::new(mirror.clone()));

    session.stream_page().await;
    advance_once(&mut session).await;

    let route = mirror.current();
    assert!(route.contains(&session.story_id().to_string()));
    assert!(route.ends_with("/chapter/1/page/2"));
}

#[tokio::test]
async fn test_autosave_mirror_records_position() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let mirror = AutosaveMirror::new(dir.path().join("position.json"));
    let mut session = new_session().with_mirror(Box::new(mirror.clone()));

    session.stream_page().await;
    advance_once(&mut session).await;
    advance_once(&mut session).await;

    let snapshot = mirror.load().expect("autosave written");
    assert_eq!(snapshot.chapter, 1);
    assert_eq!(snapshot.page, 3);
    assert!(!snapshot.is_loading);
}

// =============================================================================
// SAVE AND RESUME
// =============================================================================

#[tokio::test]
async fn test_save_resume_continue_reading() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("story.json");

    let mut session = new_session();
    session.stream_page().await;
    advance_once(&mut session).await;
    advance_once(&mut session).await;
    session.save(&path).await.expect("save");

    let mut resumed = StorySession::load(Box::new(MockNarrator::new()), &path)
        .await
        .expect("load");

    assert_eq!(resumed.story_id(), session.story_id());
    assert_eq!((resumed.chapter(), resumed.page()), (1, 3));
    assert_eq!(resumed.title(), Some("The Hollow Crown"));
    assert!(resumed.choices_ready(), "saved page restored from cache");

    // Reading continues from where it stopped.
    advance_once(&mut resumed).await;
    assert_eq!((resumed.chapter(), resumed.page()), (1, 4));
}

#[tokio::test]
async fn test_streamed_updates_reach_observer_incrementally() {
    let updates: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = updates.clone();

    let mut session = new_session();
    session.set_observer(Box::new(move |streaming, _content| {
        let len = streaming
            .sections
            .narrative
            .as_ref()
            .map(|n| n.text.len())
            .unwrap_or(0);
        seen.lock().expect("observer lock").push(len);
    }));

    session
        .stream_from(Box::new(ScriptedSource::from_text(sample_page(1, 1), 16)))
        .await;

    let updates = updates.lock().expect("observer lock");
    assert!(updates.len() > 5, "observer fires per chunk");
    let final_len = *updates.last().expect("at least one update");
    assert!(final_len > 0, "narrative text arrived incrementally");
    assert!(updates.iter().any(|&len| len > 0 && len < final_len));
}
