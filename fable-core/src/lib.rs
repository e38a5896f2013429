//! Branching interactive fiction engine with an AI narrator.
//!
//! This crate provides:
//! - Incremental parsing of marker-delimited story sections from a
//!   streaming completion
//! - A reading session over 5 chapters of 5 pages with choice-driven
//!   navigation
//! - Cancellable streaming with per-chunk timeouts
//! - Story persistence and best-effort state mirrors
//!
//! # Quick Start
//!
//! ```ignore
//! use fable_core::{Narrator, StorySession, StoryMetadata};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = Narrator::from_env()?;
//!     let metadata = StoryMetadata::new("Untitled").with_genre("Fantasy", "");
//!
//!     let mut session = StorySession::new(Box::new(narrator)).with_metadata(metadata);
//!     session.stream_page().await;
//!
//!     for (i, choice) in session.choices().iter().enumerate() {
//!         println!("{}. {choice}", i + 1);
//!     }
//!
//!     session.select_choice(0);
//!     session.advance().await;
//!
//!     session.save("my_story.json").await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod mirror;
pub mod narrator;
pub mod persist;
pub mod sections;
pub mod session;
pub mod story;
pub mod stream;
pub mod testing;

// Primary public API
pub use context::{ChoiceHistory, StoryContext};
pub use mirror::{AutosaveMirror, RouteMirror, SessionSnapshot, StateMirror};
pub use narrator::{Narrator, NarratorConfig, NarratorError, PageGenerator, PageRequest};
pub use persist::{list_saves, story_save_path, PersistError, SaveInfo, SavedStory};
pub use sections::{process_buffer, ProcessedContent, Sections, StoryResponse};
pub use session::{
    AdvanceOutcome, StorySession, PAGES_PER_CHAPTER, TOTAL_CHAPTERS,
};
pub use story::{CharacterSheet, CharacterStats, Genre, StoryMetadata};
pub use stream::{BoxChunkSource, CancelToken, ChunkSource, StreamError};
pub use testing::{sample_page, MockNarrator, ScriptedSource};
