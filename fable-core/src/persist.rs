//! Story persistence for save/load functionality.
//!
//! A story document carries everything needed to resume reading: the
//! metadata chosen at creation, the continuity context, the position,
//! and the pages already generated. Saves are versioned JSON.

use crate::context::{now_timestamp, StoryContext};
use crate::sections::ChapterHeading;
use crate::story::StoryMetadata;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A page that finished streaming, stored so retreating (or resuming)
/// shows it again instead of regenerating it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPage {
    pub chapter: u32,
    pub page: u32,
    pub heading: Option<ChapterHeading>,
    pub paragraphs: Vec<String>,
    pub choices: Vec<String>,
}

/// A saved story with all state needed to resume reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedStory {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: String,

    /// Identifier of the story.
    pub story_id: Uuid,

    /// Metadata chosen when the story was created.
    pub metadata: StoryMetadata,

    /// Title discovered from the generated TITLE section, if any.
    pub discovered_title: Option<String>,

    /// Continuity context accumulated so far.
    pub context: Option<StoryContext>,

    /// Current reading position.
    pub current_chapter: u32,
    pub current_page: u32,

    /// Pages already generated.
    pub pages: Vec<SavedPage>,

    /// Quick-access summary for save listings.
    pub summary: SaveSummary,
}

/// Summary of a save for listings, readable without the full document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSummary {
    pub title: String,
    pub genre: String,
    pub character_name: String,
    pub chapter: u32,
    pub page: u32,
    pub saved_at: String,
}

impl SavedStory {
    /// Create a saved story from session state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        story_id: Uuid,
        metadata: StoryMetadata,
        discovered_title: Option<String>,
        context: Option<StoryContext>,
        current_chapter: u32,
        current_page: u32,
        pages: Vec<SavedPage>,
    ) -> Self {
        let saved_at = now_timestamp();
        let summary = SaveSummary {
            title: discovered_title
                .clone()
                .unwrap_or_else(|| metadata.title.clone()),
            genre: metadata.genre.name.clone(),
            character_name: metadata.character.name.clone(),
            chapter: current_chapter,
            page: current_page,
            saved_at: saved_at.clone(),
        };

        Self {
            version: SAVE_VERSION,
            saved_at,
            story_id,
            metadata,
            discovered_title,
            context,
            current_chapter,
            current_page,
            pages,
            summary,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Read a save's summary without loading the full document.
    pub async fn peek_summary(path: impl AsRef<Path>) -> Result<SaveSummary, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            summary: SaveSummary,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.summary)
    }
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    /// Path to the save file.
    pub path: String,

    /// Save summary.
    pub summary: SaveSummary,
}

/// List all story saves in a directory, creating it if absent.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();

    let dir_path = dir.as_ref();
    if !dir_path.exists() {
        fs::create_dir_all(dir_path).await?;
        return Ok(saves);
    }

    let mut entries = fs::read_dir(dir_path).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(summary) = SavedStory::peek_summary(&path).await {
                saves.push(SaveInfo {
                    path: path.to_string_lossy().to_string(),
                    summary,
                });
            }
        }
    }

    // Most recent first
    saves.sort_by(|a, b| b.summary.saved_at.cmp(&a.summary.saved_at));
    Ok(saves)
}

/// Generate a save path for a story title.
pub fn story_save_path(dir: impl AsRef<Path>, title: &str) -> std::path::PathBuf {
    let sanitized = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    dir.as_ref().join(format!("{sanitized}.json"))
}
