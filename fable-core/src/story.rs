//! Story metadata: genre, character sheet, and display details.
//!
//! These seed a session when a story is opened and travel with saves.
//! Ownership of where they come from (a database, a picker UI) is
//! outside the engine.

use serde::{Deserialize, Serialize};

/// The genre the reader picked for this story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub name: String,
    pub description: String,
}

/// Numeric stats on a character sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub strength: i32,
    pub intelligence: i32,
    pub health_points: i32,
    pub agility: i32,
    pub magic_points: i32,
    pub special_attacks: Vec<String>,
}

/// The protagonist the reader is playing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    pub class: String,
    pub stats: CharacterStats,
}

/// Everything known about a story before any page is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub title: String,
    pub description: String,
    pub genre: Genre,
    pub character: CharacterSheet,
}

impl StoryMetadata {
    /// Create metadata with a working title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the genre.
    pub fn with_genre(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.genre = Genre {
            name: name.into(),
            description: description.into(),
        };
        self
    }

    /// Set the character sheet.
    pub fn with_character(mut self, character: CharacterSheet) -> Self {
        self.character = character;
        self
    }
}
