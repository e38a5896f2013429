//! Accumulated story context fed back into generation requests.
//!
//! The narrator only sees what we send it, so continuity lives here:
//! the history of choices the reader made, a summary of the current
//! chapter, and the running narrative threads.

use serde::{Deserialize, Serialize};

/// One choice the reader made, and where they made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceHistory {
    pub chapter_number: u32,
    pub page_number: u32,
    pub choice_text: String,
    pub timestamp: String,
}

/// Context for the chapter currently being told.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContext {
    pub chapter_number: u32,
    pub summary: String,
    pub key_events: Vec<String>,
    pub theme: String,
}

/// Narrative threads that persist across chapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub main_plot_points: Vec<String>,
    pub character_development: Vec<String>,
    pub current_theme: String,
}

/// Combined continuity state for one story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContext {
    pub current_chapter_context: ChapterContext,
    pub previous_choices: Vec<ChoiceHistory>,
    pub narrative_context: NarrativeContext,
    pub last_updated: String,
}

impl StoryContext {
    /// Create an empty context rooted at the given chapter.
    pub fn new(chapter_number: u32) -> Self {
        Self {
            current_chapter_context: ChapterContext {
                chapter_number,
                ..ChapterContext::default()
            },
            previous_choices: Vec::new(),
            narrative_context: NarrativeContext::default(),
            last_updated: now_timestamp(),
        }
    }

    /// Record a choice the reader just made.
    pub fn record_choice(&mut self, chapter: u32, page: u32, choice_text: impl Into<String>) {
        self.previous_choices.push(ChoiceHistory {
            chapter_number: chapter,
            page_number: page,
            choice_text: choice_text.into(),
            timestamp: now_timestamp(),
        });
        self.last_updated = now_timestamp();
    }

    /// Replace the current chapter's context.
    pub fn update_chapter(
        &mut self,
        chapter_number: u32,
        summary: impl Into<String>,
        theme: impl Into<String>,
        key_events: Vec<String>,
    ) {
        self.current_chapter_context = ChapterContext {
            chapter_number,
            summary: summary.into(),
            key_events,
            theme: theme.into(),
        };
        self.last_updated = now_timestamp();
    }

    /// Replace the cross-chapter narrative threads.
    pub fn update_narrative(
        &mut self,
        main_plot_points: Vec<String>,
        character_development: Vec<String>,
        current_theme: impl Into<String>,
    ) {
        self.narrative_context = NarrativeContext {
            main_plot_points,
            character_development,
            current_theme: current_theme.into(),
        };
        self.last_updated = now_timestamp();
    }

    /// The most recent `count` choices, oldest first.
    pub fn recent_choices(&self, count: usize) -> &[ChoiceHistory] {
        let start = self.previous_choices.len().saturating_sub(count);
        &self.previous_choices[start..]
    }
}

/// Current timestamp as seconds since the Unix epoch.
pub(crate) fn now_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}", now.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_choice() {
        let mut context = StoryContext::new(1);
        context.record_choice(1, 2, "Enter the ruin");

        assert_eq!(context.previous_choices.len(), 1);
        let choice = &context.previous_choices[0];
        assert_eq!(choice.chapter_number, 1);
        assert_eq!(choice.page_number, 2);
        assert_eq!(choice.choice_text, "Enter the ruin");
    }

    #[test]
    fn test_recent_choices_window() {
        let mut context = StoryContext::new(1);
        for i in 0..6 {
            context.record_choice(1, i + 1, format!("choice {i}"));
        }

        let recent = context.recent_choices(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].choice_text, "choice 3");
        assert_eq!(recent[2].choice_text, "choice 5");
    }

    #[test]
    fn test_update_chapter() {
        let mut context = StoryContext::new(1);
        context.update_chapter(2, "The descent", "dread", vec!["found the map".to_string()]);

        assert_eq!(context.current_chapter_context.chapter_number, 2);
        assert_eq!(context.current_chapter_context.summary, "The descent");
        assert_eq!(context.current_chapter_context.key_events.len(), 1);
    }
}
