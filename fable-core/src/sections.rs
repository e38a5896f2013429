//! Incremental section parser for streamed story pages.
//!
//! The narrator emits a page as free text containing four marker-delimited
//! sections. During streaming the full accumulated buffer is re-parsed
//! after every chunk; each section has its own completeness rule, and a
//! section that is mid-transmission simply stays incomplete until enough
//! of the buffer has arrived. Parsing is pure: the same buffer always
//! produces the same result, and a completed section never reverts to
//! incomplete as the buffer grows.

use serde::{Deserialize, Serialize};

/// Marker literal opening the title section.
pub const TITLE_MARKER: &str = "###TITLE###";
/// Marker literal opening the chapter heading section.
pub const CHAPTER_MARKER: &str = "###CHAPTER###";
/// Marker literal opening the narrative section.
pub const NARRATIVE_MARKER: &str = "###NARRATIVE###";
/// Marker literal opening the choices section.
pub const CHOICES_MARKER: &str = "###CHOICES###";

/// A page must offer exactly this many choices to be complete.
pub const CHOICES_PER_PAGE: usize = 4;

/// A plain text section (title or chapter heading).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSection {
    /// Text captured so far (or a placeholder while incomplete).
    pub text: String,
    /// Whether the section satisfies its completeness rule.
    pub is_complete: bool,
}

/// The narrative section, split into paragraphs on blank lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    /// Raw narrative text captured so far.
    pub text: String,
    /// Paragraphs extracted from the text, empties dropped.
    pub paragraphs: Vec<String>,
    /// True once at least one paragraph exists.
    pub is_complete: bool,
}

/// The choices section, a JSON array of choice strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoicesSection {
    /// Raw choices text captured so far.
    pub text: String,
    /// Successfully decoded choices (empty while the JSON is partial).
    pub parsed: Vec<String>,
    /// True iff exactly [`CHOICES_PER_PAGE`] choices decoded.
    pub is_complete: bool,
}

/// Snapshot of every section present in the buffer.
///
/// A `None` field means the section's marker has not appeared yet; the
/// caller's merge leaves previously seen sections untouched in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sections {
    pub title: Option<TextSection>,
    pub chapter: Option<TextSection>,
    pub narrative: Option<NarrativeSection>,
    pub choices: Option<ChoicesSection>,
}

impl Sections {
    /// Overlay sections present in `newer` onto this snapshot.
    pub fn merge(&mut self, newer: Sections) {
        if newer.title.is_some() {
            self.title = newer.title;
        }
        if newer.chapter.is_some() {
            self.chapter = newer.chapter;
        }
        if newer.narrative.is_some() {
            self.narrative = newer.narrative;
        }
        if newer.choices.is_some() {
            self.choices = newer.choices;
        }
    }
}

/// The full incremental parse state for one streaming generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedContent {
    /// The entire buffer seen so far.
    pub raw: String,
    /// Latest section snapshot.
    pub sections: Sections,
}

/// A parsed chapter heading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterHeading {
    pub number: u32,
    pub name: String,
}

/// A story page as assembled from completed sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPage {
    pub number: u32,
    pub content: Vec<String>,
    pub choices: Vec<String>,
}

/// Assembled story content, built up as sections complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryResponse {
    pub title: Option<String>,
    pub chapter: Option<ChapterHeading>,
    pub page: Option<StoryPage>,
}

impl StoryResponse {
    /// True when no field has been populated yet.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.chapter.is_none() && self.page.is_none()
    }

    /// Overlay populated fields from `update` onto this response.
    pub fn merge(&mut self, update: StoryResponse) {
        if update.title.is_some() {
            self.title = update.title;
        }
        if update.chapter.is_some() {
            self.chapter = update.chapter;
        }
        if update.page.is_some() {
            self.page = update.page;
        }
    }
}

/// Result of re-parsing the accumulated buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Sections present in the buffer, each with fresh completeness.
    pub sections: Sections,
    /// Content fields newly derivable from completed sections.
    pub update: StoryResponse,
}

/// Re-parse the entire accumulated buffer.
///
/// `expected_chapter` supplies the placeholder heading shown while the
/// chapter section is still streaming; `current_page` numbers the page
/// assembled from a completed choices section. Pure: no side effects,
/// and identical inputs always yield identical outcomes.
pub fn process_buffer(buffer: &str, expected_chapter: u32, current_page: u32) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    if let Some(text) = section_text(buffer, CHAPTER_MARKER) {
        let heading = parse_chapter_heading(text);
        let is_complete = heading.is_some();

        outcome.sections.chapter = Some(TextSection {
            text: if is_complete {
                text.to_string()
            } else {
                format!("Chapter {expected_chapter}")
            },
            is_complete,
        });

        outcome.update.chapter = heading;
    }

    if let Some(text) = section_text(buffer, TITLE_MARKER) {
        let is_complete = !text.is_empty();

        outcome.sections.title = Some(TextSection {
            text: text.to_string(),
            is_complete,
        });

        if is_complete {
            outcome.update.title = Some(text.to_string());
        }
    }

    if let Some(text) = section_text(buffer, NARRATIVE_MARKER) {
        let paragraphs: Vec<String> = text
            .split("\n\n")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        outcome.sections.narrative = Some(NarrativeSection {
            text: text.to_string(),
            is_complete: !paragraphs.is_empty(),
            paragraphs,
        });
    }

    if let Some(text) = section_text(buffer, CHOICES_MARKER) {
        let mut parsed = Vec::new();
        let mut is_complete = false;

        // Partial JSON while streaming is expected, not an error; the
        // section stays incomplete until the array fully arrives.
        if text.starts_with('[') && text.ends_with(']') {
            if let Ok(choices) = serde_json::from_str::<Vec<String>>(text) {
                is_complete = choices.len() == CHOICES_PER_PAGE;
                parsed = choices;
            }
        }

        if is_complete {
            outcome.update.page = Some(StoryPage {
                number: current_page,
                content: Vec::new(),
                choices: parsed.clone(),
            });
        }

        outcome.sections.choices = Some(ChoicesSection {
            text: text.to_string(),
            parsed,
            is_complete,
        });
    }

    outcome
}

/// Extract the trimmed run of text between a marker and the next marker
/// (or end of buffer). `None` when the marker is absent.
fn section_text<'a>(buffer: &'a str, marker: &str) -> Option<&'a str> {
    let start = buffer.find(marker)? + marker.len();
    let rest = &buffer[start..];
    let end = rest.find("###").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parse a `"Chapter <number>: <name>"` heading.
///
/// The prefix is matched case-insensitively and a trailing period on the
/// name is stripped. Returns `None` while the heading is malformed or
/// still streaming.
fn parse_chapter_heading(text: &str) -> Option<ChapterHeading> {
    let (head, name) = text.split_once(':')?;
    let head = head.trim();

    let digits = head
        .get(.."Chapter".len())
        .filter(|p| p.eq_ignore_ascii_case("chapter"))
        .map(|_| head["Chapter".len()..].trim())?;
    let number: u32 = digits.parse().ok()?;

    let name = name.trim().trim_end_matches('.').trim();
    if name.is_empty() {
        return None;
    }

    Some(ChapterHeading {
        number,
        name: name.to_string(),
    })
}
