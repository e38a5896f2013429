//! AI narrator agent.
//!
//! The `Narrator` wraps the OpenAI client and turns a page request
//! (chapter, page, previous choice, accumulated context) into a
//! streaming completion whose text carries the four marker-delimited
//! sections the parser expects. The [`PageGenerator`] trait is the seam
//! tests use to substitute a scripted generator.

use crate::context::StoryContext;
use crate::stream::{BoxChunkSource, ChunkSource, StreamError};
use async_trait::async_trait;
use futures::StreamExt;
use openai::{Message, OpenAi, Request, StreamEvent};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Formatting contract for generated pages.
const PAGE_FORMAT_PROMPT: &str = include_str!("prompts/page_format.txt");

/// Errors from the narrator.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("OpenAI API error: {0}")]
    Api(#[from] openai::Error),

    #[error("No API key configured - set OPENAI_API_KEY environment variable")]
    NoApiKey,
}

/// Configuration for the narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// The model to use (defaults to the client's default).
    pub model: Option<String>,

    /// Maximum tokens per generated page.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1000,
            temperature: Some(0.8),
        }
    }
}

/// A request for one story page.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub chapter: u32,
    pub page: u32,
    /// Text of the choice the reader made on the previous page.
    pub previous_choice: Option<String>,
    /// Accumulated continuity context, if any.
    pub context: Option<StoryContext>,
    /// Genre name, to steer the narrator's register.
    pub genre: Option<String>,
}

/// Source of story pages.
///
/// Implemented by [`Narrator`] over the live API and by the mock
/// generator in [`crate::testing`].
#[async_trait]
pub trait PageGenerator: Send + Sync {
    /// Open a streaming generation for the requested page.
    async fn open_stream(&self, request: &PageRequest) -> Result<BoxChunkSource, NarratorError>;
}

/// The AI narrator.
pub struct Narrator {
    client: OpenAi,
    config: NarratorConfig,
}

impl Narrator {
    /// Create a narrator with an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: OpenAi::new(api_key),
            config: NarratorConfig::default(),
        }
    }

    /// Create a narrator from the OPENAI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, NarratorError> {
        let client = OpenAi::from_env().map_err(|_| NarratorError::NoApiKey)?;
        Ok(Self {
            client,
            config: NarratorConfig::default(),
        })
    }

    /// Configure the narrator.
    pub fn with_config(mut self, config: NarratorConfig) -> Self {
        self.config = config;
        self
    }

    fn build_user_message(&self, request: &PageRequest) -> String {
        let mut message = String::new();

        message.push_str("Generate a story page with:\n");
        message.push_str(&format!("Chapter: {}\n", request.chapter.max(1)));
        message.push_str(&format!("Page: {}\n", request.page.max(1)));

        if let Some(ref genre) = request.genre {
            message.push_str(&format!("Genre: {genre}\n"));
        }

        match request.previous_choice {
            Some(ref choice) => message.push_str(&format!("Previous Choice: {choice}\n")),
            None => message.push_str("Start a new story\n"),
        }

        if let Some(ref context) = request.context {
            let recent = context.recent_choices(5);
            if !recent.is_empty() {
                message.push_str("\nChoices so far:\n");
                for choice in recent {
                    message.push_str(&format!(
                        "- Chapter {} page {}: {}\n",
                        choice.chapter_number, choice.page_number, choice.choice_text
                    ));
                }
            }

            let chapter = &context.current_chapter_context;
            if !chapter.summary.is_empty() {
                message.push_str(&format!("\nCurrent chapter so far: {}\n", chapter.summary));
            }
            if !chapter.theme.is_empty() {
                message.push_str(&format!("Chapter theme: {}\n", chapter.theme));
            }

            let narrative = &context.narrative_context;
            if !narrative.main_plot_points.is_empty() {
                message.push_str("\nOngoing plot threads:\n");
                for point in &narrative.main_plot_points {
                    message.push_str(&format!("- {point}\n"));
                }
            }
        }

        message
    }
}

#[async_trait]
impl PageGenerator for Narrator {
    async fn open_stream(&self, request: &PageRequest) -> Result<BoxChunkSource, NarratorError> {
        let mut api_request = Request::new(vec![
            Message::system(PAGE_FORMAT_PROMPT),
            Message::user(self.build_user_message(request)),
        ])
        .with_max_tokens(self.config.max_tokens);

        if let Some(ref model) = self.config.model {
            api_request = api_request.with_model(model);
        }

        if let Some(temperature) = self.config.temperature {
            api_request = api_request.with_temperature(temperature);
        }

        let stream = self.client.stream(api_request).await?;
        Ok(Box::new(CompletionSource {
            inner: stream,
            finished: false,
        }))
    }
}

/// Chunk source over a live completion stream.
struct CompletionSource {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, openai::Error>> + Send>>,
    finished: bool,
}

#[async_trait]
impl ChunkSource for CompletionSource {
    async fn next_chunk(&mut self) -> Option<Result<String, StreamError>> {
        if self.finished {
            return None;
        }

        while let Some(event) = self.inner.next().await {
            match event {
                Ok(StreamEvent::Delta { text }) => return Some(Ok(text)),
                Ok(StreamEvent::Finish { .. }) => continue,
                Ok(StreamEvent::Done) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(StreamError::Transport(e.to_string())));
                }
            }
        }

        self.finished = true;
        None
    }
}
