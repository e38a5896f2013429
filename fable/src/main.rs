//! Interactive fiction reader CLI.
//!
//! Streams AI-generated story pages to the terminal and walks them with
//! line commands:
//!
//! ```text
//! 1-4   pick a choice and turn the page
//! b     go back a page
//! r     retry the current page after a failure
//! s     save the story
//! q     quit
//! ```

use fable_core::{
    list_saves, story_save_path, AdvanceOutcome, Narrator, StoryMetadata, StorySession,
};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

const SAVES_DIR: &str = "saves";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--list-saves") {
        for save in list_saves(SAVES_DIR).await? {
            println!(
                "{} (chapter {} page {}) - {}",
                save.summary.title, save.summary.chapter, save.summary.page, save.path
            );
        }
        return Ok(());
    }

    // Check for API key
    if std::env::var("OPENAI_API_KEY").is_err() {
        eprintln!("Error: OPENAI_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export OPENAI_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let narrator = Narrator::from_env()?;

    let mut session = match flag_value(&args, "--load") {
        Some(path) => StorySession::load(Box::new(narrator), path).await?,
        None => {
            let genre = flag_value(&args, "--genre").unwrap_or_else(|| "Fantasy".to_string());
            let metadata = StoryMetadata::new("Untitled").with_genre(genre, "");
            StorySession::new(Box::new(narrator)).with_metadata(metadata)
        }
    };

    // A freshly loaded save already has its page cached; otherwise
    // stream the opening page.
    if session.choices_ready() {
        render_page(&session);
    } else {
        stream_current_page(&mut session).await;
    }

    let stdin = io::stdin();
    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match line.trim() {
            "q" => break,
            "" => {}
            "b" => {
                if session.retreat() {
                    render_page(&session);
                } else {
                    println!("Already at the beginning.");
                }
            }
            "r" => stream_current_page(&mut session).await,
            "s" => {
                let title = session.title().unwrap_or("untitled").to_string();
                tokio::fs::create_dir_all(SAVES_DIR).await?;
                let path = story_save_path(SAVES_DIR, &title);
                session.save(&path).await?;
                println!("Saved to {}", path.display());
            }
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 && n <= session.choices().len() => {
                    session.select_choice(n - 1);
                    attach_renderer(&mut session);
                    match session.advance().await {
                        AdvanceOutcome::Moved => finish_page(&session),
                        AdvanceOutcome::StoryComplete => {
                            println!("\nThe story is complete. Thanks for reading.");
                        }
                        AdvanceOutcome::NoSelection => println!("Pick a choice first."),
                    }
                }
                _ => println!(
                    "Commands: 1-{}, b (back), r (retry), s (save), q (quit)",
                    session.choices().len().max(1)
                ),
            },
        }
    }

    Ok(())
}

/// Stream the current page with live output, then show the choices.
async fn stream_current_page(session: &mut StorySession) {
    attach_renderer(session);
    session.stream_page().await;
    finish_page(session);
}

/// Print streamed text as it arrives: the title and chapter heading once
/// they parse, then the narrative delta after each chunk.
fn attach_renderer(session: &mut StorySession) {
    let mut show_title = session.title().is_none();
    let mut heading_shown = false;
    let mut printed = 0usize;

    session.set_observer(Box::new(move |streaming, content| {
        if show_title {
            if let Some(ref title) = content.title {
                println!("\n##### {title} #####");
                show_title = false;
            }
        }

        if !heading_shown {
            if let Some(ref chapter) = content.chapter {
                println!("\n=== Chapter {}: {} ===\n", chapter.number, chapter.name);
                heading_shown = true;
            }
        }

        if let Some(ref narrative) = streaming.sections.narrative {
            // A half-arrived "###" of the next marker shows up as a
            // trailing run of '#'; hold it back.
            let visible = narrative.text.trim_end_matches('#');
            if visible.len() > printed {
                print!("{}", &visible[printed..]);
                let _ = io::stdout().flush();
                printed = visible.len();
            }
        }
    }));
}

/// Print the choices for the just-streamed page, or the failure.
fn finish_page(session: &StorySession) {
    if let Some(error) = session.error() {
        println!();
        eprintln!("Generation failed: {error}");
        eprintln!("Type r to retry.");
        return;
    }

    println!("\n");
    for (i, choice) in session.choices().iter().enumerate() {
        println!("  {}. {choice}", i + 1);
    }
}

/// Print a page restored from the session's cache.
fn render_page(session: &StorySession) {
    if let Some(ref chapter) = session.content().chapter {
        println!("\n=== Chapter {}: {} ===\n", chapter.number, chapter.name);
    }

    if let Some(ref page) = session.content().page {
        for paragraph in &page.content {
            println!("{paragraph}\n");
        }
    }

    for (i, choice) in session.choices().iter().enumerate() {
        println!("  {}. {choice}", i + 1);
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_help() {
    println!("fable - interactive fiction with an AI narrator");
    println!();
    println!("Usage: fable [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --genre <name>   Genre for a new story (default: Fantasy)");
    println!("  --load <path>    Resume a saved story");
    println!("  --list-saves     List saved stories and exit");
    println!("  -h, --help       Show this help");
    println!();
    println!("During play: 1-4 choose, b back, r retry, s save, q quit");
}
