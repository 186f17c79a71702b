use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mymap_chat::cli::Args;
use mymap_chat::config::Settings;
use mymap_chat::display;
use mymap_chat::error::ChatError;
use mymap_chat::protocol::{ChatMessage, ContentPart};
use mymap_chat::render::{spawn_layout_worker, MermaidFileRasterizer, OutlineRasterizer};
use mymap_chat::stream::{StreamEvent, Termination};
use mymap_chat::{ChatSession, TurnSummary};

/// How long to wait for mind-map layouts before printing a reply's visuals.
const LAYOUT_WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Interactive commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Clear,
    Image { path: PathBuf, text: String },
    Prompt(String),
}

fn parse_command(line: &str) -> Command {
    match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
        ("/quit" | "/exit", _) => Command::Quit,
        ("/clear", _) => Command::Clear,
        ("/image", rest) => {
            let rest = rest.trim();
            let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Command::Image { path: PathBuf::from(path), text: text.trim().to_string() }
        }
        _ => Command::Prompt(line.to_string()),
    }
}

fn build_message(text: &str, images: &[PathBuf]) -> Result<ChatMessage, ChatError> {
    if images.is_empty() {
        return Ok(ChatMessage::user(text));
    }
    let mut parts = Vec::with_capacity(images.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
    for path in images {
        parts.push(ContentPart::image_from_path(path)?);
    }
    Ok(ChatMessage::user_parts(parts))
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

async fn run_turn(session: &mut ChatSession, message: ChatMessage, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let summary = session
        .send(message, |event| match event {
            StreamEvent::ContentDelta(delta) => {
                print!("{delta}");
                let _ = io::stdout().flush();
            }
            StreamEvent::StreamError(cause) => {
                eprintln!("\n{} {}", "[stream interrupted]".bright_red(), cause);
            }
            StreamEvent::Done | StreamEvent::MalformedEvent { .. } => {}
        })
        .await?;
    println!();

    session.drain_layout(LAYOUT_WAIT).await;
    if let Some(entry) = session.transcript().entry(summary.message_index) {
        if !args.raw {
            print!("{}", display::format_visuals(&entry.view, false));
        }
        if let Some(dir) = &args.export_dir {
            for path in display::export_layouts(&entry.view, summary.message_index, dir)? {
                println!("{} {}", "exported".bright_green(), path.display());
            }
        }
    }
    print_footer(&summary);
    Ok(())
}

fn print_footer(summary: &TurnSummary) {
    println!("{}", display::rule());
    let status = match &summary.termination {
        Termination::Sentinel => "complete".bright_green(),
        Termination::Closed => "closed without [DONE]".yellow(),
        Termination::Failed(_) => "interrupted".bright_red(),
    };
    println!(
        "{} ({} deltas, {} visuals, {} failed)",
        status, summary.deltas, summary.scan.rendered, summary.scan.failed
    );
    if summary.malformed > 0 {
        println!("{}", format!("{} malformed events skipped", summary.malformed).yellow());
    }
}

async fn interactive(session: &mut ChatSession, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "Commands: /image PATH [text], /clear, /quit".dimmed());
    let mut first_images = args.images.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".bright_green().bold());
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match parse_command(line) {
            Command::Quit => break,
            Command::Clear => {
                session.clear();
                println!("{}", "conversation cleared".dimmed());
                continue;
            }
            Command::Image { path, text } => build_message(&text, &[path]),
            Command::Prompt(text) => build_message(&text, &std::mem::take(&mut first_images)),
        };
        match message {
            Ok(message) => run_turn(session, message, args).await?,
            Err(e) => eprintln!("{} {}", "error:".bright_red(), e),
        }
    }
    Ok(())
}

async fn list_models(session: &ChatSession) {
    let models = match session.list_models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(error = %e, "model listing failed; showing configured models");
            session.settings().known_models.clone()
        }
    };
    for model in models {
        println!("{model}");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();

    let settings = args.apply(Settings::load(args.config.as_deref())?);

    let (engine, responses) = match &args.export_dir {
        Some(dir) => spawn_layout_worker(MermaidFileRasterizer { dir: dir.clone() }),
        None => spawn_layout_worker(OutlineRasterizer),
    };
    let mut session = ChatSession::new(settings)?.with_layout_engine(engine).with_layout_responses(responses);

    if args.list_models {
        list_models(&session).await;
        return Ok(());
    }

    display::print_header(session.settings());
    match &args.prompt {
        Some(prompt) => {
            let message = build_message(prompt, &args.images)?;
            run_turn(&mut session, message, &args).await?;
        }
        None => interactive(&mut session, &args).await?,
    }

    Ok(())
}
