//! ResearchBuddy - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use researchbuddy::{
    agent::{EventBus, ResearchController, ResearchOutcome},
    cli::{display, Args, Commands, ProgressDisplay, Verbosity},
    config::Config,
    errors::ResearchError,
    types::ConversationTurn,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    args.validate().map_err(anyhow::Error::msg)?;

    let mut config = Config::load(args.config.clone()).context("Failed to load configuration")?;
    args.apply_overrides(&mut config).map_err(anyhow::Error::msg)?;
    config.validate().context("Invalid configuration")?;

    match &args.command {
        Some(Commands::Chat) => run_chat(&args, &config).await?,
        Some(Commands::Config) => show_config(&config)?,
        Some(Commands::Modes) => display::print_modes(),
        None => match &args.question {
            Some(question) => run_once(&args, &config, question).await?,
            None => print_usage(),
        },
    }

    Ok(())
}

/// Log to stderr so stdout carries only the answer
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_controller(args: &Args, config: &Config) -> Result<ResearchController> {
    let strategy = args.strategy().map_err(anyhow::Error::msg)?;
    let controller = ResearchController::from_config(config)
        .context("Failed to initialise the completion provider or vector store")?;
    Ok(controller.with_strategy(strategy))
}

async fn run_once(args: &Args, config: &Config, question: &str) -> Result<()> {
    let controller = build_controller(args, config)?;
    ask(&controller, question, &[], args.verbosity())
        .await
        .context("Research failed")?;
    Ok(())
}

/// Research one question with progress rendering and Ctrl-C cancellation.
///
/// Returns `None` when the user cancelled.
async fn ask(
    controller: &ResearchController,
    question: &str,
    history: &[ConversationTurn],
    verbosity: Verbosity,
) -> researchbuddy::Result<Option<ResearchOutcome>> {
    let cancel = CancellationToken::new();
    let (bus, receiver) = EventBus::new();
    let renderer = tokio::spawn(ProgressDisplay::new(verbosity).consume(receiver));

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = controller.run(question, history, &cancel, &bus).await;
    drop(bus);
    interrupt.abort();
    if let Err(e) = renderer.await {
        tracing::debug!("Progress renderer stopped: {}", e);
    }

    match result {
        Ok(outcome) => {
            display::print_answer(&outcome.answer, verbosity);
            if verbosity.show_events() {
                display::print_stats(&outcome.answer, &outcome.stats, outcome.elapsed);
            }
            Ok(Some(outcome))
        }
        Err(ResearchError::Cancelled) => {
            display::show_info("Research cancelled");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn run_chat(args: &Args, config: &Config) -> Result<()> {
    let controller = build_controller(args, config)?;
    let verbosity = args.verbosity();
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;

    let history_file = history_path();
    if let Some(path) = &history_file {
        if path.exists() {
            let _ = editor.load_history(path);
        }
    }

    display::show_banner(config.chat_model(), controller.strategy());
    let mut conversation: Vec<ConversationTurn> = Vec::new();

    loop {
        match editor.readline("researchbuddy> ") {
            Ok(line) => {
                let question = line.trim();
                match question {
                    "" => continue,
                    "/exit" | "/quit" => break,
                    "/clear" => {
                        conversation.clear();
                        display::show_info("Conversation cleared");
                        continue;
                    }
                    _ => {}
                }
                let _ = editor.add_history_entry(question);

                match ask(&controller, question, &conversation, verbosity).await {
                    Ok(Some(outcome)) => {
                        conversation.push(ConversationTurn::user(question));
                        conversation.push(ConversationTurn::assistant(outcome.answer.text));
                        println!();
                    }
                    Ok(None) => {}
                    Err(e) => display::show_error(&e.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Readline error"),
        }
    }

    if let Some(path) = &history_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create history directory")?;
        }
        if let Err(e) = editor.save_history(path) {
            tracing::warn!("Could not save chat history: {}", e);
        }
    }

    Ok(())
}

fn history_path() -> Option<PathBuf> {
    Config::default_path().and_then(|p| p.parent().map(|dir| dir.join("chat_history")))
}

fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.provider.openrouter_api_key.is_some() {
        shown.provider.openrouter_api_key = Some("********".to_string());
    }
    let text = toml::to_string_pretty(&shown).context("Failed to serialise configuration")?;
    if let Some(path) = Config::default_path() {
        println!("# {}", path.display());
    }
    println!("{}", text);
    Ok(())
}

fn print_usage() {
    println!("ResearchBuddy {} - iterative research assistant", env!("CARGO_PKG_VERSION"));
    println!("\nUsage:");
    println!("  researchbuddy <question>          Research a question");
    println!("  researchbuddy chat                Interactive research chat");
    println!("  researchbuddy modes               List research modes");
    println!("  researchbuddy config              Show configuration");
    println!("\nExample:");
    println!("  researchbuddy \"Compare how three traditions treat forgiveness\"");
    println!();
}
