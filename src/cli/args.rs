//! Command-line argument parsing for ResearchBuddy
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::agent::strategy::StrategyKind;
use crate::config::{Config, ProviderKind};

/// ResearchBuddy - iterative research over a sacred-texts corpus
#[derive(Parser, Debug)]
#[command(name = "researchbuddy")]
#[command(author = "Jerome (Kubashen) Naidoo")]
#[command(version)]
#[command(about = "Ask a question; get a researched, cited answer", long_about = None)]
pub struct Args {
    /// Question to research
    #[arg(value_name = "QUESTION")]
    pub question: Option<String>,

    /// Research mode (see `researchbuddy modes`)
    #[arg(long, default_value = "deep_research")]
    pub mode: String,

    /// Completion provider: ollama or openrouter
    #[arg(long)]
    pub provider: Option<String>,

    /// Chat model for the selected provider
    #[arg(short, long)]
    pub model: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except the answer)
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Interactive research chat; follow-up questions see earlier turns
    Chat,

    /// Display effective configuration
    Config,

    /// List research modes and their aliases
    Modes,
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    /// Default tracing filter when RUST_LOG is unset
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "researchbuddy=error";
        }
        match self.verbose {
            0 => "researchbuddy=warn",
            1 => "researchbuddy=info",
            2 => "researchbuddy=debug",
            _ => "researchbuddy=trace",
        }
    }

    /// Check argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.command.is_some() && self.question.is_some() {
            return Err("Cannot specify a question with a subcommand.".to_string());
        }
        self.strategy()?;
        Ok(())
    }

    /// Parsed research mode
    pub fn strategy(&self) -> Result<StrategyKind, String> {
        self.mode.parse()
    }

    /// Apply `--provider` and `--model` on top of loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), String> {
        if let Some(provider) = &self.provider {
            config.provider.kind = provider.parse::<ProviderKind>()?;
        }
        if let Some(model) = &self.model {
            match config.provider.kind {
                ProviderKind::Ollama => config.provider.ollama_model = model.clone(),
                ProviderKind::OpenRouter => config.provider.openrouter_model = model.clone(),
            }
        }
        Ok(())
    }
}

impl Verbosity {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Check if should show the progress spinner
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    /// Check if should show per-iteration details and statistics
    pub fn show_events(&self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::VeryVerbose)
    }
}
