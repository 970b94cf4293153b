//! Terminal rendering of research progress
//!
//! Progress goes to stderr through an indicatif spinner; only the answer
//! is written to stdout.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::agent::events::ProgressEvent;
use crate::agent::strategy::StrategyKind;
use crate::cli::args::Verbosity;
use crate::rag::synthesizer::ResearchAnswer;
use crate::telemetry::TelemetryStats;
use crate::types::messages::clip;

/// Spinner refresh interval
const TICK: Duration = Duration::from_millis(100);

/// Renders progress events for one session
pub struct ProgressDisplay {
    verbosity: Verbosity,
    spinner: Option<ProgressBar>,
}

impl ProgressDisplay {
    pub fn new(verbosity: Verbosity) -> Self {
        let spinner = verbosity.show_progress().then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(TICK);
            pb.set_message("Classifying question...");
            pb
        });
        Self { verbosity, spinner }
    }

    /// Drain the progress channel until it closes
    pub async fn consume(mut self, mut receiver: mpsc::Receiver<ProgressEvent>) {
        while let Some(event) = receiver.recv().await {
            self.handle(&event);
        }
        self.finish();
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        if let Some(pb) = &self.spinner {
            pb.set_message(status_line(event));
        }

        if self.verbosity.show_events() {
            if let Some(detail) = detail_line(event) {
                self.println(&detail);
            }
        }

        if event.is_terminal() {
            self.finish();
        }
    }

    fn println(&self, line: &str) {
        match &self.spinner {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

/// One-line spinner message for an event
pub fn status_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::ClassificationDone { tier, .. } => format!("Classified as {}", tier),
        ProgressEvent::PlanReady { iteration, queries, .. } => {
            format!("Iteration {}: planned {} queries", iteration, queries.len())
        }
        ProgressEvent::Searching { iteration, queries } => {
            format!("Iteration {}: searching {} queries...", iteration, queries.len())
        }
        ProgressEvent::SearchDone {
            iteration,
            new_evidence,
            total_evidence,
            ..
        } => format!(
            "Iteration {}: {} new passages ({} total)",
            iteration, new_evidence, total_evidence
        ),
        ProgressEvent::Reflecting { iteration } => {
            format!("Iteration {}: assessing evidence...", iteration)
        }
        ProgressEvent::ReflectionDone {
            iteration,
            confidence,
            ..
        } => format!(
            "Iteration {}: confidence {:.0}%",
            iteration,
            confidence * 100.0
        ),
        ProgressEvent::Synthesizing { evidence_count, .. } => {
            format!("Writing answer from {} passages...", evidence_count)
        }
        ProgressEvent::Done { .. } => "Done".to_string(),
        ProgressEvent::Error { message } => format!("Error: {}", message),
    }
}

/// Detailed line shown in verbose mode
pub fn detail_line(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::ClassificationDone {
            tier,
            profile,
            antecedent_topic,
            fell_back,
        } => {
            let mut line = format!(
                "{} {} (up to {} iterations, {} parallel queries, threshold {:.2})",
                "[classify]".cyan(),
                tier.to_string().bold(),
                profile.max_iterations,
                profile.max_parallel_queries,
                profile.confidence_threshold
            );
            if let Some(topic) = antecedent_topic {
                line.push_str(&format!(" about \"{}\"", clip(topic, 60)));
            }
            if *fell_back {
                line.push_str(&format!(" {}", "(fallback)".yellow()));
            }
            line
        }
        ProgressEvent::PlanReady {
            iteration,
            queries,
            rationale,
            ..
        } => {
            let mut line = format!("{} iteration {}: {}", "[plan]".cyan(), iteration, rationale.dimmed());
            for query in queries {
                line.push_str(&format!("\n    - {}", query));
            }
            line
        }
        ProgressEvent::SearchDone {
            new_evidence,
            total_evidence,
            failures,
            ..
        } => {
            let mut line = format!(
                "{} +{} passages, {} in pool",
                "[search]".cyan(),
                new_evidence,
                total_evidence
            );
            for failure in failures {
                line.push_str(&format!(
                    "\n    {} {}: {}",
                    "x".red(),
                    failure.query,
                    failure.reason
                ));
            }
            line
        }
        ProgressEvent::ReflectionDone {
            confidence,
            gaps,
            needs_more_search,
            ..
        } => {
            let mut line = format!(
                "{} confidence {:.2}{}",
                "[reflect]".cyan(),
                confidence,
                if *needs_more_search { ", more search wanted" } else { "" }
            );
            for gap in gaps {
                line.push_str(&format!("\n    gap: {}", gap));
            }
            line
        }
        ProgressEvent::Synthesizing { stop_reason, .. } => {
            format!("{} stopping: {}", "[synthesize]".cyan(), stop_reason)
        }
        ProgressEvent::Error { message } => format!("{} {}", "[error]".red(), message),
        ProgressEvent::Searching { .. }
        | ProgressEvent::Reflecting { .. }
        | ProgressEvent::Done { .. } => return None,
    };
    Some(line)
}

/// Print the answer and its sources to stdout
pub fn print_answer(answer: &ResearchAnswer, verbosity: Verbosity) {
    println!("{}", answer.text);

    if verbosity == Verbosity::Quiet || answer.citations.is_empty() {
        return;
    }

    println!("\n{}", "Sources".bold());
    for citation in &answer.citations {
        println!(
            "  [{}] {} {}",
            citation.index,
            citation.source_id,
            format!("(score {:.2})", citation.score).dimmed()
        );
    }
}

/// Session statistics for verbose mode
pub fn print_stats(answer: &ResearchAnswer, stats: &TelemetryStats, elapsed: Duration) {
    eprintln!(
        "\n{} {} after {} iteration(s), confidence {:.2}, {} passages",
        "Stopped:".bold(),
        answer.stop_reason,
        answer.iterations,
        answer.confidence,
        answer.evidence_count
    );
    eprintln!("{}", stats.summary(elapsed).dimmed());
}

/// Listing for the `modes` subcommand
pub fn print_modes() {
    println!("{}", "Research modes".bold());
    for kind in StrategyKind::all() {
        println!(
            "  {:<14} {} {}",
            kind.name().green(),
            kind.description(),
            format!("(aliases: {})", kind.aliases().join(", ")).dimmed()
        );
    }
}

pub fn show_error(message: &str) {
    eprintln!("{} {}", "Error:".red().bold(), message);
}

pub fn show_info(message: &str) {
    eprintln!("{} {}", "->".cyan(), message);
}

/// Banner for interactive chat
pub fn show_banner(model: &str, mode: StrategyKind) {
    let rule = "=".repeat(64);
    println!("\n{}", rule.cyan());
    println!("{}", format!("  ResearchBuddy {}", env!("CARGO_PKG_VERSION")).bold().cyan());
    println!("{}", format!("  Model: {} | Mode: {}", model, mode).dimmed());
    println!("{}\n", rule.cyan());
    println!(
        "Ask a question (follow-ups see earlier turns; {} to quit)\n",
        "/exit".green()
    );
}
