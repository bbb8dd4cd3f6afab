//! Terminal output for chat replies, streams, agent progress and model lists.
//!
//! Formatting functions return plain strings; colour is applied only by the
//! `print_*` helpers.

use crate::agent::{AgentEvent, Outcome};
use crate::gateway::{Annotation, Completion, ModelInfo, StreamDelta};
use anyhow::Result;
use colored::Colorize;
use std::io::Write;

/// Print a finished completion: raw JSON, or content followed by sources.
pub fn print_completion(completion: &Completion, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&completion.raw)?);
        return Ok(());
    }

    println!("{}", completion.content().unwrap_or_default());
    if let Some(sources) = format_citations(completion.annotations()) {
        println!("\n{}", sources.dimmed());
    }
    Ok(())
}

/// Numbered list of cited URLs, de-duplicated, in first-seen order.
pub fn format_citations(annotations: &[Annotation]) -> Option<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut lines = Vec::new();

    for annotation in annotations {
        let Annotation::UrlCitation { url_citation } = annotation else {
            continue;
        };
        if seen.contains(&url_citation.url.as_str()) {
            continue;
        }
        seen.push(&url_citation.url);

        let line = match url_citation.title.as_deref().filter(|t| !t.is_empty()) {
            Some(title) => format!("  [{}] {} - {}", seen.len(), title, url_citation.url),
            None => format!("  [{}] {}", seen.len(), url_citation.url),
        };
        lines.push(line);
    }

    if lines.is_empty() {
        None
    } else {
        Some(format!("Sources:\n{}", lines.join("\n")))
    }
}

/// Writes streamed text as it arrives and keeps annotations for the end.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    annotations: Vec<Annotation>,
    wrote_text: bool,
    ends_with_newline: bool,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delta(&mut self, delta: StreamDelta) {
        match delta {
            StreamDelta::Text(text) => {
                let mut stdout = std::io::stdout().lock();
                // A closed pipe is not worth aborting the stream over.
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
                self.wrote_text = true;
                self.ends_with_newline = text.ends_with('\n');
            }
            StreamDelta::Annotations(mut annotations) => self.annotations.append(&mut annotations),
        }
    }

    /// Terminate the line and print any collected sources.
    pub fn finish(&self) {
        if self.wrote_text && !self.ends_with_newline {
            println!();
        }
        if let Some(sources) = format_citations(&self.annotations) {
            println!("\n{}", sources.dimmed());
        }
    }
}

/// Render the model list as aligned lines.
pub fn format_models(models: &[ModelInfo]) -> String {
    if models.is_empty() {
        return "No models found.".to_string();
    }

    let width = models.iter().map(|m| m.id.len()).max().unwrap_or(0);
    models
        .iter()
        .map(|model| {
            let context = model
                .context_length
                .map(|c| format!("{}k ctx", c / 1000))
                .unwrap_or_else(|| "? ctx".to_string());
            let pricing = model
                .pricing
                .as_ref()
                .map(|p| {
                    format!(
                        "{} in / {} out per 1M",
                        per_million(p.prompt.as_deref()),
                        per_million(p.completion.as_deref())
                    )
                })
                .unwrap_or_default();
            format!("{:<width$}  {:>9}  {}", model.id, context, pricing, width = width)
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert a per-token USD price string into a per-million display.
fn per_million(price: Option<&str>) -> String {
    match price.and_then(|p| p.parse::<f64>().ok()) {
        Some(p) if p == 0.0 => "free".to_string(),
        Some(p) if p > 0.0 => format!("${:.2}", p * 1_000_000.0),
        _ => "?".to_string(),
    }
}

/// One line of agent progress, tagged by how it is styled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLine {
    Step(String),
    Comment(String),
    Command(String),
    Stdout(String),
    Stderr(String),
    Warning(String),
}

/// Lines reported for one agent event. Output streams lose one trailing newline.
pub fn format_agent_event(event: &AgentEvent<'_>) -> Vec<ProgressLine> {
    let mut lines = Vec::new();
    match event {
        AgentEvent::StepStarted { step, max_steps } => {
            lines.push(ProgressLine::Step(format!("[step {}/{}]", step, max_steps)));
        }
        AgentEvent::CommandProposed { command, comment } => {
            if let Some(comment) = comment {
                lines.push(ProgressLine::Comment(comment.to_string()));
            }
            lines.push(ProgressLine::Command(command.to_string()));
        }
        AgentEvent::CommandCompleted { command, result } => {
            if !result.stdout.is_empty() {
                let text = result.stdout.strip_suffix('\n').unwrap_or(&result.stdout);
                lines.push(ProgressLine::Stdout(text.to_string()));
            }
            if !result.stderr.is_empty() {
                let text = result.stderr.strip_suffix('\n').unwrap_or(&result.stderr);
                lines.push(ProgressLine::Stderr(text.to_string()));
            }
            if !result.success() {
                lines.push(ProgressLine::Warning(format!(
                    "`{}` exited with status {}",
                    command, result.exit_code
                )));
            }
        }
    }
    lines
}

/// Report agent progress on stderr so stdout carries only the result.
pub fn print_agent_event(event: AgentEvent<'_>) {
    for line in format_agent_event(&event) {
        match line {
            ProgressLine::Step(text) => eprintln!("{}", text.dimmed()),
            ProgressLine::Comment(text) => eprintln!("{} {}", "#".dimmed(), text.dimmed()),
            ProgressLine::Command(text) => eprintln!("{} {}", "$".green().bold(), text.bold()),
            ProgressLine::Stdout(text) => eprintln!("{}", text),
            ProgressLine::Stderr(text) => eprintln!("{}", text.red()),
            ProgressLine::Warning(text) => eprintln!("{}", text.yellow()),
        }
    }
}

/// Human-readable line for a finished run.
pub fn format_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Finished { summary, .. } => summary.clone(),
        Outcome::BudgetExhausted { steps } => format!(
            "Step budget exhausted after {} step(s) without finishing.",
            steps
        ),
    }
}

/// Print the final result of an agent run.
pub fn print_outcome(outcome: &Outcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
        return Ok(());
    }
    match outcome {
        Outcome::Finished { .. } => println!("{}", format_outcome(outcome)),
        Outcome::BudgetExhausted { .. } => println!("{}", format_outcome(outcome).yellow()),
    }
    Ok(())
}
