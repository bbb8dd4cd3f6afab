//! Assembling the user prompt from arguments, files and stdin.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Where the prompt text comes from.
#[derive(Debug, Clone, Default)]
pub struct PromptSources {
    /// Positional words, joined with spaces.
    pub words: Vec<String>,
    /// Files whose contents are appended.
    pub files: Vec<PathBuf>,
    /// Read stdin even when it is a terminal.
    pub force_stdin: bool,
}

impl PromptSources {
    /// Stdin is read when asked for, or when it is piped and no words were given.
    fn wants_stdin(&self, stdin_is_tty: bool) -> bool {
        self.force_stdin || (self.words.is_empty() && !stdin_is_tty)
    }

    /// Read every source and join them into one prompt.
    pub fn read(&self) -> Result<String> {
        let stdin = if self.wants_stdin(atty::is(atty::Stream::Stdin)) {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read prompt from stdin")?;
            Some(buf)
        } else {
            None
        };

        let mut files = Vec::with_capacity(self.files.len());
        for path in &self.files {
            files.push((path.clone(), read_file(path)?));
        }

        assemble(&self.words, &files, stdin.as_deref())
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Join the parts with blank lines: words, then files, then stdin.
pub fn assemble(words: &[String], files: &[(PathBuf, String)], stdin: Option<&str>) -> Result<String> {
    let mut parts = Vec::new();

    let text = words.join(" ");
    if !text.trim().is_empty() {
        parts.push(text.trim().to_string());
    }
    for (path, contents) in files {
        parts.push(format!("File: {}\n{}", path.display(), contents.trim_end()));
    }
    if let Some(stdin) = stdin.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(stdin.to_string());
    }

    if parts.is_empty() {
        bail!("No prompt provided. Pass it as an argument, with --file, or on stdin");
    }
    Ok(parts.join("\n\n"))
}
