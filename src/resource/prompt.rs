use std::io;

use async_trait::async_trait;
use colored::Colorize;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader, Stdin},
    sync::Mutex,
};

/// Interactive questions asked during an install.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Asks a question, `None` when the user skipped it.
    async fn ask(&self, question: &str) -> io::Result<Option<String>>;

    /// Shows a warning the user should read before answering.
    fn notice(&self, message: &str);
}

/// A blank answer or `skip` means no answer.
pub fn normalize_answer(raw: &str) -> Option<String> {
    let answer = raw.trim();
    if answer.is_empty() || answer == "skip" {
        None
    } else {
        Some(answer.to_string())
    }
}

/// Whether an answer agrees to a yes/no question.
pub fn is_consent(answer: Option<&str>) -> bool {
    answer.is_some_and(|answer| answer.to_lowercase().contains('y'))
}

/// Reads answers line by line from standard input.
///
/// One buffered reader serves every question, so piped answers that were
/// read ahead are kept for the next one.
pub struct TerminalPrompt<R = Stdin> {
    input: Mutex<BufReader<R>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_input(tokio::io::stdin())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncRead + Unpin> TerminalPrompt<R> {
    pub fn with_input(input: R) -> Self {
        Self {
            input: Mutex::new(BufReader::new(input)),
        }
    }
}

#[async_trait]
impl<R> Prompt for TerminalPrompt<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn ask(&self, question: &str) -> io::Result<Option<String>> {
        println!(
            "{}",
            "[#] QUESTION - Press 'Enter' after typing to submit answer. Leave blank to skip."
                .bright_cyan()
        );
        println!("{}", format!("[Q] {}", question).bright_yellow());

        let mut line = String::new();
        self.input.lock().await.read_line(&mut line).await?;
        Ok(normalize_answer(&line))
    }

    fn notice(&self, message: &str) {
        println!("{}", format!("[#] {}", message).bright_yellow());
    }
}
