//! Where requests come from.
//!
//! A [`Listener`] produces one utterance at a time. `None` means nothing
//! usable was heard (silence, unintelligible speech, an empty line); callers
//! treat it as "no input" and carry on.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

#[async_trait]
pub trait Listener: Send {
    async fn listen(&mut self) -> Option<String>;

    /// True once the input has ended for good (e.g. stdin reached EOF).
    fn is_closed(&self) -> bool {
        false
    }
}

/// One request per line of standard input.
pub struct ConsoleListener {
    lines: Lines<BufReader<Stdin>>,
    prompt: Option<String>,
    closed: bool,
}

impl ConsoleListener {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: None,
            closed: false,
        }
    }

    /// Print `prompt` before every read.
    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }
}

impl Default for ConsoleListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for ConsoleListener {
    async fn listen(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        if let Some(prompt) = &self.prompt {
            let mut stdout = tokio::io::stdout();
            let _ = stdout.write_all(prompt.as_bytes()).await;
            let _ = stdout.flush().await;
        }
        match self.lines.next_line().await {
            Ok(Some(line)) => clean(&line),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(e) => {
                log::warn!("Failed to read from the terminal: {e}");
                self.closed = true;
                None
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Never hears anything. Used where follow-up questions cannot be asked.
#[derive(Debug, Default)]
pub struct Silent;

#[async_trait]
impl Listener for Silent {
    async fn listen(&mut self) -> Option<String> {
        None
    }
}

/// Trim an utterance, mapping blank input to `None`.
pub fn clean(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned answers, then reports silence.
    #[derive(Debug, Default)]
    pub(crate) struct Scripted {
        answers: VecDeque<String>,
        pub(crate) asked: usize,
    }

    impl Scripted {
        pub(crate) fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                asked: 0,
            }
        }
    }

    #[async_trait]
    impl Listener for Scripted {
        async fn listen(&mut self) -> Option<String> {
            self.asked += 1;
            self.answers.pop_front().and_then(|a| clean(&a))
        }
    }

    #[test]
    fn blank_input_is_no_input() {
        assert_eq!(clean("  \t"), None);
        assert_eq!(clean(" open notepad \n").as_deref(), Some("open notepad"));
    }

    #[tokio::test]
    async fn silent_never_hears_anything() {
        let mut silent = Silent;
        assert_eq!(silent.listen().await, None);
        assert!(!silent.is_closed());
    }
}
