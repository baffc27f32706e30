//! Conversation history and the persisted session log.
//!
//! Turns are kept in memory for the whole session. Only a tail is ever read:
//! the last [`PROMPT_TURNS`] go into each chat prompt and the last
//! [`SUMMARY_TURNS`] are summarised when the session ends. The summary is
//! appended to a plain-text log as `"<YYYY-MM-DD HH:MM> - <summary>\n\n"`.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::stream::{collect_text, contains_error_token, TokenSource};

/// Turns included in every chat prompt.
pub const PROMPT_TURNS: usize = 6;
/// Turns fed to the end-of-session summary.
pub const SUMMARY_TURNS: usize = 12;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.text)
    }
}

/// Append-only log of session summaries.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole log, or an empty string if nothing has been written yet.
    pub fn read_all(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        }
    }

    /// The most recent record, timestamp included.
    pub fn last_record(&self) -> Result<Option<String>> {
        Ok(self
            .read_all()?
            .split("\n\n")
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .last()
            .map(str::to_string))
    }

    pub fn append(&self, at: DateTime<Local>, summary: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let record = format!("{} - {}\n\n", at.format(TIMESTAMP_FORMAT), single_line(summary));
        file.write_all(record.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

/// Collapse all whitespace runs so a record never contains a blank line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn summary_prompt(transcript: &str, now: DateTime<Local>) -> String {
    format!(
        "Summarise the following conversation between a user and their assistant \
         in two or three sentences. Mention the topics discussed and anything the \
         user asked to be remembered. Reply with the summary only.\n\
         Date: {}\n\n{}\n\nSummary:",
        now.format(TIMESTAMP_FORMAT),
        transcript
    )
}

#[derive(Debug)]
pub struct History {
    turns: Vec<Turn>,
    log: SessionLog,
}

impl History {
    pub fn new(log: SessionLog) -> Self {
        Self {
            turns: Vec::new(),
            log,
        }
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The last `n` turns rendered one per line.
    pub fn recent(&self, n: usize) -> String {
        self.recent_turns(n)
            .iter()
            .map(Turn::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ask the model for a digest of the latest turns and append it to the
    /// session log. Returns `false` without touching the log when nothing
    /// was said this session.
    pub async fn summarize_and_save(&self, source: &dyn TokenSource) -> Result<bool> {
        if self.turns.is_empty() {
            return Ok(false);
        }
        let now = Local::now();
        let transcript = self.recent(SUMMARY_TURNS);
        let summary = collect_text(source.stream(&summary_prompt(&transcript, now))).await;
        let summary = summary.trim();

        let record = if summary.is_empty() || contains_error_token(summary) {
            log::warn!("Session summary unavailable ({summary:?}); saving the transcript instead");
            transcript.as_str()
        } else {
            summary
        };
        self.log.append(now, record)?;
        log::info!("Session summary saved to {}", self.log.path().display());
        Ok(true)
    }
}
