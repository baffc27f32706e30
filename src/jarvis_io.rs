//! Status files under `~/.jarvis` for external front ends.
//!
//! A desktop widget or shell prompt can watch these files to show what the
//! assistant is doing without talking to the process directly:
//!
//!  * `jarvis.status`: one of `idle`, `listening`, `thinking`, `speaking`.
//!  * `jarvis.heard`: the last request.
//!  * `jarvis.spoken`: the last reply.
//!  * `jarvis`: the process id.
//!
//! Writes are best effort; a failed write is logged and otherwise ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Idle => "idle",
            Status::Listening => "listening",
            Status::Thinking => "thinking",
            Status::Speaking => "speaking",
        })
    }
}

pub struct JarvisIO {
    base: PathBuf,
}

impl JarvisIO {
    /// `~/.jarvis`, if a home directory is known.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".jarvis"))
    }

    /// Use `base` for the status files, creating it if needed.
    pub fn at(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .with_context(|| format!("failed to create status directory {}", base.display()))?;
        Ok(Self { base })
    }

    pub fn dir(&self) -> &Path {
        &self.base
    }

    fn write(&self, name: &str, contents: &str) {
        let path = self.base.join(name);
        if let Err(e) = std::fs::write(&path, contents) {
            log::warn!("Failed to write {}: {e}", path.display());
        }
    }

    pub fn write_status(&self, status: Status) {
        self.write("jarvis.status", &status.to_string());
    }

    pub fn write_heard(&self, text: &str) {
        self.write("jarvis.heard", text);
    }

    pub fn write_spoken(&self, text: &str) {
        self.write("jarvis.spoken", text);
    }

    pub fn set_pid(&self) {
        self.write("jarvis", &std::process::id().to_string());
    }

    pub fn current_status(&self) -> Option<String> {
        std::fs::read_to_string(self.base.join("jarvis.status"))
            .ok()
            .map(|s| s.trim().to_string())
    }
}
