//! Runtime configuration.
//!
//! Command line flags select the front end; everything else comes from the
//! environment (optionally loaded from a `.env` file by `main`):
//!
//!  * `MODEL_NAME`: model served by Ollama (default `mistral`).
//!  * `OLLAMA_URL`: base URL of the Ollama server.
//!  * `JARVIS_USER` / `USER`: how the assistant addresses you.
//!  * `BOTNAME`: the assistant's own name.
//!  * `JARVIS_HISTORY_LOG`: session log file (default `~/.jarvis/conversation_log.txt`).
//!  * `VOICE_ENGINE`: `system`, `rhvoice` or `text`.
//!  * `VOICE_NAME`: partial match for selecting a specific TTS voice.
//!  * `VOSK_MODEL_PATH`: Vosk model directory; without it input is typed.
//!  * `OPENWEATHER_APP_ID`, `NEWS_API_KEY`, `NEWS_COUNTRY`, `TMDB_API_KEY`,
//!    `SERPAPI_KEY`, `EMAIL`, `PASSWORD`, `SMTP_RELAY`,
//!    `WHATSAPP_COUNTRY_CODE`: credentials and settings for the built-in
//!    commands.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::jarvis_io::JarvisIO;
use crate::services::{EmailAccount, ServiceSettings};

#[derive(Debug, Parser)]
#[command(name = "jarvis", version, about = "Voice and text personal assistant")]
pub struct Cli {
    /// Type requests in the terminal instead of speaking them.
    #[arg(long)]
    pub text: bool,

    /// Read requests from stdin and hand each one to a pool of workers.
    #[arg(long)]
    pub queue: bool,

    /// Number of workers in queued mode.
    #[arg(long, env = "JARVIS_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Model served by Ollama.
    #[arg(long, env = "MODEL_NAME", default_value = "mistral")]
    pub model: String,
}

/// Which engine renders speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEngine {
    System,
    RhVoice,
    Text,
}

impl VoiceEngine {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("rhvoice") => Self::RhVoice,
            Some("text") | Some("none") | Some("off") => Self::Text,
            _ => Self::System,
        }
    }
}

/// How requests reach the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    /// Microphone with the Vosk model at the given path.
    Voice(String),
    /// One request per terminal line, handled in order.
    Console,
    /// One request per stdin line, handled by a worker pool.
    Queued { workers: usize },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub user_name: String,
    pub bot_name: String,
    pub model: String,
    pub ollama_url: String,
    pub stream_timeout: Duration,
    pub history_log: PathBuf,
    pub status_dir: Option<PathBuf>,
    pub voice_engine: VoiceEngine,
    pub voice_name: Option<String>,
    pub input: InputMode,
    pub services: ServiceSettings,
}

/// Read a variable, treating blank values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env(cli: &Cli) -> Result<Self> {
        let status_dir = JarvisIO::default_dir();
        let history_log = match var("JARVIS_HISTORY_LOG") {
            Some(path) => PathBuf::from(path),
            None => status_dir
                .as_ref()
                .map(|dir| dir.join("conversation_log.txt"))
                .context("JARVIS_HISTORY_LOG is not set and no home directory was found")?,
        };

        let input = if cli.queue {
            InputMode::Queued {
                workers: cli.workers.max(1),
            }
        } else if cli.text {
            InputMode::Console
        } else {
            match var("VOSK_MODEL_PATH") {
                Some(path) => InputMode::Voice(path),
                None => {
                    log::info!("VOSK_MODEL_PATH is not set; reading requests from the terminal");
                    InputMode::Console
                }
            }
        };

        let email = match (var("EMAIL"), var("PASSWORD")) {
            (Some(address), Some(password)) => Some(EmailAccount {
                address,
                password,
                relay: var("SMTP_RELAY").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            }),
            _ => None,
        };

        let services = ServiceSettings {
            openweather_key: var("OPENWEATHER_APP_ID"),
            news_key: var("NEWS_API_KEY"),
            news_country: var("NEWS_COUNTRY").unwrap_or_else(|| "in".to_string()),
            tmdb_key: var("TMDB_API_KEY"),
            serpapi_key: var("SERPAPI_KEY"),
            whatsapp_country_code: var("WHATSAPP_COUNTRY_CODE")
                .unwrap_or_else(|| "+351".to_string()),
            email,
        };

        Ok(Self {
            user_name: var("JARVIS_USER")
                .or_else(|| var("USER"))
                .unwrap_or_else(|| "sir".to_string()),
            bot_name: var("BOTNAME").unwrap_or_else(|| "Jarvis".to_string()),
            model: cli.model.clone(),
            ollama_url: var("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
            stream_timeout: var("OLLAMA_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(120)),
            history_log,
            status_dir,
            voice_engine: VoiceEngine::parse(var("VOICE_ENGINE").as_deref()),
            voice_name: var("VOICE_NAME"),
            input,
            services,
        })
    }
}
