//! The assistant as one value.
//!
//! [`Assistant`] owns everything a session needs (speech output, command
//! router, chat agent with its history, status files) and is shared by
//! reference between the input loop and any workers. Nothing is global.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, Timelike};

use crate::agent::{self, Agent};
use crate::config::Config;
use crate::history::{History, SessionLog};
use crate::jarvis_io::{JarvisIO, Status};
use crate::listener::Listener;
use crate::router::{Routed, Router};
use crate::services::{Collaborators, OnlineServices};
use crate::stream::OllamaStream;
use crate::tts_engine::Speaker;

/// Time-of-day salutation. Hours outside morning, afternoon and evening
/// count as night.
fn salutation(hour: u32) -> &'static str {
    match hour {
        7..=11 => "Good morning",
        12..=15 => "Good afternoon",
        16..=18 => "Good evening",
        _ => "Good night",
    }
}

pub struct Assistant {
    agent: Agent,
    router: Router,
    speaker: Speaker,
    io: Option<Arc<JarvisIO>>,
    user_name: String,
    bot_name: String,
}

impl Assistant {
    pub fn new(agent: Agent, router: Router, speaker: Speaker, user_name: &str, bot_name: &str) -> Self {
        Self {
            agent,
            router,
            speaker,
            io: None,
            user_name: user_name.to_string(),
            bot_name: bot_name.to_string(),
        }
    }

    pub fn with_status_files(mut self, io: Arc<JarvisIO>) -> Self {
        io.set_pid();
        self.io = Some(io);
        self
    }

    /// Wire up the production collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let io = config.status_dir.as_ref().and_then(|dir| match JarvisIO::at(dir) {
            Ok(io) => Some(Arc::new(io)),
            Err(e) => {
                log::warn!("Status files disabled: {e:#}");
                None
            }
        });

        let mut speaker = Speaker::from_config(config.voice_engine, config.voice_name.as_deref())
            .with_echo(&config.bot_name);
        if let Some(io) = &io {
            speaker = speaker.with_status_files(Arc::clone(io));
        }

        let services: Arc<dyn Collaborators> = Arc::new(OnlineServices::new(config.services.clone())?);
        let source = Arc::new(OllamaStream::new(
            &config.ollama_url,
            &config.model,
            config.stream_timeout,
        )?);
        log::info!("Chatting with {} at {}", source.model(), config.ollama_url);

        let log = SessionLog::new(config.history_log.clone());
        let previous = log.last_record().unwrap_or_else(|e| {
            log::warn!("Could not read the previous session: {e:#}");
            None
        });
        let persona = agent::persona(&config.bot_name, &config.user_name, previous.as_deref());
        let agent = Agent::new(source, speaker.clone(), History::new(log), persona)
            .with_search(Arc::clone(&services));
        let router = Router::new(services, speaker.clone(), &config.user_name);

        let assistant = Self::new(agent, router, speaker, &config.user_name, &config.bot_name);
        Ok(match io {
            Some(io) => assistant.with_status_files(io),
            None => assistant,
        })
    }

    fn set_status(&self, status: Status) {
        if let Some(io) = &self.io {
            io.write_status(status);
        }
    }

    pub async fn greet(&self) {
        self.greet_at(Local::now().hour()).await;
    }

    async fn greet_at(&self, hour: u32) {
        self.speaker
            .speak(&format!("{} {}", salutation(hour), self.user_name))
            .await;
        self.speaker
            .speak(&format!("I am {}. How may I assist you?", self.bot_name))
            .await;
        self.set_status(Status::Listening);
    }

    /// Handle one request: a built-in command if one matches, otherwise a
    /// chat answer. `Unhandled` means the chat fallback answered.
    pub async fn handle(&self, query: &str, input: &mut dyn Listener) -> Routed {
        log::info!("User command: {query}");
        if let Some(io) = &self.io {
            io.write_heard(query);
        }
        self.set_status(Status::Thinking);

        let routed = self.router.route(query, input).await;
        if routed == Routed::Unhandled {
            self.agent.chat(query).await;
        }
        self.set_status(Status::Listening);
        routed
    }

    /// Summarise the session into the log and say goodbye.
    pub async fn shutdown(&self) {
        self.speaker.speak("Proceeding to shutdown.").await;
        match self.agent.end_session().await {
            Ok(true) => {}
            Ok(false) => log::info!("Nothing was said this session; no summary written"),
            Err(e) => log::error!("Failed to save the session summary: {e:#}"),
        }
        self.speaker.speak("System offline.").await;
        self.set_status(Status::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::Scripted as ScriptedSource;
    use crate::launcher::App;
    use crate::listener::Silent;
    use crate::services::ServiceResult;
    use crate::tts_engine::tests::Recorder;
    use async_trait::async_trait;

    struct Launcher;

    #[async_trait]
    impl Collaborators for Launcher {
        async fn launch(&self, _app: App) -> ServiceResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        assistant: Assistant,
        recorder: Recorder,
        log: SessionLog,
        dir: tempfile::TempDir,
    }

    fn fixture(tokens: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let speaker = recorder.speaker();
        let log = SessionLog::new(dir.path().join("conversation_log.txt"));
        let agent = Agent::new(
            Arc::new(ScriptedSource::new(tokens)),
            speaker.clone(),
            History::new(log.clone()),
            agent::persona("Jarvis", "Tony", None),
        );
        let router = Router::new(Arc::new(Launcher), speaker.clone(), "Tony");
        let io = Arc::new(JarvisIO::at(dir.path().join("status")).unwrap());
        let assistant =
            Assistant::new(agent, router, speaker, "Tony", "Jarvis").with_status_files(io);
        Fixture {
            assistant,
            recorder,
            log,
            dir,
        }
    }

    #[test]
    fn salutation_follows_the_clock() {
        assert_eq!(salutation(9), "Good morning");
        assert_eq!(salutation(12), "Good afternoon");
        assert_eq!(salutation(17), "Good evening");
        assert_eq!(salutation(22), "Good night");
        assert_eq!(salutation(3), "Good night");
        assert_eq!(salutation(6), "Good night");
    }

    #[tokio::test]
    async fn greeting_names_both_parties() {
        let f = fixture(&[]);
        f.assistant.greet_at(8).await;
        assert_eq!(
            f.recorder.said(),
            vec!["Good morning Tony", "I am Jarvis. How may I assist you?"]
        );
    }

    #[tokio::test]
    async fn commands_do_not_reach_the_model() {
        let f = fixture(&["Should not be spoken."]);
        let routed = f.assistant.handle("open notepad", &mut Silent).await;
        assert_eq!(routed, Routed::Handled);
        assert_eq!(f.recorder.said(), vec!["Opening notepad."]);
        assert_eq!(f.assistant.agent.turns().await, 0);
    }

    #[tokio::test]
    async fn everything_else_is_answered_by_chat() {
        let f = fixture(&["Rust is a language."]);
        let routed = f.assistant.handle("tell me about rust", &mut Silent).await;
        assert_eq!(routed, Routed::Unhandled);
        assert_eq!(f.recorder.said(), vec!["Rust is a language."]);
        assert_eq!(f.assistant.agent.turns().await, 2);

        let status = f.dir.path().join("status");
        assert_eq!(std::fs::read_to_string(status.join("jarvis.status")).unwrap(), "listening");
        assert_eq!(
            std::fs::read_to_string(status.join("jarvis.heard")).unwrap(),
            "tell me about rust"
        );
    }

    #[tokio::test]
    async fn shutdown_saves_the_session() {
        let f = fixture(&["We discussed Rust."]);
        f.assistant.handle("tell me about rust", &mut Silent).await;
        f.assistant.shutdown().await;

        let said = f.recorder.said();
        assert_eq!(said[said.len() - 2..], ["Proceeding to shutdown.", "System offline."]);
        let record = f.log.last_record().unwrap().unwrap();
        assert!(record.ends_with(" - We discussed Rust."), "{record}");
    }

    #[tokio::test]
    async fn shutdown_without_conversation_writes_nothing() {
        let f = fixture(&[]);
        f.assistant.shutdown().await;
        assert!(!f.log.path().exists());
        assert_eq!(f.recorder.said(), vec!["Proceeding to shutdown.", "System offline."]);
    }
}
