//! Conversational fallback: stream an answer from the language model and
//! speak it while it is being generated.
//!
//! [`Agent::chat`] renders a prompt from the persona, the recent history and
//! (for search requests) a block of web results, then pulls tokens one at a
//! time. Tokens go through a [`Chunker`]; each chunk it releases is spoken
//! before the next token is read, so playback paces consumption. When the
//! stream ends the exchange is appended to the history.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::chunker::Chunker;
use crate::history::{History, Turn, PROMPT_TURNS};
use crate::services::Collaborators;
use crate::stream::TokenSource;
use crate::tts_engine::Speaker;

/// Leading phrases that turn a chat request into a search-backed answer.
const SEARCH_TRIGGERS: &[&str] = &["search the web for", "search for", "look up", "google"];

/// Build the fixed persona preamble for this session.
pub fn persona(bot_name: &str, user_name: &str, previous_session: Option<&str>) -> String {
    let mut preamble = format!(
        "You are {bot_name}, an AI assistant for {user_name}. Act like Jarvis: be helpful, \
         witty and brief. Answer in plain spoken sentences without Markdown, lists or code blocks."
    );
    if let Some(summary) = previous_session {
        preamble.push_str("\nSummary of your previous conversation: ");
        preamble.push_str(summary);
    }
    preamble
}

/// If `question` asks for a web search, the query that follows the trigger.
fn search_query(question: &str) -> Option<&str> {
    let trimmed = question.trim();
    let lower = trimmed.to_lowercase();
    SEARCH_TRIGGERS.iter().find_map(|trigger| {
        if !lower.starts_with(trigger) {
            return None;
        }
        // Triggers are ASCII; `get` guards against case mappings that
        // change byte lengths.
        let rest = trimmed
            .get(trigger.len()..)?
            .trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == ',')
            .trim();
        (!rest.is_empty()).then_some(rest)
    })
}

fn render_prompt(persona: &str, recent: &str, context: Option<&str>, question: &str) -> String {
    let mut prompt = String::from(persona);
    prompt.push_str("\n\n");
    if !recent.is_empty() {
        prompt.push_str(recent);
        prompt.push_str("\n\n");
    }
    if let Some(context) = context {
        prompt.push_str("Context:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("User: ");
    prompt.push_str(question);
    prompt.push_str("\nAssistant:");
    prompt
}

/// Strip Markdown emphasis and inline code markers the TTS engine would
/// otherwise read out.
fn speakable(chunk: &str) -> String {
    chunk.replace(['`', '*', '#'], "").trim().to_string()
}

pub struct Agent {
    source: Arc<dyn TokenSource>,
    speaker: Speaker,
    history: Mutex<History>,
    search: Option<Arc<dyn Collaborators>>,
    persona: String,
}

impl Agent {
    pub fn new(
        source: Arc<dyn TokenSource>,
        speaker: Speaker,
        history: History,
        persona: String,
    ) -> Self {
        Self {
            source,
            speaker,
            history: Mutex::new(history),
            search: None,
            persona,
        }
    }

    /// Enable search-backed answers for questions starting with a search
    /// trigger.
    pub fn with_search(mut self, search: Arc<dyn Collaborators>) -> Self {
        self.search = Some(search);
        self
    }

    /// Run one request/response/speak cycle and return the full reply.
    ///
    /// The history lock is held for the whole cycle, so concurrent callers
    /// are served one at a time.
    pub async fn chat(&self, question: &str) -> String {
        let mut history = self.history.lock().await;

        let context = match search_query(question) {
            Some(query) => self.look_up(query).await,
            None => None,
        };
        let prompt = render_prompt(
            &self.persona,
            &history.recent(PROMPT_TURNS),
            context.as_deref(),
            question,
        );
        log::debug!("LLM prompt: {prompt}");

        let mut tokens = self.source.stream(&prompt);
        let mut chunker = Chunker::new();
        let mut reply = String::new();
        while let Some(token) = tokens.next().await {
            reply.push_str(&token);
            if let Some(chunk) = chunker.push(&token) {
                self.say_chunk(&chunk).await;
            }
        }
        if let Some(chunk) = chunker.finish() {
            self.say_chunk(&chunk).await;
        }

        log::info!("Assistant response: {reply}");
        history.append(Turn::user(question));
        history.append(Turn::assistant(reply.clone()));
        reply
    }

    /// Summarise the session into the persisted log. Returns whether a
    /// record was written.
    pub async fn end_session(&self) -> anyhow::Result<bool> {
        let history = self.history.lock().await;
        history.summarize_and_save(self.source.as_ref()).await
    }

    pub async fn turns(&self) -> usize {
        self.history.lock().await.len()
    }

    async fn look_up(&self, query: &str) -> Option<String> {
        let search = self.search.as_ref()?;
        log::info!("Searching the web for {query:?}");
        match search.web_search(query).await {
            Ok(results) => Some(results),
            Err(e) => {
                log::warn!("Web search for {query:?} failed: {e}");
                None
            }
        }
    }

    async fn say_chunk(&self, chunk: &str) {
        let text = speakable(chunk);
        if !text.is_empty() {
            self.speaker.speak(&text).await;
        }
    }
}
