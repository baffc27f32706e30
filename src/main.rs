//! Entry point for Jarvis, a personal voice and text assistant.
//!
//! Each request is first offered to the built-in commands (open an app,
//! weather, news, Wikipedia, email and so on); anything else is answered by
//! a local language model served by Ollama, spoken sentence by sentence
//! while it streams in. Saying "bye" (or pressing Ctrl-C) summarises the
//! session into a log that the next session starts from.
//!
//! Input comes from one of three front ends:
//!
//!  * the microphone, when built with the `voice` feature and
//!    `VOSK_MODEL_PATH` points to a Vosk model;
//!  * the terminal, one request per line (`--text`, or no model configured);
//!  * a queue fed from stdin and drained by a pool of workers (`--queue`).
//!
//! See `config.rs` for the environment variables that tune the rest.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::Notify;

use jarvis_assistant::assistant::Assistant;
use jarvis_assistant::config::{Cli, Config, InputMode};
use jarvis_assistant::listener::{ConsoleListener, Listener, Silent};
use jarvis_assistant::router::Routed;
use jarvis_assistant::worker::{WorkQueue, QUEUE_CAPACITY};

const CONSOLE_PROMPT: &str = "You: ";

#[cfg(feature = "voice")]
fn voice_listener(model_path: &str) -> Result<Box<dyn Listener>> {
    use jarvis_assistant::speech::VoiceListener;
    use std::time::Duration;

    let listener = VoiceListener::new(model_path, Duration::from_secs(10))?;
    Ok(Box::new(listener))
}

#[cfg(not(feature = "voice"))]
fn voice_listener(_model_path: &str) -> Result<Box<dyn Listener>> {
    log::warn!("Built without the `voice` feature; reading requests from the terminal");
    Ok(Box::new(ConsoleListener::new().with_prompt(CONSOLE_PROMPT)))
}

/// Listen, handle, repeat until the user says goodbye or input ends.
async fn interactive(assistant: &Assistant, input: &mut dyn Listener) -> Result<()> {
    loop {
        let Some(query) = input.listen().await else {
            if input.is_closed() {
                log::info!("Input closed");
                return Ok(());
            }
            continue;
        };
        if assistant.handle(&query, input).await == Routed::Exit {
            return Ok(());
        }
    }
}

/// Feed stdin lines to a worker pool. Follow-up questions cannot be asked
/// here, so commands that need one apologise instead.
async fn queued(assistant: Arc<Assistant>, workers: usize) -> Result<()> {
    let exit = Arc::new(Notify::new());
    let queue = {
        let exit = Arc::clone(&exit);
        WorkQueue::start(workers, QUEUE_CAPACITY, move |query: String| {
            let assistant = Arc::clone(&assistant);
            let exit = Arc::clone(&exit);
            async move {
                if assistant.handle(&query, &mut Silent).await == Routed::Exit {
                    exit.notify_one();
                }
            }
        })
    };

    let mut input = ConsoleListener::new();
    loop {
        tokio::select! {
            _ = exit.notified() => break,
            line = input.listen() => match line {
                Some(query) => queue.submit(query).await?,
                None if input.is_closed() => break,
                None => {}
            },
        }
    }
    queue.shutdown().await;
    Ok(())
}

async fn run(assistant: &Arc<Assistant>, mode: &InputMode) -> Result<()> {
    match mode {
        InputMode::Voice(model_path) => {
            let mut input = voice_listener(model_path)?;
            interactive(assistant, input.as_mut()).await
        }
        InputMode::Console => {
            let mut input = ConsoleListener::new().with_prompt(CONSOLE_PROMPT);
            interactive(assistant, &mut input).await
        }
        InputMode::Queued { workers } => queued(Arc::clone(assistant), *workers).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from `.env` if present.
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from_env(&cli)?;
    let assistant = Arc::new(Assistant::from_config(&config)?);
    log::info!("{} initialised for {}", config.bot_name, config.user_name);

    assistant.greet().await;
    tokio::select! {
        result = run(&assistant, &config.input) => result?,
        interrupted = signal::ctrl_c() => {
            if let Err(e) = interrupted {
                log::error!("Failed to listen for Ctrl-C: {e}");
            }
            log::info!("Received Ctrl-C, shutting down");
        }
    }

    assistant.shutdown().await;
    // A stdin read parked on a blocking thread would otherwise keep the
    // runtime from shutting down.
    std::process::exit(0);
}
