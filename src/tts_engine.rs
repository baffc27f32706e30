//! Spoken output.
//!
//! A [`Speaker`] owns one [`SpeechBackend`] and guarantees that only one
//! utterance plays at a time: every call to [`Speaker::speak`] takes the same
//! lock and waits until the backend reports that playback has finished.
//! Backends are blocking, so rendering happens on Tokio's blocking pool.
//!
//! Three backends exist:
//!
//!  * [`SystemVoice`] delegates to the OS speech service through the [`tts`]
//!    crate (feature `voice`).
//!  * [`RhVoice`] pipes the text into the RHVoice command line synthesiser.
//!  * [`TextSink`] produces no audio; the utterance only reaches the console.
//!
//! If the configured engine cannot be initialised the speaker quietly
//! degrades to [`TextSink`] for the rest of the process.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};

use crate::config::VoiceEngine;
use crate::jarvis_io::{JarvisIO, Status};

/// A blocking text-to-speech renderer.
pub trait SpeechBackend: Send {
    fn name(&self) -> &'static str;

    /// Render `text` and return once playback has completed.
    fn say(&mut self, text: &str) -> Result<()>;
}

/// Backend used when no audio engine is available.
#[derive(Debug, Default)]
pub struct TextSink;

impl SpeechBackend for TextSink {
    fn name(&self) -> &'static str {
        "text"
    }

    fn say(&mut self, text: &str) -> Result<()> {
        log::debug!("(text only) {text}");
        Ok(())
    }
}

/// The RHVoice command line synthesiser. The text is written to its stdin
/// and the call returns when the process exits.
pub struct RhVoice {
    binary: PathBuf,
    voice: String,
}

impl RhVoice {
    const DEFAULT_BINARY: &'static str = "/snap/bin/rhvoice.test";

    pub fn new(voice: Option<&str>) -> Result<Self> {
        let binary = std::env::var("RHVOICE_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_BINARY));
        if binary.is_absolute() && !binary.exists() {
            bail!("RHVoice binary not found at {}", binary.display());
        }
        Ok(Self {
            binary,
            voice: voice.unwrap_or("slt").to_string(),
        })
    }
}

impl SpeechBackend for RhVoice {
    fn name(&self) -> &'static str {
        "rhvoice"
    }

    fn say(&mut self, text: &str) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .arg("-p")
            .arg(&self.voice)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .context("failed to spawn RHVoice process")?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .context("failed to write to RHVoice stdin")?;
            // Dropping stdin closes the pipe so RHVoice starts speaking.
        }
        let status = child.wait().context("failed to wait for RHVoice")?;
        if !status.success() {
            bail!("RHVoice exited with {status}");
        }
        Ok(())
    }
}

/// The operating system's speech service.
#[cfg(feature = "voice")]
pub struct SystemVoice {
    tts: tts::Tts,
    can_poll: bool,
}

#[cfg(feature = "voice")]
impl SystemVoice {
    pub fn new(voice_name: Option<&str>) -> Result<Self> {
        let tts = tts::Tts::default()
            .map_err(|e| anyhow!("failed to initialise text-to-speech engine: {e:?}"))?;
        let can_poll = tts.supported_features().is_speaking;
        let mut engine = Self { tts, can_poll };
        if let Some(name) = voice_name {
            match engine.set_voice_by_name(name) {
                Ok(()) => log::info!("Using voice: {name}"),
                Err(e) => log::warn!("Failed to set voice '{name}': {e}. Falling back to default."),
            }
        }
        Ok(engine)
    }

    /// Select the first installed voice whose name contains `name`
    /// (case insensitive).
    fn set_voice_by_name(&mut self, name: &str) -> Result<()> {
        let target = name.to_lowercase();
        let voices = self
            .tts
            .voices()
            .map_err(|e| anyhow!("failed to enumerate voices: {e:?}"))?;
        let voice = voices
            .into_iter()
            .find(|v| v.name().to_lowercase().contains(&target))
            .ok_or_else(|| anyhow!("no voice matching '{name}' found"))?;
        self.tts
            .set_voice(&voice)
            .map_err(|e| anyhow!("failed to set TTS voice: {e:?}"))
    }
}

#[cfg(feature = "voice")]
impl SpeechBackend for SystemVoice {
    fn name(&self) -> &'static str {
        "system"
    }

    fn say(&mut self, text: &str) -> Result<()> {
        self.tts
            .speak(text, false)
            .map_err(|e| anyhow!("TTS speak failed: {e:?}"))?;
        if !self.can_poll {
            return Ok(());
        }
        // Give the service a moment to start before polling.
        std::thread::sleep(std::time::Duration::from_millis(50));
        while self
            .tts
            .is_speaking()
            .map_err(|e| anyhow!("TTS status check failed: {e:?}"))?
        {
            std::thread::sleep(std::time::Duration::from_millis(40));
        }
        Ok(())
    }
}

/// Lowers the busy flag when dropped, including on error and panic.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle to the single speech output of the process.
#[derive(Clone)]
pub struct Speaker {
    backend: Arc<Mutex<Box<dyn SpeechBackend>>>,
    busy: Arc<AtomicBool>,
    label: Option<Arc<str>>,
    status: Option<Arc<JarvisIO>>,
}

impl Speaker {
    pub fn new(backend: Box<dyn SpeechBackend>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            busy: Arc::new(AtomicBool::new(false)),
            label: None,
            status: None,
        }
    }

    /// Echo every utterance to stdout prefixed with `label`.
    pub fn with_echo(mut self, label: &str) -> Self {
        self.label = Some(Arc::from(label));
        self
    }

    /// Report every utterance through the status files in `io`.
    pub fn with_status_files(mut self, io: Arc<JarvisIO>) -> Self {
        self.status = Some(io);
        self
    }

    /// Build the configured engine, falling back to text output if it is
    /// unavailable on this host.
    pub fn from_config(engine: VoiceEngine, voice_name: Option<&str>) -> Self {
        let backend: Result<Box<dyn SpeechBackend>> = match engine {
            VoiceEngine::Text => Ok(Box::new(TextSink)),
            VoiceEngine::RhVoice => {
                RhVoice::new(voice_name).map(|b| Box::new(b) as Box<dyn SpeechBackend>)
            }
            VoiceEngine::System => system_voice(voice_name),
        };
        match backend {
            Ok(backend) => {
                log::info!("Speech output: {}", backend.name());
                Self::new(backend)
            }
            Err(e) => {
                log::warn!("Speech engine unavailable ({e:#}); continuing with text output only");
                Self::new(Box::new(TextSink))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
    }

    /// Whether an utterance is currently being rendered.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Speak `text` and wait until playback is complete. Blank input is
    /// ignored. Calls from different tasks queue on an internal lock so
    /// utterances never overlap. Failures are logged, never returned.
    pub async fn speak(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(label) = &self.label {
            println!("{label}: {text}");
        }

        let text = text.to_owned();
        let backend = Arc::clone(&self.backend);
        let busy = Arc::clone(&self.busy);
        let status = self.status.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
            let _busy = BusyFlag::raise(&busy);
            // Only the task holding the lock reports what is being said.
            if let Some(io) = &status {
                io.write_status(Status::Speaking);
                io.write_spoken(&text);
            }
            backend.say(&text)
        })
        .await;

        match rendered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Speech output failed: {e:#}"),
            Err(e) => log::error!("Speech task did not complete: {e}"),
        }
    }
}

#[cfg(feature = "voice")]
fn system_voice(voice_name: Option<&str>) -> Result<Box<dyn SpeechBackend>> {
    Ok(Box::new(SystemVoice::new(voice_name)?))
}

#[cfg(not(feature = "voice"))]
fn system_voice(_voice_name: Option<&str>) -> Result<Box<dyn SpeechBackend>> {
    Err(anyhow!("built without the `voice` feature"))
}
