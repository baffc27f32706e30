//! Offline speech recognition with [`vosk`], fed by a [`cpal`] microphone.
//!
//! [`VoiceListener`] records one phrase per call: capture starts immediately,
//! stops after [`SILENCE_TIMEOUT`] of quiet once speech has been heard, and
//! never runs longer than the phrase limit. The samples are down-mixed to
//! mono `i16` and handed to Vosk for a final transcript.
//!
//! `MIC_INDEX` picks an input device by position, `MIC_NAME_KEYWORD` by a
//! case-insensitive substring of its name; otherwise the default input
//! device is used.

use std::env;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use vosk::{Model, Recognizer};

use crate::listener::{clean, Listener};

const SILENCE_THRESHOLD: i16 = 500;
const SILENCE_TIMEOUT: Duration = Duration::from_millis(800);
const MIN_CAPTURE: Duration = Duration::from_millis(1000);

/// Whole-transcript false positives Vosk produces on a quiet microphone.
const NOISE_WORDS: &[&str] = &["the", "uh", "um", "a", "huh"];

fn choose_device(host: &cpal::Host) -> Result<cpal::Device> {
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .context("failed to enumerate input audio devices")?
        .collect();

    let by_index = env::var("MIC_INDEX")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(|idx| devices.get(idx).cloned());
    let by_name = || {
        let keyword = env::var("MIC_NAME_KEYWORD").ok()?.to_lowercase();
        devices
            .iter()
            .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&keyword)))
            .cloned()
    };

    by_index
        .or_else(by_name)
        .or_else(|| host.default_input_device())
        .ok_or_else(|| anyhow!("no input audio device found"))
}

/// Build an input stream that forwards the first channel of every frame,
/// converted to `i16`, over `tx`.
fn mono_stream<T: SizedSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::Sender<Vec<i16>>,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream> {
    let channels = usize::from(config.channels.max(1));
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data.chunks(channels).map(|frame| convert(frame[0])).collect();
                // The receiver is gone once capture has finished.
                let _ = tx.send(mono);
            },
            |err| log::error!("Input audio stream error: {err}"),
            None,
        )
        .context("failed to build input stream")
}

pub struct SpeechRecognizer {
    model: Model,
    device: cpal::Device,
}

impl SpeechRecognizer {
    pub fn new(model_path: &str) -> Result<Self> {
        let model = Model::new(model_path)
            .ok_or_else(|| anyhow!("failed to load Vosk model from '{model_path}'"))?;
        let device = choose_device(&cpal::default_host())?;
        if let Ok(name) = device.name() {
            log::info!("Using microphone: {name}");
        }
        Ok(Self { model, device })
    }

    /// Record up to `limit` and return the transcript (empty when nothing
    /// was recognised).
    pub fn listen_for_phrase(&self, limit: Duration) -> Result<String> {
        let supported = self
            .device
            .default_input_config()
            .context("failed to get default input configuration")?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let stream = match format {
            SampleFormat::I16 => mono_stream::<i16>(&self.device, &config, tx, |s| s)?,
            SampleFormat::U16 => {
                mono_stream::<u16>(&self.device, &config, tx, |s| (i32::from(s) - 32768) as i16)?
            }
            SampleFormat::F32 => mono_stream::<f32>(&self.device, &config, tx, |s| {
                (s * 32768.0).clamp(-32768.0, 32767.0) as i16
            })?,
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };
        stream.play().context("failed to start audio input stream")?;
        let samples = capture(&rx, limit);
        drop(stream);

        if samples.is_empty() {
            return Ok(String::new());
        }
        let mut recognizer = Recognizer::new(&self.model, config.sample_rate.0 as f32)
            .ok_or_else(|| anyhow!("failed to create Vosk recognizer"))?;
        recognizer.set_words(false);
        recognizer.set_max_alternatives(0);
        recognizer
            .accept_waveform(&samples)
            .map_err(|e| anyhow!("Vosk rejected the recording: {e:?}"))?;
        Ok(recognizer
            .final_result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default())
    }
}

/// Pull sample blocks until the limit expires or speech is followed by
/// enough silence.
fn capture(rx: &mpsc::Receiver<Vec<i16>>, limit: Duration) -> Vec<i16> {
    let start = Instant::now();
    let mut samples = Vec::new();
    let mut heard_speech = false;
    let mut last_speech = start;

    while let Some(remaining) = limit.checked_sub(start.elapsed()) {
        let Ok(block) = rx.recv_timeout(remaining) else {
            break;
        };
        if block.iter().any(|s| s.unsigned_abs() > SILENCE_THRESHOLD as u16) {
            heard_speech = true;
            last_speech = Instant::now();
        }
        samples.extend_from_slice(&block);
        if heard_speech && start.elapsed() > MIN_CAPTURE && last_speech.elapsed() > SILENCE_TIMEOUT {
            break;
        }
    }
    samples
}

/// Drop transcripts that consist only of filler words.
fn strip_noise(transcript: &str) -> Option<String> {
    let meaningful = transcript
        .split_whitespace()
        .any(|word| !NOISE_WORDS.contains(&word.to_lowercase().as_str()));
    if meaningful {
        clean(transcript)
    } else {
        None
    }
}

/// Microphone input for the assistant.
pub struct VoiceListener {
    recognizer: SpeechRecognizer,
    phrase_limit: Duration,
}

impl VoiceListener {
    pub fn new(model_path: &str, phrase_limit: Duration) -> Result<Self> {
        Ok(Self {
            recognizer: SpeechRecognizer::new(model_path)?,
            phrase_limit,
        })
    }
}

#[async_trait]
impl Listener for VoiceListener {
    async fn listen(&mut self) -> Option<String> {
        println!("Listening...");
        let heard = tokio::task::block_in_place(|| {
            self.recognizer.listen_for_phrase(self.phrase_limit)
        });
        match heard {
            Ok(transcript) => {
                log::debug!("Recognised transcript: {transcript:?}");
                strip_noise(&transcript).map(|t| t.to_lowercase())
            }
            Err(e) => {
                log::warn!("Speech recognition error: {e:#}");
                None
            }
        }
    }
}
