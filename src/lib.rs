//! Jarvis: a personal voice and text assistant that answers with a local
//! language model, speaking each sentence as soon as it has streamed in.

pub mod agent;
pub mod assistant;
pub mod chunker;
pub mod config;
pub mod history;
pub mod jarvis_io;
pub mod launcher;
pub mod listener;
pub mod router;
pub mod services;
#[cfg(feature = "voice")]
pub mod speech;
pub mod stream;
pub mod tts_engine;
pub mod worker;
