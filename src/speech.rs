//! Speech-recognition capability
//!
//! The recognition engine is a host-provided capability, consumed behind a
//! trait rather than reimplemented. A session obtains an engine through
//! [`SpeechCapability::detect`], which reports `Unavailable` with a reason
//! when the platform cannot recognize speech (no input device, no model).
//!
//! Engines run in continuous mode with interim results enabled and a fixed
//! recognition locale. A result batch carries zero or more transcript
//! segments, each flagged final or partial; engines that cannot produce
//! stable interim fragments (such as the utterance-granular native adapter)
//! emit finals only.

pub mod native;

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default recognition locale
pub const DEFAULT_LOCALE: &str = "ko-KR";

/// A unit of recognized speech
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    /// Final segments will not be revised further; partial segments are
    /// tentative and only signal speech activity
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Lifecycle and result events emitted by a speech engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine has opened its session and is listening
    Started,
    /// A batch of zero or more transcript segments
    Result(Vec<TranscriptSegment>),
    /// Engine-reported failure; the session is over
    Error(String),
    /// Engine-initiated end-of-session (also emitted after a requested stop)
    Ended,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed recognition locale
    pub locale: String,
    /// Transcription model file for the native adapter
    pub model_path: PathBuf,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Amplitude above which a sample counts as speech
    pub voice_threshold: f32,
    /// Quiet gap that closes one utterance in the native adapter
    pub utterance_gap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            model_path: PathBuf::new(),
            sample_rate: 16000,
            voice_threshold: 0.01,
            utterance_gap: Duration::from_millis(700),
        }
    }
}

/// A continuous speech-recognition engine instance
pub trait SpeechEngine: Send {
    /// Open the recognition session
    ///
    /// Events (including `Started`) arrive on the returned channel. Calling
    /// `start` a second time on the same instance is an error.
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<EngineEvent>>;

    /// Request graceful termination; the engine still emits `Ended`
    fn stop(&mut self);
}

/// Outcome of probing the platform for speech recognition
pub enum SpeechCapability {
    Available(Box<dyn SpeechEngine>),
    Unavailable(String),
}

impl SpeechCapability {
    /// Probe the platform and return a ready-to-start engine or a reason why
    /// speech recognition cannot run here
    pub fn detect(config: &EngineConfig) -> Self {
        match native::NativeSpeechEngine::probe(config.clone()) {
            Ok(engine) => SpeechCapability::Available(Box::new(engine)),
            Err(reason) => SpeechCapability::Unavailable(reason),
        }
    }
}
