//! Native speech engine
//!
//! Adapts microphone capture plus a Whisper transcription engine into the
//! [`SpeechEngine`](super::SpeechEngine) contract. A dedicated capture thread
//! owns the cpal input stream (cpal streams are not `Send`); an amplitude
//! threshold tracks speech activity, and a quiet gap closes each utterance,
//! which is written to a WAV file and transcribed as one finalized segment.
//!
//! The adapter emits finals only; utterance-granular transcription has no
//! stable interim fragments to report.

use super::{EngineConfig, EngineEvent, SpeechEngine, TranscriptSegment};
use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use transcribe_rs::{TranscriptionEngine as TranscribeTrait, engines::whisper::WhisperEngine};

/// How long capture waits for samples before re-checking flags
const RECV_TICK: Duration = Duration::from_millis(50);

/// Leading silence kept ahead of an utterance, in seconds
const LEAD_IN_SECS: f32 = 0.5;

pub struct NativeSpeechEngine {
    config: EngineConfig,
    stop_flag: Arc<AtomicBool>,
    capture_handle: Option<std::thread::JoinHandle<()>>,
    started: bool,
}

impl NativeSpeechEngine {
    /// Probe the platform; `Err` carries a human-readable reason
    pub fn probe(config: EngineConfig) -> std::result::Result<Self, String> {
        if config.model_path.as_os_str().is_empty() {
            return Err("no transcription model configured".to_string());
        }
        if !config.model_path.exists() {
            return Err(format!(
                "transcription model not found: {}",
                config.model_path.display()
            ));
        }
        if cpal::default_host().default_input_device().is_none() {
            return Err("no audio input device available".to_string());
        }

        Ok(Self {
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
            started: false,
        })
    }

    fn input_config(device: &Device, target_sample_rate: u32) -> Result<StreamConfig> {
        let supported_configs = device.supported_input_configs()?;

        // Pick the supported range closest to the target rate
        let mut best_config = None;
        let mut best_diff = u32::MAX;
        for config in supported_configs {
            let diff = config.max_sample_rate().0.abs_diff(target_sample_rate);
            if diff < best_diff {
                best_diff = diff;
                best_config = Some(config);
            }
        }

        let config = best_config.ok_or_else(|| anyhow!("No suitable audio configuration found"))?;
        let config = config.with_sample_rate(cpal::SampleRate(target_sample_rate));
        Ok(config.into())
    }
}

impl SpeechEngine for NativeSpeechEngine {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<EngineEvent>> {
        if self.started {
            return Err(anyhow!("Engine already started"));
        }
        self.started = true;

        let (events, rx) = mpsc::unbounded_channel();
        let config = self.config.clone();
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = std::thread::Builder::new()
            .name("voicehook-capture".to_string())
            .spawn(move || run_capture(config, stop_flag, events))?;
        self.capture_handle = Some(handle);

        Ok(rx)
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

impl Drop for NativeSpeechEngine {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Capture thread body: owns the stream and the transcription engine
fn run_capture(
    config: EngineConfig,
    stop_flag: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let fail = |events: &mpsc::UnboundedSender<EngineEvent>, message: String| {
        tracing::error!(error = %message, "Speech capture failed");
        let _ = events.send(EngineEvent::Error(message));
        let _ = events.send(EngineEvent::Ended);
    };

    let mut engine = WhisperEngine::new();
    if let Err(e) = engine.load_model(&config.model_path) {
        return fail(&events, format!("failed to load model: {}", e));
    }

    let device = match cpal::default_host().default_input_device() {
        Some(device) => device,
        None => return fail(&events, "no audio input device available".to_string()),
    };

    let stream_config = match NativeSpeechEngine::input_config(&device, config.sample_rate) {
        Ok(stream_config) => stream_config,
        Err(e) => return fail(&events, format!("no usable input configuration: {}", e)),
    };
    let channels = stream_config.channels as usize;

    // Audio callbacks hand mono samples to this thread over a bounded channel
    let (tx, samples_rx) = crossbeam_channel::bounded::<Vec<f32>>(32);
    let stream_failed = Arc::new(AtomicBool::new(false));

    let stream = {
        let stream_failed = Arc::clone(&stream_failed);
        let result = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect();
                let _ = tx.try_send(mono);
            },
            move |err| {
                tracing::error!(error = %err, "Input stream error");
                stream_failed.store(true, Ordering::Release);
            },
            None,
        );
        match result {
            Ok(stream) => stream,
            Err(e) => return fail(&events, format!("failed to open input stream: {}", e)),
        }
    };

    if let Err(e) = stream.play() {
        return fail(&events, format!("failed to start input stream: {}", e));
    }

    tracing::info!(locale = %config.locale, "Speech capture started");
    let _ = events.send(EngineEvent::Started);

    let lead_in = (config.sample_rate as f32 * LEAD_IN_SECS) as usize;
    let mut buffer: Vec<f32> = Vec::new();
    let mut voiced = false;
    let mut last_voice = Instant::now();

    loop {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
        if stream_failed.load(Ordering::Acquire) {
            let _ = events.send(EngineEvent::Error("audio stream failed".to_string()));
            break;
        }

        match samples_rx.recv_timeout(RECV_TICK) {
            Ok(samples) => {
                let has_voice = samples.iter().any(|s| s.abs() >= config.voice_threshold);
                buffer.extend_from_slice(&samples);
                if has_voice {
                    voiced = true;
                    last_voice = Instant::now();
                } else if !voiced && buffer.len() > lead_in {
                    // Keep only a short lead-in while nobody is speaking
                    let excess = buffer.len() - lead_in;
                    buffer.drain(..excess);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if voiced && last_voice.elapsed() >= config.utterance_gap {
            transcribe_utterance(&mut engine, &buffer, config.sample_rate, &events);
            buffer.clear();
            voiced = false;
        }
    }

    // Finish a trailing utterance so a requested stop does not lose speech
    if voiced && !buffer.is_empty() {
        transcribe_utterance(&mut engine, &buffer, config.sample_rate, &events);
    }

    drop(stream);
    engine.unload_model();
    let _ = events.send(EngineEvent::Ended);
    tracing::info!("Speech capture ended");
}

/// Write one utterance to a WAV file and run it through the engine
fn transcribe_utterance(
    engine: &mut WhisperEngine,
    samples: &[f32],
    sample_rate: u32,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    let wav_path =
        std::env::temp_dir().join(format!("voicehook-utterance-{}.wav", uuid::Uuid::new_v4()));

    if let Err(e) = write_wav(&wav_path, samples, sample_rate) {
        let _ = events.send(EngineEvent::Error(format!(
            "failed to write utterance audio: {}",
            e
        )));
        return;
    }

    let result = engine.transcribe_file(&wav_path, None);
    std::fs::remove_file(&wav_path).ok();

    match result {
        Ok(result) => {
            let text = result.text.trim().to_string();
            if !text.is_empty() {
                let _ = events.send(EngineEvent::Result(vec![TranscriptSegment::final_text(
                    text,
                )]));
            }
        }
        Err(e) => {
            let _ = events.send(EngineEvent::Error(format!("transcription failed: {}", e)));
        }
    }
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
