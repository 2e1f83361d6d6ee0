//! Microphone level metering
//!
//! [`LevelAnalyzer`] turns fixed-size sample windows into one loudness scalar
//! each; [`LevelSampler`] owns the acquisition lifecycle around it. The cpal
//! stream is not `Send`, so an activated sampler runs stream and analysis on
//! a dedicated thread and publishes the latest scalar through an atomic cell.
//! A deactivated (or failed) sampler always reads exactly 0.

use crate::notice::NoticeSender;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rustfft::{FftPlanner, num_complex::Complex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Analysis window size in samples
pub const LEVEL_WINDOW: usize = 256;

/// Reference mean magnitude that maps to full scale
pub const LEVEL_REFERENCE: f32 = 2.0;

/// How often the sampling thread drains pending audio
const SAMPLE_TICK: Duration = Duration::from_millis(16);

/// FFT magnitude analyzer producing one normalized level per full window
pub struct LevelAnalyzer {
    window: Vec<f32>,
    buffer: Vec<f32>,
    planner: FftPlanner<f32>,
}

impl Default for LevelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelAnalyzer {
    pub fn new() -> Self {
        // Hann window to reduce spectral leakage
        let mut window = vec![0.0; LEVEL_WINDOW];
        for (i, w) in window.iter_mut().enumerate() {
            *w = 0.5
                * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / LEVEL_WINDOW as f32).cos());
        }

        Self {
            window,
            buffer: Vec::with_capacity(LEVEL_WINDOW),
            planner: FftPlanner::new(),
        }
    }

    /// Push one sample; returns `Some(level)` when a window completes
    pub fn push_sample(&mut self, sample: f32) -> Option<f32> {
        self.buffer.push(sample);

        if self.buffer.len() >= LEVEL_WINDOW {
            let level = self.compute_level();
            self.buffer.clear();
            Some(level)
        } else {
            None
        }
    }

    /// Mean magnitude of the positive-frequency bins, normalized and clamped
    fn compute_level(&mut self) -> f32 {
        let mut spectrum: Vec<Complex<f32>> = self
            .buffer
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(LEVEL_WINDOW);
        fft.process(&mut spectrum);

        let bins = LEVEL_WINDOW / 2;
        let mean_magnitude =
            spectrum[..bins].iter().map(|c| c.norm()).sum::<f32>() / bins as f32;

        (mean_magnitude / LEVEL_REFERENCE).clamp(0.0, 1.0)
    }
}

struct ActiveSampler {
    stop_flag: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

/// Owns the microphone level lifecycle
///
/// `activate` acquires the default input device and spawns the sampling
/// thread; `deactivate` stops the thread, releases the stream, and resets the
/// level to 0. Repeated activate/deactivate cycles leak nothing.
pub struct LevelSampler {
    level_bits: Arc<AtomicU32>,
    active: Mutex<Option<ActiveSampler>>,
    notices: NoticeSender,
}

impl LevelSampler {
    pub fn new(notices: NoticeSender) -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            active: Mutex::new(None),
            notices,
        }
    }

    /// Most recent normalized level; exactly 0 while inactive
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Acquire))
    }

    /// Begin sampling the default microphone
    ///
    /// Acquisition failure is reported and leaves the level at 0; it does not
    /// fail the caller.
    pub fn activate(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return;
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let level_bits = Arc::clone(&self.level_bits);
        let notices = self.notices.clone();
        let thread_stop = Arc::clone(&stop_flag);

        let handle = std::thread::Builder::new()
            .name("voicehook-level".to_string())
            .spawn(move || run_sampler(thread_stop, level_bits, notices));

        match handle {
            Ok(handle) => *active = Some(ActiveSampler { stop_flag, handle }),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to spawn level sampler thread");
                self.notices.error("Could not access the microphone");
            }
        }
    }

    /// Stop sampling and release the input stream
    pub fn deactivate(&self) {
        let taken = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.take()
        };

        if let Some(sampler) = taken {
            sampler.stop_flag.store(true, Ordering::Release);
            let _ = sampler.handle.join();
        }

        self.level_bits
            .store(0.0f32.to_bits(), Ordering::Release);
    }
}

impl Drop for LevelSampler {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Sampling thread body: owns the stream, drains samples, publishes levels
fn run_sampler(stop_flag: Arc<AtomicBool>, level_bits: Arc<AtomicU32>, notices: NoticeSender) {
    let device = match cpal::default_host().default_input_device() {
        Some(device) => device,
        None => {
            tracing::warn!("No audio input device for level metering");
            notices.error("Could not access the microphone");
            return;
        }
    };

    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read input configuration");
            notices.error("Could not access the microphone");
            return;
        }
    };
    let channels = config.channels() as usize;

    let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(32);

    let stream = {
        let result = device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect();
                let _ = tx.try_send(mono);
            },
            |err| {
                tracing::warn!(error = %err, "Level meter stream error");
            },
            None,
        );
        match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open input stream for level metering");
                notices.error("Could not access the microphone");
                return;
            }
        }
    };

    if let Err(e) = stream.play() {
        tracing::warn!(error = %e, "Failed to start level meter stream");
        notices.error("Could not access the microphone");
        return;
    }

    let mut analyzer = LevelAnalyzer::new();
    while !stop_flag.load(Ordering::Acquire) {
        while let Ok(samples) = rx.try_recv() {
            for sample in samples {
                if let Some(level) = analyzer.push_sample(sample) {
                    level_bits.store(level.to_bits(), Ordering::Release);
                }
            }
        }
        std::thread::sleep(SAMPLE_TICK);
    }

    drop(stream);
}
