//! Audio level sampling
//!
//! Computes a normalized loudness scalar for the live-level indicator while a
//! recognition session is active. Analysis is frequency-domain: mean FFT bin
//! magnitude over a fixed reference, clamped to [0, 1].

mod level;

pub use level::{LEVEL_REFERENCE, LEVEL_WINDOW, LevelAnalyzer, LevelSampler};
