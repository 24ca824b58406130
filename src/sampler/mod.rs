//! Loudness sampling.
//!
//! One cycle runs the external analyzer over a short slice of the stream and turns its
//! diagnostic text into a [`Sample`]. Everything that can go wrong inside a cycle
//! (timeouts, garbled output, a dead stream) becomes "no sample"; only failing to
//! start the analyzer at all is reported as fatal.

mod ffmpeg;
mod parse;

pub use ffmpeg::{AnalyzerCommand, FfmpegSampler, NULL_SINK};
pub use parse::{VolumeReport, MAX_VOLUME_KEY, MEAN_VOLUME_KEY};

use std::io;
use thiserror::Error;

/// Peak and mean loudness of one analyzed slice, in dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub max_level: f64,
    pub mean_level: f64,
}

impl Sample {
    pub fn new(max_level: f64, mean_level: f64) -> Self {
        Self {
            max_level,
            mean_level,
        }
    }
}

/// Anything that can produce one loudness sample per call.
///
/// `Ok(None)` means the cycle produced nothing usable and should simply be skipped.
pub trait LevelSource {
    fn sample(&mut self) -> Result<Option<Sample>, SamplerError>;
}

impl<S: LevelSource + ?Sized> LevelSource for Box<S> {
    fn sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        (**self).sample()
    }
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("failed to start analyzer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture analyzer diagnostics")]
    Capture,
    #[error("failed to wait for analyzer: {0}")]
    Wait(#[source] io::Error),
}

impl SamplerError {
    /// A spawn failure repeats every cycle, so the sampling loop cannot recover from it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SamplerError::Spawn { .. })
    }
}
