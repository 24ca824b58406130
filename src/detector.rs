//! Sliding-window silence confirmation.
//!
//! Every sample lands in a window of the last `N` readings. A sample counts as quiet when
//! its peak level sits under the ambient cutoff; once more than `N * threshold` of the
//! window is quiet the detector confirms silence and starts over with an empty window.

use crate::config::AudioSettings;
use crate::sampler::Sample;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Window capacity `N`; also the ratio denominator, even while the window refills.
    pub window: usize,
    pub threshold: f64,
    pub ambient_db: f64,
}

impl From<&AudioSettings> for DetectorConfig {
    fn from(audio: &AudioSettings) -> Self {
        Self {
            window: audio.samples,
            threshold: audio.threshold,
            ambient_db: audio.ambient_db,
        }
    }
}

/// What the detector concluded after one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Normal { quiet_count: usize },
    SilenceConfirmed { last: Sample, quiet_count: usize },
}

/// Notification produced for each confirmed silence episode.
#[derive(Debug, Clone, PartialEq)]
pub struct SilenceEvent {
    pub message: String,
    pub last_max_level: f64,
    pub last_mean_level: f64,
}

impl SilenceEvent {
    pub fn new(message: impl Into<String>, last: Sample) -> Self {
        Self {
            message: message.into(),
            last_max_level: last.max_level,
            last_mean_level: last.mean_level,
        }
    }
}

pub struct SilenceDetector {
    config: DetectorConfig,
    history: VecDeque<Sample>,
}

impl SilenceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let window = config.window.max(1);
        Self {
            config: DetectorConfig { window, ..config },
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Only the peak level decides; the mean is carried along for reporting.
    pub fn is_quiet(&self, sample: &Sample) -> bool {
        sample.max_level < self.config.ambient_db
    }

    pub fn quiet_count(&self) -> usize {
        self.history.iter().filter(|s| self.is_quiet(s)).count()
    }

    /// Window contents, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &Sample> + '_ {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn observe(&mut self, sample: Sample) -> Verdict {
        self.history.push_back(sample);
        if self.history.len() > self.config.window {
            self.history.pop_front();
        }

        let quiet_count = self.quiet_count();
        debug!(
            quiet_count,
            window = self.history.len(),
            max_level = sample.max_level,
            mean_level = sample.mean_level,
            "sample observed"
        );

        if quiet_count as f64 > self.config.window as f64 * self.config.threshold {
            self.reset();
            Verdict::SilenceConfirmed {
                last: sample,
                quiet_count,
            }
        } else {
            Verdict::Normal { quiet_count }
        }
    }
}
