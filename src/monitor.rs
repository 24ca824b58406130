//! The sampling/detection loop.
//!
//! Runs one analyzer cycle after another with no pause in between, feeds each reading to
//! the detector, and on confirmation hands the event to the notification queue and the
//! alert channel. Only an analyzer that cannot be started ends the loop.

use crate::alert::{silence_alert_text, AlertNotifier};
use crate::detector::{SilenceDetector, SilenceEvent, Verdict};
use crate::dispatcher::EventSender;
use crate::sampler::{LevelSource, SamplerError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// Result of one sampling cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No usable reading; the window was left untouched.
    Skipped,
    Observed { quiet_count: usize },
    SilenceConfirmed(SilenceEvent),
}

pub struct Monitor<S, N> {
    source: S,
    detector: SilenceDetector,
    queue: EventSender,
    notifier: N,
    silence_message: String,
}

impl<S: LevelSource, N: AlertNotifier> Monitor<S, N> {
    pub fn new(
        source: S,
        detector: SilenceDetector,
        queue: EventSender,
        notifier: N,
        silence_message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            detector,
            queue,
            notifier,
            silence_message: silence_message.into(),
        }
    }

    pub fn detector(&self) -> &SilenceDetector {
        &self.detector
    }

    /// Silence events queued but not yet picked up by the transport.
    pub fn pending_events(&self) -> usize {
        self.queue.pending()
    }

    pub fn run_cycle(&mut self) -> Result<CycleOutcome, SamplerError> {
        let sample = match self.source.sample() {
            Ok(Some(sample)) => sample,
            Ok(None) => return Ok(CycleOutcome::Skipped),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("sampling cycle failed: {err}");
                return Ok(CycleOutcome::Skipped);
            }
        };

        match self.detector.observe(sample) {
            Verdict::Normal { quiet_count } => Ok(CycleOutcome::Observed { quiet_count }),
            Verdict::SilenceConfirmed { last, quiet_count } => {
                warn!(quiet_count, "SILENCE DETECTED! Instructing Zetta to switch to Auto!");
                let event = SilenceEvent::new(self.silence_message.clone(), last);
                if let Err(err) = self.queue.enqueue(event.clone()) {
                    error!("{err}");
                }
                self.notifier.notify(&silence_alert_text(&event));
                Ok(CycleOutcome::SilenceConfirmed(event))
            }
        }
    }

    /// Cycle until `stop` is set or the analyzer cannot be started.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), SamplerError> {
        while !stop.load(Ordering::Relaxed) {
            self.run_cycle()?;
        }
        Ok(())
    }
}
