use super::{LevelSource, Sample, SamplerError, VolumeReport};
use crate::config::{ConfigError, Settings};
use crate::lock_or_recover;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::Read;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Discard sink handed to the analyzer's null muxer.
#[cfg(unix)]
pub const NULL_SINK: &str = "/dev/null";
#[cfg(not(unix))]
pub const NULL_SINK: &str = "NUL";

/// Poll cadence while waiting for the analyzer to exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for the stderr reader once the analyzer is gone. A grandchild that
/// inherited the pipe can keep it open; we take whatever arrived by then.
const READER_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK_BYTES: usize = 4096;

/// Program plus argv for one analyzer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerCommand {
    program: String,
    args: Vec<String>,
}

impl AnalyzerCommand {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `ffmpeg [input_args] -t <secs> -i <url> -af volumedetect -f null <sink>`
    pub fn volumedetect(
        ffmpeg_cmd: &str,
        input_args: &[String],
        stream_url: &str,
        duration: Duration,
    ) -> Self {
        let mut args = input_args.to_vec();
        args.extend([
            "-t".to_string(),
            duration.as_secs_f64().to_string(),
            "-i".to_string(),
            stream_url.to_string(),
            "-af".to_string(),
            "volumedetect".to_string(),
            "-f".to_string(),
            "null".to_string(),
            NULL_SINK.to_string(),
        ]);
        Self::new(ffmpeg_cmd, args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// What one analyzer run left behind.
#[derive(Debug)]
struct AnalyzerRun {
    diagnostics: String,
    timed_out: bool,
}

/// [`LevelSource`] backed by one external analyzer process per cycle.
#[derive(Debug, Clone)]
pub struct FfmpegSampler {
    command: AnalyzerCommand,
    timeout: Duration,
}

impl FfmpegSampler {
    pub fn new(command: AnalyzerCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let audio = &settings.audio;
        let command = AnalyzerCommand::volumedetect(
            &audio.ffmpeg_cmd,
            &audio.input_argv()?,
            &settings.general.stream_url,
            audio.sample_duration(),
        );
        Ok(Self::new(command, audio.analyzer_timeout()))
    }

    pub fn command(&self) -> &AnalyzerCommand {
        &self.command
    }

    fn run_once(&self) -> Result<AnalyzerRun, SamplerError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SamplerError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let Some(stderr) = child.stderr.take() else {
            reap(&mut child);
            return Err(SamplerError::Capture);
        };
        let collector = StderrCollector::spawn(stderr);

        let deadline = Instant::now() + self.timeout;
        let timed_out = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    trace!(%status, "analyzer exited");
                    break false;
                }
                Ok(None) if Instant::now() >= deadline => {
                    reap(&mut child);
                    break true;
                }
                Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                Err(err) => {
                    reap(&mut child);
                    return Err(SamplerError::Wait(err));
                }
            }
        };

        Ok(AnalyzerRun {
            diagnostics: collector.finish(READER_GRACE),
            timed_out,
        })
    }
}

impl LevelSource for FfmpegSampler {
    fn sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        let run = self.run_once()?;
        if run.timed_out {
            debug!(
                timeout_ms = self.timeout.as_millis() as u64,
                "analyzer overran its timeout and was killed"
            );
        }
        let report = VolumeReport::parse(&run.diagnostics);
        match report.to_sample() {
            Some(sample) => Ok(Some(sample)),
            None => {
                debug!(partial = ?report, "no loudness reading this cycle");
                Ok(None)
            }
        }
    }
}

/// Kill and wait so no zombie survives the cycle.
fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        // Already exited between the poll and the kill.
        trace!("analyzer kill failed: {err}");
    }
    if let Err(err) = child.wait() {
        warn!("failed to reap analyzer: {err}");
    }
}

/// Drains the analyzer's stderr on a helper thread so a chatty process cannot block on a
/// full pipe while we wait for it.
struct StderrCollector {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: crossbeam_channel::Receiver<()>,
}

impl StderrCollector {
    fn spawn(mut stderr: ChildStderr) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = bounded(1);
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK_BYTES];
            loop {
                match stderr.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        lock_or_recover(&sink, "analyzer stderr").extend_from_slice(&chunk[..n]);
                    }
                }
            }
            let _ = done_tx.send(());
        });
        Self { buffer, done }
    }

    fn finish(self, grace: Duration) -> String {
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                debug!("analyzer stderr still open after exit; using partial output");
            }
        }
        let bytes = std::mem::take(&mut *lock_or_recover(&self.buffer, "analyzer stderr"));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
