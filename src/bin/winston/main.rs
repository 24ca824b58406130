//! Winston daemon entrypoint.
//!
//! The main thread runs the sampling/detection loop; a second thread owns the controller
//! connection and drains the notification queue. The two only meet at the queue.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use winston::config::{AppConfig, Settings};
use winston::logging::install_panic_hook;
use winston::telemetry::init_tracing;
use winston::{
    notification_queue, notifier_from_settings, spawn_transport_worker, AlertNotifier,
    ControllerTransport, DetectorConfig, FfmpegSampler, Monitor, SilenceDetector, TransportConfig,
    ONLINE_ALERT,
};

/// How long a failing monitor waits for queued events to reach the controller.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let config = AppConfig::parse();
    init_tracing(&config)?;
    install_panic_hook();
    info!("Starting Winston...");

    let settings = config.load_settings().with_context(|| {
        format!(
            "failed to load settings from {}",
            config.default_config.display()
        )
    })?;

    if config.check {
        println!("{}", serde_json::to_string_pretty(&settings_summary(&settings))?);
        return Ok(());
    }

    let sampler = FfmpegSampler::from_settings(&settings)?;
    let notifier = notifier_from_settings(&settings.notifications)
        .context("failed to build alert client")?;
    notifier.notify(ONLINE_ALERT);

    let (queue_tx, queue_rx) = notification_queue();
    let stop = Arc::new(AtomicBool::new(false));
    let transport = ControllerTransport::new(TransportConfig::from(&settings.zetta));
    let transport_handle = spawn_transport_worker(transport, queue_rx, Arc::clone(&stop))
        .context("failed to spawn transport thread")?;

    info!(
        stream = %settings.general.stream_url,
        controller = %format!("{}:{}", settings.zetta.host, settings.zetta.port),
        mode = settings.zetta.mode.label(),
        window = settings.audio.samples,
        threshold = settings.audio.threshold,
        ambient_db = settings.audio.ambient_db,
        "Monitoring stream"
    );

    let mut monitor = Monitor::new(
        sampler,
        SilenceDetector::new(DetectorConfig::from(&settings.audio)),
        queue_tx,
        notifier,
        settings.zetta.silence_message.clone(),
    );
    let outcome = monitor.run(&stop);

    let pending = monitor.pending_events();
    if pending > 0 {
        warn!(pending, "sampling stopped with silence notifications still queued; draining");
    }
    // Closing the queue lets the transport exit once it has delivered what is left.
    drop(monitor);
    let deadline = Instant::now() + SHUTDOWN_DRAIN;
    while !transport_handle.is_finished() && Instant::now() < deadline {
        thread::sleep(DRAIN_POLL_INTERVAL);
    }
    if !transport_handle.is_finished() {
        warn!("transport did not drain within {SHUTDOWN_DRAIN:?}; stopping it");
    }
    stop.store(true, Ordering::Relaxed);
    if transport_handle.join().is_err() {
        error!("transport thread panicked");
    }

    outcome.context("sampling loop stopped")
}

fn settings_summary(settings: &Settings) -> serde_json::Value {
    json!({
        "general": {
            "stream_url": settings.general.stream_url,
        },
        "zetta": {
            "host": settings.zetta.host,
            "port": settings.zetta.port,
            "silence_message": settings.zetta.silence_message,
            "mode": settings.zetta.mode.label(),
            "reconnect_delay_ms": settings.zetta.reconnect_delay_ms,
            "write_timeout_ms": settings.zetta.write_timeout_ms,
        },
        "audio": {
            "ffmpeg_cmd": settings.audio.ffmpeg_cmd,
            "input_args": settings.audio.input_args,
            "ambient_db": settings.audio.ambient_db,
            "samples": settings.audio.samples,
            "sample_dur": settings.audio.sample_dur,
            "timeout": settings.audio.timeout,
            "threshold": settings.audio.threshold,
        },
        "notifications": {
            "discord": settings.notifications.discord.as_ref().map(|_| "<redacted>"),
            "timeout_ms": settings.notifications.timeout_ms,
        },
    })
}
