//! Operator-channel alerts (Discord-style webhook).
//!
//! Alerts are fire-and-forget: every failure is logged and swallowed so the detection
//! loop never stalls or errors because the operator channel is down.

use crate::config::NotificationSettings;
use crate::detector::SilenceEvent;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ONLINE_ALERT: &str = ":green_circle: Winston is now online, listening into stream.";

pub trait AlertNotifier: Send {
    fn notify(&self, text: &str);
}

impl<N: AlertNotifier + ?Sized> AlertNotifier for Box<N> {
    fn notify(&self, text: &str) {
        (**self).notify(text)
    }
}

/// Human-readable announcement for a confirmed silence episode.
pub fn silence_alert_text(event: &SilenceEvent) -> String {
    format!(
        ":warning: SILENCE DETECTED! Instructing Zetta to switch to Auto! Last detected max \
         volume was {:?} dB, mean volume was {:?} dB.",
        event.last_max_level, event.last_mean_level
    )
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    content: &'a str,
}

/// POSTs `{"content": text}` to a webhook with a bounded request time.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AlertNotifier for WebhookNotifier {
    fn notify(&self, text: &str) {
        let result = self
            .client
            .post(&self.url)
            .json(&AlertPayload { content: text })
            .send()
            .and_then(|response| response.error_for_status());
        match result {
            Ok(response) => debug!(status = %response.status(), "alert delivered"),
            Err(err) => warn!("failed to post alert: {err}"),
        }
    }
}

/// Used when no webhook is configured; the alert only reaches the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify(&self, text: &str) {
        info!(alert = text, "alert channel not configured");
    }
}

pub fn notifier_from_settings(
    settings: &NotificationSettings,
) -> reqwest::Result<Box<dyn AlertNotifier>> {
    match &settings.discord {
        Some(url) => Ok(Box::new(WebhookNotifier::new(url.clone(), settings.timeout())?)),
        None => Ok(Box::new(LogNotifier)),
    }
}
