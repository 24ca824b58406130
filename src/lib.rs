pub mod alert;
pub mod config;
pub mod detector;
pub mod dispatcher;
mod lock;
pub mod logging;
pub mod monitor;
pub mod sampler;
pub mod telemetry;
pub mod transport;

pub(crate) use lock::lock_or_recover;
pub use alert::{notifier_from_settings, AlertNotifier, ONLINE_ALERT};
pub use config::{AppConfig, ConfigError, Settings};
pub use detector::{DetectorConfig, SilenceDetector, SilenceEvent, Verdict};
pub use dispatcher::{notification_queue, EventReceiver, EventSender};
pub use monitor::{CycleOutcome, Monitor};
pub use sampler::{FfmpegSampler, LevelSource, Sample, SamplerError};
pub use transport::{spawn_transport_worker, ControllerTransport, TransportConfig};
