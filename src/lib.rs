// lookout: Client-side page telemetry SDK.
//
// Captures errors, performance measurements, user interactions, and
// optional DOM replay traces from a hookable page surface, then ships them
// to a remote collector with bounded memory, batched retrying HTTP
// delivery, a persistent spill store, and an unload-time beacon.
//
// The embedding adapts its environment onto `host::Page`; everything else
// hangs off `Monitor`.

pub mod bus;
pub mod capture;
pub mod config;
pub mod envelope;
pub mod flush;
pub mod host;
pub mod monitor;
pub mod queue;
pub mod redact;
pub mod replay;
pub mod sampler;
pub mod session;
pub mod store;
pub mod transport;

pub use bus::{EventBus, Plugin};
pub use config::{ConfigError, Features, MonitorConfig, PrivacyConfig, ReportingConfig};
pub use host::{Page, PageConfig};
pub use monitor::{Monitor, MonitorError, MonitorStatus};
pub use replay::RecorderState;
pub use sampler::SamplingRates;

/// Reported in the `X-SDK-Version` header and every batch body.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
