//! Capture components: transformers from raw page signals into pending
//! event payloads.
//!
//! Each component owns its hooks (installed save-and-chain, removed on
//! uninstall), keeps a bounded local buffer, and is drained by the
//! orchestrator at collection time.

pub mod behavior;
pub mod error;
pub mod performance;

pub use behavior::{BehaviorCapture, BehaviorCaptureConfig};
pub use error::ErrorCapture;
pub use performance::PerformanceCapture;
