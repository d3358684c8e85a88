//! Delivery paths to the collector: the batched HTTP sender with retry and
//! spill, and the one-shot unload-time beacon.

pub mod beacon;
pub mod http;

pub use beacon::BeaconSender;
pub use http::{HttpSender, HttpSenderConfig, SendError};
