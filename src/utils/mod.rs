//! # Utility Modules
//!
//! Supporting utilities shared by the protocol and transport layers.
//!
//! ## Components
//! - **Logging**: tracing-subscriber setup from `LoggingConfig`
//! - **Metrics**: Thread-safe handshake counters
//! - **Time**: Protocol epoch conversions

pub mod logging;
pub mod metrics;
pub mod time;
