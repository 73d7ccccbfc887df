//! # tsproto-handshake
//!
//! Server side of a voice-chat UDP handshake.
//!
//! A client first clears an unencrypted five-stage init exchange that ends in a
//! modular-exponentiation puzzle, then a command exchange in which the server proves its
//! identity with a signed license, both sides agree on a shared secret over Curve25519
//! and every later packet is sealed with its own AES-128-EAX key.
//!
//! ## Layout
//! - [`core`]: byte-exact packet codecs
//! - [`crypto`]: puzzle, omega keys, license chain, key schedule, AEAD
//! - [`protocol`]: server identity, typed commands, per-peer state machine
//! - [`transport`]: tokio UDP loop and session table
//! - [`config`], [`error`], [`utils`]: configuration, error taxonomy, logging and metrics
//!
//! ## Example
//! ```no_run
//! use tsproto_handshake::config::NetworkConfig;
//! use tsproto_handshake::transport::udp;
//! use tsproto_handshake::utils::logging;
//!
//! # async fn run() -> tsproto_handshake::error::Result<()> {
//! let config = NetworkConfig::from_env()?;
//! logging::init_logging(&config.logging)?;
//! udp::start_server(&config).await
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;
