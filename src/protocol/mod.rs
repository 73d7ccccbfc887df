//! # Handshake Protocol
//!
//! Server side of the two-phase handshake.
//!
//! ## Components
//! - **Identity**: long-term signing key, license and derived server EK
//! - **Commands**: typed views of `clientinitiv`, `initivexpand2`, `clientek`, `clientinit`
//! - **Handshake**: per-peer state machine driven one datagram at a time
//!
//! ## Flow
//! ```text
//! Client                                   Server
//!   |--- Init0 ------------------------------>|
//!   |<-- Init1 (random1, random0 reversed) ---|
//!   |--- Init2 (echo random1) --------------->|
//!   |<-- Init3 (puzzle x, n, level) ----------|
//!   |--- Init4 (y + clientinitiv) ----------->|
//!   |<-- initivexpand2 (license, beta) -------|  bootstrap key
//!   |--- clientek (ek, proof) --------------->|  bootstrap key
//!   |<-- Ack ---------------------------------|  bootstrap key
//!   |--- clientinit ------------------------->|  per-packet key
//! ```

pub mod commands;
pub mod handshake;
pub mod identity;
