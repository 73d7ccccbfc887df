//! # Cryptographic Engines
//!
//! The four engines the handshake state machine composes:
//!
//! - **Puzzle**: modular-exponentiation proof-of-work issued in Init3
//! - **Omega**: ASN.1-flavoured encoding of the P-256 keys exchanged in commands
//! - **License**: block chain whose iterated Edwards-curve derivation yields the server EK
//! - **Keys / AEAD**: shared IV/MAC derivation, per-packet key schedule, AES-128-EAX framing

pub mod aead;
pub mod keys;
pub mod license;
pub mod omega;
pub mod puzzle;
