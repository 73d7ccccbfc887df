//! # Core Protocol Components
//!
//! Byte-exact packet layouts of the handshake.
//!
//! ## Components
//! - **Header**: C2S/S2C headers, flag byte, tag slot
//! - **Init**: the five low-level init packets
//! - **Command**: text commands, command packets and acks
//! - **Packet**: `Marshal`/`Unmarshal` capabilities and the closed packet union
//!
//! ## Wire Format
//! ```text
//! C2S: [Tag(8)] [PacketId(2)] [ClientId(2)] [Flags|Type(1)] [Body(N)]
//! S2C: [Tag(8)] [PacketId(2)] [Flags|Type(1)] [Body(N)]
//! ```
//!
//! ## Security
//! - Every length is checked before indexing
//! - Stage markers reject out-of-order init packets

pub mod command;
pub mod header;
pub mod init;
pub mod packet;
