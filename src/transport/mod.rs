//! # Transport
//!
//! Feeds datagrams from a UDP socket into per-peer handshake sessions.
//!
//! - [`sessions`]: peer-address keyed table with a capacity limit and idle eviction
//! - [`udp`]: the socket loop, one worker task per peer and a single writer task

pub mod sessions;
pub mod udp;
