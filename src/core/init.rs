//! # Low-Level Init Packets
//!
//! Fixed-size packets of the unencrypted five-stage exchange. Offsets below are
//! relative to the end of the header.
//!
//! ```text
//! Init0 C2S: [Version(4)] [Stage=0(1)] [Timestamp(4)] [Random0(4)] [Reserved(8)]       34 total
//! Init1 S2C: [Stage=1(1)] [Random1(16)] [Random0 reversed(4)]                          32 total
//! Init2 C2S: [Version(4)] [Stage=2(1)] [Random1(16)] [Random0 reversed(4)]             38 total
//! Init3 S2C: [Stage=3(1)] [X(64)] [N(64)] [Level(4)] [Random2(100)]                   244 total
//! Init4 C2S: [Version(4)] [Stage=4(1)] [X(64)] [N(64)] [Level(4)] [Random2(100)]
//!            [Y(64)] [Command(..)]                                                   >314 total
//! ```

use crate::core::header::{
    C2SHeader, HeaderTag, PacketFlags, PacketType, S2CHeader, C2S_HEADER_LEN, INIT_PACKET_ID,
    S2C_HEADER_LEN,
};
use crate::core::packet::{Marshal, Unmarshal};
use crate::error::{ProtocolError, Result};
use crate::utils::time::{from_protocol_time, to_protocol_time};

pub const INIT0_LEN: usize = 34;
pub const INIT1_LEN: usize = 32;
pub const INIT2_LEN: usize = 38;
pub const INIT3_LEN: usize = 244;
/// Init4 must be strictly longer than this (the command text is mandatory).
pub const INIT4_FIXED_LEN: usize = 314;

pub const PUZZLE_INT_LEN: usize = 64;
pub const RANDOM1_LEN: usize = 16;
pub const RANDOM2_LEN: usize = 100;

/// Header used by a client for every init packet.
pub fn c2s_init_header() -> C2SHeader {
    C2SHeader {
        tag: HeaderTag::init_magic(),
        packet_id: INIT_PACKET_ID,
        client_id: 0,
        flags: PacketFlags::INIT,
        packet_type: PacketType::Init,
    }
}

/// Common checks for a C2S init packet: header type and stage marker.
fn check_c2s(raw: &[u8], stage: u8) -> Result<C2SHeader> {
    let header = C2SHeader::unmarshal(raw)?;
    if header.packet_type != PacketType::Init {
        return Err(ProtocolError::TypeMismatch {
            actual: header.packet_type.code(),
            expected: PacketType::Init.code(),
        });
    }
    let marker = raw[C2S_HEADER_LEN + 4];
    if marker != stage {
        return Err(ProtocolError::StageDisorder {
            actual: marker,
            expected: stage,
        });
    }
    Ok(header)
}

fn check_s2c(raw: &[u8], stage: u8) -> Result<S2CHeader> {
    let header = S2CHeader::unmarshal(raw)?;
    if header.packet_type != PacketType::Init {
        return Err(ProtocolError::TypeMismatch {
            actual: header.packet_type.code(),
            expected: PacketType::Init.code(),
        });
    }
    let marker = raw[S2C_HEADER_LEN];
    if marker != stage {
        return Err(ProtocolError::StageDisorder {
            actual: marker,
            expected: stage,
        });
    }
    Ok(header)
}

fn be_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn array<const N: usize>(raw: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[at..at + N]);
    out
}

/// Stage 0: the client announces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init0 {
    pub header: C2SHeader,
    /// Client build, as Unix seconds.
    pub version_timestamp: u32,
    pub timestamp: u32,
    pub random0: [u8; 4],
}

impl Unmarshal for Init0 {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() != INIT0_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: "= 34",
            });
        }
        let header = check_c2s(raw, 0)?;
        let data = &raw[C2S_HEADER_LEN..];
        Ok(Self {
            header,
            version_timestamp: from_protocol_time(be_u32(data, 0)),
            timestamp: be_u32(data, 5),
            random0: array(data, 9),
        })
    }
}

impl Marshal for Init0 {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(INIT0_LEN);
        out.extend_from_slice(&self.header.marshal());
        out.extend_from_slice(&to_protocol_time(self.version_timestamp).to_be_bytes());
        out.push(0);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.random0);
        out.extend_from_slice(&[0u8; 8]);
        Ok(out)
    }
}

/// Stage 1: the server echoes random0 and adds its own randomness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init1 {
    pub header: S2CHeader,
    pub random1: [u8; RANDOM1_LEN],
    /// In the order the client sent it; reversed on the wire.
    pub random0: [u8; 4],
}

impl Init1 {
    pub fn new(random1: [u8; RANDOM1_LEN], random0: [u8; 4]) -> Self {
        Self {
            header: S2CHeader::init(),
            random1,
            random0,
        }
    }
}

impl Marshal for Init1 {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut reversed = self.random0;
        reversed.reverse();
        let mut out = Vec::with_capacity(INIT1_LEN);
        out.extend_from_slice(&self.header.marshal());
        out.push(1);
        out.extend_from_slice(&self.random1);
        out.extend_from_slice(&reversed);
        Ok(out)
    }
}

impl Unmarshal for Init1 {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() != INIT1_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: "= 32",
            });
        }
        let header = check_s2c(raw, 1)?;
        let data = &raw[S2C_HEADER_LEN + 1..];
        let mut random0: [u8; 4] = array(data, RANDOM1_LEN);
        random0.reverse();
        Ok(Self {
            header,
            random1: array(data, 0),
            random0,
        })
    }
}

/// Stage 2: the client echoes the server's cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init2 {
    pub header: C2SHeader,
    pub version_timestamp: u32,
    pub random1: [u8; RANDOM1_LEN],
    /// Exactly as received, i.e. the reversed random0 of Init1.
    pub random0_reversed: [u8; 4],
}

impl Unmarshal for Init2 {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() != INIT2_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: "= 38",
            });
        }
        let header = check_c2s(raw, 2)?;
        let data = &raw[C2S_HEADER_LEN..];
        Ok(Self {
            header,
            version_timestamp: from_protocol_time(be_u32(data, 0)),
            random1: array(data, 5),
            random0_reversed: array(data, 21),
        })
    }
}

impl Marshal for Init2 {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(INIT2_LEN);
        out.extend_from_slice(&self.header.marshal());
        out.extend_from_slice(&to_protocol_time(self.version_timestamp).to_be_bytes());
        out.push(2);
        out.extend_from_slice(&self.random1);
        out.extend_from_slice(&self.random0_reversed);
        Ok(out)
    }
}

/// Stage 3: the server issues the puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init3 {
    pub header: S2CHeader,
    pub x: [u8; PUZZLE_INT_LEN],
    pub n: [u8; PUZZLE_INT_LEN],
    pub level: u32,
    pub random2: [u8; RANDOM2_LEN],
}

impl Marshal for Init3 {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(INIT3_LEN);
        out.extend_from_slice(&self.header.marshal());
        out.push(3);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.n);
        out.extend_from_slice(&self.level.to_be_bytes());
        out.extend_from_slice(&self.random2);
        Ok(out)
    }
}

impl Unmarshal for Init3 {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() != INIT3_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: "= 244",
            });
        }
        let header = check_s2c(raw, 3)?;
        let data = &raw[S2C_HEADER_LEN + 1..];
        Ok(Self {
            header,
            x: array(data, 0),
            n: array(data, 64),
            level: be_u32(data, 128),
            random2: array(data, 132),
        })
    }
}

/// Stage 4: the client returns the puzzle with its solution and the `clientinitiv` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init4 {
    pub header: C2SHeader,
    pub version_timestamp: u32,
    pub x: [u8; PUZZLE_INT_LEN],
    pub n: [u8; PUZZLE_INT_LEN],
    pub level: u32,
    pub random2: [u8; RANDOM2_LEN],
    pub y: [u8; PUZZLE_INT_LEN],
    pub command: Vec<u8>,
}

impl Unmarshal for Init4 {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() <= INIT4_FIXED_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: "> 314",
            });
        }
        let header = check_c2s(raw, 4)?;
        let data = &raw[C2S_HEADER_LEN..];
        Ok(Self {
            header,
            version_timestamp: from_protocol_time(be_u32(data, 0)),
            x: array(data, 5),
            n: array(data, 69),
            level: be_u32(data, 133),
            random2: array(data, 137),
            y: array(data, 237),
            command: data[301..].to_vec(),
        })
    }
}

impl Marshal for Init4 {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(INIT4_FIXED_LEN + self.command.len());
        out.extend_from_slice(&self.header.marshal());
        out.extend_from_slice(&to_protocol_time(self.version_timestamp).to_be_bytes());
        out.push(4);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.n);
        out.extend_from_slice(&self.level.to_be_bytes());
        out.extend_from_slice(&self.random2);
        out.extend_from_slice(&self.y);
        out.extend_from_slice(&self.command);
        Ok(out)
    }
}
