//! # Packet Union
//!
//! Capability traits shared by every packet and the closed set of packets this
//! core exchanges.

use crate::core::command::{AckPacket, C2SCommandPacket, CommandPacket};
use crate::core::header::{C2SHeader, PacketType, C2S_HEADER_LEN};
use crate::core::init::{Init0, Init1, Init2, Init3, Init4};
use crate::error::{ProtocolError, Result};

/// Encode a packet to its exact wire layout.
pub trait Marshal {
    fn marshal(&self) -> Result<Vec<u8>>;
}

/// Decode a packet from its wire layout. No partial value is produced on failure.
pub trait Unmarshal: Sized {
    fn unmarshal(raw: &[u8]) -> Result<Self>;
}

/// Every packet of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Init0(Init0),
    Init1(Init1),
    Init2(Init2),
    Init3(Init3),
    Init4(Init4),
    Command(CommandPacket),
    ClientCommand(C2SCommandPacket),
    Ack(AckPacket),
}

impl Packet {
    /// Decode a client datagram, selecting the init stage from its marker byte.
    pub fn decode_c2s(raw: &[u8]) -> Result<Self> {
        let header = C2SHeader::unmarshal(raw)?;
        match header.packet_type {
            PacketType::Init => {
                let stage = raw.get(C2S_HEADER_LEN + 4).copied().ok_or(
                    ProtocolError::Incomplete {
                        actual: raw.len(),
                        expected: ">= 18",
                    },
                )?;
                match stage {
                    0 => Init0::unmarshal(raw).map(Packet::Init0),
                    2 => Init2::unmarshal(raw).map(Packet::Init2),
                    4 => Init4::unmarshal(raw).map(Packet::Init4),
                    other => Err(ProtocolError::StageDisorder {
                        actual: other,
                        expected: 0,
                    }),
                }
            }
            PacketType::Command | PacketType::CommandLow => {
                C2SCommandPacket::unmarshal(raw).map(Packet::ClientCommand)
            }
            other => Err(ProtocolError::TypeMismatch {
                actual: other.code(),
                expected: PacketType::Init.code(),
            }),
        }
    }

    /// The packet type carried in the header.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Init0(_)
            | Packet::Init1(_)
            | Packet::Init2(_)
            | Packet::Init3(_)
            | Packet::Init4(_) => PacketType::Init,
            Packet::Command(p) => p.header.packet_type,
            Packet::ClientCommand(p) => p.header.packet_type,
            Packet::Ack(_) => PacketType::Ack,
        }
    }
}

impl Marshal for Packet {
    fn marshal(&self) -> Result<Vec<u8>> {
        match self {
            Packet::Init0(p) => p.marshal(),
            Packet::Init1(p) => p.marshal(),
            Packet::Init2(p) => p.marshal(),
            Packet::Init3(p) => p.marshal(),
            Packet::Init4(p) => p.marshal(),
            Packet::Command(p) => p.marshal(),
            Packet::ClientCommand(p) => {
                let mut out = p.header.marshal().to_vec();
                out.extend_from_slice(&p.payload);
                Ok(out)
            }
            Packet::Ack(p) => p.marshal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::init::c2s_init_header;

    #[test]
    fn test_decode_selects_stage() {
        let init0 = Init0 {
            header: c2s_init_header(),
            version_timestamp: 1_700_000_000,
            timestamp: 5,
            random0: [1, 2, 3, 4],
        };
        let raw = init0.marshal().unwrap();
        assert_eq!(Packet::decode_c2s(&raw).unwrap(), Packet::Init0(init0));
    }

    #[test]
    fn test_decode_rejects_server_stage() {
        let mut raw = vec![0u8; 34];
        raw[..8].copy_from_slice(b"TS3INIT1");
        raw[12] = 0x88;
        raw[17] = 3;
        assert!(matches!(
            Packet::decode_c2s(&raw),
            Err(ProtocolError::StageDisorder { actual: 3, .. })
        ));
    }

    #[test]
    fn test_decode_never_panics_on_short_input() {
        for len in 0..40 {
            let mut raw = vec![0u8; len];
            if len > 12 {
                raw[12] = 0x88;
            }
            let _ = Packet::decode_c2s(&raw);
        }
    }
}
