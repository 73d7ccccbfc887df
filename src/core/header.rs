//! # Packet Headers
//!
//! Fixed-layout headers shared by every datagram.
//!
//! ```text
//! C2S: [Tag(8)] [PacketId(2)] [ClientId(2)] [Flags|Type(1)]   = 13 bytes
//! S2C: [Tag(8)] [PacketId(2)] [Flags|Type(1)]                 = 11 bytes
//! ```
//!
//! The 8-byte tag slot carries the `TS3INIT1` magic while the handshake is still
//! unencrypted and the AEAD authentication tag afterwards. [`HeaderTag`] keeps the two
//! meanings apart in the type system; they only share a wire position. Received tags
//! are classified by their bytes alone.
//!
//! The flag byte packs, high to low: unencrypted, compressed, new-protocol, fragmented,
//! followed by the packet type in the low nibble. The wire bit is set when the packet is
//! *not* encrypted; [`PacketFlags::encrypted`] exposes the positive form.

use crate::error::{ProtocolError, Result};

/// Magic marker carried by every low-level init packet.
pub const INIT_MAGIC: [u8; 8] = *b"TS3INIT1";

/// Packet id used by all init packets.
pub const INIT_PACKET_ID: u16 = 101;

/// Size of the client-to-server header.
pub const C2S_HEADER_LEN: usize = 13;

/// Size of the server-to-client header.
pub const S2C_HEADER_LEN: usize = 11;

/// Size of the tag slot at the start of each header.
pub const TAG_LEN: usize = 8;

const FLAG_UNENCRYPTED: u8 = 0x80;
const FLAG_COMPRESSED: u8 = 0x40;
const FLAG_NEW_PROTOCOL: u8 = 0x20;
const FLAG_FRAGMENTED: u8 = 0x10;
const TYPE_MASK: u8 = 0x0F;

/// Packet type code carried in the low nibble of the flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Voice = 0,
    VoiceWhisper = 1,
    Command = 2,
    CommandLow = 3,
    Ping = 4,
    Pong = 5,
    Ack = 6,
    AckLow = 7,
    Init = 8,
}

impl PacketType {
    /// Decode a type nibble.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PacketType::Voice),
            1 => Some(PacketType::VoiceWhisper),
            2 => Some(PacketType::Command),
            3 => Some(PacketType::CommandLow),
            4 => Some(PacketType::Ping),
            5 => Some(PacketType::Pong),
            6 => Some(PacketType::Ack),
            7 => Some(PacketType::AckLow),
            8 => Some(PacketType::Init),
            _ => None,
        }
    }

    /// The wire code of this type.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The four boolean header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    pub encrypted: bool,
    pub compressed: bool,
    pub new_protocol: bool,
    pub fragmented: bool,
}

impl PacketFlags {
    /// Flags used by the low-level init exchange: everything off.
    pub const INIT: PacketFlags = PacketFlags {
        encrypted: false,
        compressed: false,
        new_protocol: false,
        fragmented: false,
    };

    /// Flags for encrypted packets of the high-level handshake.
    pub const ENCRYPTED_NEW_PROTOCOL: PacketFlags = PacketFlags {
        encrypted: true,
        compressed: false,
        new_protocol: true,
        fragmented: false,
    };
}

/// Pack flags and type into the flag byte.
pub fn encode_flags(flags: PacketFlags, packet_type: PacketType) -> u8 {
    let mut byte = packet_type.code() & TYPE_MASK;
    if !flags.encrypted {
        byte |= FLAG_UNENCRYPTED;
    }
    if flags.compressed {
        byte |= FLAG_COMPRESSED;
    }
    if flags.new_protocol {
        byte |= FLAG_NEW_PROTOCOL;
    }
    if flags.fragmented {
        byte |= FLAG_FRAGMENTED;
    }
    byte
}

/// Unpack the flag byte. Unknown type codes are reported as [`ProtocolError::TypeMismatch`].
pub fn decode_flags(byte: u8) -> Result<(PacketFlags, PacketType)> {
    let code = byte & TYPE_MASK;
    let packet_type = PacketType::from_code(code).ok_or(ProtocolError::TypeMismatch {
        actual: code,
        expected: PacketType::Init.code(),
    })?;
    let flags = PacketFlags {
        encrypted: byte & FLAG_UNENCRYPTED == 0,
        compressed: byte & FLAG_COMPRESSED != 0,
        new_protocol: byte & FLAG_NEW_PROTOCOL != 0,
        fragmented: byte & FLAG_FRAGMENTED != 0,
    };
    Ok((flags, packet_type))
}

/// Contents of the 8-byte tag slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTag {
    /// Fixed marker of the unencrypted low-level phase.
    Magic([u8; TAG_LEN]),
    /// AEAD authentication tag of an encrypted packet.
    Mac([u8; TAG_LEN]),
}

impl HeaderTag {
    /// The `TS3INIT1` marker.
    pub const fn init_magic() -> Self {
        HeaderTag::Magic(INIT_MAGIC)
    }

    /// Raw wire bytes, whichever meaning they carry.
    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        match self {
            HeaderTag::Magic(bytes) | HeaderTag::Mac(bytes) => bytes,
        }
    }

    /// True when this is the low-level init marker.
    pub fn is_init_magic(&self) -> bool {
        matches!(self, HeaderTag::Magic(bytes) if *bytes == INIT_MAGIC)
    }

    /// Classify received tag bytes. Only the exact `TS3INIT1` marker is a magic tag;
    /// the flag byte plays no part, so an init packet with a cleared unencrypted bit is
    /// still recognised.
    pub fn from_wire(bytes: [u8; TAG_LEN]) -> Self {
        if bytes == INIT_MAGIC {
            HeaderTag::Magic(bytes)
        } else {
            HeaderTag::Mac(bytes)
        }
    }
}

/// Client-to-server header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct C2SHeader {
    pub tag: HeaderTag,
    pub packet_id: u16,
    pub client_id: u16,
    pub flags: PacketFlags,
    pub packet_type: PacketType,
}

impl C2SHeader {
    /// Parse the first 13 bytes of `raw`.
    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < C2S_HEADER_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: ">= 13",
            });
        }
        let (flags, packet_type) = decode_flags(raw[12])?;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&raw[..TAG_LEN]);
        Ok(Self {
            tag: HeaderTag::from_wire(tag),
            packet_id: u16::from_be_bytes([raw[8], raw[9]]),
            client_id: u16::from_be_bytes([raw[10], raw[11]]),
            flags,
            packet_type,
        })
    }

    /// Write the 13-byte header. The server never sends C2S packets; this serves
    /// client-side tooling and tests.
    pub fn marshal(&self) -> [u8; C2S_HEADER_LEN] {
        let mut out = [0u8; C2S_HEADER_LEN];
        out[..TAG_LEN].copy_from_slice(self.tag.as_bytes());
        out[8..10].copy_from_slice(&self.packet_id.to_be_bytes());
        out[10..12].copy_from_slice(&self.client_id.to_be_bytes());
        out[12] = encode_flags(self.flags, self.packet_type);
        out
    }

    /// Header bytes authenticated as associated data (everything after the tag).
    pub fn associated_data(raw: &[u8]) -> Result<&[u8]> {
        raw.get(TAG_LEN..C2S_HEADER_LEN)
            .ok_or(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: ">= 13",
            })
    }
}

/// Server-to-client header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S2CHeader {
    pub tag: HeaderTag,
    pub packet_id: u16,
    pub flags: PacketFlags,
    pub packet_type: PacketType,
}

impl S2CHeader {
    /// Header used by Init1 and Init3.
    pub fn init() -> Self {
        Self {
            tag: HeaderTag::init_magic(),
            packet_id: INIT_PACKET_ID,
            flags: PacketFlags::INIT,
            packet_type: PacketType::Init,
        }
    }

    /// Header for an encrypted packet; the tag is filled in when the body is sealed.
    pub fn encrypted(packet_type: PacketType, packet_id: u16) -> Self {
        Self {
            tag: HeaderTag::Mac([0u8; TAG_LEN]),
            packet_id,
            flags: PacketFlags::ENCRYPTED_NEW_PROTOCOL,
            packet_type,
        }
    }

    /// Write the 11-byte header.
    pub fn marshal(&self) -> [u8; S2C_HEADER_LEN] {
        let mut out = [0u8; S2C_HEADER_LEN];
        out[..TAG_LEN].copy_from_slice(self.tag.as_bytes());
        out[8..10].copy_from_slice(&self.packet_id.to_be_bytes());
        out[10] = encode_flags(self.flags, self.packet_type);
        out
    }

    /// Parse the first 11 bytes of `raw`.
    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < S2C_HEADER_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: ">= 11",
            });
        }
        let (flags, packet_type) = decode_flags(raw[10])?;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&raw[..TAG_LEN]);
        Ok(Self {
            tag: HeaderTag::from_wire(tag),
            packet_id: u16::from_be_bytes([raw[8], raw[9]]),
            flags,
            packet_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_flag_byte() {
        assert_eq!(encode_flags(PacketFlags::INIT, PacketType::Init), 0x88);
        let (flags, ty) = decode_flags(0x88).unwrap();
        assert_eq!(flags, PacketFlags::INIT);
        assert_eq!(ty, PacketType::Init);
    }

    #[test]
    fn test_encrypted_command_flag_byte() {
        assert_eq!(
            encode_flags(PacketFlags::ENCRYPTED_NEW_PROTOCOL, PacketType::Command),
            0x22
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            decode_flags(0x8F),
            Err(ProtocolError::TypeMismatch { actual: 15, .. })
        ));
    }

    #[test]
    fn test_s2c_init_header_layout() {
        let raw = S2CHeader::init().marshal();
        assert_eq!(&raw[..8], b"TS3INIT1");
        assert_eq!(&raw[8..10], &[0x00, 0x65]);
        assert_eq!(raw[10], 0x88);
        assert_eq!(S2CHeader::unmarshal(&raw).unwrap(), S2CHeader::init());
    }

    #[test]
    fn test_c2s_header_parse() {
        let mut raw = Vec::from(*b"TS3INIT1");
        raw.extend_from_slice(&[0x00, 0x65, 0x00, 0x00, 0x88]);
        let header = C2SHeader::unmarshal(&raw).unwrap();
        assert!(header.tag.is_init_magic());
        assert_eq!(header.packet_id, 101);
        assert_eq!(header.client_id, 0);
        assert_eq!(header.packet_type, PacketType::Init);
        assert!(!header.flags.encrypted);
    }

    #[test]
    fn test_encrypted_header_carries_mac() {
        let mut raw = vec![0xAA; 8];
        raw.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x22]);
        let header = C2SHeader::unmarshal(&raw).unwrap();
        assert_eq!(header.tag, HeaderTag::Mac([0xAA; 8]));
        assert!(!header.tag.is_init_magic());
        assert_eq!(C2SHeader::associated_data(&raw).unwrap(), &raw[8..13]);
    }

    #[test]
    fn test_magic_recognised_regardless_of_flags() {
        let mut raw = Vec::from(*b"TS3INIT1");
        raw.extend_from_slice(&[0x00, 0x65, 0x00, 0x00, 0x08]);
        let header = C2SHeader::unmarshal(&raw).unwrap();
        assert!(header.flags.encrypted);
        assert_eq!(header.tag, HeaderTag::init_magic());
    }

    #[test]
    fn test_short_header_is_incomplete() {
        assert!(matches!(
            C2SHeader::unmarshal(&[0u8; 12]),
            Err(ProtocolError::Incomplete { actual: 12, .. })
        ));
        assert!(matches!(
            S2CHeader::unmarshal(&[0u8; 3]),
            Err(ProtocolError::Incomplete { actual: 3, .. })
        ));
    }
}
