//! # License Chain
//!
//! A license is a version byte followed by blocks, each carrying a public key on the
//! Edwards curve. The first block holds the well-known root key; every later block holds
//! the point derived from all blocks before it. Walking the finished chain yields the
//! server's ephemeral keypair for the ECDH step.
//!
//! ```text
//! License: [Version(1)] [Block]...
//! Block:   [KeyType=0(1)] [PublicKey(32)] [BlockType(1)] [MinValid(4)] [MaxValid(4)] [Content]
//! Server:  [LicenseType(1)] [Reserved(4)] [Issuer..] [0x00]
//! Ephemeral: (empty)
//! ```
//!
//! The derived keypair is asymmetric: the public key is the root plus the sum of every
//! block's contribution, while the private key is only the last block's scalar. Peers
//! depend on this exact shape.

use crate::core::packet::{Marshal, Unmarshal};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::{to_protocol_time, PROTOCOL_EPOCH_OFFSET};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// Compressed root point every license chain starts from.
pub const ROOT_KEY: [u8; 32] = [
    0xcd, 0x0d, 0xe2, 0xae, 0xd4, 0x63, 0x45, 0x50, 0x9a, 0x7e, 0x3c, 0xfd, 0x8f, 0x68, 0xb3, 0xdc,
    0x75, 0x55, 0xb2, 0x9d, 0xcc, 0xec, 0x73, 0xcd, 0x18, 0x75, 0x0f, 0x99, 0x38, 0x12, 0x40, 0x8a,
];

pub const LICENSE_VERSION: u8 = 0x01;

pub const BLOCK_TYPE_SERVER: u8 = 2;
pub const BLOCK_TYPE_EPHEMERAL: u8 = 32;

/// License type advertised by the default server block.
pub const DEFAULT_SERVER_LICENSE_TYPE: u8 = 7;
pub const DEFAULT_ISSUER: &str = "Anonymous";

const SERVER_RESERVED: u32 = 32;
const BLOCK_FIXED_LEN: usize = 42;

/// Type-specific tail of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    Server {
        license_type: u8,
        reserved: u32,
        issuer: String,
    },
    Ephemeral,
}

impl BlockContent {
    pub fn server(license_type: u8, issuer: impl Into<String>) -> Self {
        BlockContent::Server {
            license_type,
            reserved: SERVER_RESERVED,
            issuer: issuer.into(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            BlockContent::Server {
                license_type,
                reserved,
                issuer,
            } => {
                out.push(*license_type);
                out.extend_from_slice(&reserved.to_be_bytes());
                out.extend_from_slice(issuer.as_bytes());
                out.push(0x00);
            }
            BlockContent::Ephemeral => {}
        }
    }
}

/// One link of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseBlock {
    pub key_type: u8,
    pub public_key: [u8; 32],
    pub block_type: u8,
    /// Protocol-relative once the block is part of a license.
    pub min_valid: u32,
    pub max_valid: u32,
    pub content: BlockContent,
}

impl LicenseBlock {
    /// A block valid from `min_valid` to `max_valid` Unix seconds. Key fields are
    /// assigned by [`License::add_block`].
    pub fn new(block_type: u8, min_valid: u32, max_valid: u32, content: BlockContent) -> Self {
        Self {
            key_type: 0,
            public_key: [0u8; 32],
            block_type,
            min_valid,
            max_valid,
            content,
        }
    }

    /// Server block valid forever.
    pub fn server(license_type: u8, issuer: impl Into<String>) -> Self {
        Self::new(
            BLOCK_TYPE_SERVER,
            PROTOCOL_EPOCH_OFFSET,
            u32::MAX,
            BlockContent::server(license_type, issuer),
        )
    }

    /// Ephemeral block valid forever.
    pub fn ephemeral() -> Self {
        Self::new(
            BLOCK_TYPE_EPHEMERAL,
            PROTOCOL_EPOCH_OFFSET,
            u32::MAX,
            BlockContent::Ephemeral,
        )
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.key_type);
        out.extend_from_slice(&self.public_key);
        out.push(self.block_type);
        out.extend_from_slice(&self.min_valid.to_be_bytes());
        out.extend_from_slice(&self.max_valid.to_be_bytes());
        self.content.write(out);
    }

    /// Parse one block from the front of `raw`, returning it and the bytes consumed.
    fn read(raw: &[u8]) -> Result<(Self, usize)> {
        if raw.len() < BLOCK_FIXED_LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: ">= 42",
            });
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&raw[1..33]);
        let block_type = raw[33];
        let min_valid = u32::from_be_bytes([raw[34], raw[35], raw[36], raw[37]]);
        let max_valid = u32::from_be_bytes([raw[38], raw[39], raw[40], raw[41]]);
        let rest = &raw[BLOCK_FIXED_LEN..];

        let (content, used) = match block_type {
            BLOCK_TYPE_SERVER => {
                if rest.len() < 6 {
                    return Err(ProtocolError::Incomplete {
                        actual: raw.len(),
                        expected: ">= 48",
                    });
                }
                let nul = rest[5..]
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(ProtocolError::Incomplete {
                        actual: raw.len(),
                        expected: "NUL-terminated issuer",
                    })?;
                let issuer = String::from_utf8(rest[5..5 + nul].to_vec())
                    .map_err(|_| ProtocolError::InvalidKey("license issuer is not UTF-8".into()))?;
                let content = BlockContent::Server {
                    license_type: rest[0],
                    reserved: u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]),
                    issuer,
                };
                (content, 5 + nul + 1)
            }
            BLOCK_TYPE_EPHEMERAL => (BlockContent::Ephemeral, 0),
            other => {
                return Err(ProtocolError::InvalidKey(format!(
                    "unsupported license block type {other}"
                )))
            }
        };

        Ok((
            Self {
                key_type: raw[0],
                public_key,
                block_type,
                min_valid,
                max_valid,
                content,
            },
            BLOCK_FIXED_LEN + used,
        ))
    }

    /// Scalar derived from this block's bytes (key-type byte excluded).
    fn derive_scalar(&self) -> Scalar {
        let mut bytes = Vec::new();
        self.write(&mut bytes);
        let digest = Sha512::digest(&bytes[1..]);
        let mut low = [0u8; 32];
        low.copy_from_slice(&digest[..32]);
        let scalar = Scalar::from_bytes_mod_order(clamp_integer(low));
        low.zeroize();
        scalar
    }

    fn point(&self) -> Result<EdwardsPoint> {
        CompressedEdwardsY(self.public_key)
            .decompress()
            .ok_or_else(|| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))
    }
}

impl Marshal for LicenseBlock {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(BLOCK_FIXED_LEN + 16);
        self.write(&mut out);
        Ok(out)
    }
}

/// Keypair derived from a license chain.
pub struct EphemeralKeypair {
    secret: Scalar,
    public: [u8; 32],
}

impl EphemeralKeypair {
    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    /// Compressed Edwards encoding of the cumulative point.
    pub fn public(&self) -> &[u8; 32] {
        &self.public
    }
}

impl Drop for EphemeralKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// A version byte and its ordered blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    pub version: u8,
    pub blocks: Vec<LicenseBlock>,
}

impl License {
    /// An empty chain.
    pub fn new() -> Self {
        Self {
            version: LICENSE_VERSION,
            blocks: Vec::new(),
        }
    }

    /// Server block then ephemeral block, both valid forever.
    pub fn with_issuer(issuer: &str) -> Result<Self> {
        let mut license = Self::new();
        license.add_block(LicenseBlock::server(DEFAULT_SERVER_LICENSE_TYPE, issuer))?;
        license.add_block(LicenseBlock::ephemeral())?;
        Ok(license)
    }

    /// [`License::with_issuer`] using the anonymous issuer.
    pub fn new_default() -> Result<Self> {
        Self::with_issuer(DEFAULT_ISSUER)
    }

    /// Append a block, rebasing its validity window and assigning its public key.
    pub fn add_block(&mut self, mut block: LicenseBlock) -> Result<()> {
        block.key_type = 0;
        block.min_valid = to_protocol_time(block.min_valid);
        block.max_valid = to_protocol_time(block.max_valid);
        block.public_key = if self.blocks.is_empty() {
            ROOT_KEY
        } else {
            *self.next_keypair()?.public()
        };
        self.blocks.push(block);
        Ok(())
    }

    /// Walk the chain: every block contributes `point(block) * scalar(block)` on top of
    /// the root point. Returns the last scalar with the accumulated point.
    pub fn next_keypair(&self) -> Result<EphemeralKeypair> {
        let root = CompressedEdwardsY(ROOT_KEY)
            .decompress()
            .ok_or_else(|| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))?;

        let mut parent = root;
        let mut last = None;
        for block in &self.blocks {
            let scalar = block.derive_scalar();
            parent += block.point()? * scalar;
            last = Some(scalar);
        }

        let secret = last
            .ok_or_else(|| ProtocolError::HandshakeError("license has no blocks".into()))?;
        Ok(EphemeralKeypair {
            secret,
            public: parent.compress().to_bytes(),
        })
    }

    /// The server's ephemeral keypair for the ECDH step.
    pub fn server_ek(&self) -> Result<EphemeralKeypair> {
        self.next_keypair()
    }
}

impl Default for License {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshal for License {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.version];
        for block in &self.blocks {
            block.write(&mut out);
        }
        Ok(out)
    }
}

impl Unmarshal for License {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        let (&version, mut rest) = raw.split_first().ok_or(ProtocolError::Incomplete {
            actual: 0,
            expected: ">= 1",
        })?;
        let mut blocks = Vec::new();
        while !rest.is_empty() {
            let (block, used) = LicenseBlock::read(rest)?;
            blocks.push(block);
            rest = &rest[used..];
        }
        Ok(Self { version, blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_license_layout() {
        let license = License::new_default().unwrap();
        assert_eq!(license.blocks.len(), 2);
        assert_eq!(license.blocks[0].public_key, ROOT_KEY);
        assert_eq!(license.blocks[0].min_valid, 0);
        assert_eq!(license.blocks[0].max_valid, u32::MAX - PROTOCOL_EPOCH_OFFSET);
        assert_ne!(license.blocks[1].public_key, ROOT_KEY);

        let raw = license.marshal().unwrap();
        // version + (42 + 1 + 4 + "Anonymous" + NUL) + 42
        assert_eq!(raw.len(), 1 + 57 + 42);
        assert_eq!(raw[0], 0x01);
        assert_eq!(raw[34], BLOCK_TYPE_SERVER);
        assert_eq!(&raw[43..48], &[7, 0, 0, 0, 32]);
        assert_eq!(&raw[48..58], b"Anonymous\0");
        assert_eq!(raw[58 + 33], BLOCK_TYPE_EPHEMERAL);
    }

    #[test]
    fn test_chain_is_deterministic() {
        let a = License::new_default().unwrap();
        let b = License::new_default().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.server_ek().unwrap().public(), b.server_ek().unwrap().public());
        assert_eq!(a.server_ek().unwrap().secret(), b.server_ek().unwrap().secret());
    }

    #[test]
    fn test_issuer_changes_derived_key() {
        let a = License::new_default().unwrap();
        let b = License::with_issuer("Somebody").unwrap();
        assert_eq!(a.blocks[0].public_key, b.blocks[0].public_key);
        assert_ne!(a.blocks[1].public_key, b.blocks[1].public_key);
    }

    #[test]
    fn test_public_key_is_not_secret_times_base() {
        let license = License::new_default().unwrap();
        let keypair = license.server_ek().unwrap();
        let naive = EdwardsPoint::mul_base(keypair.secret()).compress().to_bytes();
        assert_ne!(&naive, keypair.public());
    }

    #[test]
    fn test_unmarshal_round_trip() {
        let license = License::new_default().unwrap();
        let raw = license.marshal().unwrap();
        assert_eq!(License::unmarshal(&raw).unwrap(), license);
        assert!(matches!(
            License::unmarshal(&raw[..raw.len() - 1]),
            Err(ProtocolError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_empty_chain_has_no_keypair() {
        assert!(License::new().next_keypair().is_err());
    }
}
