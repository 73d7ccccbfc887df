//! # Key Schedule
//!
//! Session secrets and per-packet AEAD material.
//!
//! ```text
//! shared    = compress(clientEK * serverScalar)
//! sharedIV  = SHA-512(shared[..32]);  sharedIV[..|alpha|] ^= alpha;  sharedIV[10..10+|beta|] ^= beta
//! sharedMAC = SHA-1(sharedIV)[..8]
//!
//! material  = [dir(1)] [type(1)] [generation(4)] [sharedIV(64)]
//! key|nonce = SHA-256(material);  key[0] ^= id >> 8;  key[1] ^= id & 0xFF
//! ```

use crate::core::header::PacketType;
use crate::error::{constants, ProtocolError, Result};
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SHARED_IV_LEN: usize = 64;
pub const SHARED_MAC_LEN: usize = 8;
pub const ALPHA_MAX_LEN: usize = SHARED_IV_LEN;
pub const BETA_OFFSET: usize = 10;
pub const BETA_MAX_LEN: usize = SHARED_IV_LEN - BETA_OFFSET;

/// Length of the beta salt the server hands out.
pub const BETA_LEN: usize = 54;

const KEY_MATERIAL_LEN: usize = 70;

/// Direction of a packet, mixed into its key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ServerToClient,
    ClientToServer,
}

impl Direction {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            Direction::ServerToClient => 0x30,
            Direction::ClientToServer => 0x31,
        }
    }
}

/// The session's master secret material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    iv: [u8; SHARED_IV_LEN],
    mac: [u8; SHARED_MAC_LEN],
}

impl SharedSecret {
    pub fn shared_iv(&self) -> &[u8; SHARED_IV_LEN] {
        &self.iv
    }

    pub fn shared_mac(&self) -> &[u8; SHARED_MAC_LEN] {
        &self.mac
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

/// Derive sharedIV and sharedMAC from the ECDH result and the two salts.
///
/// # Errors
/// - `ProtocolError::InvalidKey` if `client_ek` is not a 32-byte Edwards point
/// - `ProtocolError::InvalidKey` if alpha exceeds 64 bytes or beta exceeds 54 bytes
pub fn shared_secret(
    server_secret: &Scalar,
    client_ek: &[u8],
    alpha: &[u8],
    beta: &[u8],
) -> Result<SharedSecret> {
    if alpha.len() > ALPHA_MAX_LEN {
        return Err(ProtocolError::InvalidKey(constants::ERR_ALPHA_TOO_LONG.into()));
    }
    if beta.len() > BETA_MAX_LEN {
        return Err(ProtocolError::InvalidKey(constants::ERR_BETA_TOO_LONG.into()));
    }

    let encoded: [u8; 32] = client_ek
        .try_into()
        .map_err(|_| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))?;
    let client_point = CompressedEdwardsY(encoded)
        .decompress()
        .ok_or_else(|| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))?;

    let mut shared = (client_point * server_secret).compress().to_bytes();
    let mut iv = [0u8; SHARED_IV_LEN];
    iv.copy_from_slice(&Sha512::digest(shared));
    shared.zeroize();

    for (slot, salt) in iv.iter_mut().zip(alpha) {
        *slot ^= salt;
    }
    for (slot, salt) in iv[BETA_OFFSET..].iter_mut().zip(beta) {
        *slot ^= salt;
    }

    let mut mac = [0u8; SHARED_MAC_LEN];
    mac.copy_from_slice(&Sha1::digest(iv)[..SHARED_MAC_LEN]);

    Ok(SharedSecret { iv, mac })
}

/// AES-128 key and EAX nonce for one packet.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PacketKey {
    pub key: [u8; 16],
    pub nonce: [u8; 16],
}

impl fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketKey").finish_non_exhaustive()
    }
}

/// Key and nonce for the packet identified by type, id, generation and direction.
pub fn packet_key(
    packet_type: PacketType,
    packet_id: u16,
    generation: u32,
    direction: Direction,
    shared_iv: &[u8; SHARED_IV_LEN],
) -> PacketKey {
    let mut material = [0u8; KEY_MATERIAL_LEN];
    material[0] = direction.tag();
    material[1] = packet_type.code();
    material[2..6].copy_from_slice(&generation.to_be_bytes());
    material[6..].copy_from_slice(shared_iv);

    let digest = Sha256::digest(material);
    material.zeroize();

    let mut key = [0u8; 16];
    let mut nonce = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    nonce.copy_from_slice(&digest[16..]);
    let [high, low] = packet_id.to_be_bytes();
    key[0] ^= high;
    key[1] ^= low;

    PacketKey { key, nonce }
}

/// Outgoing packet ids for one packet type; the generation counts id wraps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketIdCounter {
    next_id: u16,
    generation: u32,
}

impl PacketIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next (id, generation) pair.
    pub fn next(&mut self) -> (u16, u32) {
        let current = (self.next_id, self.generation);
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.generation = self.generation.wrapping_add(1);
        }
        current
    }
}

/// Generation of incoming packet ids, inferred from the ids observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationTracker {
    last_id: Option<u16>,
    generation: u32,
}

impl GenerationTracker {
    const WRAP_WINDOW: u16 = 0x8000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Generation an incoming `packet_id` belongs to. Does not record the id.
    pub fn generation_for(&self, packet_id: u16) -> u32 {
        match self.last_id {
            Some(last) if last > packet_id && last - packet_id > Self::WRAP_WINDOW => {
                self.generation.wrapping_add(1)
            }
            _ => self.generation,
        }
    }

    /// Record an authenticated id.
    pub fn observe(&mut self, packet_id: u16) {
        let generation = self.generation_for(packet_id);
        if generation != self.generation {
            self.generation = generation;
            self.last_id = Some(packet_id);
            return;
        }
        match self.last_id {
            Some(last) if last >= packet_id => {}
            _ => self.last_id = Some(packet_id),
        }
    }
}
