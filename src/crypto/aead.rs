//! AES-128-EAX framing of encrypted packets.
//!
//! The 8-byte authentication tag is stored in the header's tag slot, the ciphertext
//! replaces the body, and the header bytes after the tag are authenticated as
//! associated data (5 bytes C2S, 3 bytes S2C).

use crate::core::header::{C2SHeader, S2CHeader, C2S_HEADER_LEN, S2C_HEADER_LEN, TAG_LEN};
use crate::error::{ProtocolError, Result};
use aes::Aes128;
use eax::aead::consts::U8;
use eax::aead::generic_array::GenericArray;
use eax::aead::{AeadInPlace, KeyInit};
use eax::Eax;

type PacketCipher = Eax<Aes128, U8>;

/// Fixed key used before the session secret exists.
pub const BOOTSTRAP_KEY: [u8; 16] = *b"c:\\windows\\syste";
/// Fixed nonce used before the session secret exists.
pub const BOOTSTRAP_NONCE: [u8; 16] = *b"m\\firewall32.cpl";

/// Encrypt `body` in place and return the detached tag.
pub fn seal(
    key: &[u8; 16],
    nonce: &[u8; 16],
    associated_data: &[u8],
    body: &mut [u8],
) -> Result<[u8; TAG_LEN]> {
    let cipher = PacketCipher::new(GenericArray::from_slice(key));
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), associated_data, body)
        .map_err(|_| ProtocolError::EncryptionFailure)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Verify `tag` and decrypt `body` in place.
pub fn open(
    key: &[u8; 16],
    nonce: &[u8; 16],
    associated_data: &[u8],
    body: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> Result<()> {
    let cipher = PacketCipher::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            associated_data,
            body,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Build a sealed server datagram: header with tag, then ciphertext.
pub fn seal_s2c(
    header: &S2CHeader,
    body: &[u8],
    key: &[u8; 16],
    nonce: &[u8; 16],
) -> Result<Vec<u8>> {
    let mut raw = header.marshal().to_vec();
    raw.extend_from_slice(body);
    let (head, payload) = raw.split_at_mut(S2C_HEADER_LEN);
    let tag = seal(key, nonce, &head[TAG_LEN..], payload)?;
    head[..TAG_LEN].copy_from_slice(&tag);
    Ok(raw)
}

/// Authenticate and decrypt a client datagram, returning the plaintext body.
pub fn open_c2s(raw: &[u8], key: &[u8; 16], nonce: &[u8; 16]) -> Result<Vec<u8>> {
    let aad = C2SHeader::associated_data(raw)?;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&raw[..TAG_LEN]);
    let mut body = raw[C2S_HEADER_LEN..].to_vec();
    open(key, nonce, aad, &mut body, &tag)?;
    Ok(body)
}

/// Client-side counterpart of [`seal_s2c`], used by test clients and tooling.
pub fn seal_c2s(
    header: &C2SHeader,
    body: &[u8],
    key: &[u8; 16],
    nonce: &[u8; 16],
) -> Result<Vec<u8>> {
    let mut raw = header.marshal().to_vec();
    raw.extend_from_slice(body);
    let (head, payload) = raw.split_at_mut(C2S_HEADER_LEN);
    let tag = seal(key, nonce, &head[TAG_LEN..], payload)?;
    head[..TAG_LEN].copy_from_slice(&tag);
    Ok(raw)
}

/// Client-side counterpart of [`open_c2s`], used by test clients and tooling.
pub fn open_s2c(raw: &[u8], key: &[u8; 16], nonce: &[u8; 16]) -> Result<Vec<u8>> {
    S2CHeader::unmarshal(raw)?;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&raw[..TAG_LEN]);
    let mut body = raw[S2C_HEADER_LEN..].to_vec();
    open(key, nonce, &raw[TAG_LEN..S2C_HEADER_LEN], &mut body, &tag)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::{HeaderTag, PacketFlags, PacketType};

    fn c2s_header(packet_id: u16) -> C2SHeader {
        C2SHeader {
            tag: HeaderTag::Mac([0u8; TAG_LEN]),
            packet_id,
            client_id: 0,
            flags: PacketFlags::ENCRYPTED_NEW_PROTOCOL,
            packet_type: PacketType::Command,
        }
    }

    #[test]
    fn test_bootstrap_constants() {
        assert_eq!(
            BOOTSTRAP_KEY,
            [0x63, 0x3A, 0x5C, 0x77, 0x69, 0x6E, 0x64, 0x6F, 0x77, 0x73, 0x5C, 0x73, 0x79, 0x73, 0x74, 0x65]
        );
        assert_eq!(
            BOOTSTRAP_NONCE,
            [0x6D, 0x5C, 0x66, 0x69, 0x72, 0x65, 0x77, 0x61, 0x6C, 0x6C, 0x33, 0x32, 0x2E, 0x63, 0x70, 0x6C]
        );
    }

    #[test]
    fn test_c2s_seal_open() {
        let raw = seal_c2s(&c2s_header(5), b"clientek ek=x", &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE)
            .unwrap();
        assert_eq!(raw.len(), C2S_HEADER_LEN + 13);
        assert_ne!(&raw[C2S_HEADER_LEN..], b"clientek ek=x");
        let body = open_c2s(&raw, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap();
        assert_eq!(body, b"clientek ek=x");
    }

    #[test]
    fn test_header_is_authenticated() {
        let mut raw =
            seal_c2s(&c2s_header(5), b"clientinit", &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap();
        raw[9] ^= 0x01;
        assert!(matches!(
            open_c2s(&raw, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let raw =
            seal_c2s(&c2s_header(5), b"clientinit", &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap();
        assert!(open_c2s(&raw, &[0u8; 16], &BOOTSTRAP_NONCE).is_err());
    }

    #[test]
    fn test_s2c_ack_round_trip() {
        let header = S2CHeader::encrypted(PacketType::Ack, 0);
        let raw = seal_s2c(&header, &[0x00, 0x02], &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap();
        assert_eq!(raw.len(), 13);
        assert_eq!(raw[10], 0x26);
        assert_eq!(open_s2c(&raw, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap(), vec![0x00, 0x02]);
    }
}
