//! # Omega Key Codec
//!
//! Public keys travel inside `clientinitiv` and `initivexpand2` as an "omega": one outer
//! DER SEQUENCE whose content is four independently encoded values in fixed order.
//!
//! ```text
//! SEQUENCE {
//!     BIT STRING   descriptor   (unused-bit count = (8 - len % 8) % 8)
//!     INTEGER      key size     (32-bit)
//!     INTEGER      X            (unsigned big integer)
//!     INTEGER      Y            (unsigned big integer)
//! }
//! ```
//!
//! The unused-bit count treats the descriptor's byte length as its bit length, which
//! peers expect; a one-byte descriptor `0x00` therefore encodes as `03 02 07 00`.

use crate::error::{constants, ProtocolError, Result};
use der::asn1::{AnyRef, BitStringRef, UintRef};
use der::{Decode, Encode, Reader, SliceReader, Tag, Tagged};
use num_bigint::BigUint;
use p256::ecdsa::VerifyingKey;
use p256::{EncodedPoint, FieldBytes};

/// Byte width of a P-256 affine coordinate.
pub const P256_COORDINATE_LEN: usize = 32;

/// A public key in omega form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmegaKey {
    pub descriptor: Vec<u8>,
    pub key_size: i32,
    pub x: BigUint,
    pub y: BigUint,
}

fn malformed(err: der::Error) -> ProtocolError {
    ProtocolError::MalformedOmega(err.to_string())
}

fn coordinate(value: &BigUint) -> Result<FieldBytes> {
    let bytes = value.to_bytes_be();
    if bytes.len() > P256_COORDINATE_LEN {
        return Err(ProtocolError::InvalidKey(format!(
            "coordinate is {} bytes, expected at most {P256_COORDINATE_LEN}",
            bytes.len()
        )));
    }
    let mut out = FieldBytes::default();
    out[P256_COORDINATE_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

impl OmegaKey {
    /// Omega form of a P-256 verifying key with the descriptor and key size the server
    /// advertises (`0x00`, 32).
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let x = point.x().map(|x| BigUint::from_bytes_be(x)).unwrap_or_default();
        let y = point.y().map(|y| BigUint::from_bytes_be(y)).unwrap_or_default();
        Self {
            descriptor: vec![0x00],
            key_size: P256_COORDINATE_LEN as i32,
            x,
            y,
        }
    }

    /// Interpret X/Y as a point on P-256.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidKey` when the coordinates are oversized or not on the curve.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        let point = EncodedPoint::from_affine_coordinates(
            &coordinate(&self.x)?,
            &coordinate(&self.y)?,
            false,
        );
        VerifyingKey::from_encoded_point(&point)
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))
    }

    /// Encode the four fields and wrap them in the outer sequence.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let unused_bits = ((8 - self.descriptor.len() % 8) % 8) as u8;
        let descriptor = BitStringRef::new(unused_bits, &self.descriptor).map_err(malformed)?;
        let x_bytes = self.x.to_bytes_be();
        let y_bytes = self.y.to_bytes_be();

        let mut content = Vec::new();
        descriptor.encode_to_vec(&mut content).map_err(malformed)?;
        self.key_size.encode_to_vec(&mut content).map_err(malformed)?;
        UintRef::new(&x_bytes)
            .and_then(|x| x.encode_to_vec(&mut content))
            .map_err(malformed)?;
        UintRef::new(&y_bytes)
            .and_then(|y| y.encode_to_vec(&mut content))
            .map_err(malformed)?;

        AnyRef::new(Tag::Sequence, &content)
            .and_then(|outer| outer.to_der())
            .map_err(malformed)
    }

    /// Unwrap the outer sequence and read the four fields in order.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedOmega` if any step fails to parse.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let outer = AnyRef::from_der(raw).map_err(malformed)?;
        if outer.tag() != Tag::Sequence {
            return Err(ProtocolError::MalformedOmega(format!(
                "outer value is {}, expected SEQUENCE",
                outer.tag()
            )));
        }

        let mut reader = SliceReader::new(outer.value()).map_err(malformed)?;
        let descriptor: BitStringRef<'_> = reader.decode().map_err(malformed)?;
        let key_size: i32 = reader.decode().map_err(malformed)?;
        let x: UintRef<'_> = reader.decode().map_err(malformed)?;
        let y: UintRef<'_> = reader.decode().map_err(malformed)?;

        Ok(Self {
            descriptor: descriptor.raw_bytes().to_vec(),
            key_size,
            x: BigUint::from_bytes_be(x.as_bytes()),
            y: BigUint::from_bytes_be(y.as_bytes()),
        })
    }
}
