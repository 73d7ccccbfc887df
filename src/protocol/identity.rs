//! Long-term server identity.
//!
//! Holds the P-256 key that signs the license and the values derived from it once per
//! process: the marshaled license, its signature, the omega form of the public key and
//! the server's ephemeral Edwards keypair.

use crate::config::HandshakeConfig;
use crate::core::packet::Marshal;
use crate::crypto::license::{EphemeralKeypair, License};
use crate::crypto::omega::OmegaKey;
use crate::error::{ProtocolError, Result};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

pub struct ServerIdentity {
    signing_key: SigningKey,
    omega: OmegaKey,
    license: License,
    license_bytes: Vec<u8>,
    license_proof: Vec<u8>,
    server_ek: EphemeralKeypair,
}

impl ServerIdentity {
    /// Build the license for `issuer` and sign it with `signing_key`.
    pub fn new(signing_key: SigningKey, issuer: &str) -> Result<Self> {
        let license = License::with_issuer(issuer)?;
        let license_bytes = license.marshal()?;
        let server_ek = license.server_ek()?;
        let omega = OmegaKey::from_verifying_key(signing_key.verifying_key());

        let mut identity = Self {
            signing_key,
            omega,
            license,
            license_bytes,
            license_proof: Vec::new(),
            server_ek,
        };
        identity.license_proof = identity.sign(&identity.license_bytes)?;
        debug!(
            license_len = identity.license_bytes.len(),
            "Server license built"
        );
        Ok(identity)
    }

    /// Identity with a freshly drawn signing key.
    pub fn generate(issuer: &str) -> Result<Self> {
        Self::new(SigningKey::random(&mut OsRng), issuer)
    }

    /// Identity from configuration, drawing a key when none is configured.
    pub fn from_config(config: &HandshakeConfig) -> Result<Self> {
        let identity = match config.identity_key_bytes()? {
            Some(bytes) => {
                let key = SigningKey::from_slice(&bytes)
                    .map_err(|e| ProtocolError::ConfigError(format!("invalid identity_key: {e}")))?;
                Self::new(key, &config.license_issuer)?
            }
            None => Self::generate(&config.license_issuer)?,
        };
        info!(issuer = %config.license_issuer, "Server identity ready");
        Ok(identity)
    }

    /// DER ECDSA signature over SHA-256 of `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        let signature: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| ProtocolError::HandshakeError(format!("signing failed: {e}")))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn omega(&self) -> &OmegaKey {
        &self.omega
    }

    pub fn license(&self) -> &License {
        &self.license
    }

    pub fn license_bytes(&self) -> &[u8] {
        &self.license_bytes
    }

    /// Signature sent as `proof` in `initivexpand2`.
    pub fn license_proof(&self) -> &[u8] {
        &self.license_proof
    }

    pub fn server_ek(&self) -> &EphemeralKeypair {
        &self.server_ek
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use p256::ecdsa::signature::hazmat::PrehashVerifier;

    #[test]
    fn test_license_proof_verifies() {
        let identity = ServerIdentity::generate("Anonymous").unwrap();
        let digest = Sha256::digest(identity.license_bytes());
        let signature = Signature::from_der(identity.license_proof()).unwrap();
        assert!(identity
            .verifying_key()
            .verify_prehash(&digest, &signature)
            .is_ok());
    }

    #[test]
    fn test_omega_matches_signing_key() {
        let identity = ServerIdentity::generate("Anonymous").unwrap();
        assert_eq!(
            &identity.omega().to_verifying_key().unwrap(),
            identity.verifying_key()
        );
        assert_eq!(identity.omega().descriptor, vec![0x00]);
        assert_eq!(identity.omega().key_size, 32);
    }

    #[test]
    fn test_configured_key_is_stable() {
        let config = HandshakeConfig {
            identity_key: Some(STANDARD.encode([7u8; 32])),
            ..HandshakeConfig::default()
        };
        let a = ServerIdentity::from_config(&config).unwrap();
        let b = ServerIdentity::from_config(&config).unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert_eq!(a.license_bytes(), b.license_bytes());
        assert_eq!(a.server_ek().public(), b.server_ek().public());
    }

    #[test]
    fn test_zero_key_rejected() {
        let config = HandshakeConfig {
            identity_key: Some(STANDARD.encode([0u8; 32])),
            ..HandshakeConfig::default()
        };
        assert!(matches!(
            ServerIdentity::from_config(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
