//! Typed views of the high-level handshake commands.
//!
//! | Command | Direction | Parameters |
//! |---|---|---|
//! | `clientinitiv` | C2S, inside Init4 | `alpha`, `omega`, `ot`, `ip` |
//! | `initivexpand2` | S2C | `l`, `beta`, `omega`, `ot`, `proof`, `tvd` |
//! | `clientek` | C2S | `ek`, `proof` |
//! | `clientinit` | C2S | opaque to the handshake |

use crate::core::command::Command;
use crate::crypto::keys::{ALPHA_MAX_LEN, BETA_LEN};
use crate::crypto::omega::OmegaKey;
use crate::error::{constants, ProtocolError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

pub const CLIENT_INIT_IV: &str = "clientinitiv";
pub const INIT_IV_EXPAND2: &str = "initivexpand2";
pub const CLIENT_EK: &str = "clientek";
pub const CLIENT_INIT: &str = "clientinit";

fn expect_name(command: &Command, name: &str) -> Result<()> {
    if command.name == name {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedMessage(format!(
            "expected {name}, got {}",
            command.name
        )))
    }
}

fn decode_param(command: &Command, key: &str) -> Result<Vec<u8>> {
    STANDARD.decode(command.require(key)?).map_err(|e| {
        ProtocolError::InvalidCommand(format!("{} parameter '{key}' is not base64: {e}", command.name))
    })
}

/// `clientinitiv`: the client's alpha salt and long-term key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInitIv {
    pub alpha: Vec<u8>,
    pub omega: OmegaKey,
    pub ot: Option<String>,
    pub ip: Option<String>,
}

impl ClientInitIv {
    pub fn from_command(command: &Command) -> Result<Self> {
        expect_name(command, CLIENT_INIT_IV)?;
        let alpha = decode_param(command, "alpha")?;
        if alpha.len() > ALPHA_MAX_LEN {
            return Err(ProtocolError::InvalidKey(constants::ERR_ALPHA_TOO_LONG.into()));
        }
        let omega = OmegaKey::decode(&decode_param(command, "omega")?)?;
        Ok(Self {
            alpha,
            omega,
            ot: command.params.get("ot").map(str::to_string),
            ip: command.params.get("ip").map(str::to_string),
        })
    }

    pub fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLIENT_INIT_IV)
            .with("alpha", STANDARD.encode(&self.alpha))
            .with("omega", STANDARD.encode(self.omega.encode()?))
            .with("ot", self.ot.clone().unwrap_or_else(|| "1".into()))
            .with("ip", self.ip.clone().unwrap_or_default()))
    }
}

/// `initivexpand2`: license, beta salt and the signed server key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitIvExpand2 {
    pub license: Vec<u8>,
    pub beta: [u8; BETA_LEN],
    pub omega: OmegaKey,
    pub proof: Vec<u8>,
}

impl InitIvExpand2 {
    pub fn to_command(&self) -> Result<Command> {
        Ok(Command::new(INIT_IV_EXPAND2)
            .with("l", STANDARD.encode(&self.license))
            .with("beta", STANDARD.encode(self.beta))
            .with("omega", STANDARD.encode(self.omega.encode()?))
            .with("ot", "1")
            .with("proof", STANDARD.encode(&self.proof))
            .with("tvd", ""))
    }

    pub fn from_command(command: &Command) -> Result<Self> {
        expect_name(command, INIT_IV_EXPAND2)?;
        let beta = decode_param(command, "beta")?;
        let beta: [u8; BETA_LEN] = beta.as_slice().try_into().map_err(|_| {
            ProtocolError::InvalidKey(format!("beta must be {BETA_LEN} bytes, got {}", beta.len()))
        })?;
        Ok(Self {
            license: decode_param(command, "l")?,
            beta,
            omega: OmegaKey::decode(&decode_param(command, "omega")?)?,
            proof: decode_param(command, "proof")?,
        })
    }
}

/// `clientek`: the client's ephemeral Edwards key and its signed proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEk {
    pub ek: [u8; 32],
    pub proof: Vec<u8>,
}

impl ClientEk {
    pub fn from_command(command: &Command) -> Result<Self> {
        expect_name(command, CLIENT_EK)?;
        let ek = decode_param(command, "ek")?;
        let ek: [u8; 32] = ek
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_INVALID_POINT.into()))?;
        Ok(Self {
            ek,
            proof: decode_param(command, "proof")?,
        })
    }

    pub fn to_command(&self) -> Command {
        Command::new(CLIENT_EK)
            .with("ek", STANDARD.encode(self.ek))
            .with("proof", STANDARD.encode(&self.proof))
    }

    /// Digest the client signs: SHA-256 over `ek || beta`.
    pub fn proof_digest(ek: &[u8; 32], beta: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(ek);
        hasher.update(beta);
        hasher.finalize().into()
    }
}

/// Check that a decrypted command is `clientinit`.
pub fn expect_client_init(command: &Command) -> Result<()> {
    expect_name(command, CLIENT_INIT)
}
