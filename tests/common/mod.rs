//! Scripted handshake client shared by the integration tests.
//!
//! The client speaks the wire format directly. It cannot derive the shared secret on
//! its own (the license chain yields mismatched halves), so `client_init` takes the
//! server's EK scalar and computes the same secret the server does.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use tsproto_handshake::core::command::Command;
use tsproto_handshake::core::header::{C2SHeader, HeaderTag, PacketFlags, PacketType};
use tsproto_handshake::core::init::{c2s_init_header, Init0, Init1, Init2, Init3, Init4};
use tsproto_handshake::core::packet::{Marshal, Unmarshal};
use tsproto_handshake::crypto::aead::{self, BOOTSTRAP_KEY, BOOTSTRAP_NONCE};
use tsproto_handshake::crypto::keys::{self, Direction, SharedSecret};
use tsproto_handshake::crypto::omega::OmegaKey;
use tsproto_handshake::crypto::puzzle;
use tsproto_handshake::protocol::commands::{ClientEk, ClientInitIv, InitIvExpand2};

pub const VERSION: u32 = 1_700_000_000;

pub struct ScriptedClient {
    pub signing_key: SigningKey,
    pub ek_secret: Scalar,
    pub alpha: [u8; 10],
    pub random0: [u8; 4],
    next_command_id: u16,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let mut alpha = [0u8; 10];
        OsRng.fill_bytes(&mut alpha);
        let mut random0 = [0u8; 4];
        OsRng.fill_bytes(&mut random0);
        Self {
            signing_key: SigningKey::random(&mut OsRng),
            ek_secret: Scalar::from_bytes_mod_order(seed),
            alpha,
            random0,
            next_command_id: 0,
        }
    }

    pub fn ek(&self) -> [u8; 32] {
        EdwardsPoint::mul_base(&self.ek_secret).compress().to_bytes()
    }

    pub fn omega(&self) -> OmegaKey {
        OmegaKey::from_verifying_key(&VerifyingKey::from(&self.signing_key))
    }

    pub fn init0(&self) -> Vec<u8> {
        Init0 {
            header: c2s_init_header(),
            version_timestamp: VERSION,
            timestamp: VERSION,
            random0: self.random0,
        }
        .marshal()
        .unwrap()
    }

    pub fn init2(&self, init1_raw: &[u8]) -> Vec<u8> {
        let init1 = Init1::unmarshal(init1_raw).expect("server should answer with Init1");
        let mut reversed = init1.random0;
        reversed.reverse();
        Init2 {
            header: c2s_init_header(),
            version_timestamp: VERSION,
            random1: init1.random1,
            random0_reversed: reversed,
        }
        .marshal()
        .unwrap()
    }

    pub fn client_init_iv(&self) -> Command {
        ClientInitIv {
            alpha: self.alpha.to_vec(),
            omega: self.omega(),
            ot: Some("1".into()),
            ip: Some(String::new()),
        }
        .to_command()
        .unwrap()
    }

    /// Solve the Init3 puzzle and attach `clientinitiv`.
    pub fn init4(&self, init3_raw: &[u8]) -> Vec<u8> {
        let init3 = Init3::unmarshal(init3_raw).expect("server should answer with Init3");
        let y = puzzle::solve(&init3.x, &init3.n, init3.level).unwrap();
        self.init4_with_answer(init3_raw, y)
    }

    /// Echo the Init3 puzzle with an arbitrary answer.
    pub fn init4_with_answer(&self, init3_raw: &[u8], y: [u8; 64]) -> Vec<u8> {
        let init3 = Init3::unmarshal(init3_raw).expect("server should answer with Init3");
        Init4 {
            header: c2s_init_header(),
            version_timestamp: VERSION,
            x: init3.x,
            n: init3.n,
            level: init3.level,
            random2: init3.random2,
            y,
            command: self.client_init_iv().to_text().into_bytes(),
        }
        .marshal()
        .unwrap()
    }

    pub fn read_initivexpand2(&self, raw: &[u8]) -> InitIvExpand2 {
        let plaintext = aead::open_s2c(raw, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE)
            .expect("initivexpand2 should open with the bootstrap key");
        InitIvExpand2::from_command(&Command::parse(&plaintext).unwrap()).unwrap()
    }

    fn next_header(&mut self) -> C2SHeader {
        let header = C2SHeader {
            tag: HeaderTag::Mac([0u8; 8]),
            packet_id: self.next_command_id,
            client_id: 0,
            flags: PacketFlags::ENCRYPTED_NEW_PROTOCOL,
            packet_type: PacketType::Command,
        };
        self.next_command_id = self.next_command_id.wrapping_add(1);
        header
    }

    /// `clientek` sealed with the bootstrap key, proof signed over `beta`.
    pub fn clientek(&mut self, beta: &[u8]) -> Vec<u8> {
        let ek = self.ek();
        let digest = ClientEk::proof_digest(&ek, beta);
        let signature: Signature = self.signing_key.sign_prehash(&digest).unwrap();
        let text = ClientEk {
            ek,
            proof: signature.to_der().as_bytes().to_vec(),
        }
        .to_command()
        .to_text();
        let header = self.next_header();
        aead::seal_c2s(&header, text.as_bytes(), &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap()
    }

    /// Secret the server derives for this client.
    pub fn shared_secret(&self, server_ek: &Scalar, beta: &[u8]) -> SharedSecret {
        keys::shared_secret(server_ek, &self.ek(), &self.alpha, beta).unwrap()
    }

    /// `clientinit` sealed with the per-packet key of the next command id.
    pub fn client_init(&mut self, shared: &SharedSecret, nickname: &str) -> Vec<u8> {
        let header = self.next_header();
        let key = keys::packet_key(
            PacketType::Command,
            header.packet_id,
            0,
            Direction::ClientToServer,
            shared.shared_iv(),
        );
        let text = Command::new("clientinit")
            .with("client_nickname", nickname)
            .with("client_version", "3.?.? [Build: 5680278000]")
            .to_text();
        aead::seal_c2s(&header, text.as_bytes(), &key.key, &key.nonce).unwrap()
    }
}
