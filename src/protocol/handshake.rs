//! Per-peer handshake state machine.
//!
//! ```text
//! LowStart --Init0--> LowP1 --Init2--> LowP3 --Init4--> HighInitIvExpand
//!          <-Init1--        <-Init3--        <-initivexpand2--
//!
//! HighInitIvExpand --clientek--> HighClientInit --clientinit--> Completed
//!                  <---Ack-----
//! ```
//!
//! [`transition`] consumes one datagram and returns the next state together with the
//! outcome. Errors that only concern the datagram keep the current state; session-fatal
//! errors move the session to [`HandshakeState::Aborted`].
//!
//! **Per-Session State**: every secret lives in a [`Session`] owned by exactly one peer,
//! so concurrent handshakes never share mutable state.

use crate::core::command::Command;
use crate::core::header::{C2SHeader, PacketType, S2CHeader};
use crate::core::init::{Init0, Init1, Init2, Init3, Init4, RANDOM1_LEN, RANDOM2_LEN};
use crate::core::packet::{Marshal, Unmarshal};
use crate::crypto::aead::{self, BOOTSTRAP_KEY, BOOTSTRAP_NONCE};
use crate::crypto::keys::{
    self, Direction, GenerationTracker, PacketIdCounter, SharedSecret, BETA_LEN,
};
use crate::crypto::puzzle::{PuzzleChallenge, PuzzleProof};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::commands::{self, ClientEk, ClientInitIv, InitIvExpand2};
use crate::protocol::identity::ServerIdentity;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use rand_core::{OsRng, RngCore};
use std::fmt;
use tracing::{debug, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Handshake progress of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Waiting for Init0.
    LowStart,
    /// Init1 sent, waiting for Init2.
    LowP1,
    /// Puzzle sent, waiting for Init4.
    LowP3,
    /// `initivexpand2` sent, waiting for `clientek`.
    HighInitIvExpand,
    /// Ack sent, waiting for `clientinit`.
    HighClientInit,
    /// `clientinit` received; per-packet keys are established.
    Completed,
    /// A session-fatal error occurred.
    Aborted,
}

impl HandshakeState {
    /// True while the unencrypted init exchange is running.
    pub fn is_low_level(self) -> bool {
        matches!(
            self,
            HandshakeState::LowStart | HandshakeState::LowP1 | HandshakeState::LowP3
        )
    }

    /// True once no further datagram can advance the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Completed | HandshakeState::Aborted)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::LowStart => "LOW_START",
            HandshakeState::LowP1 => "LOW_P1",
            HandshakeState::LowP3 => "LOW_P3",
            HandshakeState::HighInitIvExpand => "HIGH_InitIVExpand",
            HandshakeState::HighClientInit => "HIGH_ClientInit",
            HandshakeState::Completed => "COMPLETED",
            HandshakeState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Output of one transition.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    /// Datagrams to send to the peer, in order.
    pub datagrams: Vec<Vec<u8>>,
    /// The decrypted `clientinit`, once the handshake completes.
    pub completed: Option<Command>,
}

impl Step {
    /// Nothing to send; the datagram was ignored.
    pub fn empty() -> Self {
        Self::default()
    }

    fn reply(datagram: Vec<u8>) -> Self {
        Self {
            datagrams: vec![datagram],
            completed: None,
        }
    }
}

/// Temporary handshake secrets.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct HandshakeSecrets {
    random1: Option<[u8; RANDOM1_LEN]>,
    random2: Option<[u8; RANDOM2_LEN]>,
    alpha: Vec<u8>,
    beta: Option<[u8; BETA_LEN]>,
    #[zeroize(skip)]
    challenge: Option<PuzzleChallenge>,
    #[zeroize(skip)]
    client_key: Option<VerifyingKey>,
    #[zeroize(skip)]
    shared: Option<SharedSecret>,
}

/// Everything a transition may read or update besides the state itself.
pub struct SessionContext {
    puzzle_level: u32,
    secrets: HandshakeSecrets,
    s2c_commands: PacketIdCounter,
    s2c_acks: PacketIdCounter,
    c2s_commands: GenerationTracker,
}

impl SessionContext {
    pub fn new(puzzle_level: u32) -> Self {
        Self {
            puzzle_level,
            secrets: HandshakeSecrets::default(),
            s2c_commands: PacketIdCounter::new(),
            s2c_acks: PacketIdCounter::new(),
            c2s_commands: GenerationTracker::new(),
        }
    }
}

/// One peer's handshake.
pub struct Session {
    state: HandshakeState,
    context: SessionContext,
}

impl Session {
    pub fn new(puzzle_level: u32) -> Self {
        Self {
            state: HandshakeState::LowStart,
            context: SessionContext::new(puzzle_level),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The derived session secret, available from `HighClientInit` on.
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        self.context.secrets.shared.as_ref()
    }

    /// Feed one datagram through [`transition`] and store the resulting state.
    pub fn handle(&mut self, identity: &ServerIdentity, raw: &[u8]) -> Result<Step> {
        let (next, result) = transition(self.state, &mut self.context, identity, raw);
        if next != self.state {
            debug!(from = %self.state, to = %next, "Handshake state changed");
        }
        self.state = next;
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Process one datagram in `state`.
///
/// Ack datagrams are ignored in every state. While the init exchange runs, datagrams
/// without the init magic are ignored; afterwards, init datagrams are ignored as
/// retransmissions.
#[instrument(level = "debug", skip_all, fields(state = %state, len = raw.len()))]
pub fn transition(
    state: HandshakeState,
    context: &mut SessionContext,
    identity: &ServerIdentity,
    raw: &[u8],
) -> (HandshakeState, Result<Step>) {
    let outcome = match state {
        HandshakeState::Aborted => Err(ProtocolError::SessionAborted),
        HandshakeState::Completed => {
            debug!("{}", constants::ERR_SESSION_CLOSED);
            Ok((state, Step::empty()))
        }
        _ => dispatch(state, context, identity, raw),
    };

    match outcome {
        Ok((next, step)) => (next, Ok(step)),
        Err(err) if err.is_session_fatal() => {
            if matches!(
                err,
                ProtocolError::PuzzleVerificationFailed | ProtocolError::SignatureVerificationFailed
            ) {
                warn!(error = %err, "Attack-indicative handshake failure");
            } else {
                debug!(error = %err, "Handshake aborted");
            }
            (HandshakeState::Aborted, Err(err))
        }
        Err(err) => {
            debug!(error = %err, "Datagram dropped");
            (state, Err(err))
        }
    }
}

fn dispatch(
    state: HandshakeState,
    context: &mut SessionContext,
    identity: &ServerIdentity,
    raw: &[u8],
) -> Result<(HandshakeState, Step)> {
    let header = C2SHeader::unmarshal(raw)?;

    if matches!(header.packet_type, PacketType::Ack | PacketType::AckLow) {
        return Ok((state, Step::empty()));
    }
    if state.is_low_level() && !header.tag.is_init_magic() {
        return Ok((state, Step::empty()));
    }
    if !state.is_low_level() && header.packet_type == PacketType::Init {
        return Ok((state, Step::empty()));
    }

    match state {
        HandshakeState::LowStart => on_init0(context, raw),
        HandshakeState::LowP1 => on_init2(context, raw),
        HandshakeState::LowP3 => on_init4(context, identity, raw),
        HandshakeState::HighInitIvExpand => on_client_ek(context, identity, &header, raw),
        HandshakeState::HighClientInit => on_client_init(context, &header, raw),
        HandshakeState::Completed | HandshakeState::Aborted => Ok((state, Step::empty())),
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

fn on_init0(context: &mut SessionContext, raw: &[u8]) -> Result<(HandshakeState, Step)> {
    let init0 = Init0::unmarshal(raw)?;
    let random1 = random_bytes::<RANDOM1_LEN>();
    context.secrets.random1 = Some(random1);

    let init1 = Init1::new(random1, init0.random0);
    debug!(version = init0.version_timestamp, "Init0 accepted");
    Ok((HandshakeState::LowP1, Step::reply(init1.marshal()?)))
}

fn on_init2(context: &mut SessionContext, raw: &[u8]) -> Result<(HandshakeState, Step)> {
    let init2 = Init2::unmarshal(raw)?;
    if context.secrets.random1 != Some(init2.random1) {
        return Err(ProtocolError::CookieMismatch);
    }

    let challenge = PuzzleChallenge::generate(context.puzzle_level);
    let random2 = random_bytes::<RANDOM2_LEN>();
    let init3 = Init3 {
        header: S2CHeader::init(),
        x: challenge.x,
        n: challenge.n,
        level: challenge.level,
        random2,
    };
    context.secrets.challenge = Some(challenge);
    context.secrets.random2 = Some(random2);

    debug!(level = context.puzzle_level, "Puzzle issued");
    Ok((HandshakeState::LowP3, Step::reply(init3.marshal()?)))
}

fn on_init4(
    context: &mut SessionContext,
    identity: &ServerIdentity,
    raw: &[u8],
) -> Result<(HandshakeState, Step)> {
    let init4 = Init4::unmarshal(raw)?;
    let challenge = context
        .secrets
        .challenge
        .as_ref()
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_CHALLENGE.into()))?;

    // Echoed fields must match before any exponentiation.
    if !challenge.matches(&init4.x, &init4.n, init4.level)
        || context.secrets.random2 != Some(init4.random2)
    {
        return Err(ProtocolError::PuzzleVerificationFailed);
    }
    if !challenge.verify(&PuzzleProof { y: init4.y }) {
        return Err(ProtocolError::PuzzleVerificationFailed);
    }

    let command = Command::parse(&init4.command)?;
    let client_init_iv = ClientInitIv::from_command(&command)?;
    let client_key = client_init_iv.omega.to_verifying_key()?;

    let beta = random_bytes::<BETA_LEN>();
    let expand = InitIvExpand2 {
        license: identity.license_bytes().to_vec(),
        beta,
        omega: identity.omega().clone(),
        proof: identity.license_proof().to_vec(),
    };
    let body = expand.to_command()?.to_text();
    let (packet_id, _generation) = context.s2c_commands.next();
    let header = S2CHeader::encrypted(PacketType::Command, packet_id);
    let datagram = aead::seal_s2c(&header, body.as_bytes(), &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE)?;

    context.secrets.alpha = client_init_iv.alpha;
    context.secrets.beta = Some(beta);
    context.secrets.client_key = Some(client_key);
    context.secrets.challenge = None;

    debug!(packet_id, "initivexpand2 sent");
    Ok((HandshakeState::HighInitIvExpand, Step::reply(datagram)))
}

fn require_command_type(header: &C2SHeader) -> Result<()> {
    if matches!(header.packet_type, PacketType::Command | PacketType::CommandLow) {
        Ok(())
    } else {
        Err(ProtocolError::TypeMismatch {
            actual: header.packet_type.code(),
            expected: PacketType::Command.code(),
        })
    }
}

fn on_client_ek(
    context: &mut SessionContext,
    identity: &ServerIdentity,
    header: &C2SHeader,
    raw: &[u8],
) -> Result<(HandshakeState, Step)> {
    require_command_type(header)?;
    let plaintext = aead::open_c2s(raw, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE)?;
    let command = Command::parse(&plaintext)?;
    let client_ek = ClientEk::from_command(&command)?;

    let beta = context
        .secrets
        .beta
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_BETA.into()))?;
    let client_key = context
        .secrets
        .client_key
        .as_ref()
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_OMEGA.into()))?;

    let digest = ClientEk::proof_digest(&client_ek.ek, &beta);
    let signature = Signature::from_der(&client_ek.proof)
        .map_err(|_| ProtocolError::SignatureVerificationFailed)?;
    client_key
        .verify_prehash(&digest, &signature)
        .map_err(|_| ProtocolError::SignatureVerificationFailed)?;

    let shared = keys::shared_secret(
        identity.server_ek().secret(),
        &client_ek.ek,
        &context.secrets.alpha,
        &beta,
    )?;
    context.secrets.shared = Some(shared);
    context.c2s_commands.observe(header.packet_id);

    let (ack_id, _generation) = context.s2c_acks.next();
    let ack_header = S2CHeader::encrypted(PacketType::Ack, ack_id);
    let datagram = aead::seal_s2c(
        &ack_header,
        &header.packet_id.to_be_bytes(),
        &BOOTSTRAP_KEY,
        &BOOTSTRAP_NONCE,
    )?;

    debug!(acked = header.packet_id, "clientek verified, shared secret derived");
    Ok((HandshakeState::HighClientInit, Step::reply(datagram)))
}

fn on_client_init(
    context: &mut SessionContext,
    header: &C2SHeader,
    raw: &[u8],
) -> Result<(HandshakeState, Step)> {
    require_command_type(header)?;
    let shared = context
        .secrets
        .shared
        .as_ref()
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_SHARED_IV.into()))?;

    let generation = context.c2s_commands.generation_for(header.packet_id);
    let packet_key = keys::packet_key(
        header.packet_type,
        header.packet_id,
        generation,
        Direction::ClientToServer,
        shared.shared_iv(),
    );
    let plaintext = aead::open_c2s(raw, &packet_key.key, &packet_key.nonce)?;
    let command = Command::parse(&plaintext)?;
    commands::expect_client_init(&command)?;
    context.c2s_commands.observe(header.packet_id);

    debug!(packet_id = header.packet_id, generation, "clientinit accepted");
    Ok((
        HandshakeState::Completed,
        Step {
            datagrams: Vec::new(),
            completed: Some(command),
        },
    ))
}
