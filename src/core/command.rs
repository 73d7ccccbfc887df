//! # Command Packets
//!
//! Text commands of the high-level handshake and the packets that carry them.
//!
//! ```text
//! <name> <key1>=<value1> <key2>=<value2> ...
//! ```
//!
//! Values are escaped so that they never contain a separator. A parameter without `=`
//! is a key with an empty value.

use crate::core::header::{C2SHeader, PacketType, S2CHeader, C2S_HEADER_LEN, S2C_HEADER_LEN};
use crate::core::packet::{Marshal, Unmarshal};
use crate::error::{constants, ProtocolError, Result};

/// Escape table: raw character and the character following the backslash.
const ESCAPES: [(char, char); 9] = [
    ('\\', '\\'),
    ('/', '/'),
    (' ', 's'),
    ('|', 'p'),
    ('\u{0b}', 'v'),
    ('\u{0c}', 'f'),
    ('\t', 't'),
    ('\r', 'r'),
    ('\n', 'n'),
];

/// Escape a parameter value for the wire.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, code)) => {
                out.push('\\');
                out.push(*code);
            }
            None => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`]. Unknown sequences are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(code) => match ESCAPES.iter().find(|(_, esc)| *esc == code) {
                Some((raw, _)) => out.push(*raw),
                None => {
                    out.push('\\');
                    out.push(code);
                }
            },
            None => out.push('\\'),
        }
    }
    out
}

/// Ordered key/value parameters of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams(Vec<(String, String)>);

impl CommandParams {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace a parameter, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CommandParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = CommandParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// A named command with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub params: CommandParams,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: CommandParams::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Look up a parameter that must be present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.params.get(key).ok_or_else(|| {
            ProtocolError::InvalidCommand(format!("{} is missing parameter '{key}'", self.name))
        })
    }

    /// Render the command text.
    pub fn to_text(&self) -> String {
        let mut out = self.name.clone();
        for (key, value) in self.params.iter() {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(value));
        }
        out
    }

    /// Parse command text.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::InvalidCommand(constants::ERR_NOT_UTF8.into()))?;
        let mut parts = text.split(' ').filter(|part| !part.is_empty());
        let name = parts
            .next()
            .ok_or_else(|| ProtocolError::InvalidCommand(constants::ERR_EMPTY_COMMAND.into()))?;

        let mut params = CommandParams::new();
        for part in parts {
            match part.split_once('=') {
                Some((key, value)) => params.insert(key, unescape(value)),
                None => params.insert(part, ""),
            }
        }

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }
}

impl Marshal for Command {
    fn marshal(&self) -> Result<Vec<u8>> {
        Ok(self.to_text().into_bytes())
    }
}

impl Unmarshal for Command {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        Command::parse(raw)
    }
}

/// Server-to-client command packet before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub header: S2CHeader,
    pub command: Command,
}

impl Marshal for CommandPacket {
    fn marshal(&self) -> Result<Vec<u8>> {
        let body = self.command.to_text();
        let mut out = Vec::with_capacity(S2C_HEADER_LEN + body.len());
        out.extend_from_slice(&self.header.marshal());
        out.extend_from_slice(body.as_bytes());
        Ok(out)
    }
}

/// Client-to-server command datagram; the payload is still ciphertext when encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct C2SCommandPacket {
    pub header: C2SHeader,
    pub payload: Vec<u8>,
}

impl Unmarshal for C2SCommandPacket {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        let header = C2SHeader::unmarshal(raw)?;
        if !matches!(
            header.packet_type,
            PacketType::Command | PacketType::CommandLow
        ) {
            return Err(ProtocolError::TypeMismatch {
                actual: header.packet_type.code(),
                expected: PacketType::Command.code(),
            });
        }
        Ok(Self {
            header,
            payload: raw[C2S_HEADER_LEN..].to_vec(),
        })
    }
}

/// Acknowledgement of a received command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub header: S2CHeader,
    pub acked_id: u16,
}

impl AckPacket {
    pub const LEN: usize = S2C_HEADER_LEN + 2;
}

impl Marshal for AckPacket {
    fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.header.marshal());
        out.extend_from_slice(&self.acked_id.to_be_bytes());
        Ok(out)
    }
}

impl Unmarshal for AckPacket {
    fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::LEN {
            return Err(ProtocolError::Incomplete {
                actual: raw.len(),
                expected: ">= 13",
            });
        }
        let header = S2CHeader::unmarshal(raw)?;
        if header.packet_type != PacketType::Ack {
            return Err(ProtocolError::TypeMismatch {
                actual: header.packet_type.code(),
                expected: PacketType::Ack.code(),
            });
        }
        Ok(Self {
            header,
            acked_id: u16::from_be_bytes([raw[11], raw[12]]),
        })
    }
}
