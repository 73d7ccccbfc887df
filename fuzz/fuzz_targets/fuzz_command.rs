#![no_main]

use libfuzzer_sys::fuzz_target;
use tsproto_handshake::core::command::Command;
use tsproto_handshake::core::packet::Unmarshal;
use tsproto_handshake::crypto::license::License;
use tsproto_handshake::crypto::omega::OmegaKey;
use tsproto_handshake::protocol::commands::{ClientEk, ClientInitIv};

fuzz_target!(|data: &[u8]| {
    if let Ok(command) = Command::parse(data) {
        // Rendering a parsed command must parse back to the same command
        let text = command.to_text();
        assert_eq!(Command::parse(text.as_bytes()).ok().as_ref(), Some(&command));

        let _ = ClientInitIv::from_command(&command);
        let _ = ClientEk::from_command(&command);
    }

    if let Ok(omega) = OmegaKey::decode(data) {
        let _ = omega.to_verifying_key();
    }
    if let Ok(license) = License::unmarshal(data) {
        let _ = license.server_ek();
    }
});
