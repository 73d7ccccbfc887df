#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use tsproto_handshake::protocol::handshake::Session;
use tsproto_handshake::protocol::identity::ServerIdentity;

static IDENTITY: Lazy<Option<ServerIdentity>> =
    Lazy::new(|| ServerIdentity::generate("Anonymous").ok());

fuzz_target!(|data: &[u8]| {
    let Some(identity) = IDENTITY.as_ref() else {
        return;
    };

    // Split the input into datagrams on 0xFF and feed them to one session
    let mut session = Session::new(1);
    for datagram in data.split(|b| *b == 0xFF).filter(|d| !d.is_empty()) {
        let _ = session.handle(identity, datagram);
    }
});
