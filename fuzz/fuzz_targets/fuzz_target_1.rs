#![no_main]

use libfuzzer_sys::fuzz_target;
use tsproto_handshake::core::command::AckPacket;
use tsproto_handshake::core::header::S2CHeader;
use tsproto_handshake::core::packet::{Packet, Unmarshal};

fuzz_target!(|data: &[u8]| {
    // Packet decoding must reject, never panic
    let _ = Packet::decode_c2s(data);
    let _ = S2CHeader::unmarshal(data);
    let _ = AckPacket::unmarshal(data);
});
