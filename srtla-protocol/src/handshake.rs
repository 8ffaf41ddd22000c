//! SRT Handshake Induction Probe
//!
//! The proxy never terminates SRT, but on startup it checks that a real SRT
//! server is listening at the resolved downstream address. SRT is
//! connection-oriented and stays silent unless a handshake is started, so
//! the probe is a minimal caller-side induction request: a 16-byte control
//! header followed by the 48-byte UDT handshake body. A listening server
//! answers with a same-sized induction response.

use bytes::BufMut;

use crate::packet::SRT_TYPE_HANDSHAKE;

/// Total size of an SRT handshake packet (header + UDT handshake body).
pub const SRT_HANDSHAKE_LEN: usize = 64;

/// UDT protocol version carried in the induction request.
const UDT_VERSION: u32 = 4;

/// Extension field value for a caller induction request.
const INDUCTION_EXT_FIELD: u16 = 2;

/// Handshake type: induction.
const HANDSHAKE_INDUCTION: u32 = 1;

/// Build the induction request used to probe downstream reachability.
pub fn build_induction_probe() -> [u8; SRT_HANDSHAKE_LEN] {
    let mut pkt = [0u8; SRT_HANDSHAKE_LEN];
    let mut cursor = &mut pkt[..];

    // Control header: type, reserved, additional info, timestamp, dst socket id
    cursor.put_u16(SRT_TYPE_HANDSHAKE);
    cursor.put_u16(0);
    cursor.put_u32(0);
    cursor.put_u32(0);
    cursor.put_u32(0);

    // UDT handshake body
    cursor.put_u32(UDT_VERSION);
    cursor.put_u16(0); // encryption field
    cursor.put_u16(INDUCTION_EXT_FIELD);
    cursor.put_u32(0); // initial sequence number
    cursor.put_u32(0); // MTU
    cursor.put_u32(0); // flow window
    cursor.put_u32(HANDSHAKE_INDUCTION);
    cursor.put_u32(0); // socket id
    cursor.put_u32(0); // SYN cookie
    cursor.put_slice(&[0u8; 16]); // peer address

    pkt
}
