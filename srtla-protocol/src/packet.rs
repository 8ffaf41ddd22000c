//! SRTLA Packet Recognition and Construction
//!
//! SRTLA control packets start with a 16-bit big-endian opcode. SRT packets
//! share the same socket: an SRT header is at least 16 bytes and carries the
//! control flag in bit 7 of the first octet. The proxy only ever inspects
//! those first 16 bytes; everything past them is forwarded untouched.

use bytes::{Buf, BufMut};

/// SRTLA control packet opcodes (first two octets, big-endian).
pub const SRTLA_TYPE_KEEPALIVE: u16 = 0x9000;
pub const SRTLA_TYPE_ACK: u16 = 0x9100;
pub const SRTLA_TYPE_REG1: u16 = 0x9200;
pub const SRTLA_TYPE_REG2: u16 = 0x9201;
pub const SRTLA_TYPE_REG3: u16 = 0x9202;
pub const SRTLA_TYPE_REG_ERR: u16 = 0x9210;
pub const SRTLA_TYPE_REG_NGP: u16 = 0x9211;

/// SRT control packet types as they appear in the first two header octets
/// (control flag already set).
pub const SRT_TYPE_HANDSHAKE: u16 = 0x8000;
pub const SRT_TYPE_ACK: u16 = 0x8002;

/// Length of a full SRTLA group id: 16 client bytes + 16 server bytes.
pub const SRTLA_ID_LEN: usize = 32;

/// REG1 carries the 16-byte client half of the id padded to a full id field.
pub const SRTLA_REG1_LEN: usize = 2 + SRTLA_ID_LEN;

/// REG2 carries the complete 32-byte id.
pub const SRTLA_REG2_LEN: usize = 2 + SRTLA_ID_LEN;

/// Number of SRT data sequence numbers batched into one SRTLA ACK.
pub const RECV_ACK_INT: usize = 10;

/// SRTLA ACK: 4-byte type field followed by `RECV_ACK_INT` sequence numbers.
pub const SRTLA_ACK_LEN: usize = 4 + 4 * RECV_ACK_INT;

/// Minimum length of an SRT header.
pub const SRT_MIN_LEN: usize = 16;

/// Buffer size for one datagram.
pub const MTU: usize = 1500;

/// Maximum uplink connections per group.
pub const MAX_CONNS_PER_GROUP: usize = 16;

/// Maximum concurrently registered groups.
pub const MAX_GROUPS: usize = 200;

fn opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// REG1: exact length, REG1 opcode.
pub fn is_srtla_reg1(buf: &[u8]) -> bool {
    buf.len() == SRTLA_REG1_LEN && opcode(buf) == Some(SRTLA_TYPE_REG1)
}

/// REG2: exact length, REG2 opcode.
pub fn is_srtla_reg2(buf: &[u8]) -> bool {
    buf.len() == SRTLA_REG2_LEN && opcode(buf) == Some(SRTLA_TYPE_REG2)
}

/// KEEPALIVE: bare 2-byte opcode.
pub fn is_srtla_keepalive(buf: &[u8]) -> bool {
    buf.len() == 2 && opcode(buf) == Some(SRTLA_TYPE_KEEPALIVE)
}

/// SRT control packet: full header present and control flag set.
pub fn is_srt_control(buf: &[u8]) -> bool {
    buf.len() >= SRT_MIN_LEN && (buf[0] & 0x80) != 0
}

/// SRT ACK control packet.
pub fn is_srt_ack(buf: &[u8]) -> bool {
    is_srt_control(buf) && opcode(buf) == Some(SRT_TYPE_ACK)
}

/// SRT data packet: full header present and control flag clear.
pub fn is_srt_data(buf: &[u8]) -> bool {
    buf.len() >= SRT_MIN_LEN && (buf[0] & 0x80) == 0
}

/// Extract the 31-bit sequence number of an SRT data packet, or `None` if
/// the buffer is not an SRT data packet.
pub fn srt_data_seq(buf: &[u8]) -> Option<u32> {
    if !is_srt_data(buf) {
        return None;
    }
    let mut header = &buf[..4];
    Some(header.get_u32() & 0x7FFF_FFFF)
}

/// Read the destination socket id (header octets 12..16) of an SRT packet.
pub fn srt_dst_socket_id(buf: &[u8]) -> Option<u32> {
    if buf.len() < SRT_MIN_LEN {
        return None;
    }
    let mut field = &buf[12..16];
    Some(field.get_u32())
}

/// Inbound packet shape on the SRTLA listening socket.
///
/// The dispatcher routes on this sum instead of re-probing the buffer in
/// every handler. `Unknown` covers anything too short to carry an SRT
/// header that is not a recognized SRTLA control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Group registration request; client id half at offset 2.
    Reg1,
    /// Connection registration request; full group id at offset 2.
    Reg2,
    /// Bare keepalive, echoed back to the sender.
    Keepalive,
    /// SRT ACK from the downstream server.
    SrtAck,
    /// SRT data packet with its sequence number.
    SrtData { seq: u32 },
    /// Any other SRT control packet; forwarded without further inspection.
    SrtControl,
    /// Unrecognized or truncated; dropped.
    Unknown,
}

/// Classify one datagram.
pub fn classify(buf: &[u8]) -> PacketKind {
    if is_srtla_reg1(buf) {
        return PacketKind::Reg1;
    }
    if is_srtla_reg2(buf) {
        return PacketKind::Reg2;
    }
    if is_srtla_keepalive(buf) {
        return PacketKind::Keepalive;
    }
    if buf.len() < SRT_MIN_LEN {
        return PacketKind::Unknown;
    }
    if is_srt_ack(buf) {
        return PacketKind::SrtAck;
    }
    if is_srt_control(buf) {
        return PacketKind::SrtControl;
    }
    match srt_data_seq(buf) {
        Some(seq) => PacketKind::SrtData { seq },
        None => PacketKind::Unknown,
    }
}

/// Build a REG2 reply: opcode plus the full 32-byte group id.
pub fn build_reg2(id: &[u8; SRTLA_ID_LEN]) -> [u8; SRTLA_REG2_LEN] {
    let mut pkt = [0u8; SRTLA_REG2_LEN];
    pkt[..2].copy_from_slice(&SRTLA_TYPE_REG2.to_be_bytes());
    pkt[2..].copy_from_slice(id);
    pkt
}

/// Build a REG3 reply (opcode only).
pub fn build_reg3() -> [u8; 2] {
    SRTLA_TYPE_REG3.to_be_bytes()
}

/// Build a REG_ERR reply.
pub fn build_reg_err() -> [u8; 2] {
    SRTLA_TYPE_REG_ERR.to_be_bytes()
}

/// Build a REG_NGP reply (no such group).
pub fn build_reg_ngp() -> [u8; 2] {
    SRTLA_TYPE_REG_NGP.to_be_bytes()
}

/// Build a keepalive packet.
pub fn build_keepalive() -> [u8; 2] {
    SRTLA_TYPE_KEEPALIVE.to_be_bytes()
}

/// Build an SRTLA ACK from a full batch of received sequence numbers.
///
/// The type field is the 16-bit ACK opcode shifted into the high half of a
/// 32-bit word, matching the layout the reference client expects.
pub fn build_ack(seqs: &[u32; RECV_ACK_INT]) -> [u8; SRTLA_ACK_LEN] {
    let mut pkt = [0u8; SRTLA_ACK_LEN];
    {
        let mut cursor = &mut pkt[..];
        cursor.put_u32((SRTLA_TYPE_ACK as u32) << 16);
        for &seq in seqs {
            cursor.put_u32(seq);
        }
    }
    pkt
}

/// Constant-time equality over two id buffers of the same length.
///
/// Group ids are secret capabilities; comparing them with an early-exit
/// memcmp would leak how many leading bytes matched.
pub fn const_time_id_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
