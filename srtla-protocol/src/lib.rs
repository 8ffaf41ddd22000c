//! SRTLA Wire Protocol
//!
//! This crate implements the SRTLA framing layer used between a bonding
//! client and the receiving proxy: recognizers and builders for the SRTLA
//! control packets (REG1/REG2/REG3, REG_ERR, REG_NGP, KEEPALIVE, ACK) and
//! the minimal SRT header probes the proxy needs (control-vs-data bit,
//! ACK subtype, data sequence number, destination socket id). SRT payloads
//! are otherwise treated as opaque.

pub mod handshake;
pub mod packet;

pub use handshake::build_induction_probe;
pub use packet::{
    build_ack, build_keepalive, build_reg2, build_reg3, build_reg_err, build_reg_ngp,
    classify, const_time_id_eq, is_srt_ack, is_srt_control, is_srt_data, is_srtla_keepalive,
    is_srtla_reg1, is_srtla_reg2, srt_data_seq, srt_dst_socket_id, PacketKind,
};
pub use packet::{
    MAX_CONNS_PER_GROUP, MAX_GROUPS, MTU, RECV_ACK_INT, SRTLA_ACK_LEN, SRTLA_ID_LEN,
    SRTLA_REG1_LEN, SRTLA_REG2_LEN, SRT_MIN_LEN,
};
