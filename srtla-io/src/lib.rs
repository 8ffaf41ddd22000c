//! SRTLA I/O and Platform Abstraction
//!
//! UDP socket construction with the options the proxy needs, plus the
//! wall-clock helpers that drive its timeout bookkeeping.

pub mod socket;
pub mod time;

pub use socket::{bind_listener, connect_downstream, SocketError};
pub use time::{now_secs, PeriodGate};
