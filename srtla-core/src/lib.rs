//! SRTLA Proxy Core
//!
//! The aggregation state machine: per-uplink connection records, groups
//! binding many uplinks to one downstream SRT socket, the process-wide
//! registry, the per-packet uplink selector, the janitor sweeps, and the
//! dispatcher event loop that ties them together.

pub mod conn;
pub mod dispatcher;
pub mod group;
pub mod janitor;
pub mod registry;
pub mod resolve;
pub mod selector;

pub use conn::{Conn, CONN_TIMEOUT};
pub use dispatcher::{Dispatcher, DispatchError};
pub use group::{Group, GROUP_TIMEOUT};
pub use janitor::{Janitor, CLEANUP_PERIOD};
pub use registry::{Registry, RegistryError};
pub use resolve::resolve_srt_addr;
pub use selector::{Selector, DECAY_PERIOD};
