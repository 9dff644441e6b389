//! Shared primitives for the Apollo control plane: the wire data model,
//! the authenticated key-exchange box, the connection-token codec and the
//! tracing setup used by every binary.

pub mod api;
pub mod conn;
pub mod cryptobox;
pub mod ids;
pub mod logging;
pub mod time;

pub use time::{AbsoluteTime, NEVER_EXPIRES};
