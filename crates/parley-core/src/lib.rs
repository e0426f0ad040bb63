//! parley-core: Shared protocol library for the parley chat relay.
//!
//! Provides the line-delimited wire frames exchanged between server and
//! client, the client command grammar, handshake credential parsing, and
//! the common error type.

pub mod error;
pub mod frame;

// Re-export commonly used items at crate root.
pub use error::{ParleyError, ParleyResult};
pub use frame::{Command, Credentials, ServerFrame, BROADCAST_TARGET};
