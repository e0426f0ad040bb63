//! parley-server: bounded-admission chat relay.
//!
//! Accepts TCP connections, authenticates them against the credential
//! gateway, admits up to `max_active` concurrent sessions and queues the
//! rest FIFO with periodic wait-time estimates. Admitted sessions exchange
//! line-delimited chat, roster, and file-transfer frames through the router.

pub mod admission;
pub mod config;
pub mod gateway;
pub mod relay;
pub mod roster;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
