//! Log process supervision for the dockscope dashboard.
//!
//! - [`process`]: spawns external commands and tears them down.
//! - [`registry`]: process-wide table of live log streams.
//! - [`supervisor`]: per-connection state machine that streams a
//!   container's log to a peer.
//! - [`logs`]: one-shot history fetches.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod docker;
pub mod exec;
pub mod logs;
pub mod process;
pub mod registry;
pub mod supervisor;
