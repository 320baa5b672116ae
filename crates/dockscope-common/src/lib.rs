//! # dockscope-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire dockscope workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives the runtime and the server
//! build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod types;
