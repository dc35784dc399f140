//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`check`] - Test a coordinate against the geofences
//! - [`config`] - Configuration management (path, show, init)
//! - [`replay`] - Play a track through a tracking session
//! - [`serve`] - Replay with a WebSocket map renderer bridge

pub mod check;
pub mod common;
pub mod config;
pub mod replay;
pub mod serve;
