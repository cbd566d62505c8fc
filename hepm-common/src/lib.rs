//! # hepm-common
//!
//! Shared code for the legacy-record migration services:
//! - Error type used by storage and configuration helpers
//! - Bootstrap configuration (TOML + environment)
//! - SQLite pool initialisation and schema creation
//! - Event bus carrying migration progress events
//! - Timestamp helpers for legacy source timestamps

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
