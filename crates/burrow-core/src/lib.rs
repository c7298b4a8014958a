//! BurrowDB Core - Shared types and utilities
//!
//! This crate provides the error taxonomy, key-pattern matching, and
//! configuration types used across the BurrowDB crates.

pub mod config;
pub mod error;
pub mod pattern;

pub use config::{DbConfig, SyncPolicy};
pub use error::{Error, Result};
pub use pattern::Pattern;
