//! # mtrack Common Library
//!
//! Shared code for the mtrack media tracker:
//! - Error and result types
//! - Configuration loading (root folder, TOML config file)
//! - Cycle event types and the broadcast EventBus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
