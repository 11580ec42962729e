//! Modhub library exports
//!
//! Module repositories: discovery, keyring trust and installation.

pub mod config;
pub mod error;
pub mod repositories;

pub use config::ModhubConfig;
pub use error::{ModhubError, Result};
