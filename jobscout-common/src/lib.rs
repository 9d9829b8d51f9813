//! Shared plumbing for JobScout services
//!
//! Provides the common error type, environment configuration, and database
//! initialization used by the engine.

pub mod config;
pub mod db;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
