//! Core library for colter.
//!
//! This crate contains everything that does not depend on the terminal:
//!
//! - `auth`: master-password encryption, the OS-keyring session cache and
//!   the unlock flow that ties them together
//! - `config`: the YAML config file with its encrypted fields
//! - `api`: GitHub and PyPI clients that produce metric records
//! - `collector`, `sinks`, `cycle`, `scheduler`: the collect-then-dispatch
//!   pipeline and the loop that drives it

pub mod api;
pub mod auth;
pub mod collector;
pub mod config;
pub mod cycle;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod sinks;
pub mod utils;

pub use error::{ConfigError, CredentialError, CryptoError, SinkDispatchError};
