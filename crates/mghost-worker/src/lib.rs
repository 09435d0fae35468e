//! Watermark job runner.
//!
//! This crate provides:
//! - JSON-argument embed and extract commands
//! - A key ledger mapping issued keys to users
//! - Ledger-backed embedding and identification
//! - Structured job logging

pub mod commands;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;

pub use commands::{IdentifyOutcome, Runner, Tuning, UserEmbedOutcome};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use ledger::{derive_keys, EmbedRecord, KeyLedger, NewRecord};
pub use logging::JobLogger;
