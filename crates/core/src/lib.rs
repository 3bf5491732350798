//! Core library for the Agent Gateway
//!
//! This crate contains the transport-independent building blocks:
//! - Idempotency cache for request deduplication
//! - Session keys, tenant scoping and the session store
//! - Run model, raw run events and per-run registries

pub mod dedupe;
pub mod error;
pub mod run;
pub mod session;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
