//! Probe module for reachability checks.
//!
//! A probe that reaches a verdict (reply, no reply, timeout, unreadable output) always
//! yields a [`Sample`]. [`ProbeError`] is reserved for failures to run the check at all.

mod ping;

pub use ping::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::db::Sample;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("probe i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one reachability check against a target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Sample, ProbeError>;
}
