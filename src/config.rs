//! Recognized tuning options and their defaults.
//!
//! Loading these from a file is the embedding application's concern; the
//! core only consumes the resolved values.

use std::path::PathBuf;

pub const DEFAULT_BUFFER_CAPACITY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_FLOW_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_BUCKET_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-direction ring size. A single literal larger than this cannot be
    /// reassembled: its oldest bytes get overwritten and the truncated unit
    /// is eventually skipped as malformed.
    pub buffer_capacity_bytes: usize,
    /// A flow with no activity for this long is reclaimed.
    pub flow_idle_timeout_ms: u64,
    /// Width of the idle-expiry time buckets.
    pub bucket_interval_ms: u64,
    /// Recorded for the downstream keyword engine; the core never reads it.
    pub keyword_dictionary_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity_bytes: DEFAULT_BUFFER_CAPACITY_BYTES,
            flow_idle_timeout_ms: DEFAULT_FLOW_IDLE_TIMEOUT_MS,
            bucket_interval_ms: DEFAULT_BUCKET_INTERVAL_MS,
            keyword_dictionary_path: None,
        }
    }
}
