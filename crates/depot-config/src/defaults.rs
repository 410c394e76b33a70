//! Default values for configuration sections.
//!
//! # Design
//! - Centralize defaults so the serde model and the env loader agree.

/// Default storage root for the local-disk provider.
pub(crate) const STORAGE_ROOT: &str = "./depot-data";
/// Default log level when neither the file nor `RUST_LOG` provide one.
pub(crate) const LOG_LEVEL: &str = "info";
/// Default timeout for remote URL fetches.
pub(crate) const FETCH_TIMEOUT_SECS: u64 = 30;
/// Default ceiling for a single remote fetch (256 MiB).
pub(crate) const FETCH_MAX_BYTES: u64 = 256 * 1024 * 1024;
/// User agent advertised on remote fetches.
pub(crate) const FETCH_USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));
