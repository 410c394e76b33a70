#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Typed configuration for the depot storage service.
//!
//! Layout: `model.rs` (typed config sections), `loader.rs` (JSON file and
//! environment overlay), `validate.rs` (post-load validation), `defaults.rs`
//! (default values shared by the model and the loader).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use model::{CheckExistDefaults, DepotConfig, FetchConfig, LogFormatSetting, LoggingSettings};
