#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Pipeline configuration: defaults, JSON file, environment, and CLI overrides.

/// Built-in default values.
pub mod defaults;
/// Configuration error types.
pub mod error;
/// Layered loading.
pub mod loader;
/// Typed configuration model.
pub mod model;
/// Field validation.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_FILE_ENV, load, load_with, read_file};
pub use model::{ConfigOverrides, LoggingSettings, PipelineConfig};
pub use validate::validate;
