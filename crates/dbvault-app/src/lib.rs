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
#![allow(clippy::redundant_pub_crate)]

//! Backup/restore driver built on the operation bridge.
//!
//! Layout:
//! - `cli.rs`: argument parsing, dispatch, and exit codes
//! - `bootstrap.rs`: engine, bridge, and background task wiring
//! - `pipeline.rs`: backup, restore, and artifact cleanup sequencing
//! - `error.rs`: driver errors and exit-code mapping

pub(crate) mod bootstrap;
pub(crate) mod cli;
/// Driver error types.
pub mod error;
/// Operation sequencing.
pub mod pipeline;

pub use cli::run;
pub use error::{AppError, AppResult};
pub use pipeline::{
    BackupOptions, Pipeline, PipelineReport, RestoreOptions, RunOptions, artifact_name,
    expiration_after,
};
