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
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic backup/restore operation model.
//!
//! Layout: `model` (descriptors, outcomes, engine events), `classify`
//! (informational message classification), `service` (observer contract),
//! `error` (descriptor and operation failure taxonomy).

pub mod classify;
pub mod error;
pub mod model;
pub mod service;

pub use classify::{
    CANNOT_OPEN_BACKUP_DEVICE, FatalPattern, MessageClass, MessageClassifier,
    TERMINATING_ABNORMALLY,
};
pub use error::{DescriptorError, DescriptorResult, OperationFailure};
pub use model::{
    EngineEvent, OperationDescriptor, OperationDescriptorBuilder, OperationFlags, OperationKind,
    OperationOutcome, OperationState, OutcomeSummary, ProgressGranularity,
};
pub use service::{NoopObserver, OperationObserver};
