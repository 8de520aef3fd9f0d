//! Default values applied before any configuration source is read.

/// Database exercised when none is configured.
pub const DEFAULT_DATABASE: &str = "Northwind";
/// Directory holding database data files.
pub const DEFAULT_DATA_DIR: &str = "data";
/// Directory relative backup artifacts resolve against.
pub const DEFAULT_BACKUP_DIR: &str = "backup";
/// Progress notification step in percent.
pub const DEFAULT_PROGRESS_PERCENT: u8 = 10;
/// Years until a full backup set expires.
pub const DEFAULT_EXPIRATION_YEARS: u32 = 10;
/// Log level used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Upper bound accepted for `expiration_years`.
pub(crate) const MAX_EXPIRATION_YEARS: u32 = 100;
