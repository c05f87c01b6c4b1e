//! Size-bounded log writer with rotation, compression and retention policies
//!
//! This crate provides an append-only log file that rotates once it would
//! grow past a size limit. Rotated segments are archived next to the active
//! file, gzipped (inline or on a background thread) and pruned oldest-first
//! according to a retention policy.
//!
//! ## Usage
//!
//! ```no_run
//! use rotating_log_writer::{Config, RetentionPolicy, RotatingWriter, RotationPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Configure rotation and retention policies
//! let rotation = RotationPolicy::default()
//!     .with_max_segment_bytes(100 * 1024 * 1024); // 100 MB per segment
//!
//! let retention = RetentionPolicy::default()
//!     .with_max_backups(10); // Keep 10 backups max
//!
//! let config = Config::new("/var/log/myapp/app.log", rotation, retention);
//!
//! // Create a log writer
//! let log = RotatingWriter::open(config)?;
//!
//! // Write entries
//! log.write(b"Hello, log!\n")?;
//! log.sync()?;
//!
//! // Housekeeping failures never fail a write, they are collected instead
//! for warning in log.take_warnings() {
//!     eprintln!("{}", warning);
//! }
//!
//! log.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Files
//!
//! - `<base>`: the active segment
//! - `<base>.<YYYYMMDD_HHMMSS>-<counter>`: a rotated archive awaiting compression
//! - `<base>.<YYYYMMDD_HHMMSS>-<counter>.gz`: a compressed backup

mod error;
mod log;

pub use error::{Result, Warning, WriterError};
pub use log::{
    Backup, BackupKey, Compression, CompressionPolicy, Config, RetentionPolicy, RotatingWriter,
    RotationPolicy,
};
