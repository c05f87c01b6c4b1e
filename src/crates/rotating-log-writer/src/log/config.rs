use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, WriterError};

/// Controls when the active segment should be rotated
///
/// The segment rotates before a write that would take it past
/// `max_segment_bytes`, or once it is older than `max_segment_age`.
#[derive(Debug, Copy, Clone)]
pub struct RotationPolicy {
    /// Maximum segment size in bytes
    pub max_segment_bytes: u64,
    /// Maximum time a non-empty segment stays active
    pub max_segment_age: Option<Duration>,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_segment_bytes: 10 * 1024 * 1024,
            max_segment_age: None,
        }
    }
}

impl RotationPolicy {
    /// Specifies the maximum segment size.
    pub fn with_max_segment_bytes(mut self, max_segment_bytes: u64) -> Self {
        self.max_segment_bytes = max_segment_bytes;
        self
    }

    /// Specifies the maximum age of the active segment.
    pub fn with_max_segment_age(mut self, max_segment_age: Duration) -> Self {
        self.max_segment_age = Some(max_segment_age);
        self
    }
}

/// Controls when backups should be deleted.
///
/// Backups are removed to satisfy *all* configured limits. Removal starts with
/// the oldest backup first.
#[derive(Debug, Copy, Clone)]
pub struct RetentionPolicy {
    /// Maximum number of backups to keep
    pub max_backups: usize,
    /// Maximum total size of all backups (in bytes)
    pub max_total_size: Option<u64>,
    /// Maximum age of backups to keep
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_backups: 5,
            max_total_size: None,
            max_age: None,
        }
    }
}

impl RetentionPolicy {
    /// Specifies maximum number of backups.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Specifies maximum total size of backups.
    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.max_total_size = Some(max_total_size);
        self
    }

    /// Specifies maximum age of backups.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Codec applied to archived segments
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Compression {
    /// Archives stay as plaintext
    None,
    /// Archives are gzipped with the given level (0-9)
    Gzip { level: u32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Gzip { level: 6 }
    }
}

impl Compression {
    pub(crate) fn gzip_level(&self) -> Option<u32> {
        match self {
            Compression::None => None,
            Compression::Gzip { level } => Some((*level).min(9)),
        }
    }
}

/// Controls how archived segments are compressed
#[derive(Debug, Copy, Clone)]
pub struct CompressionPolicy {
    pub compression: Compression,
    /// Compress on a background thread instead of inside the rotating write
    pub background: bool,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            background: true,
        }
    }
}

impl CompressionPolicy {
    /// Disables compression entirely.
    pub fn disabled() -> Self {
        Self {
            compression: Compression::None,
            background: false,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

/// Configuration for a rotating log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the active segment; backups are created next to it
    pub base_path: PathBuf,
    /// Policy for when to rotate the active segment
    pub rotation_policy: RotationPolicy,
    /// Policy for when to remove old backups
    pub retention_policy: RetentionPolicy,
    /// Policy for compressing archives
    pub compression_policy: CompressionPolicy,
    /// Number of undrained warnings kept before the oldest are dropped
    pub warning_capacity: usize,
}

impl Config {
    /// Creates a new log configuration.
    pub fn new(
        base_path: impl Into<PathBuf>,
        rotation_policy: RotationPolicy,
        retention_policy: RetentionPolicy,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            rotation_policy,
            retention_policy,
            compression_policy: CompressionPolicy::default(),
            warning_capacity: 64,
        }
    }

    /// Specifies the rotation policy of the log
    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = policy;
        self
    }

    /// Specifies the retention policy of the log
    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    /// Specifies the compression policy of archived segments
    pub fn with_compression_policy(mut self, policy: CompressionPolicy) -> Self {
        self.compression_policy = policy;
        self
    }

    pub fn with_warning_capacity(mut self, warning_capacity: usize) -> Self {
        self.warning_capacity = warning_capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rotation_policy.max_segment_bytes == 0 {
            return Err(WriterError::Config(
                "max segment size must be greater than zero".to_string(),
            ));
        }

        if self.base_path.file_name().is_none() {
            return Err(WriterError::Config(format!(
                "base path has no file name: {}",
                self.base_path.display()
            )));
        }

        if self.base_path.file_name().and_then(|n| n.to_str()).is_none() {
            return Err(WriterError::Config(
                "base path file name contains invalid UTF-8".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the active segment and its backups.
    pub(crate) fn directory(&self) -> &Path {
        match self.base_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}
