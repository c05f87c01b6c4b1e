mod backup;
pub use backup::{Backup, BackupKey};
use backup::BackupSet;

mod compress;
use compress::Compressor;

mod config;
pub use config::{Compression, CompressionPolicy, Config, RetentionPolicy, RotationPolicy};

mod warnings;
use warnings::WarningChannel;

use crate::{Result, Warning, WriterError};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

fn create_directory(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(WriterError::NotADirectory(path.display().to_string()));
    }

    std::fs::create_dir_all(path)?;
    Ok(())
}

/// The active, appendable log file
struct Segment {
    file: File,
    size: u64,
    opened_at: Instant,
}

impl Segment {
    /// Opens the segment in append mode, resuming size accounting from the
    /// existing file length.
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file,
            size,
            opened_at: Instant::now(),
        })
    }

    fn should_rotate(&self, rotation_policy: &RotationPolicy, incoming: u64) -> bool {
        if self.size == 0 {
            return false;
        }

        if self.size.saturating_add(incoming) > rotation_policy.max_segment_bytes {
            return true;
        }

        rotation_policy
            .max_segment_age
            .is_some_and(|max_age| self.opened_at.elapsed() >= max_age)
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Err(e) = self.file.write_all(buf) {
            // Account for whatever part of the buffer reached the file.
            if let Ok(metadata) = self.file.metadata() {
                self.size = metadata.len();
            }
            return Err(e);
        }

        self.size += buf.len() as u64;
        Ok(())
    }
}

/// Mutable state guarded by the writer lock
struct State {
    segment: Option<Segment>,
    backups: BackupSet,
    compressor: Compressor,
    closed: bool,
}

impl State {
    /// Returns the open segment, reopening it after an earlier failure.
    fn segment(&mut self, base_path: &Path) -> Result<&mut Segment> {
        let segment = match self.segment.take() {
            Some(segment) => segment,
            None => Segment::open(base_path)?,
        };

        Ok(self.segment.insert(segment))
    }

    #[tracing::instrument(skip_all, fields(archive))]
    fn rotate(&mut self, config: &Config, warnings: &WarningChannel) -> Result<()> {
        let base_path = &config.base_path;

        // A segment left closed by an earlier failure is still on disk.
        let segment = match self.segment.take() {
            Some(segment) => segment,
            None => Segment::open(base_path)?,
        };

        if let Err(e) = segment.file.sync_all() {
            self.segment = Some(segment);
            return Err(e.into());
        }
        let size = segment.size;
        drop(segment);

        let archive = self.backups.next_archive_path(Utc::now());
        if let Err(source) = std::fs::rename(base_path, &archive) {
            match Segment::open(base_path) {
                Ok(segment) => self.segment = Some(segment),
                Err(e) => error!("failed to reopen {}: {}", base_path.display(), e),
            }

            return Err(WriterError::Rotation {
                from: base_path.clone(),
                to: archive,
                source,
            });
        }

        tracing::Span::current().record("archive", archive.display().to_string());
        info!(size, "rotated {} to {}", base_path.display(), archive.display());

        if config.retention_policy.max_backups > 0 {
            self.compressor.submit(archive);
        }

        self.backups
            .retain(&config.retention_policy, Utc::now(), warnings);

        self.segment = Some(Segment::open(base_path)?);
        Ok(())
    }
}

/// A size-bounded, append-only log file with rotation and backup retention.
///
/// Writes are serialized by an internal lock, so a single writer can be
/// shared between threads (`&RotatingWriter` implements [`std::io::Write`]).
///
/// Before a write that would take the active segment past
/// `max_segment_bytes`, the segment is renamed to
/// `<base>.<YYYYMMDD_HHMMSS>-<counter>`, optionally gzipped, and a fresh
/// segment is opened. A write larger than the limit into an empty segment
/// is written whole.
pub struct RotatingWriter {
    config: Config,
    state: Mutex<State>,
    warnings: Arc<WarningChannel>,
}

impl RotatingWriter {
    /// Opens (or resumes) the log described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let directory = config.directory().to_path_buf();
        create_directory(&directory)?;

        let base_name = config
            .base_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| WriterError::Config("base path has no file name".to_string()))?;

        let warnings = Arc::new(WarningChannel::new(config.warning_capacity));
        let fs_lock = Arc::new(Mutex::new(()));

        let mut backups = BackupSet::new(directory, base_name, Arc::clone(&fs_lock));
        backups.load()?;

        let policy = config.compression_policy;
        let compressor = Compressor::new(
            policy.compression.gzip_level(),
            policy.background,
            fs_lock,
            Arc::clone(&warnings),
        )?;

        let segment = Segment::open(&config.base_path)?;
        debug!(
            size = segment.size,
            "opened segment {}",
            config.base_path.display()
        );

        // Respect retention policy on startup to clean up any old backups
        let pending = backups.recover(&warnings)?;
        if compressor.is_enabled() && config.retention_policy.max_backups > 0 {
            for archive in pending {
                compressor.submit(archive);
            }
        }
        backups.retain(&config.retention_policy, Utc::now(), &warnings);

        Ok(Self {
            config,
            state: Mutex::new(State {
                segment: Some(segment),
                backups,
                compressor,
                closed: false,
            }),
            warnings,
        })
    }

    /// Opens a log at `base_path` with the given size and backup limits and
    /// default compression.
    pub fn with_limits(
        base_path: impl Into<PathBuf>,
        max_segment_bytes: u64,
        max_backups: usize,
    ) -> Result<Self> {
        let rotation = RotationPolicy::default().with_max_segment_bytes(max_segment_bytes);
        let retention = RetentionPolicy::default().with_max_backups(max_backups);
        Self::open(Config::new(base_path, rotation, retention))
    }

    /// Appends `buf` to the active segment, rotating first if it would
    /// overflow.
    ///
    /// Returns the number of bytes written, which is always `buf.len()`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(WriterError::Closed);
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let incoming = buf.len() as u64;
        let rotate = state
            .segment(&self.config.base_path)?
            .should_rotate(&self.config.rotation_policy, incoming);
        if rotate {
            state.rotate(&self.config, &self.warnings)?;
        }

        state.segment(&self.config.base_path)?.append(buf)?;
        Ok(buf.len())
    }

    /// Rotates the active segment now. Does nothing if it is empty.
    pub fn rotate(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(WriterError::Closed);
        }

        if state.segment(&self.config.base_path)?.size == 0 {
            return Ok(());
        }

        state.rotate(&self.config, &self.warnings)
    }

    /// Syncs all written data to disk, ensuring durability.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        if let Some(segment) = &state.segment {
            segment.file.sync_all()?;
        }
        Ok(())
    }

    /// Flushes and closes the active segment and waits for pending
    /// compressions. Closing an already closed writer is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let result = match state.segment.take() {
            Some(segment) => segment.file.sync_all().map_err(WriterError::from),
            None => Ok(()),
        };

        state.compressor.shutdown();
        debug!("closed {}", self.config.base_path.display());

        result
    }

    /// Size of the active segment in bytes.
    pub fn current_size(&self) -> u64 {
        self.state.lock().segment.as_ref().map_or(0, |s| s.size)
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lists the backups of this log, oldest first.
    pub fn backups(&self) -> Result<Vec<Backup>> {
        Ok(self.state.lock().backups.scan()?)
    }

    /// Drains the warnings reported since the last call.
    pub fn take_warnings(&self) -> Vec<Warning> {
        self.warnings.drain()
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close {}: {}", self.config.base_path.display(), e);
        }
    }
}

impl std::fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("config", &self.config)
            .field("current_size", &self.current_size())
            .finish()
    }
}

impl From<WriterError> for io::Error {
    fn from(error: WriterError) -> Self {
        match error {
            WriterError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

impl Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(RotatingWriter::write(*self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.segment.as_mut() {
            Some(segment) => segment.file.flush(),
            None => Ok(()),
        }
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut &*self)
    }
}
