use crate::Warning;
use crate::log::backup::{gz_path, partial_path};
use crate::log::warnings::WarningChannel;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Gzips a frozen archive next to itself and removes the plaintext.
///
/// The compressed data is written to `<archive>.gz.tmp`, synced, and renamed
/// to `<archive>.gz`. The plaintext is only removed after that rename. If the
/// archive disappears before finalization (retention pruned it), the partial
/// output is discarded and `Ok(None)` is returned.
pub(crate) fn compress_archive(
    archive: &Path,
    level: u32,
    fs_lock: &Mutex<()>,
) -> io::Result<Option<PathBuf>> {
    let partial = partial_path(archive);

    let result = write_gzip(archive, &partial, level).and_then(|written| {
        if !written {
            return Ok(None);
        }

        let _guard = fs_lock.lock();
        if !archive.exists() {
            remove_if_exists(&partial)?;
            return Ok(None);
        }

        let gz = gz_path(archive);
        std::fs::rename(&partial, &gz)?;
        std::fs::remove_file(archive)?;
        Ok(Some(gz))
    });

    if result.is_err() {
        let _ = remove_if_exists(&partial);
    }

    result
}

/// Returns `false` when the archive no longer exists.
fn write_gzip(archive: &Path, partial: &Path, level: u32) -> io::Result<bool> {
    let input = match File::open(archive) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let output = File::create(partial)?;
    let mut encoder = GzEncoder::new(output, flate2::Compression::new(level));
    io::copy(&mut BufReader::new(input), &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;

    Ok(true)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn run_job(archive: &Path, level: u32, fs_lock: &Mutex<()>, warnings: &WarningChannel) {
    match compress_archive(archive, level, fs_lock) {
        Ok(Some(gz)) => debug!("compressed {}", gz.display()),
        Ok(None) => debug!("{} was removed before compression", archive.display()),
        Err(e) => warnings.report(Warning::Compression {
            path: archive.to_path_buf(),
            source: e,
        }),
    }
}

struct Worker {
    sender: Sender<PathBuf>,
    handle: JoinHandle<()>,
}

/// Compresses archives either inline or on a dedicated worker thread.
///
/// The worker processes archives in rotation order. Failures are reported
/// through the warning channel.
pub(crate) struct Compressor {
    level: Option<u32>,
    fs_lock: Arc<Mutex<()>>,
    warnings: Arc<WarningChannel>,
    worker: Option<Worker>,
}

impl Compressor {
    pub(crate) fn new(
        level: Option<u32>,
        background: bool,
        fs_lock: Arc<Mutex<()>>,
        warnings: Arc<WarningChannel>,
    ) -> io::Result<Self> {
        let worker = match level {
            Some(level) if background => {
                let (sender, receiver) = mpsc::channel::<PathBuf>();
                let fs_lock = Arc::clone(&fs_lock);
                let warnings = Arc::clone(&warnings);

                let handle = std::thread::Builder::new()
                    .name("log-compress".to_string())
                    .spawn(move || {
                        for archive in receiver {
                            run_job(&archive, level, &fs_lock, &warnings);
                        }
                        debug!("compression worker stopped");
                    })?;

                Some(Worker { sender, handle })
            }
            _ => None,
        };

        Ok(Self {
            level,
            fs_lock,
            warnings,
            worker,
        })
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.level.is_some()
    }

    /// Compresses `archive`, or queues it when running in the background.
    pub(crate) fn submit(&self, archive: PathBuf) {
        let Some(level) = self.level else {
            return;
        };

        match &self.worker {
            Some(worker) => {
                if let Err(mpsc::SendError(archive)) = worker.sender.send(archive) {
                    // Worker is gone; keep the archive compressed anyway.
                    error!("compression worker unavailable, compressing inline");
                    run_job(&archive, level, &self.fs_lock, &self.warnings);
                }
            }
            None => run_job(&archive, level, &self.fs_lock, &self.warnings),
        }
    }

    /// Waits for queued archives to be compressed and stops the worker.
    pub(crate) fn shutdown(&mut self) {
        let Some(Worker { sender, handle }) = self.worker.take() else {
            return;
        };

        drop(sender);
        if handle.join().is_err() {
            error!("compression worker panicked");
        }
    }
}

impl Drop for Compressor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("level", &self.level)
            .field("background", &self.worker.is_some())
            .finish()
    }
}
