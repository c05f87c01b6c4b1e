use crate::Warning;
use crate::log::RetentionPolicy;
use crate::log::warnings::WarningChannel;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Second-resolution, lexically sortable timestamp used in archive names.
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

const GZ_SUFFIX: &str = ".gz";
const PARTIAL_SUFFIX: &str = ".gz.tmp";

/// Path of the compressed form of an archive.
pub(crate) fn gz_path(archive: &Path) -> PathBuf {
    append_suffix(archive, GZ_SUFFIX)
}

/// Path an archive is compressed into before being renamed into place.
pub(crate) fn partial_path(archive: &Path) -> PathBuf {
    append_suffix(archive, PARTIAL_SUFFIX)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Identity of a backup: the rotation timestamp plus a counter that orders
/// rotations happening within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackupKey {
    pub timestamp: DateTime<Utc>,
    pub counter: u64,
}

impl Ord for BackupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for BackupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Plain,
    Gzip,
    Partial,
}

/// Parse `<stamp>-<counter>[.gz|.gz.tmp]`, the part of a backup file name
/// after `<base>.`
fn parse_suffix(suffix: &str) -> Option<(BackupKey, FileKind)> {
    let (rest, kind) = if let Some(rest) = suffix.strip_suffix(PARTIAL_SUFFIX) {
        (rest, FileKind::Partial)
    } else if let Some(rest) = suffix.strip_suffix(GZ_SUFFIX) {
        (rest, FileKind::Gzip)
    } else {
        (suffix, FileKind::Plain)
    };

    let (stamp, counter) = rest.split_once('-')?;
    if stamp.len() != STAMP_LEN || counter.is_empty() {
        return None;
    }
    if !counter.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let timestamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()?
        .and_utc();
    let counter = counter.parse().ok()?;

    Some((BackupKey { timestamp, counter }, kind))
}

/// An archived former segment.
///
/// A backup may be present on disk as plaintext, gzip, or both while a
/// compression is in flight. All forms count as a single backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub key: BackupKey,
    /// Uncompressed archive, if still present
    pub plain: Option<PathBuf>,
    /// Compressed archive, if present
    pub gzip: Option<PathBuf>,
    partial: Option<PathBuf>,
    /// Size of the file at [`Backup::path`]
    pub size: u64,
}

impl Backup {
    fn new(key: BackupKey) -> Self {
        Self {
            key,
            plain: None,
            gzip: None,
            partial: None,
            size: 0,
        }
    }

    /// The file readers should use: the gzip archive when it exists.
    pub fn path(&self) -> &Path {
        self.gzip
            .as_deref()
            .or(self.plain.as_deref())
            .or(self.partial.as_deref())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Whether the backup has reached its steady, compressed form.
    pub fn is_compressed(&self) -> bool {
        self.gzip.is_some() && self.plain.is_none()
    }

    fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.plain
            .iter()
            .chain(self.gzip.iter())
            .chain(self.partial.iter())
    }
}

/// The set of backups belonging to one base path.
///
/// Backups are rediscovered from the directory on every scan, so files
/// renamed by the compression worker are always seen in their current form.
#[derive(Debug)]
pub(crate) struct BackupSet {
    directory: PathBuf,
    base_name: String,
    next_counter: u64,
    /// Serializes retention deletes against compression finalization
    fs_lock: Arc<Mutex<()>>,
}

impl BackupSet {
    pub(crate) fn new(directory: PathBuf, base_name: String, fs_lock: Arc<Mutex<()>>) -> Self {
        Self {
            directory,
            base_name,
            next_counter: 0,
            fs_lock,
        }
    }

    /// Scans the directory and seeds the counter past every existing backup.
    pub(crate) fn load(&mut self) -> io::Result<()> {
        self.next_counter = self
            .scan()?
            .iter()
            .map(|b| b.key.counter + 1)
            .max()
            .unwrap_or(0);
        Ok(())
    }

    /// Lists backups, oldest first.
    pub(crate) fn scan(&self) -> io::Result<Vec<Backup>> {
        let prefix = format!("{}.", self.base_name);
        let mut backups: BTreeMap<BackupKey, Backup> = BTreeMap::new();
        let mut sizes: HashMap<PathBuf, u64> = HashMap::new();

        for entry in std::fs::read_dir(&self.directory)? {
            let Ok(entry) = entry else {
                continue;
            };

            let file_name = entry.file_name();
            let Some(suffix) = file_name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };

            let Some((key, kind)) = parse_suffix(suffix) else {
                continue;
            };

            let path = entry.path();
            sizes.insert(path.clone(), entry.metadata().map(|m| m.len()).unwrap_or(0));

            let backup = backups.entry(key).or_insert_with(|| Backup::new(key));
            match kind {
                FileKind::Plain => backup.plain = Some(path),
                FileKind::Gzip => backup.gzip = Some(path),
                FileKind::Partial => backup.partial = Some(path),
            }
        }

        // Only the form readers use counts, also mid-compression.
        Ok(backups
            .into_values()
            .map(|mut backup| {
                backup.size = sizes.get(backup.path()).copied().unwrap_or(0);
                backup
            })
            .collect())
    }

    /// Allocates the archive path for a segment rotated at `now`.
    pub(crate) fn next_archive_path(&mut self, now: DateTime<Utc>) -> PathBuf {
        let name = format!(
            "{}.{}-{:06}",
            self.base_name,
            now.format(STAMP_FORMAT),
            self.next_counter
        );
        self.next_counter += 1;
        self.directory.join(name)
    }

    /// Cleans up after an interrupted compression and returns plaintext
    /// archives that still need compressing.
    pub(crate) fn recover(&self, warnings: &WarningChannel) -> io::Result<Vec<PathBuf>> {
        let _guard = self.fs_lock.lock();
        let mut pending = Vec::new();

        for backup in self.scan()? {
            if let Some(partial) = &backup.partial {
                debug!("removing partial archive {}", partial.display());
                remove_backup_file(partial, warnings);
            }

            match (&backup.plain, &backup.gzip) {
                // The gzip is only renamed into place after it was synced.
                (Some(plain), Some(_)) => remove_backup_file(plain, warnings),
                (Some(plain), None) => pending.push(plain.clone()),
                _ => {}
            }
        }

        Ok(pending)
    }

    /// Removes the oldest backups until every limit of the policy holds.
    ///
    /// Failures to delete are reported as warnings and never abort retention.
    #[tracing::instrument(skip_all, fields(reason))]
    pub(crate) fn retain(
        &self,
        retention_policy: &RetentionPolicy,
        now: DateTime<Utc>,
        warnings: &WarningChannel,
    ) {
        let _guard = self.fs_lock.lock();

        let mut backups = match self.scan() {
            Ok(backups) => backups,
            Err(e) => {
                warnings.report(Warning::Retention {
                    path: self.directory.clone(),
                    source: e,
                });
                return;
            }
        };

        // Remove by backup count limit
        let max_backups = retention_policy.max_backups;
        while backups.len() > max_backups {
            let reason = format!("num_backups({}) > max_backups({})", backups.len(), max_backups);
            tracing::Span::current().record("reason", reason);
            let oldest = backups.remove(0);
            delete_backup(&oldest, warnings);
        }

        // Remove by total size limit
        if let Some(max_total_size) = retention_policy.max_total_size {
            let mut total_size: u64 = backups.iter().map(|b| b.size).sum();
            while total_size > max_total_size && !backups.is_empty() {
                let reason = format!("total_size({}) > max_size({})", total_size, max_total_size);
                tracing::Span::current().record("reason", reason);
                let oldest = backups.remove(0);
                total_size = total_size.saturating_sub(oldest.size);
                delete_backup(&oldest, warnings);
            }
        }

        // Remove by age limit
        if let Some(max_age) = retention_policy.max_age {
            let Ok(max_age) = chrono::Duration::from_std(max_age) else {
                return;
            };
            let cutoff = now - max_age;
            while backups.first().is_some_and(|b| b.key.timestamp < cutoff) {
                tracing::Span::current().record("reason", "age");
                let oldest = backups.remove(0);
                delete_backup(&oldest, warnings);
            }
        }
    }
}

fn delete_backup(backup: &Backup, warnings: &WarningChannel) {
    info!("deleting {}", backup.path().display());
    for path in backup.files() {
        remove_backup_file(path, warnings);
    }
}

fn remove_backup_file(path: &Path, warnings: &WarningChannel) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        // Already gone, e.g. the compressor finished first.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warnings.report(Warning::Retention {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn backup_set(dir: &TempDir) -> BackupSet {
        BackupSet::new(
            dir.path().to_path_buf(),
            "app.log".to_string(),
            Arc::new(Mutex::new(())),
        )
    }

    fn touch(dir: &TempDir, name: &str, len: usize) {
        std::fs::write(dir.path().join(name), vec![b'x'; len]).unwrap();
    }

    #[test]
    fn test_parse_suffix() {
        let (key, kind) = parse_suffix("20240102_030405-000007").unwrap();
        assert_eq!(kind, FileKind::Plain);
        assert_eq!(key.counter, 7);
        assert_eq!(
            key.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );

        assert_eq!(parse_suffix("20240102_030405-1.gz").unwrap().1, FileKind::Gzip);
        assert_eq!(
            parse_suffix("20240102_030405-1.gz.tmp").unwrap().1,
            FileKind::Partial
        );
    }

    #[test]
    fn test_parse_suffix_rejects_foreign_names() {
        assert!(parse_suffix("old").is_none());
        assert!(parse_suffix("20240102-1").is_none());
        assert!(parse_suffix("20241302_030405-1").is_none());
        assert!(parse_suffix("20240102_030405-").is_none());
        assert!(parse_suffix("20240102_030405-x1").is_none());
        assert!(parse_suffix("20240102_030405-1.zst").is_none());
    }

    #[test]
    fn test_archive_names_sort_chronologically() {
        let dir = TempDir::new().unwrap();
        let mut set = backup_set(&dir);

        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let first = set.next_archive_path(t0);
        let second = set.next_archive_path(t0);
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "app.log.20240102_030405-000000"
        );
        assert!(first < second);
    }

    #[test]
    fn test_scan_groups_forms_of_one_backup() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log", 10);
        touch(&dir, "app.log.20240102_030405-000001", 10);
        touch(&dir, "app.log.20240102_030405-000001.gz.tmp", 3);
        touch(&dir, "app.log.20240102_030404-000000.gz", 4);
        touch(&dir, "other.log.20240102_030404-000000.gz", 4);

        let mut set = backup_set(&dir);
        set.load().unwrap();
        let backups = set.scan().unwrap();

        assert_eq!(backups.len(), 2);
        assert!(backups[0].is_compressed());
        assert_eq!(backups[0].key.counter, 0);
        assert_eq!(backups[0].size, 4);
        assert_eq!(backups[1].size, 10);
        assert!(!backups[1].is_compressed());
        assert_eq!(set.next_counter, 2);
    }

    #[test]
    fn test_recover_finishes_interrupted_compression() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log.20240102_030404-000000", 10);
        touch(&dir, "app.log.20240102_030404-000000.gz", 4);
        touch(&dir, "app.log.20240102_030405-000001", 10);
        touch(&dir, "app.log.20240102_030405-000001.gz.tmp", 3);

        let set = backup_set(&dir);
        let warnings = WarningChannel::new(8);
        let pending = set.recover(&warnings).unwrap();

        assert_eq!(
            pending,
            vec![dir.path().join("app.log.20240102_030405-000001")]
        );
        assert!(!dir.path().join("app.log.20240102_030404-000000").exists());
        assert!(!dir.path().join("app.log.20240102_030405-000001.gz.tmp").exists());
        assert!(warnings.drain().is_empty());
    }

    #[test]
    fn test_retain_by_count_removes_oldest() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log.20240102_030405-000002.gz", 1);
        touch(&dir, "app.log.20240102_030404-000001.gz", 1);
        touch(&dir, "app.log.20240102_030404-000000", 1);

        let set = backup_set(&dir);
        let warnings = WarningChannel::new(8);
        let policy = RetentionPolicy::default().with_max_backups(1);
        set.retain(&policy, Utc::now(), &warnings);

        let backups = set.scan().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].key.counter, 2);
    }

    #[test]
    fn test_retain_by_total_size() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log.20240102_030401-000000", 100);
        touch(&dir, "app.log.20240102_030402-000001", 100);
        touch(&dir, "app.log.20240102_030403-000002", 100);

        let set = backup_set(&dir);
        let warnings = WarningChannel::new(8);
        let policy = RetentionPolicy::default()
            .with_max_backups(10)
            .with_max_total_size(250);
        set.retain(&policy, Utc::now(), &warnings);

        let counters: Vec<u64> = set.scan().unwrap().iter().map(|b| b.key.counter).collect();
        assert_eq!(counters, vec![1, 2]);
    }

    #[test]
    fn test_retain_by_total_size_during_compression() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log.20240102_030401-000000.gz", 100);
        touch(&dir, "app.log.20240102_030402-000001", 100);
        touch(&dir, "app.log.20240102_030402-000001.gz.tmp", 80);

        let set = backup_set(&dir);
        let warnings = WarningChannel::new(8);
        let policy = RetentionPolicy::default()
            .with_max_backups(10)
            .with_max_total_size(250);
        set.retain(&policy, Utc::now(), &warnings);

        let counters: Vec<u64> = set.scan().unwrap().iter().map(|b| b.key.counter).collect();
        assert_eq!(counters, vec![0, 1]);
    }

    #[test]
    fn test_retain_by_age() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log.20240101_000000-000000", 1);
        touch(&dir, "app.log.20240102_000000-000001", 1);
        touch(&dir, "app.log.20240103_000000-000002", 1);

        let set = backup_set(&dir);
        let warnings = WarningChannel::new(8);
        let policy = RetentionPolicy::default()
            .with_max_backups(10)
            .with_max_age(std::time::Duration::from_secs(36 * 3600));
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap();
        set.retain(&policy, now, &warnings);

        let counters: Vec<u64> = set.scan().unwrap().iter().map(|b| b.key.counter).collect();
        assert_eq!(counters, vec![1, 2]);
    }
}
