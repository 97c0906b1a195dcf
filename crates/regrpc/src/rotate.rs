//! # Rotating file
//!
//! An append-only log file bounded by size, backup count and backup age.
//! When a write would push the active file past `max_size`, the file is moved
//! aside as `<stem>-<timestamp>[.<n>]<ext>` and a fresh file is opened in its
//! place. Compression and pruning of backups run on a background thread so a
//! rotation costs one rename and one open for the writer.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::NaiveDateTime;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::warn;

const MEGABYTE: u64 = 1024 * 1024;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const STAMP_LEN: usize = "2006-01-02T15-04-05.000".len();

/// Bounds applied to a `RotatingFile`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size at which the active file is rotated, in bytes.
    pub max_size: u64,
    /// Backups older than this are deleted; zero keeps them regardless of age.
    pub max_age: Duration,
    /// Number of backups kept; zero keeps all of them.
    pub max_backups: usize,
    /// Gzip backups after rotation.
    pub compress: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: 512 * MEGABYTE,
            max_age: 7 * DAY,
            max_backups: 7,
            compress: true,
        }
    }
}

/// The backups belonging to one active file.
#[derive(Clone, Debug)]
struct BackupSet {
    dir: PathBuf,
    stem: String,
    ext: String,
}

impl BackupSet {
    fn of(path: &Path) -> Self {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        Self { dir, stem, ext }
    }

    /// A fresh backup name. Backups sharing a stamp get increasing counters so
    /// that name order stays rotation order after older ones are pruned.
    fn next_path(&self) -> io::Result<PathBuf> {
        let stamp = chrono::Local::now().format(STAMP_FORMAT).to_string();
        let next = self
            .entries()?
            .into_iter()
            .filter(|((taken, _), _)| taken.format(STAMP_FORMAT).to_string() == stamp)
            .map(|((_, n), _)| n + 1)
            .max();
        let name = match next {
            None => format!("{}-{}{}", self.stem, stamp, self.ext),
            Some(n) => format!("{}-{}.{}{}", self.stem, stamp, n, self.ext),
        };
        Ok(self.dir.join(name))
    }

    /// Parses `<stem>-<stamp>[.<n>]<ext>[.gz]` into its stamp and counter.
    fn parse(&self, name: &str) -> Option<(NaiveDateTime, u32)> {
        let rest = name.strip_prefix(self.stem.as_str())?.strip_prefix('-')?;
        let rest = rest.strip_suffix(".gz").unwrap_or(rest);
        let rest = rest.strip_suffix(self.ext.as_str())?;

        let stamp = NaiveDateTime::parse_from_str(rest.get(..STAMP_LEN)?, STAMP_FORMAT).ok()?;
        let counter = match rest.get(STAMP_LEN..)? {
            "" => 0,
            tail => {
                let digits = tail.strip_prefix('.')?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()?
            }
        };
        Some((stamp, counter))
    }

    /// Backups oldest first, keyed by the stamp and counter in their names.
    fn entries(&self) -> io::Result<Vec<((NaiveDateTime, u32), PathBuf)>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(key) = self.parse(&name) {
                found.push((key, entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }

    fn prune(&self, policy: &RotationPolicy) -> io::Result<()> {
        let mut backups: Vec<_> = self
            .entries()?
            .into_iter()
            .map(|((stamp, _), path)| (stamp, path))
            .collect();

        if !policy.max_age.is_zero() {
            let now = chrono::Local::now().naive_local();
            let mut kept = Vec::with_capacity(backups.len());
            for (stamp, path) in backups {
                let expired = (now - stamp)
                    .to_std()
                    .is_ok_and(|age| age > policy.max_age);
                if expired {
                    std::fs::remove_file(&path)?;
                } else {
                    kept.push((stamp, path));
                }
            }
            backups = kept;
        }

        if policy.max_backups > 0 && backups.len() > policy.max_backups {
            let excess = backups.len() - policy.max_backups;
            for (_, path) in &backups[..excess] {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    policy: RotationPolicy,
    backups: BackupSet,
    file: File,
    size: u64,
    // Compression and pruning of the last rotation.
    maintenance: Option<JoinHandle<()>>,
}

impl RotatingFile {
    /// Opens (or creates) the active file, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            backups: BackupSet::of(&path),
            path,
            policy,
            file,
            size,
            maintenance: None,
        })
    }

    /// Bytes currently in the active file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Moves the active file aside and starts a new one.
    pub fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.settle();

        let backup = self.backups.next_path()?;
        std::fs::rename(&self.path, &backup)?;
        self.file = open_append(&self.path)?;
        self.size = 0;

        let backups = self.backups.clone();
        let policy = self.policy.clone();
        let job = std::thread::Builder::new()
            .name("log-rotate".into())
            .spawn(move || {
                if policy.compress {
                    if let Err(e) = compress(&backup) {
                        warn!(
                            path = %backup.display(),
                            error = %e,
                            "compressing log backup failed"
                        );
                    }
                }
                if let Err(e) = backups.prune(&policy) {
                    warn!(dir = %backups.dir.display(), error = %e, "pruning log backups failed");
                }
            })?;
        self.maintenance = Some(job);
        Ok(())
    }

    /// Waits for the compression and pruning started by the last rotation.
    pub fn settle(&mut self) {
        if let Some(job) = self.maintenance.take() {
            if job.join().is_err() {
                warn!(path = %self.path.display(), "log backup maintenance panicked");
            }
        }
    }

    /// Lists backups of this file, oldest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .backups
            .entries()?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }
}

/// Each call lands whole in one file: the size check runs once per call, so a
/// buffer is never split across a rotation.
impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > 0 && self.size + buf.len() as u64 > self.policy.max_size {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn compress(path: &Path) -> io::Result<()> {
    let mut input = File::open(path)?;
    let output = File::create(gz_path(path))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    std::fs::remove_file(path)
}
