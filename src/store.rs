/// The artifact directory: what yt-dlp wrote, how to find it, when to drop it.
///
/// The store never writes file contents; yt-dlp does. It only lists,
/// resolves and deletes.
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{info, warn};

use crate::error::DownloadError;
use crate::models::ArtifactEntry;

/// Suffixes yt-dlp uses for files it has not finished writing.
const IN_PROGRESS_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

/// Result of a purge sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every regular file in the directory, sorted by name.
    ///
    /// LEARNING: `std::fs::read_dir` returns an iterator of Result<DirEntry>.
    /// A failure to open the directory itself is returned with `?`; entries
    /// that vanish mid-listing (a concurrent purge) are just skipped.
    pub fn list(&self) -> io::Result<Vec<ArtifactEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)?.filter_map(|e| e.ok()) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(ArtifactEntry {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size_bytes: metadata.len(),
                modified_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(entries)
    }

    /// Find the single finished file named `<video_id>.<something>`
    /// (yt-dlp picks the extension, so we can't know it ahead of time).
    /// `abc` does not claim `abcdef.mp4`.
    pub fn resolve_by_prefix(&self, video_id: &str) -> Result<ArtifactEntry, DownloadError> {
        let prefix = format!("{video_id}.");
        let mut matches: Vec<ArtifactEntry> = self
            .list()?
            .into_iter()
            .filter(|e| e.filename.starts_with(&prefix))
            .filter(|e| !IN_PROGRESS_SUFFIXES.iter().any(|s| e.filename.ends_with(s)))
            .collect();

        match matches.len() {
            0 => Err(DownloadError::ArtifactNotFound(video_id.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(DownloadError::ArtifactAmbiguous {
                video_id: video_id.to_string(),
                candidates: matches.into_iter().map(|e| e.filename).collect(),
            }),
        }
    }

    /// Map a client-supplied filename to a path inside the directory.
    /// Anything that is not a single plain path component is refused.
    pub fn resolve_file(&self, filename: &str) -> Result<PathBuf, StoreLookupError> {
        let candidate = Path::new(filename);
        let mut components = candidate.components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if filename.is_empty() || !is_plain || filename.contains(['/', '\\']) {
            return Err(StoreLookupError::InvalidName);
        }

        let path = self.dir.join(candidate);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreLookupError::NotFound)
        }
    }

    /// Delete every file last modified more than `max_age` ago.
    pub fn purge_older_than(&self, max_age: Duration) -> io::Result<PurgeReport> {
        self.purge_older_than_at(SystemTime::now(), max_age)
    }

    /// Same sweep against an explicit clock.
    pub fn purge_older_than_at(
        &self,
        now: SystemTime,
        max_age: Duration,
    ) -> io::Result<PurgeReport> {
        self.purge_with(now, max_age, |path| fs::remove_file(path))
    }

    /// Deletions are independent: a failure is recorded and the sweep moves on.
    fn purge_with<F>(
        &self,
        now: SystemTime,
        max_age: Duration,
        mut remove: F,
    ) -> io::Result<PurgeReport>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let mut report = PurgeReport::default();
        for entry in self.list()? {
            let age = now.duration_since(entry.modified_at).unwrap_or_default();
            if age <= max_age {
                continue;
            }
            match remove(&entry.path) {
                Ok(()) => {
                    info!("Removed expired file: {}", entry.filename);
                    report.removed.push(entry.filename);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", entry.filename, e);
                    report.failed.push(entry.filename);
                }
            }
        }
        Ok(report)
    }
}

/// Why a retrieval lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLookupError {
    InvalidName,
    NotFound,
}
