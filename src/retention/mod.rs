use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::format_size;
use crate::naming::{normalize_extension, ChunkName};

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("could not list {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Chunk files found in the storage root
    pub files_found: usize,
    /// Their total size before eviction
    pub bytes_found: u64,
    pub files_removed: usize,
    pub bytes_removed: u64,
    /// Total size of the chunk files left behind
    pub bytes_remaining: u64,
}

/// Keeps the chunk files in a storage root under a byte cap by deleting the
/// oldest ones.
///
/// Only regular files named `YYYY-MM-DD_HH_MM_SS.<ext>` count towards the cap
/// or get deleted. Sweeps on the same `Sweeper` are serialized.
#[derive(Debug)]
pub struct Sweeper {
    root: PathBuf,
    cap: u64,
    extension: String,
    lock: Mutex<()>,
}

impl Sweeper {
    pub fn new(root: impl Into<PathBuf>, cap: u64, extension: &str) -> Self {
        Self {
            root: root.into(),
            cap,
            extension: normalize_extension(extension).to_string(),
            lock: Mutex::new(()),
        }
    }

    /// Scan the root and evict oldest-first until the chunk total is at or
    /// below the cap, or no chunk is left.
    ///
    /// Failing to list the root aborts the sweep. Failing to stat or delete a
    /// single chunk only skips that chunk.
    pub fn sweep(&self) -> Result<SweepReport, SweepError> {
        // A panic mid-sweep leaves nothing to repair, so poisoning is ignored
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        info!("Sweeping {} ...", self.root.display());
        let (candidates, found) = self.scan()?;

        let mut report = SweepReport {
            files_found: candidates.len(),
            bytes_found: found,
            ..Default::default()
        };
        info!(
            "{} files found, total size is {}",
            report.files_found,
            format_size(found)
        );

        report.bytes_remaining = self.evict(candidates, found, &mut report);
        info!("Sweeping done");
        Ok(report)
    }

    /// Delete `candidates` oldest-first while `total` exceeds the cap.
    ///
    /// A chunk that can no longer be stat'ed or removed is skipped and the next
    /// one tried. Returns the total left after eviction.
    fn evict(&self, mut candidates: BTreeSet<ChunkName>, mut total: u64, report: &mut SweepReport) -> u64 {
        if total <= self.cap {
            return total;
        }
        info!(
            "Folder size={} is bigger than maximum value {}, sweeping files...",
            format_size(total),
            format_size(self.cap)
        );

        while total > self.cap {
            let Some(oldest) = candidates.pop_first() else {
                break;
            };
            let path = self.root.join(oldest.file_name());

            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    error!("Could not get stat for {}: {}", path.display(), e);
                    continue;
                }
            };

            info!(
                "Removing file {} captured at {} ...",
                path.display(),
                oldest.captured_at()
            );
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_removed += size;
                    total = total.saturating_sub(size);
                }
                Err(e) => error!("Could not remove file {}: {}", path.display(), e),
            }
        }

        info!(
            "{} files were removed, new folder size is {} ({})",
            report.files_removed,
            format_size(total),
            total
        );
        total
    }

    /// Collect chunk names oldest-first together with their summed size
    fn scan(&self) -> Result<(BTreeSet<ChunkName>, u64), SweepError> {
        let entries = fs::read_dir(&self.root).map_err(|source| {
            error!(
                "Could not read files from {}, cancel sweeping...",
                self.root.display()
            );
            SweepError::List {
                path: self.root.clone(),
                source,
            }
        })?;

        let mut candidates = BTreeSet::new();
        let mut total: u64 = 0;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.root.display(), e);
                    continue;
                }
            };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(chunk) = ChunkName::parse(file_name, &self.extension) else {
                debug!("Ignoring {}", file_name);
                continue;
            };

            match entry.metadata() {
                Ok(meta) if meta.is_file() => {
                    debug!("Found chunk {} ({} bytes)", file_name, meta.len());
                    total = total.saturating_add(meta.len());
                    candidates.insert(chunk);
                }
                Ok(_) => debug!("Ignoring non-file {}", file_name),
                Err(e) => warn!("Could not get stat for {}: {}", file_name, e),
            }
        }

        Ok((candidates, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_sized(dir: &Path, name: &str, size: usize) {
        fs::write(dir.join(name), vec![0u8; size]).unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sweep_evicts_oldest_until_under_cap() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.mp4", 400_000);
        write_sized(dir.path(), "2024-01-01_00_00_02.mp4", 400_000);
        write_sized(dir.path(), "2024-01-01_00_00_03.mp4", 400_000);
        write_sized(dir.path(), "2024-01-01_00_00_04.mp4", 0);

        let sweeper = Sweeper::new(dir.path(), 1_000_000, "mp4");
        let report = sweeper.sweep().unwrap();

        assert_eq!(
            report,
            SweepReport {
                files_found: 4,
                bytes_found: 1_200_000,
                files_removed: 1,
                bytes_removed: 400_000,
                bytes_remaining: 800_000,
            }
        );
        assert_eq!(
            names(dir.path()),
            vec![
                "2024-01-01_00_00_02.mp4",
                "2024-01-01_00_00_03.mp4",
                "2024-01-01_00_00_04.mp4"
            ]
        );
    }

    #[test]
    fn test_sweep_under_cap_removes_nothing() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.mp4", 100);
        write_sized(dir.path(), "2024-01-01_00_00_02.mp4", 100);

        let report = Sweeper::new(dir.path(), 200, "mp4").sweep().unwrap();
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.bytes_remaining, 200);
        assert_eq!(names(dir.path()).len(), 2);
    }

    #[test]
    fn test_second_sweep_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        for second in 0..10 {
            write_sized(dir.path(), &format!("2024-01-01_00_00_{second:02}.mp4"), 1000);
        }

        let sweeper = Sweeper::new(dir.path(), 3500, "mp4");
        let first = sweeper.sweep().unwrap();
        assert_eq!(first.files_removed, 7);
        let after_first = names(dir.path());

        let second = sweeper.sweep().unwrap();
        assert_eq!(second.files_removed, 0);
        assert_eq!(second.bytes_found, first.bytes_remaining);
        assert_eq!(names(dir.path()), after_first);
    }

    #[test]
    fn test_unrelated_files_are_never_touched() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.mp4", 500);
        write_sized(dir.path(), "2024-01-01_00_00_02.mkv", 5000);
        write_sized(dir.path(), "notes.txt", 5000);
        write_sized(dir.path(), "2023-01-01_00_00_01.mp4.part", 5000);
        fs::create_dir(dir.path().join("2020-01-01_00_00_00.mp4")).unwrap();

        let report = Sweeper::new(dir.path(), 0, "mp4").sweep().unwrap();
        assert_eq!(report.files_found, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(
            names(dir.path()),
            vec![
                "2020-01-01_00_00_00.mp4",
                "2023-01-01_00_00_01.mp4.part",
                "2024-01-01_00_00_02.mkv",
                "notes.txt"
            ]
        );
    }

    #[test]
    fn test_oldest_first_across_date_boundaries() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-02-01_00_00_00.mp4", 10);
        write_sized(dir.path(), "2023-12-31_23_59_59.mp4", 10);
        write_sized(dir.path(), "2024-01-31_12_00_00.mp4", 10);

        let report = Sweeper::new(dir.path(), 10, "mp4").sweep().unwrap();
        assert_eq!(report.files_removed, 2);
        assert_eq!(names(dir.path()), vec!["2024-02-01_00_00_00.mp4"]);
    }

    #[test]
    fn test_oversized_newest_chunk_empties_directory() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.mp4", 50);
        write_sized(dir.path(), "2024-01-01_00_00_02.mp4", 500);
        write_sized(dir.path(), "keep.txt", 10);

        let report = Sweeper::new(dir.path(), 100, "mp4").sweep().unwrap();
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.bytes_remaining, 0);
        assert_eq!(names(dir.path()), vec!["keep.txt"]);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.MP4", 100);
        write_sized(dir.path(), "2024-01-01_00_00_02.mp4", 100);

        let report = Sweeper::new(dir.path(), 100, ".mp4").sweep().unwrap();
        assert_eq!(report.files_found, 2);
        assert_eq!(names(dir.path()), vec!["2024-01-01_00_00_02.mp4"]);
    }

    #[test]
    fn test_vanished_chunk_is_skipped_during_eviction() {
        let dir = TempDir::new().unwrap();
        for second in 1..=4 {
            write_sized(dir.path(), &format!("2024-01-01_00_00_0{second}.mp4"), 100);
        }

        let sweeper = Sweeper::new(dir.path(), 200, "mp4");
        let (candidates, total) = sweeper.scan().unwrap();
        assert_eq!((candidates.len(), total), (4, 400));

        // Gone between listing and eviction, so its stat fails
        fs::remove_file(dir.path().join("2024-01-01_00_00_01.mp4")).unwrap();

        let mut report = SweepReport::default();
        let remaining = sweeper.evict(candidates, total, &mut report);
        assert_eq!(remaining, 200);
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.bytes_removed, 200);
        assert_eq!(names(dir.path()), vec!["2024-01-01_00_00_04.mp4"]);
    }

    #[test]
    fn test_dotted_extension_counts_toward_cap() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "2024-01-01_00_00_01.tar.gz", 500);
        write_sized(dir.path(), "2024-01-01_00_00_02.gz", 500);

        let report = Sweeper::new(dir.path(), 100, "tar.gz").sweep().unwrap();
        assert_eq!(report.files_found, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(names(dir.path()), vec!["2024-01-01_00_00_02.gz"]);
    }

    #[test]
    fn test_missing_root_aborts_sweep() {
        let dir = TempDir::new().unwrap();
        let sweeper = Sweeper::new(dir.path().join("gone"), 0, "mp4");
        assert!(matches!(sweeper.sweep(), Err(SweepError::List { .. })));
    }

    #[test]
    fn test_concurrent_sweeps_respect_cap() {
        let dir = TempDir::new().unwrap();
        for minute in 0..20 {
            write_sized(dir.path(), &format!("2024-01-01_00_{minute:02}_00.mp4"), 100);
        }

        let sweeper = Arc::new(Sweeper::new(dir.path(), 1000, "mp4"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sweeper = Arc::clone(&sweeper);
                std::thread::spawn(move || sweeper.sweep().unwrap())
            })
            .collect();

        let removed: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap().files_removed)
            .sum();
        assert_eq!(removed, 10, "serialized sweeps evict each chunk once");
        assert_eq!(
            names(dir.path()).first().map(String::as_str),
            Some("2024-01-01_00_10_00.mp4")
        );
    }
}
