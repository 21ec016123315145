//! Append-only record of finalized clips.
//!
//! Clips are appended by the recording worker only after their writer closed
//! cleanly. `snapshot()` returns an owned copy, so a playback session iterates a
//! stable list even if a later recording session appends more clips.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A completed, finalized clip. Fields are read-only once the archive creates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clip {
    id: u64,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl Clip {
    /// Position in creation order, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wall-clock time the clip's capture started.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Default)]
pub struct ClipArchive {
    clips: RwLock<Vec<Clip>>,
}

impl ClipArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized clip and return it with its assigned id.
    pub fn append(&self, path: PathBuf, created_at: DateTime<Utc>) -> Clip {
        let mut clips = self.clips.write();
        let clip = Clip {
            id: clips.len() as u64 + 1,
            path,
            created_at,
        };
        clips.push(clip.clone());
        log::info!(
            "archive: clip {} recorded at {}",
            clip.id,
            clip.path.display()
        );
        clip
    }

    /// Immutable copy of the archive in creation order.
    pub fn snapshot(&self) -> ArchiveSnapshot {
        ArchiveSnapshot {
            clips: Arc::from(self.clips.read().as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.clips.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.read().is_empty()
    }
}

/// Point-in-time view of the archive, cheap to clone.
#[derive(Clone, Debug)]
pub struct ArchiveSnapshot {
    clips: Arc<[Clip]>,
}

impl ArchiveSnapshot {
    /// Clips in creation order.
    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    /// Clips most-recent first, the order playback uses.
    pub fn newest_first(&self) -> impl Iterator<Item = &Clip> {
        self.clips.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn append_assigns_ids_in_creation_order() {
        let archive = ClipArchive::new();
        let t0 = Utc::now();
        let a = archive.append(PathBuf::from("a.rclip"), t0);
        let b = archive.append(PathBuf::from("b.rclip"), t0 + Duration::seconds(6));

        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        let ids: Vec<u64> = archive.snapshot().clips().iter().map(Clip::id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_appends() {
        let archive = ClipArchive::new();
        archive.append(PathBuf::from("a.rclip"), Utc::now());
        let snapshot = archive.snapshot();

        archive.append(PathBuf::from("b.rclip"), Utc::now());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn newest_first_reverses_creation_order() {
        let archive = ClipArchive::new();
        for name in ["c1", "c2", "c3"] {
            archive.append(PathBuf::from(name), Utc::now());
        }
        let order: Vec<String> = archive
            .snapshot()
            .newest_first()
            .map(|clip| clip.path().display().to_string())
            .collect();
        assert_eq!(order, vec!["c3", "c2", "c1"]);
    }

    #[test]
    fn concurrent_snapshots_see_whole_appends() {
        let archive = Arc::new(ClipArchive::new());
        let writer = {
            let archive = archive.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    archive.append(PathBuf::from(format!("clip_{i}")), Utc::now());
                }
            })
        };
        for _ in 0..200 {
            let snapshot = archive.snapshot();
            for (pos, clip) in snapshot.clips().iter().enumerate() {
                assert_eq!(clip.id(), pos as u64 + 1);
            }
        }
        writer.join().expect("writer thread");
        assert_eq!(archive.len(), 200);
    }
}
