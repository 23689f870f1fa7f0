//! Filesystem-backed snapshot store with crash-safe writes and timestamped
//! backups.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};
use tracing::{debug, warn};

use crate::dao::{
    models::RoomSnapshot,
    storage::{StorageError, StorageResult},
};

/// Timestamp embedded in backup file names, lexicographically sortable.
const BACKUP_STAMP: &[FormatItem<'_>] =
    format_description!("[year][month][day]-[hour][minute][second]");

/// Store for room snapshots under a single data directory.
///
/// The live snapshot for a room lives at `{data_dir}/{room_id}.json`; backups
/// at `{data_dir}/{room_id}.{stamp}.json`. All methods do blocking I/O and
/// are expected to run on a blocking thread.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
    max_backups: usize,
}

impl SnapshotStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    pub fn new(data_dir: impl Into<PathBuf>, max_backups: usize) -> StorageResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|err| StorageError::io(&data_dir, err))?;
        Ok(Self {
            data_dir,
            max_backups,
        })
    }

    fn live_path(&self, room_id: &str) -> PathBuf {
        self.data_dir.join(format!("{room_id}.json"))
    }

    /// Load the snapshot for a room. A missing file is not an error; a file
    /// that exists but cannot be decoded is.
    pub fn load(&self, room_id: &str) -> StorageResult<Option<RoomSnapshot>> {
        let path = self.live_path(room_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(&path, err)),
        };
        let snapshot =
            serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Some(snapshot))
    }

    /// Atomically replace the live snapshot.
    ///
    /// Writes to a temporary sibling, fsyncs it, renames it over the live
    /// file, then fsyncs the directory so the rename itself is durable.
    pub fn save(&self, snapshot: &RoomSnapshot) -> StorageResult<()> {
        let path = self.live_path(&snapshot.id);
        let tmp = self.data_dir.join(format!("{}.json.tmp", snapshot.id));
        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            StorageError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;

        {
            let mut file = File::create(&tmp).map_err(|err| StorageError::io(&tmp, err))?;
            file.write_all(&body)
                .map_err(|err| StorageError::io(&tmp, err))?;
            file.sync_all().map_err(|err| StorageError::io(&tmp, err))?;
        }
        fs::rename(&tmp, &path).map_err(|err| StorageError::io(&path, err))?;
        sync_dir(&self.data_dir)?;

        debug!(path = %path.display(), version = snapshot.version, "snapshot flushed");
        Ok(())
    }

    /// Write a timestamped backup copy of the snapshot and prune old ones.
    pub fn write_backup(&self, snapshot: &RoomSnapshot, at: OffsetDateTime) -> StorageResult<()> {
        let stamp = at
            .format(BACKUP_STAMP)
            .unwrap_or_else(|_| at.unix_timestamp().to_string());
        let path = self
            .data_dir
            .join(format!("{}.{stamp}.json", snapshot.id));
        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            StorageError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, body).map_err(|err| StorageError::io(&path, err))?;
        self.prune_backups(&snapshot.id);
        Ok(())
    }

    /// Delete the oldest backups beyond the retention limit. Best effort: a
    /// prune failure never fails the backup that triggered it.
    fn prune_backups(&self, room_id: &str) {
        let mut backups = self.list_backups(room_id);
        if backups.len() <= self.max_backups {
            return;
        }
        // Stamps sort lexicographically, newest last.
        backups.sort();
        let excess = backups.len() - self.max_backups;
        for path in backups.into_iter().take(excess) {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to prune backup");
            }
        }
    }

    /// Backup files for a room, excluding the live snapshot.
    fn list_backups(&self, room_id: &str) -> Vec<PathBuf> {
        let prefix = format!("{room_id}.");
        let live = format!("{room_id}.json");
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    return false;
                };
                name.starts_with(&prefix)
                    && name.ends_with(".json")
                    && name != live
                    && !name.ends_with(".json.tmp")
            })
            .collect()
    }
}

fn sync_dir(dir: &Path) -> StorageResult<()> {
    let handle = File::open(dir).map_err(|err| StorageError::io(dir, err))?;
    handle.sync_all().map_err(|err| StorageError::io(dir, err))
}
