//! The persister task: debounced snapshot flushes and settlement backups.
//!
//! Mutating paths only ever signal this task; all disk I/O happens here, on
//! a blocking thread, outside the room lock. Flushes are coalesced so a bid
//! storm costs at most one write per debounce window, while a settlement
//! backup flushes immediately.

use time::OffsetDateTime;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::warn;

use crate::{
    dao::{models::RoomSnapshot, snapshot_store::SnapshotStore},
    state::{PersistJob, SharedState},
};

/// Spawn the persister task.
pub fn spawn(
    state: SharedState,
    store: SnapshotStore,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.config().persist_interval;
        let mut last_flush: Option<Instant> = None;

        while let Some(job) = rx.recv().await {
            let mut backup = job == PersistJob::Backup;

            // Hold back until the debounce window since the last flush has
            // passed, unless a backup demands an immediate write.
            if !backup && let Some(last) = last_flush {
                sleep_until(last + interval).await;
            }
            // Coalesce whatever queued up in the meantime.
            while let Ok(queued) = rx.try_recv() {
                backup |= queued == PersistJob::Backup;
            }

            let snapshot = RoomSnapshot::from(&*state.room().await);
            let store = store.clone();
            let written = tokio::task::spawn_blocking(move || {
                store.save(&snapshot)?;
                if backup {
                    store.write_backup(&snapshot, OffsetDateTime::now_utc())?;
                }
                Ok::<_, crate::dao::storage::StorageError>(())
            })
            .await;

            match written {
                Ok(Ok(())) => last_flush = Some(Instant::now()),
                Ok(Err(err)) => {
                    // Leave last_flush untouched; the next signal retries.
                    warn!(error = %err, "snapshot flush failed");
                }
                Err(err) => warn!(error = %err, "snapshot writer task panicked"),
            }
        }
    })
}
