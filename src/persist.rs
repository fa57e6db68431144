//! Glue between the in-memory alert store and the durable record store.
//!
//! Flushing writes records for alerts that have none yet, deletes the
//! records of tombstoned alerts and only then compacts the tombstones out
//! of memory. Loading replays every readable record in row order; damaged
//! rows skip themselves without failing the rest of the load.

use crate::db::{self, Pool};
use crate::store::AlertStore;
use anyhow::Result;
use tracing::{info, instrument, warn};

#[instrument(skip_all)]
pub async fn flush_store(pool: &Pool, store: &mut AlertStore) -> Result<()> {
    let mut written = 0usize;
    for id in store.unpersisted_ids() {
        let Some(bytes) = store.serialized(id) else {
            continue;
        };
        let dbid = db::insert_alert(pool, &bytes).await?;
        store.set_dbid(id, dbid);
        written += 1;
    }

    let stale = store.removed_dbids();
    for dbid in &stale {
        db::delete_alert(pool, *dbid).await?;
    }
    store.drop_removed();

    if written > 0 || !stale.is_empty() {
        info!(written, deleted = stale.len(), "flushed alert store");
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_store(pool: &Pool, store: &mut AlertStore) -> Result<usize> {
    let rows = db::load_alerts(pool).await?;
    let total = rows.len();
    let mut restored = 0usize;
    for row in rows {
        if store.unserialize_alert(&row.payload, row.id) {
            restored += 1;
        }
    }
    if restored < total {
        warn!(
            skipped = total - restored,
            "some persisted alert records were unreadable"
        );
    }
    info!(restored, "loaded alert store");
    Ok(restored)
}
