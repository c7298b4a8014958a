//! Background maintenance
//!
//! One thread per open database drives the periodic work: the deferred
//! log sync under [`SyncPolicy::EverySecond`], the TTL expiration sweep,
//! and the auto-shrink check. Each pass is a plain write transaction, so
//! sweeps serialize with user writers and readers never notice them.

use crate::txn::{DbInner, TxnMode};
use burrow_core::SyncPolicy;
use crate::types::now_millis;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Spawn the maintenance thread for an open database
///
/// The thread parks between passes and exits once the shutdown flag is
/// set (the database handle unparks it on drop).
pub(crate) fn spawn(inner: Arc<DbInner>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("burrow-maintenance".into())
        .spawn(move || {
            info!("maintenance thread started");
            loop {
                thread::park_timeout(inner.config.maintenance_interval);
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tick(&inner);
            }
            info!("maintenance thread stopped");
        })
        .unwrap_or_else(|e| panic!("failed to spawn maintenance thread: {e}"))
}

/// One maintenance pass
fn tick(inner: &DbInner) {
    if inner.poisoned.load(Ordering::SeqCst) {
        return;
    }

    if inner.config.sync_policy == SyncPolicy::EverySecond
        && let Err(e) = inner.log.sync()
    {
        warn!("deferred log sync failed: {e}");
    }

    sweep_expired(inner);

    if !inner.config.auto_shrink_disabled
        && inner.log.needs_shrink(
            inner.config.auto_shrink_percentage,
            inner.config.auto_shrink_min_size,
        )
        && let Err(e) = inner.shrink()
    {
        warn!("auto-shrink failed: {e}");
    }
}

/// Remove records past their TTL through a normal write transaction
fn sweep_expired(inner: &DbInner) {
    let now = now_millis();
    // Cheap read-side check so an idle database never takes the writer lock
    let snapshot = inner.current.read().clone();
    if !snapshot.records().iter().any(|(_, rec)| rec.is_expired(now)) {
        return;
    }

    match inner.begin(TxnMode::ReadWrite) {
        Ok(mut txn) => {
            let removed = txn.purge_expired(now);
            let outcome = if removed > 0 { txn.commit() } else { txn.rollback() };
            match outcome {
                Ok(()) if removed > 0 => debug!("swept {} expired records", removed),
                Ok(()) => {}
                Err(e) => warn!("expiration sweep failed: {e}"),
            }
        }
        Err(e) => warn!("expiration sweep could not begin: {e}"),
    }
}
