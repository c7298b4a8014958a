//! Database handle and transactions
//!
//! The engine runs one read-write transaction at a time against any number
//! of concurrent read-only transactions. A read-only transaction clones the
//! published snapshot pointer and reads it for its whole lifetime. A
//! read-write transaction takes the writer mutex, builds a private
//! copy-on-write working snapshot, and on commit appends its staged
//! operations to the persistence log before publishing the working snapshot
//! as the new current state. Readers never block and never observe a
//! partial commit.
//!
//! A failed log append poisons the instance: the staged state is discarded
//! and every later write transaction is refused until the database is
//! reopened and replays the log.

use crate::log::Aof;
use crate::snapshot::Snapshot;
use crate::sweep;
use crate::types::{IndexDef, LogOp, Record, now_millis};
use burrow_core::{DbConfig, Error, Pattern, Result, SyncPolicy};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Transaction mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnMode {
    /// Concurrent snapshot reads; writes are refused
    ReadOnly,
    /// Exclusive writer; sees and stages its own mutations
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Open,
    Committed,
    RolledBack,
}

/// Shared engine state behind the public handle
pub(crate) struct DbInner {
    /// Latest committed snapshot; swapped atomically on commit
    pub(crate) current: RwLock<Arc<Snapshot>>,
    /// Single-writer exclusivity
    pub(crate) writer: Mutex<()>,
    pub(crate) log: Aof,
    pub(crate) config: DbConfig,
    /// Set after a persistence failure; refuses further writes
    pub(crate) poisoned: AtomicBool,
    /// Tells the maintenance thread to exit
    pub(crate) shutdown: AtomicBool,
}

impl DbInner {
    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(Error::persistence(
                "instance disabled after an earlier persistence failure",
            ));
        }
        Ok(())
    }

    pub(crate) fn begin(&self, mode: TxnMode) -> Result<Transaction<'_>> {
        match mode {
            TxnMode::ReadOnly => Ok(Transaction {
                db: self,
                mode,
                state: TxnState::Open,
                base: self.current.read().clone(),
                working: None,
                pending: Vec::new(),
                writer_guard: None,
            }),
            TxnMode::ReadWrite => {
                let guard = self.writer.lock();
                // Checked under the mutex so a writer that blocked while
                // the instance failed is refused once it gets the lock
                self.ensure_writable()?;
                let base = self.current.read().clone();
                let working = (*base).clone();
                Ok(Transaction {
                    db: self,
                    mode,
                    state: TxnState::Open,
                    base,
                    working: Some(working),
                    pending: Vec::new(),
                    writer_guard: Some(guard),
                })
            }
        }
    }

    /// Rewrite the log from the current live state
    ///
    /// Takes the writer mutex for the duration so no commit can append to
    /// the file mid-rewrite.
    pub(crate) fn shrink(&self) -> Result<()> {
        self.ensure_writable()?;
        let _guard = self.writer.lock();
        let snapshot = self.current.read().clone();
        self.log.shrink(&snapshot.live_ops(now_millis()))
    }
}

/// An embedded, transactional, ordered key-value store
pub struct Database {
    inner: Arc<DbInner>,
    maintenance: Option<JoinHandle<()>>,
}

impl Database {
    /// Open (or create) a database backed by the log file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, DbConfig::default())
    }

    /// Open with an explicit configuration
    pub fn open_with_config(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let (log, ops) = Aof::open(path)?;
        let replayed = ops.len();
        let mut snapshot = Snapshot::new();
        for op in ops {
            snapshot.apply(op);
        }
        info!(
            "opened database: {} operations replayed into {} records, {} indexes",
            replayed,
            snapshot.len(),
            snapshot.index_count()
        );

        let inner = Arc::new(DbInner {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            log,
            config,
            poisoned: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let maintenance = inner
            .config
            .background_maintenance
            .then(|| sweep::spawn(Arc::clone(&inner)));

        Ok(Self { inner, maintenance })
    }

    /// Begin a transaction
    ///
    /// A read-write transaction blocks here until it holds the writer
    /// mutex; use [`Self::try_begin_write`] to fail fast instead.
    pub fn begin(&self, mode: TxnMode) -> Result<Transaction<'_>> {
        self.inner.begin(mode)
    }

    /// Begin a read-write transaction, or fail with [`Error::WriterBusy`]
    /// if another one is open
    pub fn try_begin_write(&self) -> Result<Transaction<'_>> {
        let Some(guard) = self.inner.writer.try_lock() else {
            return Err(Error::WriterBusy);
        };
        self.inner.ensure_writable()?;
        let base = self.inner.current.read().clone();
        let working = (*base).clone();
        Ok(Transaction {
            db: &self.inner,
            mode: TxnMode::ReadWrite,
            state: TxnState::Open,
            base,
            working: Some(working),
            pending: Vec::new(),
            writer_guard: Some(guard),
        })
    }

    /// Run a closure inside a read-only transaction
    pub fn view<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let txn = self.begin(TxnMode::ReadOnly)?;
        let out = f(&txn);
        txn.rollback()?;
        out
    }

    /// Run a closure inside a read-write transaction, committing on `Ok`
    /// and rolling back on `Err`
    pub fn update<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut txn = self.begin(TxnMode::ReadWrite)?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    /// Number of records in the latest committed snapshot, including
    /// expired records not yet swept
    pub fn len(&self) -> usize {
        self.inner.current.read().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force a rewrite of the persistence log from live state
    ///
    /// Takes the writer mutex. The mutex is not reentrant, so calling this
    /// from a thread that holds an open read-write transaction deadlocks;
    /// commit or roll back first.
    pub fn shrink(&self) -> Result<()> {
        self.inner.shrink()
    }

    /// Flush and fsync the persistence log
    pub fn sync(&self) -> Result<()> {
        self.inner.log.sync()
    }

    /// Shut down the maintenance thread and sync the log
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.maintenance.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
        if !self.inner.poisoned.load(Ordering::SeqCst)
            && let Err(e) = self.inner.log.sync()
        {
            warn!("final log sync on close failed: {e}");
        }
    }
}

/// A transaction against one snapshot of the store
///
/// Obtained from [`Database::begin`]. Reads in a read-write transaction see
/// the transaction's own staged writes; reads in a read-only transaction
/// see the snapshot taken at begin and nothing later.
pub struct Transaction<'db> {
    db: &'db DbInner,
    mode: TxnMode,
    state: TxnState,
    /// Snapshot at begin time
    base: Arc<Snapshot>,
    /// Private working copy; `None` in read-only mode
    working: Option<Snapshot>,
    /// Staged operations, applied to the log on commit in order
    pending: Vec<LogOp>,
    writer_guard: Option<MutexGuard<'db, ()>>,
}

impl Transaction<'_> {
    /// The mode this transaction was begun with
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == TxnState::Open {
            Ok(())
        } else {
            Err(Error::InvalidTransactionState)
        }
    }

    /// The snapshot reads go against
    fn snapshot(&self) -> &Snapshot {
        self.working.as_ref().unwrap_or(&self.base)
    }

    /// Read the value for a key
    ///
    /// A record past its TTL reads as absent even before the sweeper has
    /// removed it.
    pub fn get(&self, key: &str) -> Result<&[u8]> {
        self.ensure_open()?;
        match self.snapshot().get(key) {
            Some(rec) if !rec.is_expired(now_millis()) => Ok(&rec.value),
            _ => Err(Error::KeyNotFound(key.into())),
        }
    }

    /// Remaining time to live for a key; `None` means no TTL
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_open()?;
        let now = now_millis();
        match self.snapshot().get(key) {
            Some(rec) if !rec.is_expired(now) => Ok(rec
                .expires_at
                .map(|t| Duration::from_millis(t.saturating_sub(now)))),
            _ => Err(Error::KeyNotFound(key.into())),
        }
    }

    /// Number of records visible to this transaction, including expired
    /// records not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether this transaction sees no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all secondary indexes
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.snapshot().index_names()
    }

    /// Insert or overwrite a key, returning the previous value if any
    pub fn set(
        &mut self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let Some(working) = self.working.as_mut() else {
            return Err(Error::ReadOnly);
        };
        let expires_at = ttl.map(|d| now_millis().saturating_add(d.as_millis() as u64));
        self.pending.push(LogOp::Set {
            key: key.into(),
            value: value.to_vec(),
            expires_at,
        });
        let old = working.set(Arc::new(Record {
            key: key.into(),
            value: value.to_vec(),
            expires_at,
        }));
        Ok(old.map(|rec| rec.value.clone()))
    }

    /// Remove a key, returning its value
    ///
    /// Deleting a missing key is an error; an expired-but-unswept record
    /// counts as missing and is left for the sweeper.
    pub fn delete(&mut self, key: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let Some(working) = self.working.as_mut() else {
            return Err(Error::ReadOnly);
        };
        let absent = match working.get(key) {
            None => true,
            Some(rec) => rec.is_expired(now_millis()),
        };
        if absent {
            return Err(Error::KeyNotFound(key.into()));
        }
        let Some(old) = working.delete(key) else {
            return Err(Error::KeyNotFound(key.into()));
        };
        self.pending.push(LogOp::Delete { key: key.into() });
        Ok(old.value.clone())
    }

    /// Create a secondary index over keys matching a pattern
    ///
    /// Existing matching records are back-filled immediately; the
    /// definition is persisted with the commit and rebuilt on replay.
    pub fn create_index(&mut self, def: IndexDef) -> Result<()> {
        self.ensure_open()?;
        let Some(working) = self.working.as_mut() else {
            return Err(Error::ReadOnly);
        };
        if !working.create_index(def.clone(), now_millis()) {
            return Err(Error::DuplicateIndex(def.name));
        }
        self.pending.push(LogOp::CreateIndex { def });
        Ok(())
    }

    /// Drop a secondary index
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let Some(working) = self.working.as_mut() else {
            return Err(Error::ReadOnly);
        };
        if !working.drop_index(name) {
            return Err(Error::IndexNotFound(name.into()));
        }
        self.pending.push(LogOp::DropIndex { name: name.into() });
        Ok(())
    }

    /// Ascending key-order iteration over keys matching a pattern
    ///
    /// Seeks to the pattern's literal prefix and stops past it, so a
    /// prefixed pattern never scans the whole key space. Expired records
    /// are skipped.
    pub fn ascend_keys(&self, pattern: &Pattern) -> Result<impl Iterator<Item = (&str, &[u8])>> {
        self.ensure_open()?;
        let pattern = pattern.clone();
        let prefix = pattern.literal_prefix().to_string();
        let now = now_millis();
        let iter = self
            .snapshot()
            .records()
            .iter_from_with(|k| prefix.as_str().cmp(k.as_str()));
        Ok(iter
            .take_while(move |(k, _)| k.starts_with(prefix.as_str()))
            .filter(move |(k, rec)| pattern.matches(k) && !rec.is_expired(now))
            .map(|(k, rec)| (k.as_str(), rec.value.as_slice())))
    }

    /// Descending key-order iteration over keys matching a pattern
    pub fn descend_keys(&self, pattern: &Pattern) -> Result<impl Iterator<Item = (&str, &[u8])>> {
        self.ensure_open()?;
        let pattern = pattern.clone();
        let prefix = pattern.literal_prefix().to_string();
        let now = now_millis();
        let records = self.snapshot().records();
        // Start just past the last possible key with the prefix
        let iter = match prefix_successor(&prefix) {
            Some(upper) => records.iter_rev_below_with(|k| upper.as_str().cmp(k.as_str())),
            None => records.iter_rev(),
        };
        Ok(iter
            .take_while(move |(k, _)| k.starts_with(prefix.as_str()))
            .filter(move |(k, rec)| pattern.matches(k) && !rec.is_expired(now))
            .map(|(k, rec)| (k.as_str(), rec.value.as_slice())))
    }

    /// Ascending iteration over an index, in comparator order
    pub fn ascend_index(&self, name: &str) -> Result<impl Iterator<Item = (&str, &[u8])>> {
        self.ensure_open()?;
        let index = self
            .snapshot()
            .index(name)
            .ok_or_else(|| Error::IndexNotFound(name.into()))?;
        let now = now_millis();
        Ok(index
            .entries
            .iter()
            .filter(move |(rec, ())| !rec.is_expired(now))
            .map(|(rec, ())| (rec.key.as_str(), rec.value.as_slice())))
    }

    /// Descending iteration over an index, in reverse comparator order
    pub fn descend_index(&self, name: &str) -> Result<impl Iterator<Item = (&str, &[u8])>> {
        self.ensure_open()?;
        let index = self
            .snapshot()
            .index(name)
            .ok_or_else(|| Error::IndexNotFound(name.into()))?;
        let now = now_millis();
        Ok(index
            .entries
            .iter_rev()
            .filter(move |(rec, ())| !rec.is_expired(now))
            .map(|(rec, ())| (rec.key.as_str(), rec.value.as_slice())))
    }

    /// Delete every record past its TTL at `now`, staging one delete per
    /// record; the maintenance thread drives this
    pub(crate) fn purge_expired(&mut self, now: u64) -> usize {
        let Some(working) = self.working.as_mut() else {
            return 0;
        };
        let keys = working.expired_keys(now);
        for key in &keys {
            working.delete(key);
            self.pending.push(LogOp::Delete { key: key.clone() });
        }
        keys.len()
    }

    /// Commit staged writes
    ///
    /// Operations are appended to the log first (fsynced under
    /// [`SyncPolicy::Always`]), then the working snapshot is published.
    /// If the append fails nothing is published, the instance is poisoned,
    /// and the error is returned.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            self.finish(TxnState::Committed);
            return Ok(());
        }

        // A transaction opened before a persistence failure must not
        // append after it; the log tail may already be garbage
        if let Err(e) = self.db.ensure_writable() {
            self.finish(TxnState::RolledBack);
            return Err(e);
        }

        let sync = self.db.config.sync_policy == SyncPolicy::Always;
        match self.db.log.append(&self.pending, sync) {
            Ok(()) => {
                if let Some(working) = self.working.take() {
                    *self.db.current.write() = Arc::new(working);
                }
                self.finish(TxnState::Committed);
                Ok(())
            }
            Err(e) => {
                self.db.poisoned.store(true, Ordering::SeqCst);
                error!("commit append failed, instance poisoned: {e}");
                self.finish(TxnState::RolledBack);
                Err(e)
            }
        }
    }

    /// Discard all staged writes
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_open()?;
        self.finish(TxnState::RolledBack);
        Ok(())
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.working = None;
        self.pending.clear();
        // Releases the writer mutex
        self.writer_guard = None;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Open && !self.pending.is_empty() {
            debug!(
                "dropping open write transaction; discarding {} staged operations",
                self.pending.len()
            );
        }
    }
}

/// The smallest string ordering after every string with `prefix`
///
/// `None` when no such string exists (empty prefix, or all chars at the
/// maximum code point).
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(c) = chars.pop() {
        if let Some(next) = (c as u32 + 1..=char::MAX as u32).find_map(char::from_u32) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
