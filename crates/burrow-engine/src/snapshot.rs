//! Immutable database snapshots
//!
//! A [`Snapshot`] is a point-in-time view of the record store plus every
//! secondary index. All ordered state lives in copy-on-write trees, so
//! cloning a snapshot is cheap and a clone can be mutated into the next
//! version without disturbing readers of the old one. Records are held as
//! `Arc<Record>` and shared between the primary tree and every index that
//! covers them.

use crate::tree::CowTree;
use crate::types::{IndexDef, LogOp, Record};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A secondary index: comparator-ordered entries over matching records
#[derive(Clone)]
pub(crate) struct SecondaryIndex {
    pub def: IndexDef,
    /// Entries ordered by the comparator over record values, ties broken
    /// by primary key so iteration order is deterministic
    pub entries: CowTree<Arc<Record>, ()>,
}

impl SecondaryIndex {
    fn new(def: IndexDef) -> Self {
        let comparator = def.comparator.clone();
        let entries = CowTree::with_order(move |a: &Arc<Record>, b: &Arc<Record>| {
            comparator
                .compare(&a.value, &b.value)
                .then_with(|| a.key.cmp(&b.key))
        });
        Self { def, entries }
    }

    fn insert(&mut self, rec: &Arc<Record>) {
        if self.def.pattern.matches(&rec.key) {
            self.entries.insert(Arc::clone(rec), ());
        }
    }

    fn remove(&mut self, rec: &Arc<Record>) {
        if self.def.pattern.matches(&rec.key) {
            self.entries.remove(rec);
        }
    }
}

/// Point-in-time view of the record store and all secondary indexes
#[derive(Clone)]
pub(crate) struct Snapshot {
    /// Primary key space, ordered by raw key bytes
    records: CowTree<String, Arc<Record>>,
    indexes: BTreeMap<String, SecondaryIndex>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            records: CowTree::natural(),
            indexes: BTreeMap::new(),
        }
    }

    /// Number of records, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &CowTree<String, Arc<Record>> {
        &self.records
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Record>> {
        self.records.get_with(|k| key.cmp(k.as_str()))
    }

    /// Insert or overwrite a record, keeping every index in step
    pub fn set(&mut self, rec: Arc<Record>) -> Option<Arc<Record>> {
        let old = self.records.insert(rec.key.clone(), Arc::clone(&rec));
        for index in self.indexes.values_mut() {
            if let Some(old) = &old {
                index.remove(old);
            }
            index.insert(&rec);
        }
        old
    }

    /// Remove a record, keeping every index in step
    pub fn delete(&mut self, key: &str) -> Option<Arc<Record>> {
        let old = self.records.remove_with(|k| key.cmp(k.as_str()))?;
        for index in self.indexes.values_mut() {
            index.remove(&old);
        }
        Some(old)
    }

    /// Create an index and back-fill it from all live matching records
    ///
    /// Returns false if the name is taken. Records already past their TTL
    /// at `now` are skipped; the sweeper owns their removal.
    pub fn create_index(&mut self, def: IndexDef, now: u64) -> bool {
        if self.indexes.contains_key(&def.name) {
            return false;
        }
        let mut index = SecondaryIndex::new(def);
        for (_, rec) in self.records.iter() {
            if !rec.is_expired(now) {
                index.insert(rec);
            }
        }
        self.indexes.insert(index.def.name.clone(), index);
        true
    }

    /// Drop an index; returns false if it does not exist
    pub fn drop_index(&mut self, name: &str) -> bool {
        self.indexes.remove(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.get(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Keys of records past their TTL at `now`
    pub fn expired_keys(&self, now: u64) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, rec)| rec.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Apply one replayed log operation
    ///
    /// Replay is lenient about operations that no longer apply (the log
    /// only ever contains operations this engine wrote, but a shrink can
    /// race a crash and drop context a later record assumed).
    pub fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Set {
                key,
                value,
                expires_at,
            } => {
                self.set(Arc::new(Record {
                    key,
                    value,
                    expires_at,
                }));
            }
            LogOp::Delete { key } => {
                self.delete(&key);
            }
            LogOp::CreateIndex { def } => {
                self.create_index(def, crate::types::now_millis());
            }
            LogOp::DropIndex { name } => {
                self.drop_index(&name);
            }
        }
    }

    /// The minimal operation sequence reproducing current live state
    ///
    /// Index definitions first so replayed sets feed straight into them,
    /// then one set per live record. Expired records are dropped.
    pub fn live_ops(&self, now: u64) -> Vec<LogOp> {
        let mut ops = Vec::with_capacity(self.indexes.len() + self.records.len());
        for index in self.indexes.values() {
            ops.push(LogOp::CreateIndex {
                def: index.def.clone(),
            });
        }
        for (_, rec) in self.records.iter() {
            if !rec.is_expired(now) {
                ops.push(LogOp::Set {
                    key: rec.key.clone(),
                    value: rec.value.clone(),
                    expires_at: rec.expires_at,
                });
            }
        }
        ops
    }
}
