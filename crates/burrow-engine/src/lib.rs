//! BurrowDB storage engine
//!
//! An embedded, transactional, ordered key-value store. All data lives in
//! memory in copy-on-write trees; durability comes from an append-only
//! operation log replayed on open.
//!
//! # Architecture
//!
//! ```text
//!   Database ──┬── current: RwLock<Arc<Snapshot>>   (published state)
//!              ├── writer:  Mutex<()>               (one writer at a time)
//!              ├── Aof                              (append-only log)
//!              └── maintenance thread               (sync / sweep / shrink)
//!
//!   Snapshot ──┬── records: CowTree<String, Arc<Record>>
//!              └── indexes: name -> CowTree<Arc<Record>, ()>  (per comparator)
//! ```
//!
//! A read-only transaction clones the published `Arc<Snapshot>` and reads
//! it untouched for its whole lifetime. A read-write transaction holds the
//! writer mutex, mutates a private copy-on-write clone, and on commit
//! appends its operations to the log and publishes the clone. Structural
//! sharing in [`tree::CowTree`] makes both the clone and the publish cheap.
//!
//! # Example
//!
//! ```no_run
//! use burrow_engine::{Database, Pattern, TxnMode};
//!
//! # fn main() -> burrow_engine::Result<()> {
//! let db = Database::open("data.db")?;
//!
//! db.update(|txn| {
//!     txn.set("user:1", b"alice", None)?;
//!     txn.set("user:2", b"bob", None)?;
//!     Ok(())
//! })?;
//!
//! db.view(|txn| {
//!     for (key, value) in txn.ascend_keys(&Pattern::new("user:*"))? {
//!         println!("{key} = {}", String::from_utf8_lossy(value));
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod compare;
mod log;
mod snapshot;
mod sweep;
pub mod tree;
pub mod txn;
pub mod types;

pub use burrow_core::{DbConfig, Error, Pattern, Result, SyncPolicy};
pub use compare::Comparator;
pub use tree::CowTree;
pub use txn::{Database, Transaction, TxnMode};
pub use types::{IndexDef, Record};
