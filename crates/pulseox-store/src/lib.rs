//! Tree-structured document store for PulseOx.
//!
//! The store is addressed by slash-separated paths and holds JSON values,
//! mirroring the hierarchical database the product runs against. It
//! supports atomic multi-path updates (fan-out writes), generated
//! chronologically-sortable child keys, and ordered-child queries over a
//! single collection.
//!
//! Two backends are provided:
//! - [`RedbTreeStore`]: persistent, backed by the redb embedded database
//! - [`MemoryTreeStore`]: in-memory, for tests

pub mod error;
pub mod memory;
pub mod push_id;
pub mod redb_store;
pub mod tree;

pub use error::{Result, StoreError};
pub use memory::MemoryTreeStore;
pub use push_id::PushIdGenerator;
pub use redb_store::RedbTreeStore;
pub use tree::{ChildOrder, TreeStore, WriteOp};
