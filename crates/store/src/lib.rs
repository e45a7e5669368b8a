// Copyright (C) 2025 the Arbor Authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The transactional item-state storage core of the arbor content
//! repository.
//!
//! The shared state manager holds the process-wide canonical view behind a
//! weak cache and a writer-preference lock; sessions stage work in change
//! logs through local state managers; commits run the update pipeline
//! (reference bookkeeping, referential integrity, stale detection, one
//! atomic store, then event dispatch). Node bundles serialize through the
//! positional binary codec, with oversized binaries in a blob store.
//! Version histories and the import pipeline build on the same primitives.

pub mod blob;
pub mod bundle;
pub mod changelog;
pub mod config;
pub mod events;
pub mod import;
pub mod local;
pub mod ops;
pub mod persistence;
pub mod rwlock;
pub mod shared;
pub mod state;
pub mod txn;
pub mod version;
pub mod virt;

#[cfg(test)]
mod version_tests;

pub use blob::{BlobStore, FsBlobStore, MemBlobStore};
pub use bundle::{BundleCodec, FORMAT_VERSION, NameIndex, NodeBundle, PropertyBundle};
pub use changelog::ChangeLog;
pub use config::StoreConfig;
pub use events::{EventBundle, EventFactory, EventKind, EventListener, RepoEvent, StandardEventFactory};
pub use import::{Importer, NodeInfo, PropInfo, UuidPolicy};
pub use local::{LocalStateManager, ManagerStatus};
pub use persistence::{FjallPersistence, MemPersistence, PersistenceManager};
pub use rwlock::StoreLock;
pub use shared::{SharedStateManager, Update};
pub use state::{
    ChildEntry, ItemData, ItemState, ItemStateRef, ItemStatus, NodeData, NodeReferences,
    PropertyData,
};
pub use txn::{TransactionContext, TransactionalStateManager, VersionCommitListener};
pub use version::VersionManager;
pub use virt::VirtualItemProvider;
