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

//! The transactional wrapper: two-phase commit over a local state manager.
//!
//! A transaction accumulates the change logs of any number of edit
//! sequences in its private log; `prepare` runs the begin phase of the
//! shared pipeline and keeps the write lock for the rest of the
//! transaction, so prepared changes are linearized until `commit` stores
//! them or `rollback` cancels. Within the transaction, reads serve from the
//! private log first — the transaction sees its own writes before commit,
//! other sessions never do.

use std::collections::HashMap;

use ahash::RandomState;
use std::sync::Arc;

use arbor_common::{ItemId, NodeId, PropertyId, StateError};

use crate::changelog::ChangeLog;
use crate::events::{EventFactory, StandardEventFactory};
use crate::local::LocalStateManager;
use crate::shared::{SharedStateManager, Update};
use crate::state::{ItemStateRef, NodeData, NodeReferences, PropertyData};

/// Interested in version items that became durable through a transaction
/// commit (the version manager keeps its global caches in sync this way).
pub trait VersionCommitListener: Send + Sync {
    fn version_items_committed(&self, items: &HashMap<NodeId, ItemStateRef, RandomState>);
}

/// Per-transaction context: the pending change log, the prepared update
/// between the two phases, and transaction-local version items.
#[derive(Default)]
pub struct TransactionContext {
    log: ChangeLog,
    prepared: Option<Update>,
    version_items: HashMap<NodeId, ItemStateRef, RandomState>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_version_item(&mut self, id: NodeId, state: ItemStateRef) {
        self.version_items.insert(id, state);
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }
}

pub struct TransactionalStateManager {
    local: LocalStateManager,
    tx: Option<TransactionContext>,
    factory: Arc<dyn EventFactory>,
    version_listener: Option<Arc<dyn VersionCommitListener>>,
}

impl TransactionalStateManager {
    pub fn new(shared: Arc<SharedStateManager>) -> Self {
        Self {
            local: LocalStateManager::new(shared),
            tx: None,
            factory: Arc::new(StandardEventFactory),
            version_listener: None,
        }
    }

    pub fn set_version_listener(&mut self, listener: Arc<dyn VersionCommitListener>) {
        self.version_listener = Some(listener);
    }

    /// Bind (or with `None`, unbind) the active transaction context.
    pub fn associate(&mut self, tx: Option<TransactionContext>) -> Option<TransactionContext> {
        std::mem::replace(&mut self.tx, tx)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn transaction(&mut self) -> Option<&mut TransactionContext> {
        self.tx.as_mut()
    }

    /// Called before each operation executed on behalf of the transaction.
    pub fn before_operation(&mut self) -> Result<(), StateError> {
        if self.tx.as_ref().is_some_and(|tx| tx.prepared.is_some()) {
            return Err(StateError::IllegalState(
                "transaction is already prepared".into(),
            ));
        }
        Ok(())
    }

    /// Called after each operation; the operation's edits have been merged
    /// by `update`.
    pub fn after_operation(&mut self) -> Result<(), StateError> {
        if self.local.in_edit() {
            return Err(StateError::IllegalState(
                "operation left an open edit sequence".into(),
            ));
        }
        Ok(())
    }

    // The local-manager surface, transaction-aware.

    pub fn edit(&mut self) -> Result<(), StateError> {
        self.local.edit()
    }

    pub fn create_new_node(
        &mut self,
        id: NodeId,
        data: NodeData,
    ) -> Result<ItemStateRef, StateError> {
        self.local.create_new_node(id, data)
    }

    pub fn create_new_property(
        &mut self,
        id: PropertyId,
        data: PropertyData,
    ) -> Result<ItemStateRef, StateError> {
        self.local.create_new_property(id, data)
    }

    pub fn store(&mut self, state: &ItemStateRef) -> Result<(), StateError> {
        self.local.store(state)
    }

    pub fn store_refs(&mut self, refs: NodeReferences) -> Result<(), StateError> {
        self.local.store_refs(refs)
    }

    pub fn destroy(&mut self, state: &ItemStateRef) -> Result<(), StateError> {
        self.local.destroy(state)
    }

    pub fn cancel(&mut self) -> Result<(), StateError> {
        self.local.cancel()
    }

    /// Within a transaction, `update` folds the edit sequence into the
    /// transaction's pending log instead of committing; outside one it
    /// commits as usual.
    pub fn update(&mut self) -> Result<(), StateError> {
        match &mut self.tx {
            Some(tx) => {
                let log = self.local.take_log()?;
                tx.log.merge(log);
                Ok(())
            }
            None => self.local.update(),
        }
    }

    /// The transaction's view: its own pending writes shadow everything
    /// beneath.
    pub fn get_item_state(&mut self, id: &ItemId) -> Result<ItemStateRef, StateError> {
        if let Some(tx) = &self.tx
            && let Some(staged) = tx.log.get(id)?
        {
            return Ok(staged);
        }
        self.local.get_item_state(id)
    }

    pub fn has_item_state(&mut self, id: &ItemId) -> bool {
        if let Some(tx) = &self.tx {
            match tx.log.get(id) {
                Err(_) => return false,
                Ok(Some(_)) => return true,
                Ok(None) => {}
            }
        }
        self.local.has_item_state(id)
    }

    pub fn get_node_references(&self, target: &NodeId) -> Result<NodeReferences, StateError> {
        if let Some(tx) = &self.tx
            && let Some(refs) = tx.log.refs_for(target)
        {
            return Ok(refs.clone());
        }
        self.local.get_node_references(target)
    }

    /// First phase: run the begin phase of the shared pipeline over the
    /// transaction's pending log. The write lock stays held until commit or
    /// rollback.
    pub fn prepare(&mut self) -> Result<(), StateError> {
        let factory = self.factory.clone();
        let shared = self.local.shared().clone();
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| StateError::IllegalState("no transaction associated".into()))?;
        if tx.prepared.is_some() {
            return Err(StateError::IllegalState(
                "transaction is already prepared".into(),
            ));
        }
        tx.prepared = Some(shared.begin_update(&mut tx.log, &*factory)?);
        Ok(())
    }

    /// Second phase: store, notify, dispatch. An unprepared transaction is
    /// prepared on the spot (one-phase commit).
    pub fn commit(&mut self) -> Result<(), StateError> {
        if self.tx.is_none() {
            return Err(StateError::IllegalState("no transaction associated".into()));
        }
        if !self.tx.as_ref().unwrap().is_prepared() {
            self.prepare()?;
        }
        let mut tx = self.tx.take().unwrap();
        let update = tx.prepared.take().unwrap();
        let result = update.end();
        tx.log.reset();
        if result.is_ok()
            && let Some(listener) = &self.version_listener
        {
            listener.version_items_committed(&tx.version_items);
        }
        result
    }

    /// Cancel the prepared update (if any) and undo the pending log against
    /// the shared view.
    pub fn rollback(&mut self) -> Result<(), StateError> {
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| StateError::IllegalState("no transaction associated".into()))?;
        if let Some(update) = tx.prepared.take() {
            update.cancel();
        }
        if self.local.in_edit() {
            self.local.cancel()?;
        }
        let shared = self.local.shared().clone();
        tx.log.undo(&shared);
        Ok(())
    }
}
