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

//! The per-session overlay manager.
//!
//! Not thread-safe by design: a session belongs to one thread at a time, and
//! serialization across threads is the caller's concern. Reads consult the
//! session's change log first (deletions surface as `NoSuchItemState`), then
//! a session-local weak cache of overlays, then the shared manager; states
//! fetched from shared are wrapped into overlays whose mutations stay
//! invisible until `update` pushes them down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use ahash::RandomState;

use arbor_common::{ItemId, NodeId, PropertyId, StateError};

use crate::changelog::ChangeLog;
use crate::events::{EventFactory, StandardEventFactory};
use crate::shared::SharedStateManager;
use crate::state::{
    ItemState, ItemStateRef, ItemStatus, NodeData, NodeReferences, PropertyData,
};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ManagerStatus {
    Idle,
    Editing,
    Disposed,
}

pub struct LocalStateManager {
    shared: Arc<SharedStateManager>,
    log: ChangeLog,
    cache: HashMap<ItemId, Weak<Mutex<ItemState>>, RandomState>,
    status: ManagerStatus,
    factory: Arc<dyn EventFactory>,
}

impl LocalStateManager {
    pub fn new(shared: Arc<SharedStateManager>) -> Self {
        Self::with_factory(shared, Arc::new(StandardEventFactory))
    }

    pub fn with_factory(shared: Arc<SharedStateManager>, factory: Arc<dyn EventFactory>) -> Self {
        Self {
            shared,
            log: ChangeLog::new(),
            cache: HashMap::default(),
            status: ManagerStatus::Idle,
            factory,
        }
    }

    pub fn shared(&self) -> &Arc<SharedStateManager> {
        &self.shared
    }

    pub fn status(&self) -> ManagerStatus {
        self.status
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    fn require(&self, status: ManagerStatus, op: &str) -> Result<(), StateError> {
        if self.status != status {
            return Err(StateError::IllegalState(format!(
                "{op} requires {status:?} but manager is {:?}",
                self.status,
            )));
        }
        Ok(())
    }

    /// Start an edit sequence.
    pub fn edit(&mut self) -> Result<(), StateError> {
        self.require(ManagerStatus::Idle, "edit")?;
        self.log.reset();
        self.status = ManagerStatus::Editing;
        Ok(())
    }

    pub fn in_edit(&self) -> bool {
        self.status == ManagerStatus::Editing
    }

    /// Create a new node state. Not staged until `store`d.
    pub fn create_new_node(
        &mut self,
        id: NodeId,
        data: NodeData,
    ) -> Result<ItemStateRef, StateError> {
        self.require(ManagerStatus::Editing, "create_new_node")?;
        Ok(ItemState::new_node(id, data, ItemStatus::New).into_ref())
    }

    /// Create a new property state. Not staged until `store`d.
    pub fn create_new_property(
        &mut self,
        id: PropertyId,
        data: PropertyData,
    ) -> Result<ItemStateRef, StateError> {
        self.require(ManagerStatus::Editing, "create_new_property")?;
        Ok(ItemState::new_property(id, data, ItemStatus::New).into_ref())
    }

    /// Stage a state: new states as additions, overlays as modifications.
    pub fn store(&mut self, state: &ItemStateRef) -> Result<(), StateError> {
        self.require(ManagerStatus::Editing, "store")?;
        let (id, status) = {
            let s = state.lock().unwrap();
            (s.id().clone(), s.status())
        };
        match status {
            ItemStatus::New => {
                self.cache.insert(id, Arc::downgrade(state));
                self.log.added(state.clone());
            }
            _ => {
                {
                    let mut s = state.lock().unwrap();
                    if s.status() == ItemStatus::Existing {
                        s.set_status(ItemStatus::ExistingModified);
                    }
                }
                self.log.modified(state.clone());
            }
        }
        Ok(())
    }

    /// Stage a references record directly (used by virtual-storage
    /// maintainers; ordinary reference bookkeeping is derived in the shared
    /// pipeline).
    pub fn store_refs(&mut self, refs: NodeReferences) -> Result<(), StateError> {
        self.require(ManagerStatus::Editing, "store_refs")?;
        self.log.modified_refs(refs);
        Ok(())
    }

    /// Stage a deletion.
    pub fn destroy(&mut self, state: &ItemStateRef) -> Result<(), StateError> {
        self.require(ManagerStatus::Editing, "destroy")?;
        let id = state.lock().unwrap().id().clone();
        self.cache.remove(&id);
        self.log.deleted(state.clone());
        Ok(())
    }

    /// The session view of `id`: staged version first, then the local cache,
    /// then a fresh overlay of the shared state.
    pub fn get_item_state(&mut self, id: &ItemId) -> Result<ItemStateRef, StateError> {
        if let Some(staged) = self.log.get(id)? {
            return Ok(staged);
        }
        if let Some(cached) = self.cache.get(id).and_then(Weak::upgrade) {
            return Ok(cached);
        }
        let shared = self.shared.get_item_state(id)?;
        let overlay = ItemState::overlay(&shared).into_ref();
        self.cache.insert(id.clone(), Arc::downgrade(&overlay));
        Ok(overlay)
    }

    pub fn has_item_state(&mut self, id: &ItemId) -> bool {
        match self.log.get(id) {
            Err(_) => return false,
            Ok(Some(_)) => return true,
            Ok(None) => {}
        }
        if self.cache.get(id).and_then(Weak::upgrade).is_some() {
            return true;
        }
        self.shared.has_item_state(id)
    }

    pub fn get_node_references(&self, target: &NodeId) -> Result<NodeReferences, StateError> {
        if let Some(refs) = self.log.refs_for(target) {
            return Ok(refs.clone());
        }
        self.shared.get_node_references(target)
    }

    pub fn has_node_references(&self, target: &NodeId) -> bool {
        self.log.refs_for(target).is_some() || self.shared.has_node_references(target)
    }

    /// Commit the staged changes through the shared pipeline. The log is
    /// reset and the manager returns to idle whether or not the pipeline
    /// succeeded (a failed pipeline has already cancelled).
    pub fn update(&mut self) -> Result<(), StateError> {
        self.require(ManagerStatus::Editing, "update")?;
        let result = self.shared.clone().update(&mut self.log, &*self.factory);
        if result.is_ok() {
            // Refresh the overlays so the session can keep using them
            // against the advanced canonical view.
            for state in self.log.added_states().chain(self.log.modified_states()) {
                let mut s = state.lock().unwrap();
                if let Some(canonical) = s.overlaid() {
                    let modcount = canonical.lock().unwrap().modcount();
                    s.set_modcount(modcount);
                    s.connect(&canonical);
                }
                s.set_status(ItemStatus::Existing);
            }
            for state in self.log.deleted_states() {
                state
                    .lock()
                    .unwrap()
                    .set_status(ItemStatus::ExistingRemoved);
            }
        } else {
            self.cache.clear();
        }
        self.log.reset();
        self.status = ManagerStatus::Idle;
        result
    }

    /// Abandon the staged changes, refreshing overlays from the shared view.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        self.require(ManagerStatus::Editing, "cancel")?;
        let shared = self.shared.clone();
        self.log.undo(&shared);
        self.status = ManagerStatus::Idle;
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.log.reset();
        self.cache.clear();
        self.status = ManagerStatus::Disposed;
    }

    /// Detach the staged change log (transactional wrapper support): the
    /// edit sequence collapses and the manager returns to idle.
    pub(crate) fn take_log(&mut self) -> Result<ChangeLog, StateError> {
        self.require(ManagerStatus::Editing, "take_log")?;
        self.status = ManagerStatus::Idle;
        Ok(std::mem::take(&mut self.log))
    }
}
