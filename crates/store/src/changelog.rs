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

//! The change log: a session's staging area of added/modified/deleted item
//! states plus modified references records, awaiting commit.
//!
//! All containers preserve insertion order — persistence sees states in
//! staging order and observation events are built by traversal, so stable
//! iteration is part of the contract.

use ahash::AHasher;
use indexmap::IndexMap;
use std::hash::BuildHasherDefault;

use arbor_common::{ItemId, NodeId, StateError};

use crate::shared::SharedStateManager;
use crate::state::{ItemStatus, ItemStateRef, NodeReferences};

type OrderedMap<K, V> = IndexMap<K, V, BuildHasherDefault<AHasher>>;

#[derive(Default)]
pub struct ChangeLog {
    added: OrderedMap<ItemId, ItemStateRef>,
    modified: OrderedMap<ItemId, ItemStateRef>,
    deleted: OrderedMap<ItemId, ItemStateRef>,
    modified_refs: OrderedMap<NodeId, NodeReferences>,
    /// Reference-set deltas may be computed at most once per log; recomputing
    /// against already-adjusted records would double-apply them.
    refs_resolved: bool,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a newly created state.
    pub fn added(&mut self, state: ItemStateRef) {
        let id = state.lock().unwrap().id().clone();
        self.added.insert(id, state);
    }

    /// Stage a modification. A state that is still new stays in added — its
    /// staged data is current either way. Idempotent.
    pub fn modified(&mut self, state: ItemStateRef) {
        let id = state.lock().unwrap().id().clone();
        if self.added.contains_key(&id) {
            return;
        }
        state.lock().unwrap().disconnect();
        self.modified.insert(id, state);
    }

    /// Stage a deletion. A new-then-deleted state collapses to nothing.
    pub fn deleted(&mut self, state: ItemStateRef) {
        let id = state.lock().unwrap().id().clone();
        if self.added.shift_remove(&id).is_some() {
            return;
        }
        state.lock().unwrap().disconnect();
        self.modified.shift_remove(&id);
        self.deleted.insert(id, state);
    }

    /// Stage a modified references record, replacing any staged one for the
    /// same target.
    pub fn modified_refs(&mut self, refs: NodeReferences) {
        self.modified_refs.insert(refs.target(), refs);
    }

    /// The staged state for `id`: the added/modified entry, an error if the
    /// log declares the item deleted, `None` if the log knows nothing.
    pub fn get(&self, id: &ItemId) -> Result<Option<ItemStateRef>, StateError> {
        if self.deleted.contains_key(id) {
            return Err(StateError::NoSuchItemState(id.clone()));
        }
        Ok(self
            .added
            .get(id)
            .or_else(|| self.modified.get(id))
            .cloned())
    }

    pub fn has_added(&self, id: &ItemId) -> bool {
        self.added.contains_key(id)
    }

    pub fn has_modified(&self, id: &ItemId) -> bool {
        self.modified.contains_key(id)
    }

    pub fn has_deleted(&self, id: &ItemId) -> bool {
        self.deleted.contains_key(id)
    }

    pub fn refs_for(&self, target: &NodeId) -> Option<&NodeReferences> {
        self.modified_refs.get(target)
    }

    pub fn added_states(&self) -> impl Iterator<Item = &ItemStateRef> {
        self.added.values()
    }

    pub fn modified_states(&self) -> impl Iterator<Item = &ItemStateRef> {
        self.modified.values()
    }

    pub fn deleted_states(&self) -> impl Iterator<Item = &ItemStateRef> {
        self.deleted.values()
    }

    pub fn deleted_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.deleted.keys()
    }

    pub fn refs(&self) -> impl Iterator<Item = &NodeReferences> {
        self.modified_refs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.modified_refs.is_empty()
    }

    /// Whether anything would be persisted by this log.
    pub fn has_updates(&self) -> bool {
        !self.is_empty()
    }

    pub(crate) fn refs_resolved(&self) -> bool {
        self.refs_resolved
    }

    pub(crate) fn mark_refs_resolved(&mut self) {
        self.refs_resolved = true;
    }

    /// Fold another log into this one. A delete in `other` cancels a
    /// still-new add in `self`; otherwise `other` wins on conflicts.
    pub fn merge(&mut self, other: ChangeLog) {
        for (id, state) in other.deleted {
            if self.added.shift_remove(&id).is_some() {
                continue;
            }
            self.modified.shift_remove(&id);
            self.deleted.insert(id, state);
        }
        for (id, state) in other.added {
            // Re-add after a staged delete is an add on top of the pending
            // deletion; both survive in order.
            self.added.insert(id, state);
        }
        for (id, state) in other.modified {
            if self.added.contains_key(&id) {
                self.added.insert(id, state);
            } else {
                self.modified.insert(id, state);
            }
        }
        for (target, refs) in other.modified_refs {
            self.modified_refs.insert(target, refs);
        }
        self.refs_resolved = self.refs_resolved || other.refs_resolved;
    }

    /// Copy every staged state's working values down into its connected
    /// canonical state.
    pub fn push(&self) {
        for state in self.added.values().chain(self.modified.values()) {
            state.lock().unwrap().push();
        }
    }

    /// Update statuses after a successful persist: modified and added states
    /// become existing, deleted states become existing-removed.
    pub fn persisted(&self) {
        for state in self.modified.values() {
            state.lock().unwrap().set_status(ItemStatus::Existing);
        }
        for state in self.deleted.values() {
            state.lock().unwrap().set_status(ItemStatus::ExistingRemoved);
        }
        for state in self.added.values() {
            state.lock().unwrap().set_status(ItemStatus::Existing);
        }
    }

    /// Abandon the staged changes: reconnect modified/deleted states to the
    /// parent's current canonical view and refresh their working values,
    /// discard added states, then reset.
    pub fn undo(&mut self, parent: &SharedStateManager) {
        for state in self.modified.values().chain(self.deleted.values()) {
            let mut s = state.lock().unwrap();
            let id = s.id().clone();
            match parent.get_item_state(&id) {
                Ok(canonical) => {
                    {
                        let c = canonical.lock().unwrap();
                        s.data = c.data.clone();
                        s.set_modcount(c.modcount());
                    }
                    s.connect(&canonical);
                    s.set_status(ItemStatus::Existing);
                }
                Err(_) => {
                    s.disconnect();
                    s.set_status(ItemStatus::Undefined);
                }
            }
        }
        for state in self.added.values() {
            let mut s = state.lock().unwrap();
            s.disconnect();
            s.set_status(ItemStatus::Undefined);
        }
        self.reset();
    }

    /// Drop everything staged.
    pub fn reset(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.deleted.clear();
        self.modified_refs.clear();
        self.refs_resolved = false;
    }
}
