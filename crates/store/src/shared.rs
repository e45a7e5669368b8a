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

//! The shared item-state manager: the process-wide canonical view.
//!
//! Owns the weak cache of canonical states, the store lock, and the update
//! pipeline that turns a session's change log into a durable commit. The
//! weak cache is a correctness requirement, not an optimization: every local
//! overlay of an id must resolve to the same canonical instance, or
//! modcount-based stale detection has nothing to compare against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use ahash::RandomState;
use indexmap::IndexMap;
use tracing::{debug, warn};

use arbor_common::{ItemId, NodeId, StateError};

use crate::changelog::ChangeLog;
use crate::events::{EventBundle, EventFactory, EventListener};
use crate::persistence::PersistenceManager;
use crate::rwlock::StoreLock;
use crate::state::{ItemState, ItemStateRef, ItemStatus, NodeReferences};
use crate::virt::VirtualItemProvider;

pub struct SharedStateManager {
    persistence: Arc<dyn PersistenceManager>,
    cache: Mutex<HashMap<ItemId, Weak<Mutex<ItemState>>, RandomState>>,
    lock: StoreLock,
    providers: RwLock<Vec<Arc<dyn VirtualItemProvider>>>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl SharedStateManager {
    pub fn new(persistence: Arc<dyn PersistenceManager>) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            cache: Mutex::new(HashMap::default()),
            lock: StoreLock::new(),
            providers: RwLock::new(vec![]),
            listeners: RwLock::new(vec![]),
        })
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceManager> {
        &self.persistence
    }

    /// Mount a virtual provider. Registration is append-only and expected to
    /// happen before readers exist.
    pub fn add_virtual_provider(&self, provider: Arc<dyn VirtualItemProvider>) {
        self.providers.write().unwrap().push(provider);
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Shut down: fail future lock acquisitions and flush persistence.
    pub fn close(&self) -> Result<(), StateError> {
        self.lock.close();
        self.cache.lock().unwrap().clear();
        self.persistence.close()
    }

    /// The canonical state for `id`: virtual roots first, then the cache,
    /// then persistence, then the providers' fallback.
    pub fn get_item_state(&self, id: &ItemId) -> Result<ItemStateRef, StateError> {
        for provider in self.providers.read().unwrap().iter() {
            if provider.provides_root(id) {
                return provider
                    .get_item_state(id)?
                    .ok_or_else(|| StateError::NoSuchItemState(id.clone()));
            }
        }

        let _guard = self.lock.read_guard()?;

        // The per-load critical section: the cache mutex spans the
        // double-check and the load, so two concurrent readers of the same
        // id cannot mint duplicate canonical instances.
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(state) = cache.get(id).and_then(Weak::upgrade) {
                return Ok(state);
            }
            if let Some(state) = self.load_from_persistence(id)? {
                let state = state.into_ref();
                cache.insert(id.clone(), Arc::downgrade(&state));
                return Ok(state);
            }
        }

        for provider in self.providers.read().unwrap().iter() {
            if provider.has_item_state(id)
                && let Some(state) = provider.get_item_state(id)?
            {
                return Ok(state);
            }
        }
        Err(StateError::NoSuchItemState(id.clone()))
    }

    pub fn has_item_state(&self, id: &ItemId) -> bool {
        for provider in self.providers.read().unwrap().iter() {
            if provider.provides_root(id) {
                return provider.has_item_state(id);
            }
        }
        let Ok(_guard) = self.lock.read_guard() else {
            return false;
        };
        if self
            .cache
            .lock()
            .unwrap()
            .get(id)
            .and_then(Weak::upgrade)
            .is_some()
        {
            return true;
        }
        if self.persistence.exists(id).unwrap_or(false) {
            return true;
        }
        self.providers
            .read()
            .unwrap()
            .iter()
            .any(|p| p.has_item_state(id))
    }

    pub fn get_node_references(&self, target: &NodeId) -> Result<NodeReferences, StateError> {
        let _guard = self.lock.read_guard()?;
        self.persistence
            .load_references(target)?
            .ok_or(StateError::NoSuchItemState(ItemId::Node(*target)))
    }

    pub fn has_node_references(&self, target: &NodeId) -> bool {
        let Ok(_guard) = self.lock.read_guard() else {
            return false;
        };
        self.persistence.exists_references(target).unwrap_or(false)
    }

    /// Run a full update: begin, then end, cancelling internally on failure.
    pub fn update(
        self: &Arc<Self>,
        log: &mut ChangeLog,
        factory: &dyn EventFactory,
    ) -> Result<(), StateError> {
        self.begin_update(log, factory)?.end()
    }

    /// The begin phase: under the write lock, adjust reference records,
    /// check referential integrity, stale-check and reconnect every staged
    /// state against the canonical view, build the event bundle, and push
    /// working values down. The returned [`Update`] holds the write lock
    /// until `end` or `cancel`.
    pub fn begin_update(
        self: &Arc<Self>,
        log: &mut ChangeLog,
        factory: &dyn EventFactory,
    ) -> Result<Update, StateError> {
        let mut shared_log = ChangeLog::new();
        let mut virt_updates: Vec<(Arc<dyn VirtualItemProvider>, Vec<NodeReferences>)> = vec![];

        self.lock.acquire_write()?;
        match self.begin_inner(log, factory, &mut shared_log, &mut virt_updates) {
            Ok(events) => Ok(Update {
                mgr: self.clone(),
                shared_log,
                events,
                virt_updates,
                finished: false,
            }),
            Err(e) => {
                // Roll back whatever the begin already touched (modcounts,
                // minted states) before letting go of the write lock.
                self.cancel_shared(&shared_log);
                self.lock.release_write();
                Err(e)
            }
        }
    }

    fn begin_inner(
        self: &Arc<Self>,
        log: &mut ChangeLog,
        factory: &dyn EventFactory,
        shared_log: &mut ChangeLog,
        virt_updates: &mut Vec<(Arc<dyn VirtualItemProvider>, Vec<NodeReferences>)>,
    ) -> Result<EventBundle, StateError> {
        self.compute_ref_deltas(log)?;
        self.check_referential_integrity(log)?;

        for state in log.modified_states() {
            let canonical = {
                let mut s = state.lock().unwrap();
                let id = s.id().clone();
                let canonical = self
                    .get_item_state(&id)
                    .map_err(|_| StateError::Stale(id.clone()))?;
                s.reconnect(&canonical);
                {
                    let mut c = canonical.lock().unwrap();
                    if c.modcount() != s.base_modcount() {
                        return Err(StateError::Stale(id));
                    }
                    c.touch();
                }
                canonical
            };
            shared_log.modified(canonical);
        }

        for state in log.deleted_states() {
            let canonical = {
                let mut s = state.lock().unwrap();
                let id = s.id().clone();
                let canonical = self
                    .get_item_state(&id)
                    .map_err(|_| StateError::Stale(id.clone()))?;
                s.reconnect(&canonical);
                let c = canonical.lock().unwrap();
                if c.modcount() != s.base_modcount() {
                    return Err(StateError::Stale(id));
                }
                drop(c);
                canonical
            };
            shared_log.deleted(canonical);
        }

        for state in log.added_states() {
            let minted = {
                let mut s = state.lock().unwrap();
                let minted = ItemState::minted(s.id().clone(), s.data.clone()).into_ref();
                s.connect(&minted);
                self.cache
                    .lock()
                    .unwrap()
                    .insert(s.id().clone(), Arc::downgrade(&minted));
                minted
            };
            shared_log.added(minted);
        }

        // Reference records whose target a virtual provider claims are
        // handed to that provider after the store; the rest persist with the
        // bundle tables.
        for refs in log.refs() {
            match self.provider_for_node(&refs.target()) {
                Some(provider) => {
                    match virt_updates
                        .iter_mut()
                        .find(|(p, _)| Arc::ptr_eq(p, &provider))
                    {
                        Some((_, list)) => list.push(refs.clone()),
                        None => virt_updates.push((provider, vec![refs.clone()])),
                    }
                }
                None => shared_log.modified_refs(refs.clone()),
            }
        }

        let events = factory.create(log)?;
        log.push();
        Ok(events)
    }

    /// Adjust references records for every staged REFERENCE property change.
    /// Runs at most once per change log; the deltas land in the log's
    /// modified-refs container.
    fn compute_ref_deltas(&self, log: &mut ChangeLog) -> Result<(), StateError> {
        if log.refs_resolved() {
            debug!("reference deltas already resolved for this change log");
            return Ok(());
        }

        let mut records: IndexMap<NodeId, NodeReferences, RandomState> = IndexMap::default();
        for refs in log.refs() {
            records.insert(refs.target(), refs.clone());
        }

        let record =
            |records: &mut IndexMap<NodeId, NodeReferences, RandomState>,
             target: NodeId|
             -> Result<(), StateError> {
                if !records.contains_key(&target) {
                    let loaded = self
                        .persistence
                        .load_references(&target)?
                        .unwrap_or_else(|| NodeReferences::new(target));
                    records.insert(target, loaded);
                }
                Ok(())
            };

        // Added properties contribute all their targets.
        for state in log.added_states() {
            let s = state.lock().unwrap();
            let (Some(pid), Some(data)) = (s.id().property_id(), s.as_property()) else {
                continue;
            };
            for target in data.reference_targets() {
                if self.provider_for_node(&target).is_some() {
                    continue;
                }
                record(&mut records, target)?;
                records.get_mut(&target).unwrap().add(pid.clone());
            }
        }

        // Modified properties contribute the delta old→new, the old set read
        // from the still-untouched canonical state.
        for state in log.modified_states() {
            let s = state.lock().unwrap();
            let (Some(pid), Some(data)) = (s.id().property_id(), s.as_property()) else {
                continue;
            };
            let new_targets = data.reference_targets();
            let old_targets = match self.get_item_state(s.id()) {
                Ok(canonical) => canonical
                    .lock()
                    .unwrap()
                    .as_property()
                    .map(|p| p.reference_targets())
                    .unwrap_or_default(),
                Err(_) => vec![],
            };
            if new_targets.is_empty() && old_targets.is_empty() {
                continue;
            }
            for target in &old_targets {
                if new_targets.contains(target) || self.provider_for_node(target).is_some() {
                    continue;
                }
                record(&mut records, *target)?;
                records.get_mut(target).unwrap().remove(pid);
            }
            for target in &new_targets {
                if old_targets.contains(target) || self.provider_for_node(target).is_some() {
                    continue;
                }
                record(&mut records, *target)?;
                records.get_mut(target).unwrap().add(pid.clone());
            }
        }

        // Deleted properties release all their targets.
        for state in log.deleted_states() {
            let s = state.lock().unwrap();
            let (Some(pid), Some(data)) = (s.id().property_id(), s.as_property()) else {
                continue;
            };
            for target in data.reference_targets() {
                if self.provider_for_node(&target).is_some() {
                    continue;
                }
                record(&mut records, target)?;
                records.get_mut(&target).unwrap().remove(pid);
            }
        }

        for (_, refs) in records {
            log.modified_refs(refs);
        }
        log.mark_refs_resolved();
        Ok(())
    }

    fn check_referential_integrity(&self, log: &ChangeLog) -> Result<(), StateError> {
        // Deleting a referenceable node requires every referrer to be going
        // away in the same commit — unless the node is re-added under the
        // same uuid.
        for state in log.deleted_states() {
            let s = state.lock().unwrap();
            let Some(node) = s.as_node() else {
                continue;
            };
            if !node.is_referenceable() {
                continue;
            }
            let Some(id) = s.id().node_id() else {
                continue;
            };
            if log.has_added(s.id()) {
                continue;
            }
            let refs = match log.refs_for(&id) {
                Some(refs) => refs.clone(),
                None => match self.persistence.load_references(&id)? {
                    Some(refs) => refs,
                    None => continue,
                },
            };
            for referrer in refs.referrers() {
                if !log.has_deleted(&ItemId::Property(referrer.clone())) {
                    return Err(StateError::ReferentialIntegrity(id));
                }
            }
        }

        // Every live references record needs a resolvable target.
        for refs in log.refs() {
            if refs.is_empty() {
                continue;
            }
            let target = refs.target();
            let target_item = ItemId::Node(target);
            if log.has_added(&target_item) {
                continue;
            }
            if log.has_deleted(&target_item) {
                return Err(StateError::ReferentialIntegrity(target));
            }
            if !self.has_item_state(&target_item) {
                return Err(StateError::ReferentialIntegrity(target));
            }
        }
        Ok(())
    }

    /// Restore every canonical state touched by a failed or cancelled update
    /// from persistence; discard what cannot be reloaded. Minted (added)
    /// states go first so that a restored pre-existing instance wins the
    /// cache slot on a cancelled delete+re-add.
    fn cancel_shared(&self, shared_log: &ChangeLog) {
        for state in shared_log.added_states() {
            let mut s = state.lock().unwrap();
            let id = s.id().clone();
            s.set_status(ItemStatus::Undefined);
            drop(s);
            self.evict_if_same(&id, state);
        }
        for state in shared_log
            .modified_states()
            .chain(shared_log.deleted_states())
        {
            let mut s = state.lock().unwrap();
            let id = s.id().clone();
            let reloaded = match &id {
                ItemId::Node(node_id) => self
                    .persistence
                    .load_node(node_id)
                    .map(|r| r.map(|r| (crate::state::ItemData::Node(r.data), r.modcount))),
                ItemId::Property(pid) => self
                    .persistence
                    .load_property(pid)
                    .map(|r| r.map(|r| (crate::state::ItemData::Property(r.data), r.modcount))),
            };
            match reloaded {
                Ok(Some((data, modcount))) => {
                    s.data = data;
                    s.set_modcount(modcount);
                    s.set_status(ItemStatus::Existing);
                    drop(s);
                    // The restored instance is the canonical one again.
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(id, Arc::downgrade(state));
                }
                Ok(None) => {
                    s.set_status(ItemStatus::Undefined);
                    drop(s);
                    self.evict_if_same(&id, state);
                }
                Err(e) => {
                    warn!(item = %id, error = %e, "discarding unreloadable state after cancel");
                    s.set_status(ItemStatus::Undefined);
                    drop(s);
                    self.evict_if_same(&id, state);
                }
            }
        }
    }

    /// Drop the cache entry for `id`, but only while it still points at the
    /// given instance.
    fn evict_if_same(&self, id: &ItemId, state: &ItemStateRef) {
        let mut cache = self.cache.lock().unwrap();
        let same = cache
            .get(id)
            .and_then(Weak::upgrade)
            .map(|cached| Arc::ptr_eq(&cached, state))
            .unwrap_or(true);
        if same {
            cache.remove(id);
        }
    }

    fn provider_for_node(&self, id: &NodeId) -> Option<Arc<dyn VirtualItemProvider>> {
        self.providers
            .read()
            .unwrap()
            .iter()
            .find(|p| p.provides_node(id))
            .cloned()
    }

    fn load_from_persistence(&self, id: &ItemId) -> Result<Option<ItemState>, StateError> {
        match id {
            ItemId::Node(node_id) => Ok(self.persistence.load_node(node_id)?.map(|r| {
                let mut state = ItemState::new_node(*node_id, r.data, ItemStatus::Existing);
                state.set_modcount(r.modcount);
                state
            })),
            ItemId::Property(pid) => Ok(self.persistence.load_property(pid)?.map(|r| {
                let mut state =
                    ItemState::new_property(pid.clone(), r.data, ItemStatus::Existing);
                state.set_modcount(r.modcount);
                state
            })),
        }
    }

    #[cfg(test)]
    pub(crate) fn cached(&self, id: &ItemId) -> Option<ItemStateRef> {
        self.cache.lock().unwrap().get(id).and_then(Weak::upgrade)
    }
}

/// An in-flight update. Holds the write lock from begin until `end` or
/// `cancel`; dropping an unfinished update cancels it.
pub struct Update {
    mgr: Arc<SharedStateManager>,
    shared_log: ChangeLog,
    events: EventBundle,
    virt_updates: Vec<(Arc<dyn VirtualItemProvider>, Vec<NodeReferences>)>,
    finished: bool,
}

impl Update {
    /// The end phase: one atomic store, then status updates, cache eviction
    /// for destroyed states, virtual reference handoff, write→read
    /// downgrade, event dispatch, release.
    pub fn end(mut self) -> Result<(), StateError> {
        self.finished = true;
        if let Err(e) = self.mgr.persistence.store(&self.shared_log) {
            self.mgr.cancel_shared(&self.shared_log);
            self.mgr.lock.release_write();
            return Err(e);
        }

        self.shared_log.persisted();
        for state in self.shared_log.deleted_states() {
            // Evict the destroyed instance only: a delete+re-add of the same
            // uuid has already re-pointed the cache at the minted state.
            let id = state.lock().unwrap().id().clone();
            self.mgr.evict_if_same(&id, state);
        }

        for (provider, refs) in self.virt_updates.drain(..) {
            if let Err(e) = provider.set_node_references(refs) {
                warn!(error = %e, "virtual provider rejected reference update");
            }
        }

        // Listeners observe post-commit state: dispatch happens after the
        // store, under the read side of the lock.
        self.mgr.lock.downgrade();
        let listeners = self.mgr.listeners.read().unwrap().clone();
        for listener in listeners {
            listener.on_events(&self.events);
        }
        self.mgr.lock.release_read();
        Ok(())
    }

    /// Abandon the update: reload every touched canonical state from
    /// persistence and release the write lock.
    pub fn cancel(mut self) {
        self.finished = true;
        self.mgr.cancel_shared(&self.shared_log);
        self.mgr.lock.release_write();
    }

    pub fn events(&self) -> &EventBundle {
        &self.events
    }
}

impl Drop for Update {
    fn drop(&mut self) {
        if !self.finished {
            warn!("update dropped without end or cancel; cancelling");
            self.mgr.cancel_shared(&self.shared_log);
            self.mgr.lock.release_write();
        }
    }
}
