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

//! The versioning core.
//!
//! Version histories are ordinary persistent nodes beneath the fixed storage
//! root `/jcr:system/jcr:versionStorage`, sharded into three bucket levels
//! keyed by the versionable uuid's leading hex pairs. Every write goes
//! through the manager's own local session and thus the normal update
//! pipeline — version nodes are referenceable, predecessor/successor arrays
//! are ordinary REFERENCE properties, and referential integrity applies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use chrono::Utc;
use indexmap::IndexMap;
use tracing::debug;

use arbor_common::names::{
    JCR_CREATED, JCR_FROZEN_MIXIN_TYPES, JCR_FROZEN_NODE, JCR_FROZEN_PRIMARY_TYPE, JCR_FROZEN_UUID,
    JCR_PREDECESSORS, JCR_ROOT_VERSION, JCR_SUCCESSORS, JCR_SYSTEM, JCR_VERSION_LABELS,
    JCR_VERSION_STORAGE, JCR_VERSIONABLE_UUID, MIX_REFERENCEABLE, NT_FROZEN_NODE, NT_VERSION,
    NT_VERSION_HISTORY, NT_VERSION_LABELS, Name, REP_ROOT, REP_SYSTEM, REP_VERSION_STORAGE,
};
use arbor_common::nodetype::{DefId, NodeTypeRegistry};
use arbor_common::{
    ItemId, NodeId, ROOT_NODE_ID, SYSTEM_NODE_ID, StateError, VERSION_STORAGE_NODE_ID, Value,
    ValueType,
};

use crate::local::LocalStateManager;
use crate::ops;
use crate::shared::SharedStateManager;
use crate::state::{ItemStateRef, ItemStatus, NodeData};
use crate::txn::VersionCommitListener;

pub struct VersionManager {
    registry: Arc<NodeTypeRegistry>,
    inner: Mutex<Inner>,
}

struct Inner {
    local: LocalStateManager,
    registry: Arc<NodeTypeRegistry>,
    /// versionable uuid → history node id.
    histories: HashMap<NodeId, NodeId, RandomState>,
    /// history node id → (label → version node id).
    labels: HashMap<NodeId, IndexMap<Name, NodeId, RandomState>, RandomState>,
}

/// Wrap an edit sequence: update on success, cancel on failure.
fn run_edit<R>(
    local: &mut LocalStateManager,
    f: impl FnOnce(&mut LocalStateManager) -> Result<R, StateError>,
) -> Result<R, StateError> {
    local.edit()?;
    match f(local) {
        Ok(r) => {
            local.update()?;
            Ok(r)
        }
        Err(e) => {
            let _ = local.cancel();
            Err(e)
        }
    }
}

fn ref_ids(values: &[Value]) -> Vec<NodeId> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::Reference(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn ref_values(ids: &[NodeId]) -> Vec<Value> {
    ids.iter().map(|id| Value::Reference(*id)).collect()
}

/// Primary types that live inside version storage; a referrer whose parent
/// carries any other type is external to it.
fn is_storage_type(name: &Name) -> bool {
    *name == *NT_VERSION
        || *name == *NT_VERSION_HISTORY
        || *name == *NT_VERSION_LABELS
        || *name == *NT_FROZEN_NODE
        || *name == *REP_VERSION_STORAGE
}

impl VersionManager {
    /// Open the versioning core over the shared manager, creating the
    /// `/jcr:system/jcr:versionStorage` skeleton when absent.
    pub fn new(
        shared: Arc<SharedStateManager>,
        registry: Arc<NodeTypeRegistry>,
    ) -> Result<Arc<Self>, StateError> {
        let mut local = LocalStateManager::new(shared);
        if !local.has_item_state(&ItemId::Node(*VERSION_STORAGE_NODE_ID)) {
            run_edit(&mut local, |local| {
                let root = if local.has_item_state(&ItemId::Node(*ROOT_NODE_ID)) {
                    local.get_item_state(&ItemId::Node(*ROOT_NODE_ID))?
                } else {
                    let data = NodeData::new(
                        REP_ROOT.clone(),
                        None,
                        DefId::from_string("rep:root".into()),
                    )
                    .with_mixins([MIX_REFERENCEABLE.clone()]);
                    let root = local.create_new_node(*ROOT_NODE_ID, data)?;
                    local.store(&root)?;
                    root
                };
                let root_id = root.lock().unwrap().id().node_id().expect("node id");
                let system = ops::add_child_node(
                    local,
                    &registry,
                    root_id,
                    JCR_SYSTEM.clone(),
                    REP_SYSTEM.clone(),
                    &[],
                    Some(*SYSTEM_NODE_ID),
                )?;
                let system_id = system.lock().unwrap().id().node_id().expect("node id");
                ops::add_child_node(
                    local,
                    &registry,
                    system_id,
                    JCR_VERSION_STORAGE.clone(),
                    REP_VERSION_STORAGE.clone(),
                    &[],
                    Some(*VERSION_STORAGE_NODE_ID),
                )?;
                Ok(())
            })?;
            debug!("version storage skeleton created");
        }
        Ok(Arc::new(Self {
            registry: registry.clone(),
            inner: Mutex::new(Inner {
                local,
                registry,
                histories: HashMap::default(),
                labels: HashMap::default(),
            }),
        }))
    }

    /// Create the version history for a versionable node. Idempotent: when
    /// the history already exists the call is a no-op returning `None`.
    pub fn create_version_history(
        &self,
        versionable: NodeId,
        primary: &Name,
        mixins: &[Name],
    ) -> Result<Option<NodeId>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.find_history(&versionable)?.is_some() {
            return Ok(None);
        }
        let registry = self.registry.clone();
        let primary = primary.clone();
        let mixins = mixins.to_vec();
        let history_id = run_edit(&mut inner.local, |local| {
            let bucket = descend_buckets(local, &registry, versionable, true)?
                .expect("bucket creation is unconditional");

            let history_name = Name::new("", &versionable.hex());
            {
                let b = local.get_item_state(&ItemId::Node(bucket))?;
                if b.lock()
                    .unwrap()
                    .as_node()
                    .and_then(|d| d.child(&history_name, 1))
                    .is_some()
                {
                    // Raced into existence; nothing to do.
                    return Err(StateError::ItemExists(history_name.to_string()));
                }
            }

            let history = ops::add_child_node(
                local,
                &registry,
                bucket,
                history_name,
                NT_VERSION_HISTORY.clone(),
                &[MIX_REFERENCEABLE.clone()],
                None,
            )?;
            let history_id = history.lock().unwrap().id().node_id().expect("node id");
            ops::set_property(
                local,
                &registry,
                &history,
                JCR_VERSIONABLE_UUID.clone(),
                ValueType::String,
                false,
                vec![Value::String(versionable.to_string())],
            )?;

            ops::add_child_node(
                local,
                &registry,
                history_id,
                JCR_VERSION_LABELS.clone(),
                NT_VERSION_LABELS.clone(),
                &[],
                None,
            )?;

            let root_version = ops::add_child_node(
                local,
                &registry,
                history_id,
                JCR_ROOT_VERSION.clone(),
                NT_VERSION.clone(),
                &[MIX_REFERENCEABLE.clone()],
                None,
            )?;
            init_version_props(local, &registry, &root_version, &[])?;
            let root_version_id = root_version
                .lock()
                .unwrap()
                .id()
                .node_id()
                .expect("node id");
            create_frozen_node(
                local,
                &registry,
                root_version_id,
                &primary,
                &mixins,
                versionable,
            )?;
            Ok(history_id)
        });
        match history_id {
            Ok(history_id) => {
                inner.histories.insert(versionable, history_id);
                Ok(Some(history_id))
            }
            Err(StateError::ItemExists(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The history node for a versionable node, if one exists.
    pub fn history_for(&self, versionable: &NodeId) -> Result<Option<NodeId>, StateError> {
        self.inner.lock().unwrap().find_history(versionable)
    }

    /// Create a new version in the versionable node's history.
    ///
    /// Predecessors come from the versionable node's `jcr:predecessors`
    /// property when it has one, else from the history's current leaves. The
    /// predecessor with the fewest successors names the new version.
    pub fn checkin(&self, versionable: &NodeId) -> Result<NodeId, StateError> {
        let mut inner = self.inner.lock().unwrap();
        let history_id = inner.find_history(versionable)?.ok_or_else(|| {
            StateError::Version(format!("no version history for {versionable}"))
        })?;
        let registry = self.registry.clone();
        let versionable = *versionable;
        run_edit(&mut inner.local, |local| {
            let predecessors = match ops::prop_values(local, versionable, &JCR_PREDECESSORS)? {
                Some(values) => ref_ids(&values),
                None => history_leaves(local, history_id)?,
            };
            if predecessors.is_empty() {
                return Err(StateError::Version(format!(
                    "history {history_id} has no predecessor candidates",
                )));
            }

            // Fewest successors wins; ties break by iteration order.
            let mut base: Option<(NodeId, usize)> = None;
            for pred in &predecessors {
                let count = ops::prop_values(local, *pred, &JCR_SUCCESSORS)?
                    .map(|v| ref_ids(&v).len())
                    .unwrap_or(0);
                if base.map(|(_, c)| count < c).unwrap_or(true) {
                    base = Some((*pred, count));
                }
            }
            let (base_id, base_successors) = base.expect("non-empty predecessors");

            let history = local.get_item_state(&ItemId::Node(history_id))?;
            let base_name = {
                let h = history.lock().unwrap();
                let data = h.as_node().expect("history is a node");
                data.children()
                    .iter()
                    .find(|c| c.id == base_id)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        StateError::Version(format!(
                            "predecessor {base_id} is not a version of {history_id}",
                        ))
                    })?
            };

            let mut candidate = next_version_name(base_name.local(), base_successors);
            loop {
                let h = history.lock().unwrap();
                let taken = h
                    .as_node()
                    .expect("history is a node")
                    .child(&Name::new("", &candidate), 1)
                    .is_some();
                drop(h);
                if !taken {
                    break;
                }
                candidate.push_str(".1");
            }

            let (frozen_primary, frozen_mixins) = frozen_source(local, versionable)?;
            let version = ops::add_child_node(
                local,
                &registry,
                history_id,
                Name::new("", &candidate),
                NT_VERSION.clone(),
                &[MIX_REFERENCEABLE.clone()],
                None,
            )?;
            init_version_props(local, &registry, &version, &predecessors)?;
            let version_id = version.lock().unwrap().id().node_id().expect("node id");
            create_frozen_node(
                local,
                &registry,
                version_id,
                &frozen_primary,
                &frozen_mixins,
                versionable,
            )?;

            // Resolve the graph edges: each predecessor gains this version
            // as a successor.
            for pred in &predecessors {
                let mut successors = ops::prop_values(local, *pred, &JCR_SUCCESSORS)?
                    .map(|v| ref_ids(&v))
                    .unwrap_or_default();
                if !successors.contains(&version_id) {
                    successors.push(version_id);
                }
                let pred_state = local.get_item_state(&ItemId::Node(*pred))?;
                ops::set_property(
                    local,
                    &registry,
                    &pred_state,
                    JCR_SUCCESSORS.clone(),
                    ValueType::Reference,
                    true,
                    ref_values(&successors),
                )?;
            }
            debug!(version = %candidate, history = %history_id, "checked in");
            Ok(version_id)
        })
    }

    /// Remove a version from its history: never the root version, never a
    /// version referenced from outside version storage. The removed
    /// version's predecessors and successors are wired to each other, and
    /// labels pointing at it are dropped.
    pub fn remove_version(&self, history: &NodeId, name: &Name) -> Result<(), StateError> {
        if *name == *JCR_ROOT_VERSION {
            return Err(StateError::Version("cannot remove the root version".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let history_id = *history;
        let registry = self.registry.clone();
        let shared = inner.local.shared().clone();
        let name = name.clone();

        // Labels must be loaded before the edit so cleanup can update them.
        inner.ensure_labels(&history_id)?;

        let removed_labels = run_edit(&mut inner.local, |local| {
            let history = local.get_item_state(&ItemId::Node(history_id))?;
            let version_id = {
                let h = history.lock().unwrap();
                h.as_node()
                    .expect("history is a node")
                    .child(&name, 1)
                    .map(|c| c.id)
                    .ok_or_else(|| {
                        StateError::Version(format!("no version {name} in {history_id}"))
                    })?
            };

            // References from outside version storage forbid removal.
            if let Ok(refs) = shared.get_node_references(&version_id) {
                for referrer in refs.referrers() {
                    let parent = local.get_item_state(&ItemId::Node(referrer.parent))?;
                    let parent_type = parent
                        .lock()
                        .unwrap()
                        .as_node()
                        .map(|d| d.primary_type.clone());
                    match parent_type {
                        Some(ty) if is_storage_type(&ty) => {}
                        _ => return Err(StateError::ReferentialIntegrity(version_id)),
                    }
                }
            }

            let predecessors = ops::prop_values(local, version_id, &JCR_PREDECESSORS)?
                .map(|v| ref_ids(&v))
                .unwrap_or_default();
            let successors = ops::prop_values(local, version_id, &JCR_SUCCESSORS)?
                .map(|v| ref_ids(&v))
                .unwrap_or_default();

            // Unhook: predecessors inherit the successors and vice versa.
            for pred in &predecessors {
                let mut list = ops::prop_values(local, *pred, &JCR_SUCCESSORS)?
                    .map(|v| ref_ids(&v))
                    .unwrap_or_default();
                list.retain(|id| *id != version_id);
                for s in &successors {
                    if !list.contains(s) {
                        list.push(*s);
                    }
                }
                let state = local.get_item_state(&ItemId::Node(*pred))?;
                ops::set_property(
                    local,
                    &registry,
                    &state,
                    JCR_SUCCESSORS.clone(),
                    ValueType::Reference,
                    true,
                    ref_values(&list),
                )?;
            }
            for succ in &successors {
                let mut list = ops::prop_values(local, *succ, &JCR_PREDECESSORS)?
                    .map(|v| ref_ids(&v))
                    .unwrap_or_default();
                list.retain(|id| *id != version_id);
                for p in &predecessors {
                    if !list.contains(p) {
                        list.push(*p);
                    }
                }
                let state = local.get_item_state(&ItemId::Node(*succ))?;
                ops::set_property(
                    local,
                    &registry,
                    &state,
                    JCR_PREDECESSORS.clone(),
                    ValueType::Reference,
                    true,
                    ref_values(&list),
                )?;
            }

            // Drop labels pointing at the removed version.
            let mut removed_labels = vec![];
            let holder_id = {
                let h = history.lock().unwrap();
                h.as_node()
                    .expect("history is a node")
                    .child(&JCR_VERSION_LABELS, 1)
                    .map(|c| c.id)
            };
            if let Some(holder_id) = holder_id {
                let holder = local.get_item_state(&ItemId::Node(holder_id))?;
                let label_names: Vec<Name> = holder
                    .lock()
                    .unwrap()
                    .as_node()
                    .map(|d| d.property_names().cloned().collect())
                    .unwrap_or_default();
                for label in label_names {
                    let points_here = ops::prop_values(local, holder_id, &label)?
                        .map(|v| ref_ids(&v).contains(&version_id))
                        .unwrap_or(false);
                    if points_here {
                        ops::remove_property(local, &holder, &label)?;
                        removed_labels.push(label);
                    }
                }
            }

            history
                .lock()
                .unwrap()
                .as_node_mut()
                .expect("history is a node")
                .remove_child(&version_id);
            local.store(&history)?;
            ops::remove_subtree(local, version_id)?;
            Ok(removed_labels)
        })?;

        if let Some(labels) = inner.labels.get_mut(&history_id) {
            for label in removed_labels {
                labels.shift_remove(&label);
            }
        }
        Ok(())
    }

    /// Assign, move or remove a version label.
    ///
    /// `version = None` removes the label (a no-op when unassigned).
    /// Assigning an already-correct label is a no-op; re-pointing an
    /// assigned label requires `move_label`.
    pub fn set_label(
        &self,
        history: &NodeId,
        label: &Name,
        version: Option<&Name>,
        move_label: bool,
    ) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_labels(history)?;
        let history_id = *history;
        let registry = self.registry.clone();

        let existing = inner
            .labels
            .get(&history_id)
            .and_then(|m| m.get(label))
            .copied();

        match version {
            None => {
                if existing.is_none() {
                    return Ok(());
                }
                let label = label.clone();
                run_edit(&mut inner.local, |local| {
                    let holder_id = label_holder(local, history_id)?;
                    let holder = local.get_item_state(&ItemId::Node(holder_id))?;
                    ops::remove_property(local, &holder, &label)
                })?;
                if let Some(labels) = inner.labels.get_mut(&history_id) {
                    labels.shift_remove(&label);
                }
                Ok(())
            }
            Some(version_name) => {
                let version_id = {
                    let history_state =
                        inner.local.get_item_state(&ItemId::Node(history_id))?;
                    let h = history_state.lock().unwrap();
                    h.as_node()
                        .expect("history is a node")
                        .child(version_name, 1)
                        .map(|c| c.id)
                        .ok_or_else(|| {
                            StateError::Version(format!(
                                "no version {version_name} in {history_id}",
                            ))
                        })?
                };
                if existing == Some(version_id) {
                    return Ok(());
                }
                if existing.is_some() && !move_label {
                    return Err(StateError::Version(format!(
                        "label {label} is already assigned in {history_id}",
                    )));
                }
                let label_name = label.clone();
                run_edit(&mut inner.local, |local| {
                    let holder_id = label_holder(local, history_id)?;
                    let holder = local.get_item_state(&ItemId::Node(holder_id))?;
                    ops::set_property(
                        local,
                        &registry,
                        &holder,
                        label_name,
                        ValueType::Reference,
                        false,
                        vec![Value::Reference(version_id)],
                    )?;
                    Ok(())
                })?;
                inner
                    .labels
                    .entry(history_id)
                    .or_default()
                    .insert(label.clone(), version_id);
                Ok(())
            }
        }
    }

    pub fn version_by_label(
        &self,
        history: &NodeId,
        label: &Name,
    ) -> Result<Option<NodeId>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_labels(history)?;
        Ok(inner.labels.get(history).and_then(|m| m.get(label)).copied())
    }

    pub fn labels(&self, history: &NodeId) -> Result<Vec<Name>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ensure_labels(history)?;
        Ok(inner
            .labels
            .get(history)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Version names in the history, root version first, labels excluded.
    pub fn version_names(&self, history: &NodeId) -> Result<Vec<Name>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.local.get_item_state(&ItemId::Node(*history))?;
        let s = state.lock().unwrap();
        Ok(s.as_node()
            .map(|d| {
                d.children()
                    .iter()
                    .filter(|c| c.name != *JCR_VERSION_LABELS)
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn version_id(
        &self,
        history: &NodeId,
        name: &Name,
    ) -> Result<Option<NodeId>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.local.get_item_state(&ItemId::Node(*history))?;
        let s = state.lock().unwrap();
        Ok(s.as_node().and_then(|d| d.child(name, 1)).map(|c| c.id))
    }

    pub fn root_version(&self, history: &NodeId) -> Result<NodeId, StateError> {
        self.version_id(history, &JCR_ROOT_VERSION)?
            .ok_or_else(|| StateError::Version(format!("history {history} has no root version")))
    }

    pub fn predecessors(&self, version: &NodeId) -> Result<Vec<NodeId>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(ops::prop_values(&mut inner.local, *version, &JCR_PREDECESSORS)?
            .map(|v| ref_ids(&v))
            .unwrap_or_default())
    }

    pub fn successors(&self, version: &NodeId) -> Result<Vec<NodeId>, StateError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(ops::prop_values(&mut inner.local, *version, &JCR_SUCCESSORS)?
            .map(|v| ref_ids(&v))
            .unwrap_or_default())
    }
}

impl VersionCommitListener for VersionManager {
    /// Transaction-local version items became durable: drop affected cache
    /// entries so they reload from the committed view.
    fn version_items_committed(&self, items: &HashMap<NodeId, ItemStateRef, RandomState>) {
        let mut inner = self.inner.lock().unwrap();
        for (id, state) in items {
            inner.labels.remove(id);
            let gone = matches!(
                state.lock().unwrap().status(),
                ItemStatus::ExistingRemoved | ItemStatus::Undefined
            );
            if gone {
                inner.histories.retain(|_, history| history != id);
            }
        }
    }
}

impl Inner {
    /// History lookup: cache first, then a bucket descent by the versionable
    /// uuid.
    fn find_history(&mut self, versionable: &NodeId) -> Result<Option<NodeId>, StateError> {
        if let Some(id) = self.histories.get(versionable) {
            return Ok(Some(*id));
        }
        let registry = self.registry.clone();
        let Some(bucket) = descend_buckets(&mut self.local, &registry, *versionable, false)?
        else {
            return Ok(None);
        };
        let history_name = Name::new("", &versionable.hex());
        let bucket_state = self.local.get_item_state(&ItemId::Node(bucket))?;
        let found = bucket_state
            .lock()
            .unwrap()
            .as_node()
            .and_then(|d| d.child(&history_name, 1))
            .map(|c| c.id);
        if let Some(id) = found {
            self.histories.insert(*versionable, id);
        }
        Ok(found)
    }

    fn ensure_labels(&mut self, history: &NodeId) -> Result<(), StateError> {
        if self.labels.contains_key(history) {
            return Ok(());
        }
        let holder_id = label_holder(&mut self.local, *history)?;
        let holder = self.local.get_item_state(&ItemId::Node(holder_id))?;
        let names: Vec<Name> = holder
            .lock()
            .unwrap()
            .as_node()
            .map(|d| d.property_names().cloned().collect())
            .unwrap_or_default();
        let mut map: IndexMap<Name, NodeId, RandomState> = IndexMap::default();
        for name in names {
            if let Some(values) = ops::prop_values(&mut self.local, holder_id, &name)? {
                if let Some(id) = ref_ids(&values).first() {
                    map.insert(name, *id);
                }
            }
        }
        self.labels.insert(*history, map);
        Ok(())
    }
}

/// Walk (optionally creating) the three bucket levels for a versionable
/// uuid. Returns the innermost bucket node, or `None` when walking without
/// creation hits a missing level.
fn descend_buckets(
    local: &mut LocalStateManager,
    registry: &NodeTypeRegistry,
    versionable: NodeId,
    create: bool,
) -> Result<Option<NodeId>, StateError> {
    let hex = versionable.hex();
    let mut current = *VERSION_STORAGE_NODE_ID;
    for segment in [&hex[0..2], &hex[2..4], &hex[4..6]] {
        let name = Name::new("", segment);
        let state = local.get_item_state(&ItemId::Node(current))?;
        let found = state
            .lock()
            .unwrap()
            .as_node()
            .and_then(|d| d.child(&name, 1))
            .map(|c| c.id);
        current = match found {
            Some(id) => id,
            None if create => {
                let bucket = ops::add_child_node(
                    local,
                    registry,
                    current,
                    name,
                    REP_VERSION_STORAGE.clone(),
                    &[],
                    None,
                )?;
                bucket.lock().unwrap().id().node_id().expect("node id")
            }
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn label_holder(local: &mut LocalStateManager, history: NodeId) -> Result<NodeId, StateError> {
    let state = local.get_item_state(&ItemId::Node(history))?;
    let s = state.lock().unwrap();
    s.as_node()
        .and_then(|d| d.child(&JCR_VERSION_LABELS, 1))
        .map(|c| c.id)
        .ok_or_else(|| StateError::Version(format!("history {history} has no label holder")))
}

/// `jcr:created`, `jcr:predecessors` and an empty `jcr:successors` for a
/// fresh version node.
fn init_version_props(
    local: &mut LocalStateManager,
    registry: &NodeTypeRegistry,
    version: &ItemStateRef,
    predecessors: &[NodeId],
) -> Result<(), StateError> {
    ops::set_property(
        local,
        registry,
        version,
        JCR_CREATED.clone(),
        ValueType::Date,
        false,
        vec![Value::Date(Utc::now().to_rfc3339())],
    )?;
    ops::set_property(
        local,
        registry,
        version,
        JCR_PREDECESSORS.clone(),
        ValueType::Reference,
        true,
        ref_values(predecessors),
    )?;
    ops::set_property(
        local,
        registry,
        version,
        JCR_SUCCESSORS.clone(),
        ValueType::Reference,
        true,
        vec![],
    )?;
    Ok(())
}

/// The frozen child of a version: the versionable node's primary type,
/// mixins and identity at checkin time.
fn create_frozen_node(
    local: &mut LocalStateManager,
    registry: &NodeTypeRegistry,
    version: NodeId,
    primary: &Name,
    mixins: &[Name],
    versionable: NodeId,
) -> Result<(), StateError> {
    let frozen = ops::add_child_node(
        local,
        registry,
        version,
        JCR_FROZEN_NODE.clone(),
        NT_FROZEN_NODE.clone(),
        &[],
        None,
    )?;
    ops::set_property(
        local,
        registry,
        &frozen,
        JCR_FROZEN_PRIMARY_TYPE.clone(),
        ValueType::Name,
        false,
        vec![Value::Name(primary.clone())],
    )?;
    ops::set_property(
        local,
        registry,
        &frozen,
        JCR_FROZEN_MIXIN_TYPES.clone(),
        ValueType::Name,
        true,
        mixins.iter().cloned().map(Value::Name).collect(),
    )?;
    ops::set_property(
        local,
        registry,
        &frozen,
        JCR_FROZEN_UUID.clone(),
        ValueType::String,
        false,
        vec![Value::String(versionable.to_string())],
    )?;
    Ok(())
}

/// The versionable node's current primary type and mixins, for the frozen
/// capture.
fn frozen_source(
    local: &mut LocalStateManager,
    versionable: NodeId,
) -> Result<(Name, Vec<Name>), StateError> {
    match local.get_item_state(&ItemId::Node(versionable)) {
        Ok(state) => {
            let s = state.lock().unwrap();
            let data = s.as_node().ok_or_else(|| {
                StateError::Version(format!("{versionable} is not a node"))
            })?;
            Ok((
                data.primary_type.clone(),
                data.mixins.iter().cloned().collect(),
            ))
        }
        // The versionable node may live outside this store's normal view
        // (e.g. a virtual subtree); fall back to the history's root frozen
        // capture semantics.
        Err(_) => Err(StateError::Version(format!(
            "versionable node {versionable} is not resolvable",
        ))),
    }
}

/// Versions with no successors, label holder excluded; iteration order
/// follows the history's child list.
fn history_leaves(
    local: &mut LocalStateManager,
    history: NodeId,
) -> Result<Vec<NodeId>, StateError> {
    let state = local.get_item_state(&ItemId::Node(history))?;
    let children: Vec<NodeId> = {
        let s = state.lock().unwrap();
        s.as_node()
            .map(|d| {
                d.children()
                    .iter()
                    .filter(|c| c.name != *JCR_VERSION_LABELS)
                    .map(|c| c.id)
                    .collect()
            })
            .unwrap_or_default()
    };
    let mut leaves = vec![];
    for child in children {
        let successors = ops::prop_values(local, child, &JCR_SUCCESSORS)?
            .map(|v| ref_ids(&v))
            .unwrap_or_default();
        if successors.is_empty() {
            leaves.push(child);
        }
    }
    Ok(leaves)
}

/// Version naming: a dotted base increments its trailing integer segment; an
/// undotted base (the root version) starts a new major line.
fn next_version_name(base: &str, base_successors: usize) -> String {
    match base.rsplit_once('.') {
        Some((head, tail)) => match tail.parse::<u64>() {
            Ok(n) => format!("{head}.{}", n + 1),
            Err(_) => format!("{base}.1"),
        },
        None => format!("{}.0", base_successors + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_name_generation() {
        assert_eq!(next_version_name("rootVersion", 0), "1.0");
        assert_eq!(next_version_name("rootVersion", 2), "3.0");
        assert_eq!(next_version_name("1.0", 0), "1.1");
        assert_eq!(next_version_name("1.9", 0), "1.10");
        assert_eq!(next_version_name("2.3.1", 0), "2.3.2");
        assert_eq!(next_version_name("1.x", 0), "1.x.1");
    }

    #[test]
    fn storage_type_classification() {
        assert!(is_storage_type(&NT_VERSION));
        assert!(is_storage_type(&REP_VERSION_STORAGE));
        assert!(!is_storage_type(&arbor_common::names::NT_UNSTRUCTURED));
    }
}
