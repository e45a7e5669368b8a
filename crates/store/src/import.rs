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

//! The importer: consumes a `start_node`/`end_node` event stream into a
//! local state manager, with tree structure implied by a stack of pending
//! parents.
//!
//! Identity collisions resolve per the policy chosen at import start; with
//! `CreateNew`, remapped uuids are tracked so REFERENCE values are
//! substituted in the `end` pass. The caller owns the surrounding edit
//! sequence and commits (or cancels) after `end`.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use tracing::{debug, warn};

use arbor_common::names::MIX_REFERENCEABLE;
use arbor_common::nodetype::{NodeTypeRegistry, PropDef};
use arbor_common::{ItemId, Name, NodeId, PropertyId, StateError, Value, ValueType};

use crate::local::LocalStateManager;
use crate::ops;
use crate::state::ItemStateRef;

/// Resolution policy for an incoming node whose uuid already exists.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UuidPolicy {
    /// Always allocate a fresh uuid; remap references to referenceable
    /// imports.
    CreateNew,
    /// Any collision is an error.
    Throw,
    /// Remove the conflicting subtree, keep the incoming uuid in place.
    RemoveExisting,
    /// Remove the conflicting subtree and put the incoming node where the
    /// conflicting one was.
    ReplaceExisting,
}

/// One node event of the import stream.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub name: Name,
    pub primary_type: Name,
    pub mixins: Vec<Name>,
    pub id: Option<NodeId>,
}

/// One serialized property of a node event. Values arrive in string form;
/// BINARY payloads are base64.
#[derive(Clone, Debug)]
pub struct PropInfo {
    pub name: Name,
    pub value_type: ValueType,
    pub values: Vec<String>,
}

pub struct Importer<'a> {
    local: &'a mut LocalStateManager,
    registry: Arc<NodeTypeRegistry>,
    policy: UuidPolicy,
    target: NodeId,
    /// Pending parents; the bottom entry is the import target.
    stack: Vec<NodeId>,
    /// Original uuid → newly allocated uuid (CreateNew).
    uuid_map: HashMap<NodeId, NodeId, RandomState>,
    /// Imported REFERENCE properties awaiting the remap pass.
    ref_props: Vec<PropertyId>,
    aborted: bool,
}

impl<'a> Importer<'a> {
    /// Start an import into `target`. The local manager must be editing.
    pub fn new(
        local: &'a mut LocalStateManager,
        registry: Arc<NodeTypeRegistry>,
        target: NodeId,
        policy: UuidPolicy,
    ) -> Result<Self, StateError> {
        if !local.in_edit() {
            return Err(StateError::IllegalState(
                "importer requires an open edit sequence".into(),
            ));
        }
        if !local.has_item_state(&ItemId::Node(target)) {
            return Err(StateError::NoSuchItemState(ItemId::Node(target)));
        }
        Ok(Self {
            local,
            registry,
            policy,
            target,
            stack: vec![target],
            uuid_map: HashMap::default(),
            ref_props: vec![],
            aborted: false,
        })
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn uuid_map(&self) -> &HashMap<NodeId, NodeId, RandomState> {
        &self.uuid_map
    }

    /// Consume a node-start event with its properties.
    pub fn start_node(
        &mut self,
        info: NodeInfo,
        props: Vec<PropInfo>,
    ) -> Result<(), StateError> {
        if self.aborted {
            return Ok(());
        }
        match self.start_node_inner(info, props) {
            Ok(id) => {
                self.stack.push(id);
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Consume a node-end event.
    pub fn end_node(&mut self) -> Result<(), StateError> {
        if self.aborted {
            return Ok(());
        }
        if self.stack.len() <= 1 {
            self.abort();
            return Err(StateError::IllegalState(
                "unbalanced end-node event".into(),
            ));
        }
        self.stack.pop();
        Ok(())
    }

    /// Finish the import: substitute remapped uuids into tracked REFERENCE
    /// properties and validate the import target. The caller commits
    /// afterwards.
    pub fn end(&mut self) -> Result<(), StateError> {
        if self.aborted {
            return Ok(());
        }
        match self.end_inner() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        self.aborted = true;
        if let Err(e) = self.local.cancel() {
            warn!(error = %e, "cancel after import failure");
        }
    }

    fn start_node_inner(
        &mut self,
        info: NodeInfo,
        props: Vec<PropInfo>,
    ) -> Result<NodeId, StateError> {
        let stack_parent = *self.stack.last().expect("stack holds at least the target");
        let incoming_referenceable = info.mixins.contains(&MIX_REFERENCEABLE);

        let (node_id, parent_id) = match info.id {
            None => (NodeId::random(), stack_parent),
            Some(id) => match self.policy {
                UuidPolicy::CreateNew => {
                    let fresh = NodeId::random();
                    if incoming_referenceable {
                        self.uuid_map.insert(id, fresh);
                    }
                    (fresh, stack_parent)
                }
                UuidPolicy::Throw => {
                    if self.local.has_item_state(&ItemId::Node(id)) {
                        return Err(StateError::ItemExists(id.to_string()));
                    }
                    (id, stack_parent)
                }
                UuidPolicy::RemoveExisting => {
                    if self.local.has_item_state(&ItemId::Node(id)) {
                        self.check_removable(id, stack_parent)?;
                        ops::remove_node(self.local, id)?;
                    }
                    (id, stack_parent)
                }
                UuidPolicy::ReplaceExisting => {
                    if self.local.has_item_state(&ItemId::Node(id)) {
                        self.check_removable(id, stack_parent)?;
                        let conflicting = self.local.get_item_state(&ItemId::Node(id))?;
                        let conflicting_parent = conflicting
                            .lock()
                            .unwrap()
                            .as_node()
                            .and_then(|d| d.parent);
                        let Some(conflicting_parent) = conflicting_parent else {
                            return Err(StateError::ConstraintViolation(
                                "cannot replace the root node".into(),
                            ));
                        };
                        ops::remove_node(self.local, id)?;
                        (id, conflicting_parent)
                    } else {
                        (id, stack_parent)
                    }
                }
            },
        };

        let state = ops::add_child_node(
            self.local,
            &self.registry,
            parent_id,
            info.name.clone(),
            info.primary_type.clone(),
            &info.mixins,
            Some(node_id),
        )?;
        debug!(node = %node_id, name = %info.name, "imported node");

        let ent = self
            .registry
            .effective_of(&info.primary_type, &info.mixins)?;
        for prop in props {
            self.import_property(&state, node_id, &ent, prop)?;
        }
        Ok(node_id)
    }

    /// The conflicting node may not be the import target or an ancestor of
    /// the current position.
    fn check_removable(&mut self, id: NodeId, current: NodeId) -> Result<(), StateError> {
        if id == self.target || self.is_ancestor(id, current)? {
            return Err(StateError::ConstraintViolation(format!(
                "conflicting node {id} is the import target or an ancestor of it",
            )));
        }
        Ok(())
    }

    fn is_ancestor(&mut self, candidate: NodeId, of: NodeId) -> Result<bool, StateError> {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return Ok(true);
            }
            let state = self.local.get_item_state(&ItemId::Node(id))?;
            let s = state.lock().unwrap();
            cursor = s.as_node().and_then(|d| d.parent);
        }
        Ok(false)
    }

    fn import_property(
        &mut self,
        node: &ItemStateRef,
        node_id: NodeId,
        ent: &arbor_common::nodetype::EffectiveNodeType,
        info: PropInfo,
    ) -> Result<(), StateError> {
        let existing = {
            let n = node.lock().unwrap();
            n.as_node()
                .map(|d| d.has_property(&info.name))
                .unwrap_or(false)
        };
        let incoming_multiple = info.values.len() != 1;

        let def: PropDef = if existing {
            // A same-named property exists (auto-created identity, or left
            // by a replaced node): its definition governs.
            match ent.named_prop_defs(&info.name).first() {
                Some(def) => def.clone(),
                None => ent.applicable_prop_def(
                    &info.name,
                    info.value_type,
                    incoming_multiple,
                )?,
            }
        } else {
            ent.applicable_prop_def(&info.name, info.value_type, incoming_multiple)?
        };

        if def.protected {
            // Identity and type bookkeeping arrive through the node info;
            // protected content is not importable.
            debug!(name = %info.name, "skipping protected property");
            return Ok(());
        }

        let target_type = if def.required_type != ValueType::Undefined {
            def.required_type
        } else if info.value_type != ValueType::Undefined {
            info.value_type
        } else {
            ValueType::String
        };

        let mut values = Vec::with_capacity(info.values.len());
        for raw in &info.values {
            values.push(Value::from_serialized(target_type, raw)?);
        }
        self.registry.validate_values(&def, &values)?;

        if target_type == ValueType::Reference {
            self.ref_props
                .push(PropertyId::new(node_id, info.name.clone()));
        }

        ops::set_property(
            self.local,
            &self.registry,
            node,
            info.name,
            target_type,
            def.multiple,
            values,
        )?;
        Ok(())
    }

    fn end_inner(&mut self) -> Result<(), StateError> {
        // Walk the tracked REFERENCE properties, substituting remapped
        // uuids.
        for pid in std::mem::take(&mut self.ref_props) {
            let state = self.local.get_item_state(&ItemId::Property(pid))?;
            let mut changed = false;
            {
                let mut s = state.lock().unwrap();
                if let Some(data) = s.as_property_mut() {
                    for value in &mut data.values {
                        if let Value::Reference(old) = value
                            && let Some(new) = self.uuid_map.get(old)
                        {
                            *value = Value::Reference(*new);
                            changed = true;
                        }
                    }
                }
            }
            if changed {
                self.local.store(&state)?;
            }
        }

        // Validate the import target: every mandatory item of its effective
        // type must be present.
        let target = self.local.get_item_state(&ItemId::Node(self.target))?;
        let t = target.lock().unwrap();
        let data = t
            .as_node()
            .ok_or_else(|| StateError::ConstraintViolation("import target is not a node".into()))?;
        let mixins: Vec<Name> = data.mixins.iter().cloned().collect();
        let ent = self.registry.effective_of(&data.primary_type, &mixins)?;
        for name in ent.mandatory_item_names() {
            let present = data.has_property(&name) || data.child(&name, 1).is_some();
            if !present {
                return Err(StateError::ConstraintViolation(format!(
                    "import target is missing mandatory item {name}",
                )));
            }
        }
        Ok(())
    }
}
