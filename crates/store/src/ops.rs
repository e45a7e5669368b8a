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

//! Typed operations over a local state manager: definition-resolved node and
//! property manipulation, shared by the versioning core and the importer.

use arbor_common::names::JCR_UUID;
use arbor_common::nodetype::NodeTypeRegistry;
use arbor_common::{ItemId, Name, NodeId, PropertyId, StateError, Value, ValueType};

use crate::local::LocalStateManager;
use crate::state::{ItemStateRef, NodeData, PropertyData};

/// Create a node of `primary` type under `parent`, resolving the governing
/// child-node definition from the parent's effective type, staging both the
/// new node and the parent's updated child list. Referenceable nodes get
/// their `jcr:uuid` identity property.
pub fn add_child_node(
    local: &mut LocalStateManager,
    registry: &NodeTypeRegistry,
    parent_id: NodeId,
    name: Name,
    primary: Name,
    mixins: &[Name],
    id: Option<NodeId>,
) -> Result<ItemStateRef, StateError> {
    let parent = local.get_item_state(&ItemId::Node(parent_id))?;
    let def = {
        let p = parent.lock().unwrap();
        let pdata = p
            .as_node()
            .ok_or_else(|| StateError::ConstraintViolation(format!(
                "{parent_id} is not a node",
            )))?;
        let mixin_names: Vec<Name> = pdata.mixins.iter().cloned().collect();
        let ent = registry.effective_of(&pdata.primary_type, &mixin_names)?;
        ent.applicable_child_def(&name, Some(&primary), registry)?
    };

    let node_id = id.unwrap_or_else(NodeId::random);
    let data = NodeData::new(primary, Some(parent_id), def.id())
        .with_mixins(mixins.iter().cloned());
    let referenceable = data.is_referenceable();
    let state = local.create_new_node(node_id, data)?;
    local.store(&state)?;

    parent
        .lock()
        .unwrap()
        .as_node_mut()
        .expect("checked above")
        .add_child(name, node_id);
    local.store(&parent)?;

    if referenceable {
        set_property(
            local,
            registry,
            &state,
            JCR_UUID.clone(),
            ValueType::String,
            false,
            vec![Value::String(node_id.to_string())],
        )?;
    }
    Ok(state)
}

/// Set (create or replace) a property on the given node state, resolving the
/// governing property definition from the node's effective type on first
/// creation.
pub fn set_property(
    local: &mut LocalStateManager,
    registry: &NodeTypeRegistry,
    node: &ItemStateRef,
    name: Name,
    value_type: ValueType,
    multiple: bool,
    values: Vec<Value>,
) -> Result<ItemStateRef, StateError> {
    let (node_id, exists) = {
        let n = node.lock().unwrap();
        let data = n.as_node().ok_or_else(|| {
            StateError::ConstraintViolation("properties live on nodes".into())
        })?;
        let node_id = n
            .id()
            .node_id()
            .expect("node states carry node ids");
        (node_id, data.has_property(&name))
    };
    let pid = PropertyId::new(node_id, name.clone());

    if exists {
        let prop = local.get_item_state(&ItemId::Property(pid))?;
        {
            let mut p = prop.lock().unwrap();
            let data = p.as_property_mut().expect("property state");
            data.value_type = value_type;
            data.multiple = multiple;
            data.values = values;
        }
        local.store(&prop)?;
        return Ok(prop);
    }

    let def = {
        let n = node.lock().unwrap();
        let data = n.as_node().expect("checked above");
        let mixin_names: Vec<Name> = data.mixins.iter().cloned().collect();
        let ent = registry.effective_of(&data.primary_type, &mixin_names)?;
        ent.applicable_prop_def(&name, value_type, multiple)?
    };
    let pdata = PropertyData::new(value_type, multiple, def.id()).with_values(values);
    let prop = local.create_new_property(pid, pdata)?;
    local.store(&prop)?;

    node.lock()
        .unwrap()
        .as_node_mut()
        .expect("checked above")
        .add_property_name(name);
    local.store(node)?;
    Ok(prop)
}

/// Remove a property from the given node state.
pub fn remove_property(
    local: &mut LocalStateManager,
    node: &ItemStateRef,
    name: &Name,
) -> Result<(), StateError> {
    let node_id = {
        let n = node.lock().unwrap();
        n.id().node_id().ok_or_else(|| {
            StateError::ConstraintViolation("properties live on nodes".into())
        })?
    };
    let pid = PropertyId::new(node_id, name.clone());
    let prop = local.get_item_state(&ItemId::Property(pid))?;
    local.destroy(&prop)?;
    node.lock()
        .unwrap()
        .as_node_mut()
        .ok_or_else(|| StateError::ConstraintViolation("properties live on nodes".into()))?
        .remove_property_name(name);
    local.store(node)?;
    Ok(())
}

/// The current values of a node's property, or `None` when absent.
pub fn prop_values(
    local: &mut LocalStateManager,
    node: NodeId,
    name: &Name,
) -> Result<Option<Vec<Value>>, StateError> {
    let pid = ItemId::Property(PropertyId::new(node, name.clone()));
    if !local.has_item_state(&pid) {
        return Ok(None);
    }
    let prop = local.get_item_state(&pid)?;
    let p = prop.lock().unwrap();
    Ok(p.as_property().map(|d| d.values.clone()))
}

/// Stage removal of a whole subtree: every property and descendant of
/// `node_id`, then the node itself. The caller detaches the subtree root
/// from its surviving parent.
pub fn remove_subtree(
    local: &mut LocalStateManager,
    node_id: NodeId,
) -> Result<(), StateError> {
    let state = local.get_item_state(&ItemId::Node(node_id))?;
    let (prop_names, child_ids) = {
        let s = state.lock().unwrap();
        let data = s.as_node().ok_or_else(|| {
            StateError::ConstraintViolation(format!("{node_id} is not a node"))
        })?;
        (
            data.property_names().cloned().collect::<Vec<_>>(),
            data.children().iter().map(|c| c.id).collect::<Vec<_>>(),
        )
    };
    for name in prop_names {
        let pid = ItemId::Property(PropertyId::new(node_id, name));
        if let Ok(prop) = local.get_item_state(&pid) {
            local.destroy(&prop)?;
        }
    }
    for child in child_ids {
        remove_subtree(local, child)?;
    }
    local.destroy(&state)?;
    Ok(())
}

/// Remove a node (and its subtree), detaching it from its parent's child
/// list.
pub fn remove_node(local: &mut LocalStateManager, node_id: NodeId) -> Result<(), StateError> {
    let parent_id = {
        let state = local.get_item_state(&ItemId::Node(node_id))?;
        let s = state.lock().unwrap();
        s.as_node().and_then(|d| d.parent)
    };
    if let Some(parent_id) = parent_id
        && let Ok(parent) = local.get_item_state(&ItemId::Node(parent_id))
    {
        parent
            .lock()
            .unwrap()
            .as_node_mut()
            .map(|d| d.remove_child(&node_id));
        local.store(&parent)?;
    }
    remove_subtree(local, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arbor_common::names::{MIX_REFERENCEABLE, NT_UNSTRUCTURED};

    use crate::blob::MemBlobStore;
    use crate::bundle::{BundleCodec, NameIndex};
    use crate::config::StoreConfig;
    use crate::persistence::MemPersistence;
    use crate::shared::SharedStateManager;
    use crate::state::ItemStatus;

    fn setup() -> (LocalStateManager, Arc<NodeTypeRegistry>, NodeId) {
        let codec = BundleCodec::new(
            Arc::new(NameIndex::new()),
            Arc::new(MemBlobStore::new()),
            &StoreConfig::default(),
        );
        let shared = SharedStateManager::new(Arc::new(MemPersistence::new(codec)));
        let registry = Arc::new(NodeTypeRegistry::new());
        let mut local = LocalStateManager::new(shared);

        // A root to hang things off.
        let root_id = NodeId::random();
        local.edit().unwrap();
        let root = local
            .create_new_node(
                root_id,
                NodeData::new(
                    NT_UNSTRUCTURED.clone(),
                    None,
                    arbor_common::nodetype::DefId::from_string("root".into()),
                ),
            )
            .unwrap();
        local.store(&root).unwrap();
        local.update().unwrap();
        (local, registry, root_id)
    }

    fn n(local_name: &str) -> Name {
        Name::new("test", local_name)
    }

    #[test]
    fn add_child_resolves_definition_and_links_parent() {
        let (mut local, registry, root_id) = setup();
        local.edit().unwrap();
        let child = add_child_node(
            &mut local,
            &registry,
            root_id,
            n("doc"),
            NT_UNSTRUCTURED.clone(),
            &[],
            None,
        )
        .unwrap();
        local.update().unwrap();

        let child_id = child.lock().unwrap().id().node_id().unwrap();
        let root = local.get_item_state(&ItemId::Node(root_id)).unwrap();
        let r = root.lock().unwrap();
        assert_eq!(r.as_node().unwrap().child(&n("doc"), 1).unwrap().id, child_id);
    }

    #[test]
    fn referenceable_child_gets_uuid_property() {
        let (mut local, registry, root_id) = setup();
        local.edit().unwrap();
        let child = add_child_node(
            &mut local,
            &registry,
            root_id,
            n("entity"),
            NT_UNSTRUCTURED.clone(),
            &[MIX_REFERENCEABLE.clone()],
            None,
        )
        .unwrap();
        local.update().unwrap();

        let child_id = child.lock().unwrap().id().node_id().unwrap();
        let values = prop_values(&mut local, child_id, &JCR_UUID).unwrap().unwrap();
        assert_eq!(values, vec![Value::String(child_id.to_string())]);
    }

    #[test]
    fn set_property_creates_then_replaces() {
        let (mut local, registry, root_id) = setup();
        local.edit().unwrap();
        let node = add_child_node(
            &mut local,
            &registry,
            root_id,
            n("doc"),
            NT_UNSTRUCTURED.clone(),
            &[],
            None,
        )
        .unwrap();
        set_property(
            &mut local,
            &registry,
            &node,
            n("count"),
            ValueType::Long,
            false,
            vec![Value::Long(1)],
        )
        .unwrap();
        local.update().unwrap();

        let node_id = node.lock().unwrap().id().node_id().unwrap();
        local.edit().unwrap();
        let node = local.get_item_state(&ItemId::Node(node_id)).unwrap();
        set_property(
            &mut local,
            &registry,
            &node,
            n("count"),
            ValueType::Long,
            false,
            vec![Value::Long(2)],
        )
        .unwrap();
        local.update().unwrap();

        assert_eq!(
            prop_values(&mut local, node_id, &n("count")).unwrap().unwrap(),
            vec![Value::Long(2)]
        );
    }

    #[test]
    fn remove_node_removes_subtree_and_detaches() {
        let (mut local, registry, root_id) = setup();
        local.edit().unwrap();
        let a = add_child_node(
            &mut local,
            &registry,
            root_id,
            n("a"),
            NT_UNSTRUCTURED.clone(),
            &[],
            None,
        )
        .unwrap();
        let a_id = a.lock().unwrap().id().node_id().unwrap();
        let b = add_child_node(
            &mut local,
            &registry,
            a_id,
            n("b"),
            NT_UNSTRUCTURED.clone(),
            &[],
            None,
        )
        .unwrap();
        let b_id = b.lock().unwrap().id().node_id().unwrap();
        set_property(
            &mut local,
            &registry,
            &b,
            n("p"),
            ValueType::String,
            false,
            vec![Value::String("x".into())],
        )
        .unwrap();
        local.update().unwrap();

        local.edit().unwrap();
        remove_node(&mut local, a_id).unwrap();
        local.update().unwrap();

        assert!(!local.has_item_state(&ItemId::Node(a_id)));
        assert!(!local.has_item_state(&ItemId::Node(b_id)));
        let root = local.get_item_state(&ItemId::Node(root_id)).unwrap();
        assert!(root.lock().unwrap().as_node().unwrap().children().is_empty());
        // The root's staged state went through the pipeline.
        assert_eq!(root.lock().unwrap().status(), ItemStatus::Existing);
    }
}
