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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arbor_common::names::{
        JCR_ROOT_VERSION, JCR_SYSTEM, JCR_VERSION_STORAGE, MIX_REFERENCEABLE, NT_UNSTRUCTURED,
        Name,
    };
    use arbor_common::nodetype::NodeTypeRegistry;
    use arbor_common::{
        ItemId, NodeId, ROOT_NODE_ID, StateError, VERSION_STORAGE_NODE_ID, Value, ValueType,
    };

    use crate::blob::MemBlobStore;
    use crate::bundle::{BundleCodec, NameIndex};
    use crate::config::StoreConfig;
    use crate::local::LocalStateManager;
    use crate::ops;
    use crate::persistence::MemPersistence;
    use crate::shared::SharedStateManager;
    use crate::version::VersionManager;

    fn setup() -> (
        Arc<SharedStateManager>,
        Arc<NodeTypeRegistry>,
        Arc<VersionManager>,
    ) {
        let codec = BundleCodec::new(
            Arc::new(NameIndex::new()),
            Arc::new(MemBlobStore::new()),
            &StoreConfig::default(),
        );
        let shared = SharedStateManager::new(Arc::new(MemPersistence::new(codec)));
        let registry = Arc::new(NodeTypeRegistry::new());
        let vm = VersionManager::new(shared.clone(), registry.clone()).unwrap();
        (shared, registry, vm)
    }

    fn n(local: &str) -> Name {
        Name::new("test", local)
    }

    /// A committed versionable node under the root.
    fn versionable(
        shared: &Arc<SharedStateManager>,
        registry: &Arc<NodeTypeRegistry>,
        name: &str,
    ) -> NodeId {
        let mut local = LocalStateManager::new(shared.clone());
        local.edit().unwrap();
        let state = ops::add_child_node(
            &mut local,
            registry,
            *ROOT_NODE_ID,
            n(name),
            NT_UNSTRUCTURED.clone(),
            &[MIX_REFERENCEABLE.clone()],
            None,
        )
        .unwrap();
        let id = state.lock().unwrap().id().node_id().unwrap();
        local.update().unwrap();
        id
    }

    #[test]
    fn bootstrap_creates_storage_skeleton() {
        let (shared, _, _) = setup();
        assert!(shared.has_item_state(&ItemId::Node(*ROOT_NODE_ID)));
        assert!(shared.has_item_state(&ItemId::Node(*VERSION_STORAGE_NODE_ID)));

        // Root links system links storage.
        let root = shared.get_item_state(&ItemId::Node(*ROOT_NODE_ID)).unwrap();
        let system_id = root
            .lock()
            .unwrap()
            .as_node()
            .unwrap()
            .child(&JCR_SYSTEM, 1)
            .unwrap()
            .id;
        let system = shared.get_item_state(&ItemId::Node(system_id)).unwrap();
        assert_eq!(
            system
                .lock()
                .unwrap()
                .as_node()
                .unwrap()
                .child(&JCR_VERSION_STORAGE, 1)
                .unwrap()
                .id,
            *VERSION_STORAGE_NODE_ID
        );

        // Re-opening over the same store is a no-op.
        let registry = Arc::new(NodeTypeRegistry::new());
        VersionManager::new(shared, registry).unwrap();
    }

    #[test]
    fn history_creation_is_idempotent_and_bucketed() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");

        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[MIX_REFERENCEABLE.clone()])
            .unwrap()
            .expect("fresh history");
        assert_eq!(vm.create_version_history(v, &NT_UNSTRUCTURED, &[]).unwrap(), None);
        assert_eq!(vm.history_for(&v).unwrap(), Some(history));

        // Bucket path: three levels keyed by the uuid's leading hex pairs.
        let hex = v.hex();
        let mut cursor = *VERSION_STORAGE_NODE_ID;
        for segment in [&hex[0..2], &hex[2..4], &hex[4..6]] {
            let state = shared.get_item_state(&ItemId::Node(cursor)).unwrap();
            let s = state.lock().unwrap();
            cursor = s
                .as_node()
                .unwrap()
                .child(&Name::new("", segment), 1)
                .unwrap_or_else(|| panic!("missing bucket {segment}"))
                .id;
        }
        let bucket = shared.get_item_state(&ItemId::Node(cursor)).unwrap();
        assert_eq!(
            bucket
                .lock()
                .unwrap()
                .as_node()
                .unwrap()
                .child(&Name::new("", &hex), 1)
                .unwrap()
                .id,
            history
        );

        // A fresh manager over the same store finds it without the cache.
        let vm2 = VersionManager::new(shared, registry).unwrap();
        assert_eq!(vm2.history_for(&v).unwrap(), Some(history));
    }

    #[test]
    fn checkin_builds_the_version_graph() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let root_version = vm.root_version(&history).unwrap();

        // First checkin: 1.0 with the root version as predecessor.
        let v10 = vm.checkin(&v).unwrap();
        assert_eq!(
            vm.version_id(&history, &Name::new("", "1.0")).unwrap(),
            Some(v10)
        );
        assert_eq!(vm.predecessors(&v10).unwrap(), vec![root_version]);
        assert_eq!(vm.successors(&root_version).unwrap(), vec![v10]);

        // Second checkin: 1.1 following 1.0.
        let v11 = vm.checkin(&v).unwrap();
        assert_eq!(
            vm.version_id(&history, &Name::new("", "1.1")).unwrap(),
            Some(v11)
        );
        assert_eq!(vm.predecessors(&v11).unwrap(), vec![v10]);
        assert_eq!(vm.successors(&v10).unwrap(), vec![v11]);

        // Root version removal is forbidden.
        let err = vm.remove_version(&history, &JCR_ROOT_VERSION).unwrap_err();
        assert!(matches!(err, StateError::Version(_)));

        // Removing 1.1 unhooks it from 1.0.
        vm.remove_version(&history, &Name::new("", "1.1")).unwrap();
        assert!(vm.successors(&v10).unwrap().is_empty());
        assert_eq!(
            vm.version_id(&history, &Name::new("", "1.1")).unwrap(),
            None
        );
        assert!(!shared.has_item_state(&ItemId::Node(v11)));
    }

    #[test]
    fn remove_middle_version_bridges_the_graph() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let v10 = vm.checkin(&v).unwrap();
        let v11 = vm.checkin(&v).unwrap();
        let v12 = vm.checkin(&v).unwrap();
        assert_eq!(vm.predecessors(&v12).unwrap(), vec![v11]);

        vm.remove_version(&history, &Name::new("", "1.1")).unwrap();
        // 1.0 and 1.2 are now wired to each other.
        assert_eq!(vm.successors(&v10).unwrap(), vec![v12]);
        assert_eq!(vm.predecessors(&v12).unwrap(), vec![v10]);
    }

    #[test]
    fn version_names_collide_into_dotted_suffixes() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let v10 = vm.checkin(&v).unwrap();
        let _v11 = vm.checkin(&v).unwrap();

        // Force a second line from 1.0: predecessors of the versionable now
        // name 1.0 explicitly.
        let mut local = LocalStateManager::new(shared.clone());
        local.edit().unwrap();
        let state = local.get_item_state(&ItemId::Node(v)).unwrap();
        ops::set_property(
            &mut local,
            &registry,
            &state,
            arbor_common::names::JCR_PREDECESSORS.clone(),
            ValueType::Reference,
            true,
            vec![Value::Reference(v10)],
        )
        .unwrap();
        local.update().unwrap();

        // 1.0 already has a successor named 1.1, and the candidate 1.1 is
        // taken, so the new version uniquifies with a .1 suffix.
        let forked = vm.checkin(&v).unwrap();
        let names = vm.version_names(&history).unwrap();
        assert!(
            names.contains(&Name::new("", "1.1.1")),
            "expected a uniquified fork name, got {names:?}"
        );
        assert_eq!(vm.predecessors(&forked).unwrap(), vec![v10]);
    }

    #[test]
    fn labels_assign_move_and_remove() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let v10 = vm.checkin(&v).unwrap();
        let v11 = vm.checkin(&v).unwrap();
        let stable = Name::new("", "stable");

        // Unassigned label removed: no-op.
        vm.set_label(&history, &stable, None, false).unwrap();

        vm.set_label(&history, &stable, Some(&Name::new("", "1.0")), false)
            .unwrap();
        assert_eq!(vm.version_by_label(&history, &stable).unwrap(), Some(v10));

        // Same assignment again: no-op.
        vm.set_label(&history, &stable, Some(&Name::new("", "1.0")), false)
            .unwrap();

        // Re-pointing without move fails.
        let err = vm
            .set_label(&history, &stable, Some(&Name::new("", "1.1")), false)
            .unwrap_err();
        assert!(matches!(err, StateError::Version(_)));

        vm.set_label(&history, &stable, Some(&Name::new("", "1.1")), true)
            .unwrap();
        assert_eq!(vm.version_by_label(&history, &stable).unwrap(), Some(v11));
        assert_eq!(vm.labels(&history).unwrap(), vec![stable.clone()]);

        // A fresh manager reloads labels from storage.
        let vm2 = VersionManager::new(shared, registry).unwrap();
        assert_eq!(vm2.version_by_label(&history, &stable).unwrap(), Some(v11));

        vm.set_label(&history, &stable, None, false).unwrap();
        assert_eq!(vm.version_by_label(&history, &stable).unwrap(), None);
    }

    #[test]
    fn removing_a_labelled_version_drops_its_labels() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let _v10 = vm.checkin(&v).unwrap();
        let v11 = vm.checkin(&v).unwrap();
        let tip = Name::new("", "tip");
        vm.set_label(&history, &tip, Some(&Name::new("", "1.1")), false)
            .unwrap();
        assert_eq!(vm.version_by_label(&history, &tip).unwrap(), Some(v11));

        vm.remove_version(&history, &Name::new("", "1.1")).unwrap();
        assert_eq!(vm.version_by_label(&history, &tip).unwrap(), None);
        assert!(vm.labels(&history).unwrap().is_empty());
    }

    #[test]
    fn externally_referenced_version_cannot_be_removed() {
        let (shared, registry, vm) = setup();
        let v = versionable(&shared, &registry, "doc");
        let history = vm
            .create_version_history(v, &NT_UNSTRUCTURED, &[])
            .unwrap()
            .unwrap();
        let v10 = vm.checkin(&v).unwrap();

        // A normal node points at 1.0.
        let mut local = LocalStateManager::new(shared.clone());
        local.edit().unwrap();
        let holder = ops::add_child_node(
            &mut local,
            &registry,
            *ROOT_NODE_ID,
            n("holder"),
            NT_UNSTRUCTURED.clone(),
            &[],
            None,
        )
        .unwrap();
        ops::set_property(
            &mut local,
            &registry,
            &holder,
            n("pin"),
            ValueType::Reference,
            false,
            vec![Value::Reference(v10)],
        )
        .unwrap();
        local.update().unwrap();

        let err = vm
            .remove_version(&history, &Name::new("", "1.0"))
            .unwrap_err();
        assert_eq!(err, StateError::ReferentialIntegrity(v10));

        // Dropping the pin makes the removal possible.
        local.edit().unwrap();
        let holder = local
            .get_item_state(&holder.lock().unwrap().id().clone())
            .unwrap();
        ops::remove_property(&mut local, &holder, &n("pin")).unwrap();
        local.update().unwrap();
        vm.remove_version(&history, &Name::new("", "1.0")).unwrap();
    }
}
