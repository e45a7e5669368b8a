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

use ahash::RandomState;
use indexmap::IndexSet;

use arbor_common::names::MIX_REFERENCEABLE;
use arbor_common::nodetype::DefId;
use arbor_common::{Name, NodeId};

/// A child-node entry: qualified name plus the child's identity. The 1-based
/// same-name-sibling index is positional — an entry's index is its rank among
/// same-named entries in list order, so indices per name are contiguous from
/// 1 and survive any add/remove sequence.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChildEntry {
    pub name: Name,
    pub id: NodeId,
}

/// The payload of a node state.
#[derive(Clone, PartialEq, Debug)]
pub struct NodeData {
    pub primary_type: Name,
    pub mixins: IndexSet<Name, RandomState>,
    pub parent: Option<NodeId>,
    pub def_id: DefId,
    children: Vec<ChildEntry>,
    properties: IndexSet<Name, RandomState>,
}

impl NodeData {
    pub fn new(primary_type: Name, parent: Option<NodeId>, def_id: DefId) -> Self {
        Self {
            primary_type,
            mixins: IndexSet::default(),
            parent,
            def_id,
            children: Vec::new(),
            properties: IndexSet::default(),
        }
    }

    pub fn with_mixins(mut self, mixins: impl IntoIterator<Item = Name>) -> Self {
        self.mixins.extend(mixins);
        self
    }

    pub fn is_referenceable(&self) -> bool {
        self.mixins.contains(&*MIX_REFERENCEABLE)
    }

    pub fn children(&self) -> &[ChildEntry] {
        &self.children
    }

    pub(crate) fn set_children(&mut self, children: Vec<ChildEntry>) {
        self.children = children;
    }

    /// Append a child entry; returns its 1-based index among same-named
    /// siblings.
    pub fn add_child(&mut self, name: Name, id: NodeId) -> u32 {
        let index = self
            .children
            .iter()
            .filter(|e| e.name == name)
            .count() as u32
            + 1;
        self.children.push(ChildEntry { name, id });
        index
    }

    /// Remove the entry for the given child id. Later same-named siblings
    /// shift down, keeping indices contiguous.
    pub fn remove_child(&mut self, id: &NodeId) -> Option<ChildEntry> {
        let pos = self.children.iter().position(|e| e.id == *id)?;
        Some(self.children.remove(pos))
    }

    /// Remove the `index`-th (1-based) child of the given name.
    pub fn remove_child_entry(&mut self, name: &Name, index: u32) -> Option<ChildEntry> {
        let pos = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, e)| e.name == *name)
            .nth(index.checked_sub(1)? as usize)
            .map(|(i, _)| i)?;
        Some(self.children.remove(pos))
    }

    /// The `index`-th (1-based) child of the given name.
    pub fn child(&self, name: &Name, index: u32) -> Option<&ChildEntry> {
        self.children
            .iter()
            .filter(|e| e.name == *name)
            .nth(index.checked_sub(1)? as usize)
    }

    /// 1-based index of the given child among its same-named siblings.
    pub fn child_index(&self, id: &NodeId) -> Option<u32> {
        let entry = self.children.iter().find(|e| e.id == *id)?;
        Some(
            self.children
                .iter()
                .take_while(|e| e.id != *id)
                .filter(|e| e.name == entry.name)
                .count() as u32
                + 1,
        )
    }

    pub fn has_child(&self, id: &NodeId) -> bool {
        self.children.iter().any(|e| e.id == *id)
    }

    pub fn children_named<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = &'a ChildEntry> {
        self.children.iter().filter(move |e| e.name == *name)
    }

    pub fn add_property_name(&mut self, name: Name) -> bool {
        self.properties.insert(name)
    }

    pub fn remove_property_name(&mut self, name: &Name) -> bool {
        self.properties.shift_remove(name)
    }

    pub fn has_property(&self, name: &Name) -> bool {
        self.properties.contains(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &Name> {
        self.properties.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> NodeData {
        NodeData::new(
            Name::new("test", "type"),
            None,
            DefId::from_string("d".into()),
        )
    }

    fn n(local: &str) -> Name {
        Name::new("test", local)
    }

    #[test]
    fn sibling_indices_start_at_one_and_stay_contiguous() {
        let mut d = data();
        let ids: Vec<NodeId> = (0..4).map(|_| NodeId::random()).collect();
        assert_eq!(d.add_child(n("a"), ids[0]), 1);
        assert_eq!(d.add_child(n("b"), ids[1]), 1);
        assert_eq!(d.add_child(n("a"), ids[2]), 2);
        assert_eq!(d.add_child(n("a"), ids[3]), 3);

        assert_eq!(d.child_index(&ids[0]), Some(1));
        assert_eq!(d.child_index(&ids[2]), Some(2));
        assert_eq!(d.child_index(&ids[3]), Some(3));
        assert_eq!(d.child_index(&ids[1]), Some(1));

        // Removing the middle `a` shifts the third down, preserving relative
        // order and contiguity.
        d.remove_child(&ids[2]);
        assert_eq!(d.child_index(&ids[0]), Some(1));
        assert_eq!(d.child_index(&ids[3]), Some(2));
        assert_eq!(d.child(&n("a"), 2).map(|e| e.id), Some(ids[3]));
        assert_eq!(d.child(&n("a"), 3), None);
    }

    #[test]
    fn indices_contiguous_under_random_churn() {
        let mut d = data();
        let names = [n("x"), n("y"), n("z")];
        let mut live: Vec<(Name, NodeId)> = vec![];
        for i in 0..60usize {
            if i % 3 == 2 && !live.is_empty() {
                let (_, id) = live.remove(i % live.len());
                d.remove_child(&id);
            } else {
                let name = names[i % names.len()].clone();
                let id = NodeId::random();
                d.add_child(name.clone(), id);
                live.push((name, id));
            }
        }
        // Per name, the indices of remaining children are exactly 1..=k in
        // insertion order.
        for name in &names {
            let entries: Vec<_> = d.children_named(name).collect();
            for (i, e) in entries.iter().enumerate() {
                assert_eq!(d.child_index(&e.id), Some(i as u32 + 1));
            }
        }
        // And the per-name relative insertion order is preserved.
        let expected: Vec<NodeId> = live
            .iter()
            .filter(|(name, _)| *name == names[0])
            .map(|(_, id)| *id)
            .collect();
        let actual: Vec<NodeId> = d.children_named(&names[0]).map(|e| e.id).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn remove_by_name_and_index() {
        let mut d = data();
        let a1 = NodeId::random();
        let a2 = NodeId::random();
        d.add_child(n("a"), a1);
        d.add_child(n("a"), a2);

        let removed = d.remove_child_entry(&n("a"), 1).unwrap();
        assert_eq!(removed.id, a1);
        assert_eq!(d.child_index(&a2), Some(1));
        assert!(d.remove_child_entry(&n("a"), 2).is_none());
    }

    #[test]
    fn property_name_set_rejects_duplicates() {
        let mut d = data();
        assert!(d.add_property_name(n("p")));
        assert!(!d.add_property_name(n("p")));
        assert!(d.has_property(&n("p")));
        assert!(d.remove_property_name(&n("p")));
        assert!(!d.remove_property_name(&n("p")));
    }

    #[test]
    fn referenceable_follows_mixin() {
        let mut d = data();
        assert!(!d.is_referenceable());
        d.mixins.insert(MIX_REFERENCEABLE.clone());
        assert!(d.is_referenceable());
    }
}
