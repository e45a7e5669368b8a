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

//! Node bundles: the serialized form of a node together with its properties,
//! and the name-interning dictionaries the binary layout leans on.

use std::sync::{Arc, RwLock};

use indexmap::IndexSet;

use arbor_common::nodetype::DefId;
use arbor_common::{Name, NodeId, StateError, Value, ValueType};

use crate::state::{ChildEntry, NodeData, PropertyData};

mod codec;

pub use codec::{BundleCodec, FORMAT_VERSION};

/// Decoded form of a persisted node bundle.
#[derive(Clone, PartialEq, Debug)]
pub struct NodeBundle {
    pub id: NodeId,
    pub primary_type: Name,
    pub parent: Option<NodeId>,
    pub def_id: DefId,
    pub mixins: Vec<Name>,
    pub properties: Vec<PropertyBundle>,
    pub referenceable: bool,
    pub children: Vec<ChildEntry>,
    pub modcount: u16,
}

impl NodeBundle {
    /// A bundle carrying the node-level fields of the given state, with no
    /// property blocks yet.
    pub fn from_node(id: NodeId, data: &NodeData, modcount: u16) -> Self {
        Self {
            id,
            primary_type: data.primary_type.clone(),
            parent: data.parent,
            def_id: data.def_id.clone(),
            mixins: data.mixins.iter().cloned().collect(),
            properties: vec![],
            referenceable: data.is_referenceable(),
            children: data.children().to_vec(),
            modcount,
        }
    }

    /// Replace the node-level fields, keeping the property blocks.
    pub fn set_node(&mut self, data: &NodeData, modcount: u16) {
        self.primary_type = data.primary_type.clone();
        self.parent = data.parent;
        self.def_id = data.def_id.clone();
        self.mixins = data.mixins.iter().cloned().collect();
        self.referenceable = data.is_referenceable();
        self.children = data.children().to_vec();
        self.modcount = modcount;
    }

    /// Reconstruct the node state payload from the bundle.
    pub fn node_data(&self) -> NodeData {
        let mut data = NodeData::new(self.primary_type.clone(), self.parent, self.def_id.clone())
            .with_mixins(self.mixins.iter().cloned());
        data.set_children(self.children.clone());
        for p in &self.properties {
            data.add_property_name(p.name.clone());
        }
        data
    }

    pub fn property(&self, name: &Name) -> Option<&PropertyBundle> {
        self.properties.iter().find(|p| p.name == *name)
    }

    pub fn upsert_property(&mut self, prop: PropertyBundle) {
        match self.properties.iter_mut().find(|p| p.name == prop.name) {
            Some(slot) => *slot = prop,
            None => self.properties.push(prop),
        }
    }

    pub fn remove_property(&mut self, name: &Name) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| p.name != *name);
        self.properties.len() != before
    }
}

/// One property block inside a bundle.
#[derive(Clone, PartialEq, Debug)]
pub struct PropertyBundle {
    pub name: Name,
    pub value_type: ValueType,
    pub multiple: bool,
    pub def_id: DefId,
    pub modcount: u16,
    pub values: Vec<Value>,
}

impl PropertyBundle {
    pub fn from_property(name: Name, data: &PropertyData, modcount: u16) -> Self {
        Self {
            name,
            value_type: data.value_type,
            multiple: data.multiple,
            def_id: data.def_id.clone(),
            modcount,
            values: data.values.clone(),
        }
    }

    pub fn property_data(&self) -> PropertyData {
        PropertyData::new(self.value_type, self.multiple, self.def_id.clone())
            .with_values(self.values.clone())
    }
}

/// The two monotonically extended intern dictionaries (namespace URIs and
/// local names) shared by the reading and writing side of a store. Indices
/// are stable for the lifetime of the repository; a persistence adapter makes
/// them durable alongside the bundles.
pub struct NameIndex {
    inner: RwLock<Dicts>,
}

#[derive(Default)]
struct Dicts {
    uris: IndexSet<Arc<str>>,
    locals: IndexSet<Arc<str>>,
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl NameIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Dicts::default()),
        }
    }

    pub fn intern_uri(&self, uri: &str) -> u32 {
        let mut d = self.inner.write().unwrap();
        match d.uris.get_index_of(uri) {
            Some(i) => i as u32,
            None => d.uris.insert_full(Arc::from(uri)).0 as u32,
        }
    }

    pub fn intern_local(&self, local: &str) -> u32 {
        let mut d = self.inner.write().unwrap();
        match d.locals.get_index_of(local) {
            Some(i) => i as u32,
            None => d.locals.insert_full(Arc::from(local)).0 as u32,
        }
    }

    pub fn uri(&self, index: u32) -> Result<Arc<str>, StateError> {
        self.inner
            .read()
            .unwrap()
            .uris
            .get_index(index as usize)
            .cloned()
            .ok_or_else(|| StateError::Store(format!("unknown namespace index {index}")))
    }

    pub fn local(&self, index: u32) -> Result<Arc<str>, StateError> {
        self.inner
            .read()
            .unwrap()
            .locals
            .get_index(index as usize)
            .cloned()
            .ok_or_else(|| StateError::Store(format!("unknown local-name index {index}")))
    }

    pub fn intern_name(&self, name: &Name) -> (u32, u32) {
        (self.intern_uri(name.ns()), self.intern_local(name.local()))
    }

    pub fn name(&self, uri_index: u32, local_index: u32) -> Result<Name, StateError> {
        let uri = self.uri(uri_index)?;
        let local = self.local(local_index)?;
        Ok(Name::new(&uri, &local))
    }

    /// (uri count, local count) — used by adapters to persist only the
    /// entries appended since the last flush.
    pub fn counts(&self) -> (u32, u32) {
        let d = self.inner.read().unwrap();
        (d.uris.len() as u32, d.locals.len() as u32)
    }

    /// Snapshot both dictionaries in index order.
    pub fn dump(&self) -> (Vec<String>, Vec<String>) {
        let d = self.inner.read().unwrap();
        (
            d.uris.iter().map(|s| s.to_string()).collect(),
            d.locals.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Load persisted dictionaries. Only valid on a fresh index at open time;
    /// indices of already-interned entries must not move.
    pub fn load(&self, uris: Vec<String>, locals: Vec<String>) -> Result<(), StateError> {
        let mut d = self.inner.write().unwrap();
        if !d.uris.is_empty() || !d.locals.is_empty() {
            return Err(StateError::Store(
                "name index must be loaded before first use".into(),
            ));
        }
        d.uris = uris.into_iter().map(Arc::from).collect();
        d.locals = locals.into_iter().map(Arc::from).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_monotonic() {
        let idx = NameIndex::new();
        let a = idx.intern_uri("http://a");
        let b = idx.intern_uri("http://b");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(idx.intern_uri("http://a"), a);
        assert_eq!(&*idx.uri(a).unwrap(), "http://a");
        assert!(idx.uri(99).is_err());
    }

    #[test]
    fn name_roundtrip() {
        let idx = NameIndex::new();
        let name = Name::new("http://ns", "local");
        let (u, l) = idx.intern_name(&name);
        assert_eq!(idx.name(u, l).unwrap(), name);
    }

    #[test]
    fn dump_and_load() {
        let idx = NameIndex::new();
        idx.intern_uri("u0");
        idx.intern_uri("u1");
        idx.intern_local("l0");
        let (uris, locals) = idx.dump();

        let fresh = NameIndex::new();
        fresh.load(uris, locals).unwrap();
        assert_eq!(&*fresh.uri(1).unwrap(), "u1");
        assert_eq!(&*fresh.local(0).unwrap(), "l0");
        assert_eq!(fresh.counts(), (2, 1));

        // Loading twice is a misuse.
        assert!(fresh.load(vec![], vec![]).is_err());
    }
}
