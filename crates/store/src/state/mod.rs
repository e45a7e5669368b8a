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

//! Item states.
//!
//! One `ItemState` type serves both roles in the overlay model: the canonical
//! (shared) state owned by the shared state manager, and the per-session
//! working copy that overlays it. An overlay borrows identity from the
//! canonical state it is connected to, holds an independent copy of the data,
//! and remembers the canonical modcount captured when the copy was taken —
//! the basis for stale-write detection at commit.

use std::sync::{Arc, Mutex};

use arbor_common::{ItemId, NodeId, PropertyId};

mod node;
mod property;
mod refs;

pub use node::{ChildEntry, NodeData};
pub use property::PropertyData;
pub use refs::NodeReferences;

/// Lifecycle status of an item state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ItemStatus {
    /// Created this session, never persisted.
    New,
    /// In sync with the persisted view.
    Existing,
    /// Persisted, with unsaved local modifications.
    ExistingModified,
    /// Delete has been committed.
    ExistingRemoved,
    /// The overlayed canonical state changed beneath this copy.
    StaleModified,
    /// The overlayed canonical state was destroyed beneath this copy.
    StaleDestroyed,
    /// Discarded; no longer usable.
    Undefined,
}

/// The payload of an item state.
#[derive(Clone, PartialEq, Debug)]
pub enum ItemData {
    Node(NodeData),
    Property(PropertyData),
}

/// Shared handle to an item state. Canonical states are cached process-wide
/// under this handle; identity of the `Arc` is the identity invariant the
/// weak cache preserves.
pub type ItemStateRef = Arc<Mutex<ItemState>>;

pub struct ItemState {
    id: ItemId,
    pub data: ItemData,
    status: ItemStatus,
    modcount: u16,
    /// The canonical state this working copy overlays. `None` for canonical
    /// states themselves, and for disconnected copies.
    overlaid: Option<ItemStateRef>,
    /// Canonical modcount captured when this copy connected. Survives
    /// disconnect/reconnect so stale detection compares against the state of
    /// the world the copy was actually taken from.
    base_modcount: u16,
}

impl ItemState {
    pub fn new_node(id: NodeId, data: NodeData, status: ItemStatus) -> Self {
        Self {
            id: ItemId::Node(id),
            data: ItemData::Node(data),
            status,
            modcount: 0,
            overlaid: None,
            base_modcount: 0,
        }
    }

    pub fn new_property(id: PropertyId, data: PropertyData, status: ItemStatus) -> Self {
        Self {
            id: ItemId::Property(id),
            data: ItemData::Property(data),
            status,
            modcount: 0,
            overlaid: None,
            base_modcount: 0,
        }
    }

    /// A freshly minted canonical instance for a state committed the first
    /// time.
    pub fn minted(id: ItemId, data: ItemData) -> Self {
        Self {
            id,
            data,
            status: ItemStatus::New,
            modcount: 0,
            overlaid: None,
            base_modcount: 0,
        }
    }

    /// A working copy of the given canonical state, connected to it.
    pub fn overlay(canonical: &ItemStateRef) -> Self {
        let c = canonical.lock().unwrap();
        Self {
            id: c.id.clone(),
            data: c.data.clone(),
            status: ItemStatus::Existing,
            modcount: c.modcount,
            overlaid: Some(canonical.clone()),
            base_modcount: c.modcount,
        }
    }

    pub fn into_ref(self) -> ItemStateRef {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn is_node(&self) -> bool {
        self.id.is_node()
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ItemStatus) {
        self.status = status;
    }

    pub fn modcount(&self) -> u16 {
        self.modcount
    }

    pub fn set_modcount(&mut self, modcount: u16) {
        self.modcount = modcount;
    }

    /// Advance the modification counter.
    pub fn touch(&mut self) {
        self.modcount = self.modcount.wrapping_add(1);
    }

    pub fn base_modcount(&self) -> u16 {
        self.base_modcount
    }

    pub fn overlaid(&self) -> Option<ItemStateRef> {
        self.overlaid.clone()
    }

    /// Connect to a canonical state, capturing its modcount as the stale
    /// baseline.
    pub fn connect(&mut self, canonical: &ItemStateRef) {
        self.base_modcount = canonical.lock().unwrap().modcount;
        self.overlaid = Some(canonical.clone());
    }

    /// Re-establish the link without touching the captured baseline.
    pub fn reconnect(&mut self, canonical: &ItemStateRef) {
        self.overlaid = Some(canonical.clone());
    }

    pub fn disconnect(&mut self) {
        self.overlaid = None;
    }

    /// Copy this working copy's values down into the connected canonical
    /// state.
    pub fn push(&self) {
        if let Some(target) = &self.overlaid {
            target.lock().unwrap().data = self.data.clone();
        }
    }

    pub fn as_node(&self) -> Option<&NodeData> {
        match &self.data {
            ItemData::Node(n) => Some(n),
            ItemData::Property(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut NodeData> {
        match &mut self.data {
            ItemData::Node(n) => Some(n),
            ItemData::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyData> {
        match &self.data {
            ItemData::Node(_) => None,
            ItemData::Property(p) => Some(p),
        }
    }

    pub fn as_property_mut(&mut self) -> Option<&mut PropertyData> {
        match &mut self.data {
            ItemData::Node(_) => None,
            ItemData::Property(p) => Some(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::Name;
    use arbor_common::nodetype::DefId;

    fn node_data() -> NodeData {
        NodeData::new(
            Name::new("test", "type"),
            None,
            DefId::from_string("test-def".into()),
        )
    }

    #[test]
    fn overlay_captures_baseline() {
        let id = NodeId::random();
        let canonical = ItemState::new_node(id, node_data(), ItemStatus::Existing).into_ref();
        canonical.lock().unwrap().set_modcount(7);

        let overlay = ItemState::overlay(&canonical);
        assert_eq!(overlay.base_modcount(), 7);
        assert_eq!(overlay.status(), ItemStatus::Existing);

        // Advancing the canonical state does not move the captured baseline.
        canonical.lock().unwrap().touch();
        assert_eq!(overlay.base_modcount(), 7);
        assert_eq!(canonical.lock().unwrap().modcount(), 8);
    }

    #[test]
    fn disconnect_preserves_baseline() {
        let id = NodeId::random();
        let canonical = ItemState::new_node(id, node_data(), ItemStatus::Existing).into_ref();
        canonical.lock().unwrap().set_modcount(3);

        let mut overlay = ItemState::overlay(&canonical);
        overlay.disconnect();
        assert!(overlay.overlaid().is_none());
        assert_eq!(overlay.base_modcount(), 3);

        overlay.reconnect(&canonical);
        assert!(overlay.overlaid().is_some());
        assert_eq!(overlay.base_modcount(), 3);
    }

    #[test]
    fn push_copies_data_down() {
        let id = NodeId::random();
        let canonical = ItemState::new_node(id, node_data(), ItemStatus::Existing).into_ref();
        let mut overlay = ItemState::overlay(&canonical);

        let child = NodeId::random();
        overlay
            .as_node_mut()
            .unwrap()
            .add_child(Name::new("test", "child"), child);
        overlay.push();

        let c = canonical.lock().unwrap();
        assert_eq!(c.as_node().unwrap().children().len(), 1);
        assert_eq!(c.as_node().unwrap().children()[0].id, child);
    }

    #[test]
    fn modcount_wraps() {
        let id = NodeId::random();
        let mut state = ItemState::new_node(id, node_data(), ItemStatus::Existing);
        state.set_modcount(u16::MAX);
        state.touch();
        assert_eq!(state.modcount(), 0);
    }
}
