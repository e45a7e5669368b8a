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

use arbor_common::{ItemId, NodeId, StateError};

use crate::state::{ItemStateRef, NodeReferences};

/// A secondary, restricted item-state source mounted under the shared state
/// manager for a special subtree (node-type representation, version storage
/// views, and the like).
///
/// Providers are mounted at startup and never removed; the registration set
/// is append-only and assumed quiescent before the first reader exists. On
/// reads, provider roots are consulted before the normal cache/persistence
/// path, and `has_item_state` serves as the post-miss fallback.
pub trait VirtualItemProvider: Send + Sync {
    /// Whether `id` is one of this provider's mount roots.
    fn provides_root(&self, id: &ItemId) -> bool;

    /// Whether this provider claims the given node id (roots included).
    fn provides_node(&self, id: &NodeId) -> bool;

    fn has_item_state(&self, id: &ItemId) -> bool;

    fn get_item_state(&self, id: &ItemId) -> Result<Option<ItemStateRef>, StateError>;

    /// Hand over references records whose targets this provider claims,
    /// produced by an update that just committed.
    fn set_node_references(&self, refs: Vec<NodeReferences>) -> Result<(), StateError>;
}
