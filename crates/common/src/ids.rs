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

use std::fmt::{Debug, Display, Formatter};

use lazy_static::lazy_static;
use uuid::Uuid;

use crate::names::Name;

/// Identity of a node: a stable uuid.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Mint a fresh random node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// The 16 raw uuid bytes, big-endian field order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Hyphen-less lowercase hex form, used for version-storage bucketing and
    /// history node names.
    pub fn hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Identity of a property: the owning node plus the property's qualified name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropertyId {
    pub parent: NodeId,
    pub name: Name,
}

impl PropertyId {
    pub fn new(parent: NodeId, name: Name) -> Self {
        Self { parent, name }
    }
}

impl Display for PropertyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}

impl Debug for PropertyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PropertyId({self})")
    }
}

/// The unit of identity in the store: a node or a property.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ItemId {
    Node(NodeId),
    Property(PropertyId),
}

impl ItemId {
    pub fn is_node(&self) -> bool {
        matches!(self, ItemId::Node(_))
    }

    pub fn is_property(&self) -> bool {
        matches!(self, ItemId::Property(_))
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ItemId::Node(id) => Some(*id),
            ItemId::Property(_) => None,
        }
    }

    pub fn property_id(&self) -> Option<&PropertyId> {
        match self {
            ItemId::Node(_) => None,
            ItemId::Property(id) => Some(id),
        }
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemId::Node(id) => write!(f, "{id}"),
            ItemId::Property(id) => write!(f, "{id}"),
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        ItemId::Node(id)
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        ItemId::Property(id)
    }
}

lazy_static! {
    /// Well-known identity of the workspace root node.
    pub static ref ROOT_NODE_ID: NodeId =
        NodeId::parse("ba5eba11-cafe-4000-a000-000000000001").unwrap();
    /// Well-known identity of the `jcr:system` node.
    pub static ref SYSTEM_NODE_ID: NodeId =
        NodeId::parse("ba5eba11-cafe-4000-a000-000000000002").unwrap();
    /// Well-known identity of the `jcr:system/jcr:versionStorage` node.
    pub static ref VERSION_STORAGE_NODE_ID: NodeId =
        NodeId::parse("ba5eba11-cafe-4000-a000-000000000003").unwrap();
}
