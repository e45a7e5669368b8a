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

//! Shared vocabulary of the arbor content store: item identifiers, qualified
//! names, typed property values, the error taxonomy, and the node-type model
//! with its effective-type resolver.

mod error;
pub mod ids;
pub mod names;
pub mod nodetype;
mod value;

pub use error::StateError;
pub use ids::{ItemId, NodeId, PropertyId, ROOT_NODE_ID, SYSTEM_NODE_ID, VERSION_STORAGE_NODE_ID};
pub use names::Name;
pub use names::{NS_JCR_URI, NS_MIX_URI, NS_NT_URI, NS_REP_URI};
pub use value::{BinaryValue, Value, ValueType};
