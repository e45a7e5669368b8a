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

use thiserror::Error;

use crate::ids::{ItemId, NodeId};

/// Errors surfaced by the item-state storage core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// The id is unknown to the manager, or the session's change log has
    /// declared the item deleted.
    #[error("no such item state: {0}")]
    NoSuchItemState(ItemId),

    /// The canonical state advanced underneath the session's working copy;
    /// the caller must refresh and retry.
    #[error("stale item state: {0}")]
    Stale(ItemId),

    /// An item with this identity already exists where one was to be created.
    #[error("item already exists: {0}")]
    ItemExists(String),

    /// Node-type definition conflict, detected at registration or
    /// effective-type construction. Never raised on a read path.
    #[error("node type conflict: {0}")]
    Conflict(String),

    /// An add/remove/definition-lookup constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Committing would leave a dangling reference, or delete a node that is
    /// still referenced from outside the commit.
    #[error("referential integrity violated for {0}")]
    ReferentialIntegrity(NodeId),

    /// A versioning operation failed (label collisions, root-version removal,
    /// malformed version graphs).
    #[error("version operation failed: {0}")]
    Version(String),

    /// Generic persistence / blob-store / lock failure. The enclosing update
    /// has been cancelled and the write lock released.
    #[error("storage failure: {0}")]
    Store(String),

    /// A manager was driven through an operation its current lifecycle state
    /// does not permit (e.g. `update` while not editing).
    #[error("illegal manager state: {0}")]
    IllegalState(String),
}
