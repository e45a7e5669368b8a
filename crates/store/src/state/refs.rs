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

use arbor_common::{NodeId, PropertyId};

/// The references record of a target node: the set of property ids whose
/// REFERENCE values include that target.
#[derive(Clone, PartialEq, Debug)]
pub struct NodeReferences {
    target: NodeId,
    referrers: IndexSet<PropertyId, RandomState>,
}

impl NodeReferences {
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            referrers: IndexSet::default(),
        }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn add(&mut self, referrer: PropertyId) -> bool {
        self.referrers.insert(referrer)
    }

    pub fn remove(&mut self, referrer: &PropertyId) -> bool {
        self.referrers.shift_remove(referrer)
    }

    pub fn has(&self, referrer: &PropertyId) -> bool {
        self.referrers.contains(referrer)
    }

    pub fn is_empty(&self) -> bool {
        self.referrers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.referrers.len()
    }

    pub fn referrers(&self) -> impl Iterator<Item = &PropertyId> {
        self.referrers.iter()
    }
}
