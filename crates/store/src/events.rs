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

//! Observation events.
//!
//! An event bundle is built eagerly from the local change log during the
//! begin phase of an update, before anything is stored, and dispatched
//! synchronously after the store succeeded, under the downgraded read lock.
//! Listeners therefore only ever observe committed state, and no event is
//! dispatched for a change that did not persist.

use arbor_common::{ItemId, NodeId, StateError};

use crate::changelog::ChangeLog;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    PropertyAdded,
    PropertyChanged,
    PropertyRemoved,
}

#[derive(Clone, PartialEq, Debug)]
pub struct RepoEvent {
    pub kind: EventKind,
    pub id: ItemId,
    /// The parent node of the affected item, where the staged state knows it.
    pub parent: Option<NodeId>,
}

#[derive(Clone, Default, Debug)]
pub struct EventBundle {
    events: Vec<RepoEvent>,
}

impl EventBundle {
    pub fn events(&self) -> &[RepoEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Builds the event bundle for an update from the local change log.
pub trait EventFactory: Send + Sync {
    fn create(&self, log: &ChangeLog) -> Result<EventBundle, StateError>;
}

/// The stock factory: one event per staged item, in staging order. Node
/// modifications carry no event of their own — child and property changes
/// surface through the affected items.
#[derive(Default)]
pub struct StandardEventFactory;

impl EventFactory for StandardEventFactory {
    fn create(&self, log: &ChangeLog) -> Result<EventBundle, StateError> {
        let mut events = vec![];
        for state in log.added_states() {
            let s = state.lock().unwrap();
            match s.id() {
                ItemId::Node(_) => events.push(RepoEvent {
                    kind: EventKind::NodeAdded,
                    id: s.id().clone(),
                    parent: s.as_node().and_then(|n| n.parent),
                }),
                ItemId::Property(pid) => events.push(RepoEvent {
                    kind: EventKind::PropertyAdded,
                    id: s.id().clone(),
                    parent: Some(pid.parent),
                }),
            }
        }
        for state in log.modified_states() {
            let s = state.lock().unwrap();
            if let ItemId::Property(pid) = s.id() {
                events.push(RepoEvent {
                    kind: EventKind::PropertyChanged,
                    id: s.id().clone(),
                    parent: Some(pid.parent),
                });
            }
        }
        for state in log.deleted_states() {
            let s = state.lock().unwrap();
            match s.id() {
                ItemId::Node(_) => events.push(RepoEvent {
                    kind: EventKind::NodeRemoved,
                    id: s.id().clone(),
                    parent: s.as_node().and_then(|n| n.parent),
                }),
                ItemId::Property(pid) => events.push(RepoEvent {
                    kind: EventKind::PropertyRemoved,
                    id: s.id().clone(),
                    parent: Some(pid.parent),
                }),
            }
        }
        Ok(EventBundle { events })
    }
}

/// Receives the event bundles of committed updates.
pub trait EventListener: Send + Sync {
    fn on_events(&self, bundle: &EventBundle);
}
