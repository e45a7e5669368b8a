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

//! Persistence adapters: the durable backing behind the shared state
//! manager.
//!
//! Adapters store node bundles (a node plus its properties, §bundle codec)
//! and references records. `store` takes a whole change log and must be
//! atomic from the caller's perspective. Because properties live inside
//! their parent's bundle, a store first consolidates the log into a set of
//! dirty bundles ([`collect_bundle_update`]).

use ahash::RandomState;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::{IndexMap, IndexSet};

use arbor_common::{ItemId, Name, NodeId, PropertyId, StateError};

use crate::bundle::{NodeBundle, PropertyBundle};
use crate::changelog::ChangeLog;
use crate::state::{NodeData, NodeReferences, PropertyData};

mod fjall;
mod memory;

pub use self::fjall::FjallPersistence;
pub use self::memory::MemPersistence;

pub struct NodeRecord {
    pub data: NodeData,
    pub modcount: u16,
}

pub struct PropertyRecord {
    pub data: PropertyData,
    pub modcount: u16,
}

/// The contract every persistence backend satisfies. `store` is all-or-
/// nothing; a failed store must leave the durable view untouched.
pub trait PersistenceManager: Send + Sync {
    fn load_node(&self, id: &NodeId) -> Result<Option<NodeRecord>, StateError>;

    fn load_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StateError>;

    fn load_references(&self, target: &NodeId) -> Result<Option<NodeReferences>, StateError>;

    fn exists(&self, id: &ItemId) -> Result<bool, StateError>;

    fn exists_references(&self, target: &NodeId) -> Result<bool, StateError>;

    fn store(&self, log: &ChangeLog) -> Result<(), StateError>;

    fn close(&self) -> Result<(), StateError>;
}

/// The consolidated effect of a change log on the bundle table.
pub(crate) struct BundleUpdate {
    /// Bundles to (re)write, in first-touch order.
    pub bundles: Vec<NodeBundle>,
    pub removed: Vec<NodeId>,
    pub refs_upserts: Vec<NodeReferences>,
    pub refs_removals: Vec<NodeId>,
}

/// Fold a change log into dirty bundles: deleted nodes drop their bundle,
/// deleted properties leave their parent's bundle, node changes rewrite the
/// node-level fields, property changes rewrite their block. `load_existing`
/// supplies the stored bundle for nodes touched only through their
/// properties.
pub(crate) fn collect_bundle_update(
    log: &ChangeLog,
    load_existing: &dyn Fn(&NodeId) -> Result<Option<NodeBundle>, StateError>,
) -> Result<BundleUpdate, StateError> {
    let mut dirty: IndexMap<NodeId, NodeBundle, RandomState> = IndexMap::default();
    let mut removed: IndexSet<NodeId, RandomState> = IndexSet::default();

    fn bundle_mut<'a>(
        dirty: &'a mut IndexMap<NodeId, NodeBundle, RandomState>,
        load_existing: &dyn Fn(&NodeId) -> Result<Option<NodeBundle>, StateError>,
        id: &NodeId,
    ) -> Result<&'a mut NodeBundle, StateError> {
        if !dirty.contains_key(id) {
            let loaded = load_existing(id)?.ok_or_else(|| {
                StateError::Store(format!("bundle {id} missing from backing store"))
            })?;
            dirty.insert(*id, loaded);
        }
        Ok(dirty.get_mut(id).unwrap())
    }

    // Deletions first, so a delete+re-add of the same uuid starts from a
    // fresh bundle.
    for state in log.deleted_states() {
        let s = state.lock().unwrap();
        match s.id() {
            ItemId::Node(id) => {
                dirty.shift_remove(id);
                removed.insert(*id);
            }
            ItemId::Property(pid) => {
                if removed.contains(&pid.parent) {
                    continue;
                }
                bundle_mut(&mut dirty, load_existing, &pid.parent)?
                    .remove_property(&pid.name);
            }
        }
    }

    // Node-level changes before property blocks, so added nodes have a
    // bundle for their added properties to land in.
    for state in log.added_states().chain(log.modified_states()) {
        let s = state.lock().unwrap();
        let ItemId::Node(id) = s.id() else {
            continue;
        };
        let data = s.as_node().ok_or_else(|| {
            StateError::Store(format!("node id {id} carries property data"))
        })?;
        if removed.shift_remove(id) || !log.has_modified(s.id()) {
            // Re-added or brand new: fresh bundle.
            dirty.insert(*id, NodeBundle::from_node(*id, data, s.modcount()));
        } else {
            match load_existing(id)? {
                Some(mut bundle) => {
                    bundle.set_node(data, s.modcount());
                    dirty.insert(*id, bundle);
                }
                None => {
                    dirty.insert(*id, NodeBundle::from_node(*id, data, s.modcount()));
                }
            }
        }
    }

    for state in log.added_states().chain(log.modified_states()) {
        let s = state.lock().unwrap();
        let ItemId::Property(pid) = s.id() else {
            continue;
        };
        if removed.contains(&pid.parent) {
            continue;
        }
        let data = s.as_property().ok_or_else(|| {
            StateError::Store(format!("property id {pid} carries node data"))
        })?;
        let block = PropertyBundle::from_property(pid.name.clone(), data, s.modcount());
        bundle_mut(&mut dirty, load_existing, &pid.parent)?.upsert_property(block);
    }

    let mut refs_upserts = vec![];
    let mut refs_removals = vec![];
    for refs in log.refs() {
        if refs.is_empty() {
            refs_removals.push(refs.target());
        } else {
            refs_upserts.push(refs.clone());
        }
    }

    Ok(BundleUpdate {
        bundles: dirty.into_values().collect(),
        removed: removed.into_iter().collect(),
        refs_upserts,
        refs_removals,
    })
}

/// Wire form of a references record (the target is the storage key):
/// `u32` referrer count, then per referrer the parent uuid and the
/// length-prefixed name halves.
pub(crate) fn encode_references(refs: &NodeReferences) -> Result<Bytes, StateError> {
    let mut buf = BytesMut::new();
    buf.put_u32(refs.len() as u32);
    for referrer in refs.referrers() {
        buf.put_slice(referrer.parent.as_bytes());
        put_str(&mut buf, referrer.name.ns())?;
        put_str(&mut buf, referrer.name.local())?;
    }
    Ok(buf.freeze())
}

pub(crate) fn decode_references(target: NodeId, mut buf: &[u8]) -> Result<NodeReferences, StateError> {
    let mut refs = NodeReferences::new(target);
    if buf.remaining() < 4 {
        return Err(StateError::Store("truncated references record".into()));
    }
    let count = buf.get_u32();
    for _ in 0..count {
        if buf.remaining() < 16 {
            return Err(StateError::Store("truncated references record".into()));
        }
        let mut raw = [0u8; 16];
        buf.copy_to_slice(&mut raw);
        let parent = NodeId::from_bytes(raw);
        let ns = get_str(&mut buf)?;
        let local = get_str(&mut buf)?;
        refs.add(PropertyId::new(parent, Name::new(&ns, &local)));
    }
    Ok(refs)
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), StateError> {
    let len = u16::try_from(s.len())
        .map_err(|_| StateError::Store("string field exceeds 64KB".into()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8]) -> Result<String, StateError> {
    if buf.remaining() < 2 {
        return Err(StateError::Store("truncated references record".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(StateError::Store("truncated references record".into()));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| StateError::Store("malformed references record".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_record_roundtrip() {
        let target = NodeId::random();
        let mut refs = NodeReferences::new(target);
        refs.add(PropertyId::new(NodeId::random(), Name::new("ns-a", "one")));
        refs.add(PropertyId::new(NodeId::random(), Name::new("", "two")));

        let encoded = encode_references(&refs).unwrap();
        let decoded = decode_references(target, &encoded).unwrap();
        assert_eq!(decoded, refs);
    }

    #[test]
    fn truncated_references_record_errors() {
        let target = NodeId::random();
        let mut refs = NodeReferences::new(target);
        refs.add(PropertyId::new(NodeId::random(), Name::new("ns", "p")));
        let encoded = encode_references(&refs).unwrap();
        assert!(decode_references(target, &encoded[..encoded.len() - 2]).is_err());
        assert!(decode_references(target, &[]).is_err());
    }
}
