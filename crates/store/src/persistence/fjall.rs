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

//! Fjall-backed persistence: a two-column key/value schema per concern.
//!
//! Three partitions: `bundles` (node uuid → encoded bundle), `refs` (target
//! uuid → encoded references record) and `names` (tagged index → dictionary
//! string). A store writes one fjall batch, then syncs the keyspace, which
//! gives the all-or-nothing contract the shared manager relies on.

use std::path::Path;
use std::sync::Mutex;

use fjall::{Config, PartitionCreateOptions, PartitionHandle, PersistMode};
use tempfile::TempDir;
use tracing::debug;

use arbor_common::{ItemId, NodeId, PropertyId, StateError};

use crate::bundle::BundleCodec;
use crate::changelog::ChangeLog;
use crate::persistence::{
    NodeRecord, PersistenceManager, PropertyRecord, collect_bundle_update, decode_references,
    encode_references,
};
use crate::state::NodeReferences;

const NAME_KEY_URI: u8 = 0;
const NAME_KEY_LOCAL: u8 = 1;

pub struct FjallPersistence {
    keyspace: fjall::Keyspace,
    bundles: PartitionHandle,
    refs: PartitionHandle,
    names: PartitionHandle,
    codec: BundleCodec,
    /// (uris, locals) already durable in the names partition.
    flushed_names: Mutex<(u32, u32)>,
    _tmpdir: Option<TempDir>,
}

fn store_err(e: impl std::fmt::Display) -> StateError {
    StateError::Store(format!("fjall: {e}"))
}

impl FjallPersistence {
    /// Open at `path`, or in a temp directory when no path is given (tests,
    /// scratch repositories).
    pub fn open(path: Option<&Path>, codec: BundleCodec) -> Result<Self, StateError> {
        let tmpdir = if path.is_none() {
            Some(TempDir::new().map_err(store_err)?)
        } else {
            None
        };
        let path = path.unwrap_or_else(|| tmpdir.as_ref().unwrap().path());
        let keyspace = Config::new(path).open().map_err(store_err)?;

        let bundles = keyspace
            .open_partition("bundles", PartitionCreateOptions::default())
            .map_err(store_err)?;
        let refs = keyspace
            .open_partition("refs", PartitionCreateOptions::default())
            .map_err(store_err)?;
        let names = keyspace
            .open_partition("names", PartitionCreateOptions::default())
            .map_err(store_err)?;

        // Rehydrate the intern dictionaries before anything decodes.
        let mut uris: Vec<(u32, String)> = vec![];
        let mut locals: Vec<(u32, String)> = vec![];
        for kv in names.iter() {
            let (k, v) = kv.map_err(store_err)?;
            if k.len() != 5 {
                return Err(StateError::Store("malformed name dictionary key".into()));
            }
            let index = u32::from_be_bytes([k[1], k[2], k[3], k[4]]);
            let value = String::from_utf8(v.to_vec())
                .map_err(|_| StateError::Store("malformed name dictionary entry".into()))?;
            match k[0] {
                NAME_KEY_URI => uris.push((index, value)),
                NAME_KEY_LOCAL => locals.push((index, value)),
                tag => {
                    return Err(StateError::Store(format!(
                        "unknown name dictionary tag {tag}",
                    )));
                }
            }
        }
        uris.sort_by_key(|(i, _)| *i);
        locals.sort_by_key(|(i, _)| *i);
        let uri_count = uris.len() as u32;
        let local_count = locals.len() as u32;
        codec.names().load(
            uris.into_iter().map(|(_, s)| s).collect(),
            locals.into_iter().map(|(_, s)| s).collect(),
        )?;
        debug!(uris = uri_count, locals = local_count, "name dictionaries loaded");

        Ok(Self {
            keyspace,
            bundles,
            refs,
            names,
            codec,
            flushed_names: Mutex::new((uri_count, local_count)),
            _tmpdir: tmpdir,
        })
    }

    pub fn codec(&self) -> &BundleCodec {
        &self.codec
    }

    fn load_bundle(&self, id: &NodeId) -> Result<Option<crate::bundle::NodeBundle>, StateError> {
        match self.bundles.get(id.as_bytes()).map_err(store_err)? {
            Some(raw) => Ok(Some(self.codec.decode(*id, &raw)?)),
            None => Ok(None),
        }
    }
}

impl PersistenceManager for FjallPersistence {
    fn load_node(&self, id: &NodeId) -> Result<Option<NodeRecord>, StateError> {
        Ok(self.load_bundle(id)?.map(|b| NodeRecord {
            data: b.node_data(),
            modcount: b.modcount,
        }))
    }

    fn load_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StateError> {
        let Some(bundle) = self.load_bundle(&id.parent)? else {
            return Ok(None);
        };
        Ok(bundle.property(&id.name).map(|p| PropertyRecord {
            data: p.property_data(),
            modcount: p.modcount,
        }))
    }

    fn load_references(&self, target: &NodeId) -> Result<Option<NodeReferences>, StateError> {
        match self.refs.get(target.as_bytes()).map_err(store_err)? {
            Some(raw) => Ok(Some(decode_references(*target, &raw)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, id: &ItemId) -> Result<bool, StateError> {
        match id {
            ItemId::Node(id) => Ok(self
                .bundles
                .get(id.as_bytes())
                .map_err(store_err)?
                .is_some()),
            ItemId::Property(pid) => Ok(self.load_property(pid)?.is_some()),
        }
    }

    fn exists_references(&self, target: &NodeId) -> Result<bool, StateError> {
        Ok(self
            .refs
            .get(target.as_bytes())
            .map_err(store_err)?
            .is_some())
    }

    fn store(&self, log: &ChangeLog) -> Result<(), StateError> {
        let update = collect_bundle_update(log, &|id| self.load_bundle(id))?;

        let mut encoded = Vec::with_capacity(update.bundles.len());
        for mut bundle in update.bundles {
            let bytes = self.codec.encode(&mut bundle)?;
            encoded.push((bundle.id, bytes));
        }

        let mut batch = self.keyspace.batch();

        // Dictionary entries appended since the last flush ride along in the
        // same batch; bundles written now may reference them.
        let mut flushed = self.flushed_names.lock().unwrap();
        let (uris, locals) = self.codec.names().dump();
        for (i, uri) in uris.iter().enumerate().skip(flushed.0 as usize) {
            let mut key = [0u8; 5];
            key[0] = NAME_KEY_URI;
            key[1..5].copy_from_slice(&(i as u32).to_be_bytes());
            batch.insert(&self.names, key.as_slice(), uri.as_bytes());
        }
        for (i, local) in locals.iter().enumerate().skip(flushed.1 as usize) {
            let mut key = [0u8; 5];
            key[0] = NAME_KEY_LOCAL;
            key[1..5].copy_from_slice(&(i as u32).to_be_bytes());
            batch.insert(&self.names, key.as_slice(), local.as_bytes());
        }

        for (id, bytes) in &encoded {
            batch.insert(&self.bundles, id.as_bytes().as_slice(), bytes.as_ref());
        }
        for id in &update.removed {
            batch.remove(&self.bundles, id.as_bytes().as_slice());
            batch.remove(&self.refs, id.as_bytes().as_slice());
        }
        for refs in &update.refs_upserts {
            let raw = encode_references(refs)?;
            batch.insert(&self.refs, refs.target().as_bytes().as_slice(), raw.as_ref());
        }
        for target in &update.refs_removals {
            batch.remove(&self.refs, target.as_bytes().as_slice());
        }

        batch.commit().map_err(store_err)?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(store_err)?;
        *flushed = (uris.len() as u32, locals.len() as u32);
        Ok(())
    }

    fn close(&self) -> Result<(), StateError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arbor_common::nodetype::DefId;
    use arbor_common::{Name, Value, ValueType};

    use crate::blob::MemBlobStore;
    use crate::bundle::NameIndex;
    use crate::config::StoreConfig;
    use crate::state::{ItemState, ItemStatus, NodeData, PropertyData};

    fn codec() -> BundleCodec {
        BundleCodec::new(
            Arc::new(NameIndex::new()),
            Arc::new(MemBlobStore::new()),
            &StoreConfig::default(),
        )
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = NodeId::random();
        let pid = PropertyId::new(id, Name::new("test", "p"));
        {
            let pm = FjallPersistence::open(Some(dir.path()), codec()).unwrap();
            let mut log = ChangeLog::new();
            let mut data = NodeData::new(
                Name::new("test", "type"),
                None,
                DefId::from_string("d".into()),
            );
            data.add_property_name(pid.name.clone());
            log.added(ItemState::new_node(id, data, ItemStatus::New).into_ref());
            let pdata = PropertyData::new(
                ValueType::String,
                false,
                DefId::from_string("pd".into()),
            )
            .with_values(vec![Value::String("persisted".into())]);
            log.added(ItemState::new_property(pid.clone(), pdata, ItemStatus::New).into_ref());
            pm.store(&log).unwrap();
            pm.close().unwrap();
        }
        {
            // A fresh codec: the dictionaries must come back from the names
            // partition.
            let pm = FjallPersistence::open(Some(dir.path()), codec()).unwrap();
            let node = pm.load_node(&id).unwrap().unwrap();
            assert_eq!(node.data.primary_type, Name::new("test", "type"));
            let prop = pm.load_property(&pid).unwrap().unwrap();
            assert_eq!(prop.data.values, vec![Value::String("persisted".into())]);
        }
    }

    #[test]
    fn removal_deletes_bundle_and_refs() {
        let pm = FjallPersistence::open(None, codec()).unwrap();
        let id = NodeId::random();
        let mut log = ChangeLog::new();
        let data = NodeData::new(
            Name::new("test", "type"),
            None,
            DefId::from_string("d".into()),
        );
        log.added(ItemState::new_node(id, data.clone(), ItemStatus::New).into_ref());
        let mut refs = NodeReferences::new(id);
        refs.add(PropertyId::new(NodeId::random(), Name::new("test", "r")));
        log.modified_refs(refs);
        pm.store(&log).unwrap();
        assert!(pm.exists(&ItemId::Node(id)).unwrap());
        assert!(pm.exists_references(&id).unwrap());

        let mut log = ChangeLog::new();
        log.deleted(ItemState::new_node(id, data, ItemStatus::Existing).into_ref());
        log.modified_refs(NodeReferences::new(id));
        pm.store(&log).unwrap();
        assert!(!pm.exists(&ItemId::Node(id)).unwrap());
        assert!(!pm.exists_references(&id).unwrap());
    }
}
