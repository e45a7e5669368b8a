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

//! In-process persistence. Bundles are held in their encoded form (the
//! codec is exercised on every load/store); an optional dump path makes the
//! tables durable as one length-prefixed file written on close and read back
//! on open.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use arbor_common::{ItemId, NodeId, PropertyId, StateError};

use crate::bundle::BundleCodec;
use crate::changelog::ChangeLog;
use crate::persistence::{
    NodeRecord, PersistenceManager, PropertyRecord, collect_bundle_update, decode_references,
    encode_references,
};
use crate::state::NodeReferences;

const DUMP_MAGIC: u32 = 0x4152_4244; // "ARBD"
const DUMP_VERSION: u8 = 1;

#[derive(Default)]
struct Tables {
    bundles: HashMap<NodeId, Bytes>,
    refs: HashMap<NodeId, NodeReferences>,
}

pub struct MemPersistence {
    codec: BundleCodec,
    tables: Mutex<Tables>,
    dump_path: Option<PathBuf>,
}

impl MemPersistence {
    /// Purely transient store.
    pub fn new(codec: BundleCodec) -> Self {
        Self {
            codec,
            tables: Mutex::new(Tables::default()),
            dump_path: None,
        }
    }

    /// Store that reads a previous table dump from `path` (when present) and
    /// rewrites it on close.
    pub fn open(codec: BundleCodec, path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let mut this = Self {
            codec,
            tables: Mutex::new(Tables::default()),
            dump_path: Some(path.clone()),
        };
        match std::fs::read(&path) {
            Ok(raw) => this.load_dump(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StateError::Store(format!("cannot read table dump: {e}"))),
        }
        Ok(this)
    }

    pub fn codec(&self) -> &BundleCodec {
        &self.codec
    }

    fn load_dump(&mut self, mut buf: &[u8]) -> Result<(), StateError> {
        let truncated = || StateError::Store("truncated table dump".into());
        if buf.remaining() < 5 {
            return Err(truncated());
        }
        if buf.get_u32() != DUMP_MAGIC {
            return Err(StateError::Store("not a table dump".into()));
        }
        let version = buf.get_u8();
        if version != DUMP_VERSION {
            return Err(StateError::Store(format!(
                "unsupported table dump version {version}",
            )));
        }

        let mut read_strings = |buf: &mut &[u8]| -> Result<Vec<String>, StateError> {
            if buf.remaining() < 4 {
                return Err(truncated());
            }
            let count = buf.get_u32() as usize;
            let mut out = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                if buf.remaining() < 4 {
                    return Err(truncated());
                }
                let len = buf.get_u32() as usize;
                if buf.remaining() < len {
                    return Err(truncated());
                }
                let raw = buf.copy_to_bytes(len);
                out.push(
                    String::from_utf8(raw.to_vec())
                        .map_err(|_| StateError::Store("malformed table dump".into()))?,
                );
            }
            Ok(out)
        };
        let uris = read_strings(&mut buf)?;
        let locals = read_strings(&mut buf)?;
        self.codec.names().load(uris, locals)?;

        let tables = self.tables.get_mut().unwrap();
        if buf.remaining() < 4 {
            return Err(truncated());
        }
        let bundle_count = buf.get_u32() as usize;
        for _ in 0..bundle_count {
            if buf.remaining() < 20 {
                return Err(truncated());
            }
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            let id = NodeId::from_bytes(raw);
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            tables.bundles.insert(id, buf.copy_to_bytes(len));
        }

        if buf.remaining() < 4 {
            return Err(truncated());
        }
        let refs_count = buf.get_u32() as usize;
        for _ in 0..refs_count {
            if buf.remaining() < 20 {
                return Err(truncated());
            }
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            let target = NodeId::from_bytes(raw);
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            let encoded = buf.copy_to_bytes(len);
            tables
                .refs
                .insert(target, decode_references(target, &encoded)?);
        }
        debug!(
            bundles = tables.bundles.len(),
            refs = tables.refs.len(),
            "loaded table dump"
        );
        Ok(())
    }

    fn write_dump(&self) -> Result<(), StateError> {
        let Some(path) = &self.dump_path else {
            return Ok(());
        };
        let tables = self.tables.lock().unwrap();
        let mut buf = BytesMut::new();
        buf.put_u32(DUMP_MAGIC);
        buf.put_u8(DUMP_VERSION);

        let (uris, locals) = self.codec.names().dump();
        for list in [&uris, &locals] {
            buf.put_u32(list.len() as u32);
            for s in list {
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
        }

        buf.put_u32(tables.bundles.len() as u32);
        for (id, bytes) in &tables.bundles {
            buf.put_slice(id.as_bytes());
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }

        buf.put_u32(tables.refs.len() as u32);
        for (target, refs) in &tables.refs {
            buf.put_slice(target.as_bytes());
            let encoded = encode_references(refs)?;
            buf.put_u32(encoded.len() as u32);
            buf.put_slice(&encoded);
        }

        std::fs::write(path, &buf)
            .map_err(|e| StateError::Store(format!("cannot write table dump: {e}")))
    }
}

impl PersistenceManager for MemPersistence {
    fn load_node(&self, id: &NodeId) -> Result<Option<NodeRecord>, StateError> {
        let encoded = {
            let tables = self.tables.lock().unwrap();
            tables.bundles.get(id).cloned()
        };
        let Some(encoded) = encoded else {
            return Ok(None);
        };
        let bundle = self.codec.decode(*id, &encoded)?;
        Ok(Some(NodeRecord {
            data: bundle.node_data(),
            modcount: bundle.modcount,
        }))
    }

    fn load_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StateError> {
        let encoded = {
            let tables = self.tables.lock().unwrap();
            tables.bundles.get(&id.parent).cloned()
        };
        let Some(encoded) = encoded else {
            return Ok(None);
        };
        let bundle = self.codec.decode(id.parent, &encoded)?;
        Ok(bundle.property(&id.name).map(|p| PropertyRecord {
            data: p.property_data(),
            modcount: p.modcount,
        }))
    }

    fn load_references(&self, target: &NodeId) -> Result<Option<NodeReferences>, StateError> {
        Ok(self.tables.lock().unwrap().refs.get(target).cloned())
    }

    fn exists(&self, id: &ItemId) -> Result<bool, StateError> {
        match id {
            ItemId::Node(id) => Ok(self.tables.lock().unwrap().bundles.contains_key(id)),
            ItemId::Property(pid) => Ok(self.load_property(pid)?.is_some()),
        }
    }

    fn exists_references(&self, target: &NodeId) -> Result<bool, StateError> {
        Ok(self.tables.lock().unwrap().refs.contains_key(target))
    }

    fn store(&self, log: &ChangeLog) -> Result<(), StateError> {
        let update = collect_bundle_update(log, &|id| {
            let encoded = {
                let tables = self.tables.lock().unwrap();
                tables.bundles.get(id).cloned()
            };
            match encoded {
                Some(encoded) => Ok(Some(self.codec.decode(*id, &encoded)?)),
                None => Ok(None),
            }
        })?;

        // Encode everything before touching the tables, so a codec failure
        // leaves the store untouched.
        let mut encoded = Vec::with_capacity(update.bundles.len());
        for mut bundle in update.bundles {
            let bytes = self.codec.encode(&mut bundle)?;
            encoded.push((bundle.id, bytes));
        }

        let mut tables = self.tables.lock().unwrap();
        for (id, bytes) in encoded {
            tables.bundles.insert(id, bytes);
        }
        for id in &update.removed {
            tables.bundles.remove(id);
            tables.refs.remove(id);
        }
        for refs in update.refs_upserts {
            tables.refs.insert(refs.target(), refs);
        }
        for target in &update.refs_removals {
            tables.refs.remove(target);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StateError> {
        self.write_dump()
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

    fn node_log(id: NodeId) -> (ChangeLog, PropertyId) {
        let mut log = ChangeLog::new();
        let data = NodeData::new(
            Name::new("test", "type"),
            None,
            DefId::from_string("d".into()),
        );
        let mut state = ItemState::new_node(id, data, ItemStatus::New);
        state
            .as_node_mut()
            .unwrap()
            .add_property_name(Name::new("test", "p"));
        log.added(state.into_ref());

        let pid = PropertyId::new(id, Name::new("test", "p"));
        let pdata = PropertyData::new(ValueType::Long, false, DefId::from_string("pd".into()))
            .with_values(vec![Value::Long(7)]);
        log.added(ItemState::new_property(pid.clone(), pdata, ItemStatus::New).into_ref());
        (log, pid)
    }

    #[test]
    fn store_and_load_node_with_property() {
        let pm = MemPersistence::new(codec());
        let id = NodeId::random();
        let (log, pid) = node_log(id);
        pm.store(&log).unwrap();

        let node = pm.load_node(&id).unwrap().unwrap();
        assert!(node.data.has_property(&Name::new("test", "p")));
        assert!(pm.exists(&ItemId::Node(id)).unwrap());

        let prop = pm.load_property(&pid).unwrap().unwrap();
        assert_eq!(prop.data.values, vec![Value::Long(7)]);
        assert!(pm.exists(&ItemId::Property(pid.clone())).unwrap());

        assert!(
            !pm.exists(&ItemId::Property(PropertyId::new(
                id,
                Name::new("test", "ghost")
            )))
            .unwrap()
        );
        assert!(pm.load_node(&NodeId::random()).unwrap().is_none());
    }

    #[test]
    fn deleted_property_leaves_bundle() {
        let pm = MemPersistence::new(codec());
        let id = NodeId::random();
        let (log, pid) = node_log(id);
        pm.store(&log).unwrap();

        let mut log = ChangeLog::new();
        let pdata = PropertyData::new(ValueType::Long, false, DefId::from_string("pd".into()));
        log.deleted(
            ItemState::new_property(pid.clone(), pdata, ItemStatus::Existing).into_ref(),
        );
        pm.store(&log).unwrap();

        assert!(pm.load_property(&pid).unwrap().is_none());
        assert!(pm.load_node(&id).unwrap().is_some());
    }

    #[test]
    fn dump_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.dump");
        let id = NodeId::random();
        let target = NodeId::random();
        {
            let pm = MemPersistence::open(codec(), &path).unwrap();
            let (mut log, pid) = node_log(id);
            let mut refs = NodeReferences::new(target);
            refs.add(pid);
            log.modified_refs(refs);
            pm.store(&log).unwrap();
            pm.close().unwrap();
        }
        {
            let pm = MemPersistence::open(codec(), &path).unwrap();
            assert!(pm.load_node(&id).unwrap().is_some());
            let refs = pm.load_references(&target).unwrap().unwrap();
            assert_eq!(refs.len(), 1);
            assert!(pm.exists_references(&target).unwrap());
        }
    }
}
