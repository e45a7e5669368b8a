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

//! Blob stores: out-of-bundle storage for large BINARY values.

use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use bytes::Bytes;

use arbor_common::{PropertyId, StateError};

/// Storage for binary payloads past the inline threshold. Ids are allocated
/// by the store and recorded in the owning bundle; a missing id on `get` is
/// reported as `Ok(None)` so the codec can apply its missing-blob policy.
pub trait BlobStore: Send + Sync {
    /// Allocate an id for the value at `index` of the given property.
    fn create_id(&self, prop: &PropertyId, index: usize) -> String;

    fn put(&self, id: &str, data: &[u8]) -> Result<(), StateError>;

    fn get(&self, id: &str) -> Result<Option<Bytes>, StateError>;

    /// Remove the blob; `false` if it was not present.
    fn remove(&self, id: &str) -> Result<bool, StateError>;
}

fn blob_id(prop: &PropertyId, index: usize) -> String {
    // The name hash only needs to be collision-resistant within one parent
    // node; process-stable is enough.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    prop.name.hash(&mut hasher);
    format!("{}.{:016x}.{index}", prop.parent.hex(), hasher.finish())
}

/// In-process blob store, for tests and transient repositories.
#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

impl BlobStore for MemBlobStore {
    fn create_id(&self, prop: &PropertyId, index: usize) -> String {
        blob_id(prop, index)
    }

    fn put(&self, id: &str, data: &[u8]) -> Result<(), StateError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(id.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Bytes>, StateError> {
        Ok(self.blobs.lock().unwrap().get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<bool, StateError> {
        Ok(self.blobs.lock().unwrap().remove(id).is_some())
    }
}

/// Blob store rooted in a directory, one file per blob, sharded by the first
/// two characters of the id to bound directory fan-out.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StateError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StateError::Store(format!("cannot create blob store root: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let shard = &id[..id.len().min(2)];
        self.root.join(shard).join(id)
    }
}

impl BlobStore for FsBlobStore {
    fn create_id(&self, prop: &PropertyId, index: usize) -> String {
        blob_id(prop, index)
    }

    fn put(&self, id: &str, data: &[u8]) -> Result<(), StateError> {
        let path = self.path_for(id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| StateError::Store(format!("cannot create blob shard: {e}")))?;
        }
        fs::write(&path, data)
            .map_err(|e| StateError::Store(format!("cannot write blob {id}: {e}")))
    }

    fn get(&self, id: &str) -> Result<Option<Bytes>, StateError> {
        match fs::read(self.path_for(id)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Store(format!("cannot read blob {id}: {e}"))),
        }
    }

    fn remove(&self, id: &str) -> Result<bool, StateError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::Store(format!("cannot remove blob {id}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::{Name, NodeId};

    fn prop() -> PropertyId {
        PropertyId::new(NodeId::random(), Name::new("test", "payload"))
    }

    #[test]
    fn mem_store_roundtrip() {
        let store = MemBlobStore::new();
        let id = store.create_id(&prop(), 0);
        store.put(&id, b"payload").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), Bytes::from_static(b"payload"));
        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), None);
    }

    #[test]
    fn fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path().join("blobs")).unwrap();
        let id = store.create_id(&prop(), 3);
        assert_eq!(store.get(&id).unwrap(), None);
        store.put(&id, b"on disk").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), Bytes::from_static(b"on disk"));
        assert!(store.remove(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), None);
    }

    #[test]
    fn ids_distinguish_value_indexes() {
        let store = MemBlobStore::new();
        let p = prop();
        assert_ne!(store.create_id(&p, 0), store.create_id(&p, 1));
    }
}
