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

//! The bundle wire codec.
//!
//! Big-endian positional layout, no field tags:
//!
//! 1. `u32` — high byte: format version; low 24 bits: interned index of the
//!    primary type's namespace URI
//! 2. `u32` — interned index of the primary type's local name
//! 3. parent id (`u8` presence marker, then 16 uuid bytes)
//! 4. governing node-definition id (length-prefixed UTF-8)
//! 5. mixin names `(u32, u32)` until the null-name sentinel
//! 6. property entries (name + block) until the null-name sentinel
//! 7. `u8` referenceable flag
//! 8. child entries (id + name) until the null-id sentinel
//! 9. `u16` modcount (format version ≥ 1)
//!
//! Interned names keep recurring strings at four bytes a side; the sentinels
//! let an old decoder stop cleanly in front of trailers it does not know.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use arbor_common::nodetype::DefId;
use arbor_common::{BinaryValue, Name, NodeId, PropertyId, StateError, Value, ValueType};

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::bundle::{NameIndex, NodeBundle, PropertyBundle};
use crate::config::StoreConfig;
use crate::state::ChildEntry;

/// Current bundle format version. Version 0 bundles lack the modcount
/// trailer; readers accept both, and reject anything newer.
pub const FORMAT_VERSION: u8 = 1;

/// Sentinel namespace index terminating name-keyed sequences.
const NULL_NAME: u32 = u32::MAX;

pub struct BundleCodec {
    names: Arc<NameIndex>,
    blobs: Arc<dyn BlobStore>,
    min_blob_size: usize,
    ignore_missing_blobs: bool,
}

impl BundleCodec {
    pub fn new(names: Arc<NameIndex>, blobs: Arc<dyn BlobStore>, config: &StoreConfig) -> Self {
        Self {
            names,
            blobs,
            min_blob_size: config.min_blob_size,
            ignore_missing_blobs: config.ignore_missing_blobs,
        }
    }

    pub fn names(&self) -> &Arc<NameIndex> {
        &self.names
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Encode a bundle. Inline BINARY values at or past the threshold are
    /// moved to the blob store first (mutating the bundle), so the encoded
    /// form carries their ids.
    pub fn encode(&self, bundle: &mut NodeBundle) -> Result<Bytes, StateError> {
        self.encode_with_version(bundle, FORMAT_VERSION)
    }

    pub(crate) fn encode_with_version(
        &self,
        bundle: &mut NodeBundle,
        version: u8,
    ) -> Result<Bytes, StateError> {
        let node_id = bundle.id;
        let mut buf = BytesMut::with_capacity(256);

        let ns_idx = self.names.intern_uri(bundle.primary_type.ns());
        if ns_idx >= 1 << 24 {
            return Err(StateError::Store(
                "namespace dictionary exceeds 24-bit index space".into(),
            ));
        }
        buf.put_u32((version as u32) << 24 | ns_idx);
        buf.put_u32(self.names.intern_local(bundle.primary_type.local()));

        match bundle.parent {
            Some(parent) => {
                buf.put_u8(1);
                buf.put_slice(parent.as_bytes());
            }
            None => buf.put_u8(0),
        }

        put_utf(&mut buf, bundle.def_id.as_str())?;

        for mixin in &bundle.mixins {
            self.put_name(&mut buf, mixin)?;
        }
        buf.put_u32(NULL_NAME);

        for prop in &mut bundle.properties {
            self.externalize(node_id, prop)?;
            self.put_name(&mut buf, &prop.name)?;
            self.encode_property(&mut buf, prop)?;
        }
        buf.put_u32(NULL_NAME);

        buf.put_u8(bundle.referenceable as u8);

        for child in &bundle.children {
            buf.put_u8(1);
            buf.put_slice(child.id.as_bytes());
            self.put_name(&mut buf, &child.name)?;
        }
        buf.put_u8(0);

        if version >= 1 {
            buf.put_u16(bundle.modcount);
        }
        Ok(buf.freeze())
    }

    pub fn decode(&self, id: NodeId, bytes: &[u8]) -> Result<NodeBundle, StateError> {
        let mut r = Reader { buf: bytes };

        let header = r.u32()?;
        let version = (header >> 24) as u8;
        if version > FORMAT_VERSION {
            return Err(StateError::Store(format!(
                "unsupported bundle format version {version} (current {FORMAT_VERSION})",
            )));
        }
        let ns_idx = header & 0x00FF_FFFF;
        let local_idx = r.u32()?;
        let primary_type = self.names.name(ns_idx, local_idx)?;

        let parent = match r.u8()? {
            0 => None,
            _ => Some(r.uuid()?),
        };
        let def_id = DefId::from_string(r.utf()?);

        let mut mixins = vec![];
        while let Some(name) = self.read_opt_name(&mut r)? {
            mixins.push(name);
        }

        let mut properties = vec![];
        while let Some(name) = self.read_opt_name(&mut r)? {
            properties.push(self.decode_property(&mut r, name)?);
        }

        let referenceable = r.u8()? != 0;

        let mut children = vec![];
        while r.u8()? != 0 {
            let child_id = r.uuid()?;
            let name = self.read_name(&mut r)?;
            children.push(ChildEntry {
                name,
                id: child_id,
            });
        }

        let modcount = if version >= 1 { r.u16()? } else { 0 };

        Ok(NodeBundle {
            id,
            primary_type,
            parent,
            def_id,
            mixins,
            properties,
            referenceable,
            children,
            modcount,
        })
    }

    /// Materialize the payload of a BINARY value. A missing external blob is
    /// a read error, unless the missing-blob policy substitutes an empty
    /// payload.
    pub fn binary_bytes(&self, value: &BinaryValue) -> Result<Bytes, StateError> {
        match value {
            BinaryValue::Inline(bytes) => Ok(bytes.clone()),
            BinaryValue::BlobStore(id) => match self.blobs.get(id)? {
                Some(bytes) => Ok(bytes),
                None if self.ignore_missing_blobs => {
                    warn!(blob = %id, "blob missing from store, substituting empty binary");
                    Ok(Bytes::new())
                }
                None => Err(StateError::Store(format!("blob {id} missing from store"))),
            },
            BinaryValue::DataStore(id) => {
                if self.ignore_missing_blobs {
                    warn!(resource = %id, "no data store mounted, substituting empty binary");
                    Ok(Bytes::new())
                } else {
                    Err(StateError::Store(format!(
                        "data store resource {id} is not available",
                    )))
                }
            }
        }
    }

    /// Move oversized inline payloads out to the blob store, re-reading each
    /// through its freshly allocated id before the id is committed to the
    /// encoded form.
    fn externalize(&self, node: NodeId, prop: &mut PropertyBundle) -> Result<(), StateError> {
        if prop.value_type != ValueType::Binary {
            return Ok(());
        }
        let pid = PropertyId::new(node, prop.name.clone());
        for (index, value) in prop.values.iter_mut().enumerate() {
            if let Value::Binary(BinaryValue::Inline(bytes)) = value
                && bytes.len() >= self.min_blob_size
            {
                let blob_id = self.blobs.create_id(&pid, index);
                self.blobs.put(&blob_id, bytes)?;
                if self.blobs.get(&blob_id)?.is_none() {
                    return Err(StateError::Store(format!(
                        "blob {blob_id} unreadable immediately after write",
                    )));
                }
                *value = Value::Binary(BinaryValue::BlobStore(blob_id));
            }
        }
        Ok(())
    }

    fn encode_property(
        &self,
        buf: &mut BytesMut,
        prop: &PropertyBundle,
    ) -> Result<(), StateError> {
        buf.put_u32((prop.modcount as u32) << 16 | prop.value_type.code() as u32);
        buf.put_u8(prop.multiple as u8);
        put_utf(buf, prop.def_id.as_str())?;
        buf.put_u32(prop.values.len() as u32);
        for value in &prop.values {
            self.encode_value(buf, prop, value)?;
        }
        Ok(())
    }

    fn encode_value(
        &self,
        buf: &mut BytesMut,
        prop: &PropertyBundle,
        value: &Value,
    ) -> Result<(), StateError> {
        if value.value_type() != prop.value_type {
            return Err(StateError::Store(format!(
                "value of type {} in {} property {}",
                value.value_type(),
                prop.value_type,
                prop.name,
            )));
        }
        match value {
            Value::Binary(BinaryValue::DataStore(id)) => {
                buf.put_i32(-2);
                put_utf(buf, id)?;
            }
            Value::Binary(BinaryValue::BlobStore(id)) => {
                buf.put_i32(-1);
                put_utf(buf, id)?;
            }
            Value::Binary(BinaryValue::Inline(bytes)) => {
                if bytes.len() > i32::MAX as usize {
                    return Err(StateError::Store("inline binary exceeds 2GB".into()));
                }
                buf.put_i32(bytes.len() as i32);
                buf.put_slice(bytes);
            }
            Value::Double(v) => buf.put_f64(*v),
            Value::Long(v) => buf.put_i64(*v),
            Value::Boolean(v) => buf.put_u8(*v as u8),
            Value::Name(name) => self.put_name(buf, name)?,
            Value::Reference(id) => buf.put_slice(id.as_bytes()),
            Value::String(s) | Value::Path(s) | Value::Date(s) => {
                if s.len() > i32::MAX as usize {
                    return Err(StateError::Store("string value exceeds 2GB".into()));
                }
                buf.put_i32(s.len() as i32);
                buf.put_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    fn decode_property(
        &self,
        r: &mut Reader<'_>,
        name: Name,
    ) -> Result<PropertyBundle, StateError> {
        let head = r.u32()?;
        let modcount = (head >> 16) as u16;
        let code = head & 0xFFFF;
        let value_type = u8::try_from(code)
            .ok()
            .and_then(ValueType::from_code)
            .ok_or_else(|| StateError::Store(format!("invalid property type code {code}")))?;
        let multiple = r.u8()? != 0;
        let def_id = DefId::from_string(r.utf()?);
        let count = r.u32()? as usize;
        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            values.push(self.decode_value(r, value_type)?);
        }
        Ok(PropertyBundle {
            name,
            value_type,
            multiple,
            def_id,
            modcount,
            values,
        })
    }

    fn decode_value(&self, r: &mut Reader<'_>, ty: ValueType) -> Result<Value, StateError> {
        match ty {
            ValueType::Binary => {
                let size = r.i32()?;
                match size {
                    -2 => Ok(Value::Binary(BinaryValue::DataStore(r.utf()?))),
                    -1 => Ok(Value::Binary(BinaryValue::BlobStore(r.utf()?))),
                    n if n >= 0 => Ok(Value::Binary(BinaryValue::Inline(r.bytes(n as usize)?))),
                    n => Err(StateError::Store(format!("invalid binary size marker {n}"))),
                }
            }
            ValueType::Double => Ok(Value::Double(r.f64()?)),
            ValueType::Long => Ok(Value::Long(r.i64()?)),
            ValueType::Boolean => Ok(Value::Boolean(r.u8()? != 0)),
            ValueType::Name => {
                let name = self.read_name(r)?;
                Ok(Value::Name(name))
            }
            ValueType::Reference => Ok(Value::Reference(r.uuid()?)),
            ValueType::String => Ok(Value::String(r.sized_utf()?)),
            ValueType::Path => Ok(Value::Path(r.sized_utf()?)),
            ValueType::Date => Ok(Value::Date(r.sized_utf()?)),
            ValueType::Undefined => Err(StateError::Store(
                "UNDEFINED is not a storable value type".into(),
            )),
        }
    }

    fn put_name(&self, buf: &mut BytesMut, name: &Name) -> Result<(), StateError> {
        let (u, l) = self.names.intern_name(name);
        if u == NULL_NAME {
            return Err(StateError::Store(
                "namespace dictionary exhausted the index space".into(),
            ));
        }
        buf.put_u32(u);
        buf.put_u32(l);
        Ok(())
    }

    fn read_name(&self, r: &mut Reader<'_>) -> Result<Name, StateError> {
        let u = r.u32()?;
        let l = r.u32()?;
        self.names.name(u, l)
    }

    /// A name, or `None` at the null-name sentinel.
    fn read_opt_name(&self, r: &mut Reader<'_>) -> Result<Option<Name>, StateError> {
        let u = r.u32()?;
        if u == NULL_NAME {
            return Ok(None);
        }
        let l = r.u32()?;
        Ok(Some(self.names.name(u, l)?))
    }
}

fn put_utf(buf: &mut BytesMut, s: &str) -> Result<(), StateError> {
    let len = u16::try_from(s.len())
        .map_err(|_| StateError::Store("UTF field exceeds 64KB".into()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked big-endian reader; truncation surfaces as a store error
/// instead of a panic.
struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<(), StateError> {
        if self.buf.remaining() < n {
            return Err(StateError::Store("truncated bundle".into()));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, StateError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, StateError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, StateError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self) -> Result<i32, StateError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn i64(&mut self) -> Result<i64, StateError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn f64(&mut self) -> Result<f64, StateError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn bytes(&mut self, n: usize) -> Result<Bytes, StateError> {
        self.need(n)?;
        Ok(self.buf.copy_to_bytes(n))
    }

    fn uuid(&mut self) -> Result<NodeId, StateError> {
        self.need(16)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(NodeId::from_bytes(raw))
    }

    fn utf(&mut self) -> Result<String, StateError> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StateError::Store("malformed UTF field".into()))
    }

    fn sized_utf(&mut self) -> Result<String, StateError> {
        let len = self.i32()?;
        if len < 0 {
            return Err(StateError::Store("negative string length".into()));
        }
        let raw = self.bytes(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StateError::Store("malformed string value".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemBlobStore;
    use pretty_assertions::assert_eq;

    fn codec(min_blob_size: usize, ignore_missing: bool) -> BundleCodec {
        BundleCodec::new(
            Arc::new(NameIndex::new()),
            Arc::new(MemBlobStore::new()),
            &StoreConfig {
                min_blob_size,
                ignore_missing_blobs: ignore_missing,
            },
        )
    }

    fn nt(local: &str) -> Name {
        Name::new("http://www.jcp.org/jcr/nt/1.0", local)
    }

    fn prop(name: &str, ty: ValueType, multiple: bool, values: Vec<Value>) -> PropertyBundle {
        PropertyBundle {
            name: Name::new("test", name),
            value_type: ty,
            multiple,
            def_id: DefId::from_string(format!("def-{name}")),
            modcount: 3,
            values,
        }
    }

    fn sample_bundle() -> NodeBundle {
        let parent = NodeId::random();
        NodeBundle {
            id: NodeId::random(),
            primary_type: nt("unstructured"),
            parent: Some(parent),
            def_id: DefId::from_string("node-def".into()),
            mixins: vec![Name::new("http://www.jcp.org/jcr/mix/1.0", "referenceable")],
            properties: vec![
                prop(
                    "strings",
                    ValueType::String,
                    true,
                    vec![
                        Value::String("first".into()),
                        Value::String("zweiter Wert — ünïcode".into()),
                    ],
                ),
                prop("long", ValueType::Long, false, vec![Value::Long(-42)]),
                prop(
                    "double",
                    ValueType::Double,
                    false,
                    vec![Value::Double(2.5)],
                ),
                prop(
                    "flag",
                    ValueType::Boolean,
                    false,
                    vec![Value::Boolean(true)],
                ),
                prop(
                    "date",
                    ValueType::Date,
                    false,
                    vec![Value::Date("2025-11-02T12:00:00Z".into())],
                ),
                prop(
                    "name",
                    ValueType::Name,
                    false,
                    vec![Value::Name(nt("base"))],
                ),
                prop(
                    "path",
                    ValueType::Path,
                    false,
                    vec![Value::Path("/a/b/c".into())],
                ),
                prop(
                    "ref",
                    ValueType::Reference,
                    false,
                    vec![Value::Reference(parent)],
                ),
                prop(
                    "small",
                    ValueType::Binary,
                    false,
                    vec![Value::Binary(BinaryValue::inline(b"tiny".to_vec()))],
                ),
            ],
            referenceable: true,
            children: vec![
                ChildEntry {
                    name: Name::new("test", "child"),
                    id: NodeId::random(),
                },
                ChildEntry {
                    name: Name::new("test", "child"),
                    id: NodeId::random(),
                },
                ChildEntry {
                    name: Name::new("test", "other"),
                    id: NodeId::random(),
                },
            ],
            modcount: 17,
        }
    }

    #[test]
    fn roundtrip_all_value_types() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        let original = bundle.clone();
        let encoded = codec.encode(&mut bundle).unwrap();
        let decoded = codec.decode(original.id, &encoded).unwrap();
        assert_eq!(decoded, original);

        // And the encoding is deterministic once the dictionaries are warm.
        let encoded2 = codec.encode(&mut bundle).unwrap();
        assert_eq!(encoded, encoded2);
    }

    #[test]
    fn large_binary_goes_external_and_survives_reload() {
        let codec = codec(1 << 16, false);
        let id = NodeId::parse("00000000-0000-4000-8000-00000000aaaa").unwrap();
        let payload: Vec<u8> = (0..100 * 1024).map(|_| rand::random::<u8>()).collect();

        let mut bundle = NodeBundle {
            id,
            primary_type: nt("unstructured"),
            parent: None,
            def_id: DefId::from_string("node-def".into()),
            mixins: vec![],
            properties: vec![prop(
                "bigblob",
                ValueType::Binary,
                false,
                vec![Value::Binary(BinaryValue::inline(payload.clone()))],
            )],
            referenceable: false,
            children: vec![],
            modcount: 0,
        };

        let encoded = codec.encode(&mut bundle).unwrap();
        // The in-memory bundle now references the blob store.
        let Value::Binary(BinaryValue::BlobStore(blob_id)) =
            &bundle.properties[0].values[0]
        else {
            panic!("oversized value was not externalized");
        };

        // Much smaller than the payload: only the id is inline.
        assert!(encoded.len() < 1024);

        let decoded = codec.decode(id, &encoded).unwrap();
        let Value::Binary(binary) = &decoded.properties[0].values[0] else {
            panic!("expected binary value");
        };
        assert_eq!(binary, &BinaryValue::BlobStore(blob_id.clone()));
        assert_eq!(codec.binary_bytes(binary).unwrap(), Bytes::from(payload));
    }

    #[test]
    fn small_binary_stays_inline() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        codec.encode(&mut bundle).unwrap();
        assert!(matches!(
            &bundle.property(&Name::new("test", "small")).unwrap().values[0],
            Value::Binary(BinaryValue::Inline(_))
        ));
    }

    #[test]
    fn version_zero_is_accepted_without_modcount() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        let original = bundle.clone();
        let encoded = codec.encode_with_version(&mut bundle, 0).unwrap();
        let decoded = codec.decode(original.id, &encoded).unwrap();
        assert_eq!(decoded.modcount, 0);
        assert_eq!(decoded.children, original.children);
        assert_eq!(decoded.properties, original.properties);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        let encoded = codec
            .encode_with_version(&mut bundle, FORMAT_VERSION + 1)
            .unwrap();
        let err = codec.decode(bundle.id, &encoded).unwrap_err();
        assert!(matches!(err, StateError::Store(_)));
    }

    #[test]
    fn truncated_bundle_is_an_error_not_a_panic() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        let encoded = codec.encode(&mut bundle).unwrap();
        for cut in [0, 3, 8, encoded.len() / 2, encoded.len() - 1] {
            assert!(codec.decode(bundle.id, &encoded[..cut]).is_err());
        }
    }

    #[test]
    fn missing_blob_policy() {
        let strict = codec(16, false);
        let missing = BinaryValue::BlobStore("nowhere".into());
        assert!(strict.binary_bytes(&missing).is_err());

        let lenient = codec(16, true);
        assert_eq!(lenient.binary_bytes(&missing).unwrap(), Bytes::new());
        // Data-store handles have no backend here either.
        assert_eq!(
            lenient
                .binary_bytes(&BinaryValue::DataStore("h".into()))
                .unwrap(),
            Bytes::new()
        );
        assert!(
            strict
                .binary_bytes(&BinaryValue::DataStore("h".into()))
                .is_err()
        );
    }

    #[test]
    fn dictionaries_shared_between_encode_and_decode() {
        // A decoder with a different (empty) dictionary cannot read the
        // stream; the dictionaries are part of the store, not the stream.
        let writer = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        let encoded = writer.encode(&mut bundle).unwrap();

        let reader = codec(1 << 16, false);
        assert!(reader.decode(bundle.id, &encoded).is_err());
    }

    #[test]
    fn value_type_mismatch_is_rejected_on_encode() {
        let codec = codec(1 << 16, false);
        let mut bundle = sample_bundle();
        bundle.properties[1].values[0] = Value::String("not a long".into());
        assert!(codec.encode(&mut bundle).is_err());
    }
}
