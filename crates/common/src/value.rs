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

use std::fmt::{Display, Formatter};

use base64::Engine;
use bytes::Bytes;

use crate::error::StateError;
use crate::ids::NodeId;
use crate::names::Name;

/// Property type codes. The discriminants are the on-disk codes used in the
/// bundle property blocks and must not be renumbered.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ValueType {
    Undefined = 0,
    String = 1,
    Binary = 2,
    Long = 3,
    Double = 4,
    Date = 5,
    Boolean = 6,
    Name = 7,
    Path = 8,
    Reference = 9,
}

impl ValueType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            1 => Some(Self::String),
            2 => Some(Self::Binary),
            3 => Some(Self::Long),
            4 => Some(Self::Double),
            5 => Some(Self::Date),
            6 => Some(Self::Boolean),
            7 => Some(Self::Name),
            8 => Some(Self::Path),
            9 => Some(Self::Reference),
            _ => None,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Undefined => "UNDEFINED",
            Self::String => "STRING",
            Self::Binary => "BINARY",
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::Boolean => "BOOLEAN",
            Self::Name => "NAME",
            Self::Path => "PATH",
            Self::Reference => "REFERENCE",
        };
        write!(f, "{s}")
    }
}

/// Payload of a BINARY value. Small payloads live inline; payloads past the
/// configured threshold are handed to a blob store and referenced by id. A
/// data-store id is an opaque handle into an external content-addressed store.
#[derive(Clone, PartialEq, Debug)]
pub enum BinaryValue {
    Inline(Bytes),
    BlobStore(String),
    DataStore(String),
}

impl BinaryValue {
    pub fn inline(bytes: impl Into<Bytes>) -> Self {
        Self::Inline(bytes.into())
    }

    /// Inline payload length, if the payload is inline.
    pub fn inline_len(&self) -> Option<usize> {
        match self {
            Self::Inline(b) => Some(b.len()),
            _ => None,
        }
    }
}

/// A single typed property value. DATE is carried as ISO-8601 text; the store
/// orders and persists dates but never interprets them.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    String(String),
    Binary(BinaryValue),
    Long(i64),
    Double(f64),
    Date(String),
    Boolean(bool),
    Name(Name),
    Path(String),
    Reference(NodeId),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Date(_) => ValueType::Date,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Name(_) => ValueType::Name,
            Value::Path(_) => ValueType::Path,
            Value::Reference(_) => ValueType::Reference,
        }
    }

    /// Convert a serialized (string) form into a value of the requested type.
    /// BINARY payloads are base64 text. NAME text is `{uri}local` or a bare
    /// local name. Used by the importer.
    pub fn from_serialized(ty: ValueType, s: &str) -> Result<Value, StateError> {
        let bad = |what: &str| {
            StateError::ConstraintViolation(format!("cannot convert {s:?} to {what}"))
        };
        match ty {
            ValueType::String | ValueType::Undefined => Ok(Value::String(s.to_string())),
            ValueType::Path => Ok(Value::Path(s.to_string())),
            ValueType::Date => Ok(Value::Date(s.to_string())),
            ValueType::Long => s
                .trim()
                .parse::<i64>()
                .map(Value::Long)
                .map_err(|_| bad("LONG")),
            ValueType::Double => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| bad("DOUBLE")),
            ValueType::Boolean => match s.trim() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(bad("BOOLEAN")),
            },
            ValueType::Name => Ok(Value::Name(parse_name(s))),
            ValueType::Reference => NodeId::parse(s.trim())
                .map(Value::Reference)
                .ok_or_else(|| bad("REFERENCE")),
            ValueType::Binary => base64::engine::general_purpose::STANDARD
                .decode(s.trim())
                .map(|b| Value::Binary(BinaryValue::inline(b)))
                .map_err(|_| bad("BINARY")),
        }
    }

    /// Serialized (string) form, the inverse of `from_serialized`. Inline
    /// BINARY payloads re-encode as base64; externalized payloads have no
    /// serialized form.
    pub fn to_serialized(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Path(s) | Value::Date(s) => Some(s.clone()),
            Value::Long(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Boolean(v) => Some(v.to_string()),
            Value::Name(n) => Some(n.to_string()),
            Value::Reference(id) => Some(id.to_string()),
            Value::Binary(BinaryValue::Inline(b)) => {
                Some(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Binary(_) => None,
        }
    }
}

fn parse_name(s: &str) -> Name {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('{')
        && let Some((ns, local)) = rest.split_once('}')
    {
        return Name::new(ns, local);
    }
    Name::new("", s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NS_NT_URI;

    #[test]
    fn type_codes_roundtrip() {
        for code in 0u8..=9 {
            let ty = ValueType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(ValueType::from_code(10), None);
    }

    #[test]
    fn serialized_conversions() {
        assert_eq!(
            Value::from_serialized(ValueType::Long, " 42 ").unwrap(),
            Value::Long(42)
        );
        assert_eq!(
            Value::from_serialized(ValueType::Boolean, "true").unwrap(),
            Value::Boolean(true)
        );
        assert!(Value::from_serialized(ValueType::Boolean, "yes").is_err());

        let name = Value::from_serialized(ValueType::Name, "{http://www.jcp.org/jcr/nt/1.0}base")
            .unwrap();
        assert_eq!(name, Value::Name(Name::new(NS_NT_URI, "base")));

        let id = NodeId::random();
        assert_eq!(
            Value::from_serialized(ValueType::Reference, &id.to_string()).unwrap(),
            Value::Reference(id)
        );
    }

    #[test]
    fn binary_base64_roundtrip() {
        let payload = b"\x00\x01binary payload\xff".to_vec();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&payload);
        let v = Value::from_serialized(ValueType::Binary, &encoded).unwrap();
        let Value::Binary(BinaryValue::Inline(bytes)) = &v else {
            panic!("expected inline binary");
        };
        assert_eq!(&bytes[..], &payload[..]);
        assert_eq!(v.to_serialized().unwrap(), encoded);
    }

    #[test]
    fn externalized_binary_has_no_serialized_form() {
        let v = Value::Binary(BinaryValue::BlobStore("blob-1".into()));
        assert_eq!(v.to_serialized(), None);
    }
}
