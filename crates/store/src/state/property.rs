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

use arbor_common::nodetype::DefId;
use arbor_common::{NodeId, Value, ValueType};

/// The payload of a property state. The value type is concrete (never
/// UNDEFINED): it is the type of the stored values, even when the governing
/// definition leaves the type open.
#[derive(Clone, PartialEq, Debug)]
pub struct PropertyData {
    pub value_type: ValueType,
    pub multiple: bool,
    pub def_id: DefId,
    pub values: Vec<Value>,
}

impl PropertyData {
    pub fn new(value_type: ValueType, multiple: bool, def_id: DefId) -> Self {
        Self {
            value_type,
            multiple,
            def_id,
            values: vec![],
        }
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    /// Targets of REFERENCE values; empty for any other type.
    pub fn reference_targets(&self) -> Vec<NodeId> {
        if self.value_type != ValueType::Reference {
            return vec![];
        }
        self.values
            .iter()
            .filter_map(|v| match v {
                Value::Reference(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_targets_only_for_reference_type() {
        let a = NodeId::random();
        let b = NodeId::random();
        let refs = PropertyData::new(
            ValueType::Reference,
            true,
            DefId::from_string("d".into()),
        )
        .with_values(vec![Value::Reference(a), Value::Reference(b)]);
        assert_eq!(refs.reference_targets(), vec![a, b]);

        let strings = PropertyData::new(
            ValueType::String,
            false,
            DefId::from_string("d".into()),
        )
        .with_values(vec![Value::String("x".into())]);
        assert!(strings.reference_targets().is_empty());
    }
}
