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

//! Node-type definitions and their resolution into effective types.
//!
//! A [`NodeTypeDef`] declares what a node of that type may/must contain. The
//! declared picture is partial: the full contract of a node is the merge of
//! its primary type, its mixins and the transitive supertype closure of all
//! of them — the [`EffectiveNodeType`]. Merging detects conflicting
//! declarations at registration time so that read paths never fail.

use std::fmt::{Display, Formatter};

use crate::names::{NT_BASE, Name};
use crate::value::{Value, ValueType};

mod effective;
mod registry;

pub use effective::EffectiveNodeType;
pub use registry::NodeTypeRegistry;

/// What happens to an item governed by this definition when its parent is
/// checked in.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum OnParentVersion {
    #[default]
    Copy,
    Version,
    Initialize,
    Compute,
    Ignore,
    Abort,
}

/// Identity of an item definition: a canonical rendering of the fields that
/// distinguish one declaration from another. Stored in item states as the
/// governing-definition id and persisted in bundles.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DefId(String);

impl DefId {
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DefId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declared property definition.
#[derive(Clone, PartialEq, Debug)]
pub struct PropDef {
    pub declaring_type: Name,
    /// Property name, or the residual marker `*`.
    pub name: Name,
    pub required_type: ValueType,
    pub multiple: bool,
    pub auto_created: bool,
    pub mandatory: bool,
    pub protected: bool,
    pub on_parent_version: OnParentVersion,
    pub value_constraints: Vec<String>,
    pub default_values: Vec<Value>,
}

impl PropDef {
    pub fn new(declaring_type: Name, name: Name, required_type: ValueType, multiple: bool) -> Self {
        Self {
            declaring_type,
            name,
            required_type,
            multiple,
            auto_created: false,
            mandatory: false,
            protected: false,
            on_parent_version: OnParentVersion::default(),
            value_constraints: vec![],
            default_values: vec![],
        }
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn on_parent_version(mut self, opv: OnParentVersion) -> Self {
        self.on_parent_version = opv;
        self
    }

    pub fn constraints(mut self, constraints: Vec<String>) -> Self {
        self.value_constraints = constraints;
        self
    }

    pub fn defaults(mut self, defaults: Vec<Value>) -> Self {
        self.default_values = defaults;
        self
    }

    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }

    pub fn id(&self) -> DefId {
        DefId(format!(
            "p|{}|{}|{}|{}",
            self.declaring_type,
            self.name,
            self.required_type.code(),
            if self.multiple { "m" } else { "s" },
        ))
    }
}

/// A declared child-node definition.
#[derive(Clone, PartialEq, Debug)]
pub struct ChildNodeDef {
    pub declaring_type: Name,
    /// Child name, or the residual marker `*`.
    pub name: Name,
    pub auto_created: bool,
    pub mandatory: bool,
    pub protected: bool,
    pub on_parent_version: OnParentVersion,
    /// Primary types a child governed by this definition must satisfy.
    pub required_primary_types: Vec<Name>,
    /// Primary type assigned when the caller supplies none.
    pub default_primary_type: Option<Name>,
    pub same_name_siblings: bool,
}

impl ChildNodeDef {
    pub fn new(declaring_type: Name, name: Name) -> Self {
        Self {
            declaring_type,
            name,
            auto_created: false,
            mandatory: false,
            protected: false,
            on_parent_version: OnParentVersion::default(),
            required_primary_types: vec![NT_BASE.clone()],
            default_primary_type: None,
            same_name_siblings: false,
        }
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn on_parent_version(mut self, opv: OnParentVersion) -> Self {
        self.on_parent_version = opv;
        self
    }

    pub fn required_types(mut self, types: Vec<Name>) -> Self {
        self.required_primary_types = types;
        self
    }

    pub fn default_type(mut self, ty: Name) -> Self {
        self.default_primary_type = Some(ty);
        self
    }

    pub fn same_name_siblings(mut self) -> Self {
        self.same_name_siblings = true;
        self
    }

    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }

    pub fn id(&self) -> DefId {
        let required: Vec<String> = self
            .required_primary_types
            .iter()
            .map(|n| n.to_string())
            .collect();
        DefId(format!(
            "n|{}|{}|{}|{}|{}",
            self.declaring_type,
            self.name,
            required.join(","),
            self.default_primary_type
                .as_ref()
                .map(|n| n.to_string())
                .unwrap_or_default(),
            if self.same_name_siblings { "sns" } else { "-" },
        ))
    }
}

/// A declared node type.
#[derive(Clone, PartialEq, Debug)]
pub struct NodeTypeDef {
    pub name: Name,
    pub supertypes: Vec<Name>,
    pub mixin: bool,
    pub orderable_child_nodes: bool,
    pub primary_item: Option<Name>,
    pub child_node_defs: Vec<ChildNodeDef>,
    pub prop_defs: Vec<PropDef>,
}

impl NodeTypeDef {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            supertypes: vec![],
            mixin: false,
            orderable_child_nodes: false,
            primary_item: None,
            child_node_defs: vec![],
            prop_defs: vec![],
        }
    }

    pub fn supertypes(mut self, supertypes: Vec<Name>) -> Self {
        self.supertypes = supertypes;
        self
    }

    pub fn mixin(mut self) -> Self {
        self.mixin = true;
        self
    }

    pub fn orderable(mut self) -> Self {
        self.orderable_child_nodes = true;
        self
    }

    pub fn primary_item(mut self, name: Name) -> Self {
        self.primary_item = Some(name);
        self
    }

    pub fn with_prop(mut self, def: PropDef) -> Self {
        self.prop_defs.push(def);
        self
    }

    pub fn with_child(mut self, def: ChildNodeDef) -> Self {
        self.child_node_defs.push(def);
        self
    }
}
