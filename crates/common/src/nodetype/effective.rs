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

use std::collections::HashSet;
use std::sync::Arc;

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};

use crate::error::StateError;
use crate::names::Name;
use crate::nodetype::registry::NodeTypeRegistry;
use crate::nodetype::{ChildNodeDef, DefId, NodeTypeDef, PropDef};
use crate::value::ValueType;

/// The resolved contract of a set of node types: the transitive supertype
/// closure merged into one immutable definition set.
///
/// Instances are immutable after construction; [`EffectiveNodeType::merge`]
/// returns a new instance. The in-place merge is internal and only runs
/// before an instance is published.
#[derive(Clone, Debug, Default)]
pub struct EffectiveNodeType {
    /// Types merged in directly (the declared type, or aggregation members).
    merged_types: IndexSet<Name, RandomState>,
    /// Types contributed by supertype closure.
    inherited_types: IndexSet<Name, RandomState>,
    named_child_defs: IndexMap<Name, Vec<ChildNodeDef>, RandomState>,
    residual_child_defs: Vec<ChildNodeDef>,
    named_prop_defs: IndexMap<Name, Vec<PropDef>, RandomState>,
    residual_prop_defs: Vec<PropDef>,
}

impl EffectiveNodeType {
    /// Build the effective type of a single declared type, given the already
    /// resolved effective types of its direct supertypes (in declaration
    /// order).
    pub(crate) fn from_def(
        def: &NodeTypeDef,
        supertypes: &[Arc<EffectiveNodeType>],
    ) -> Result<Self, StateError> {
        let mut ent = EffectiveNodeType::default();
        ent.merged_types.insert(def.name.clone());

        let mut seen: HashSet<DefId> = HashSet::new();
        for cnd in &def.child_node_defs {
            if !seen.insert(cnd.id()) {
                return Err(StateError::Conflict(format!(
                    "{}: ambiguous duplicate {} definition",
                    def.name,
                    if cnd.is_residual() {
                        "residual child node".to_string()
                    } else {
                        format!("child node {}", cnd.name)
                    },
                )));
            }
            if cnd.is_residual() {
                ent.residual_child_defs.push(cnd.clone());
            } else {
                if let Some(existing) = ent.named_child_defs.get(&cnd.name)
                    && (cnd.auto_created || existing.iter().any(|e| e.auto_created))
                {
                    return Err(StateError::Conflict(format!(
                        "{}: auto-created collision on child node {}",
                        def.name, cnd.name,
                    )));
                }
                ent.named_child_defs
                    .entry(cnd.name.clone())
                    .or_default()
                    .push(cnd.clone());
            }
        }

        for pd in &def.prop_defs {
            if !seen.insert(pd.id()) {
                return Err(StateError::Conflict(format!(
                    "{}: ambiguous duplicate {} definition",
                    def.name,
                    if pd.is_residual() {
                        "residual property".to_string()
                    } else {
                        format!("property {}", pd.name)
                    },
                )));
            }
            if pd.is_residual() {
                ent.residual_prop_defs.push(pd.clone());
            } else {
                if let Some(existing) = ent.named_prop_defs.get(&pd.name)
                    && (pd.auto_created || existing.iter().any(|e| e.auto_created))
                {
                    return Err(StateError::Conflict(format!(
                        "{}: auto-created collision on property {}",
                        def.name, pd.name,
                    )));
                }
                ent.named_prop_defs
                    .entry(pd.name.clone())
                    .or_default()
                    .push(pd.clone());
            }
        }

        for st in supertypes {
            ent.merge_internal(st, true)?;
        }
        Ok(ent)
    }

    /// Aggregation merge: the union of `self` and `other` as a new instance.
    pub fn merge(&self, other: &EffectiveNodeType) -> Result<EffectiveNodeType, StateError> {
        let mut merged = self.clone();
        merged.merge_internal(other, false)?;
        Ok(merged)
    }

    /// Merge `other` into `self`. A supertype merge folds all of other's
    /// types into the inherited set; an aggregation merge keeps other's
    /// merged types in the merged set.
    fn merge_internal(
        &mut self,
        other: &EffectiveNodeType,
        supertype_merge: bool,
    ) -> Result<(), StateError> {
        // Idempotent: nothing to do when every type is already included.
        if other.all_types().all(|n| self.includes(n)) {
            return Ok(());
        }

        for (name, defs) in &other.named_child_defs {
            for d in defs {
                if self.includes(&d.declaring_type) {
                    continue;
                }
                if let Some(existing) = self.named_child_defs.get(name)
                    && let Some(e) = existing.first()
                {
                    if e.auto_created || d.auto_created {
                        return Err(StateError::Conflict(format!(
                            "auto-created collision on child node {name}: declared by {} and {}",
                            e.declaring_type, d.declaring_type,
                        )));
                    }
                    // Two same-named node definitions are always ambiguous.
                    return Err(StateError::Conflict(format!(
                        "ambiguous child node definition {name}: declared by {} and {}",
                        e.declaring_type, d.declaring_type,
                    )));
                }
                self.named_child_defs
                    .entry(name.clone())
                    .or_default()
                    .push(d.clone());
            }
        }

        for (name, defs) in &other.named_prop_defs {
            for d in defs {
                if self.includes(&d.declaring_type) {
                    continue;
                }
                if let Some(existing) = self.named_prop_defs.get(name) {
                    for e in existing {
                        if e.auto_created || d.auto_created {
                            return Err(StateError::Conflict(format!(
                                "auto-created collision on property {name}: declared by {} and {}",
                                e.declaring_type, d.declaring_type,
                            )));
                        }
                        if e.required_type == d.required_type && e.multiple == d.multiple {
                            return Err(StateError::Conflict(format!(
                                "ambiguous property definition {name}: declared by {} and {}",
                                e.declaring_type, d.declaring_type,
                            )));
                        }
                    }
                }
                self.named_prop_defs
                    .entry(name.clone())
                    .or_default()
                    .push(d.clone());
            }
        }

        for d in &other.residual_child_defs {
            if self.includes(&d.declaring_type) {
                continue;
            }
            for e in &self.residual_child_defs {
                if e.required_primary_types == d.required_primary_types
                    && e.default_primary_type == d.default_primary_type
                {
                    return Err(StateError::Conflict(format!(
                        "ambiguous residual child node definitions: declared by {} and {}",
                        e.declaring_type, d.declaring_type,
                    )));
                }
            }
            self.residual_child_defs.push(d.clone());
        }

        for d in &other.residual_prop_defs {
            if self.includes(&d.declaring_type) {
                continue;
            }
            for e in &self.residual_prop_defs {
                if e.required_type == d.required_type && e.multiple == d.multiple {
                    return Err(StateError::Conflict(format!(
                        "ambiguous residual property definitions: declared by {} and {}",
                        e.declaring_type, d.declaring_type,
                    )));
                }
            }
            self.residual_prop_defs.push(d.clone());
        }

        if supertype_merge {
            for n in other.all_types() {
                if !self.merged_types.contains(n) {
                    self.inherited_types.insert(n.clone());
                }
            }
        } else {
            for n in &other.merged_types {
                self.merged_types.insert(n.clone());
                self.inherited_types.shift_remove(n);
            }
            for n in &other.inherited_types {
                if !self.merged_types.contains(n) {
                    self.inherited_types.insert(n.clone());
                }
            }
        }
        Ok(())
    }

    /// Whether the given type name is part of this effective type.
    pub fn includes(&self, name: &Name) -> bool {
        self.merged_types.contains(name) || self.inherited_types.contains(name)
    }

    pub fn all_types(&self) -> impl Iterator<Item = &Name> {
        self.merged_types.iter().chain(self.inherited_types.iter())
    }

    pub fn merged_types(&self) -> impl Iterator<Item = &Name> {
        self.merged_types.iter()
    }

    pub fn named_prop_defs(&self, name: &Name) -> &[PropDef] {
        self.named_prop_defs
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn named_child_defs(&self, name: &Name) -> &[ChildNodeDef] {
        self.named_child_defs
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn residual_prop_defs(&self) -> &[PropDef] {
        &self.residual_prop_defs
    }

    pub fn residual_child_defs(&self) -> &[ChildNodeDef] {
        &self.residual_child_defs
    }

    /// Names of all mandatory (non-residual) item definitions, for
    /// post-import validation.
    pub fn mandatory_item_names(&self) -> Vec<Name> {
        let mut out = vec![];
        for (name, defs) in &self.named_prop_defs {
            if defs.iter().any(|d| d.mandatory) {
                out.push(name.clone());
            }
        }
        for (name, defs) in &self.named_child_defs {
            if defs.iter().any(|d| d.mandatory) {
                out.push(name.clone());
            }
        }
        out
    }

    /// Find the applicable child-node definition for adding `name` with the
    /// given (optional) primary type.
    pub fn applicable_child_def(
        &self,
        name: &Name,
        primary: Option<&Name>,
        registry: &NodeTypeRegistry,
    ) -> Result<ChildNodeDef, StateError> {
        if let Some(defs) = self.named_child_defs.get(name)
            && let Some(d) = first_matching_child(defs, primary, registry)?
        {
            return Ok(d.clone());
        }
        if let Some(d) = first_matching_child(&self.residual_child_defs, primary, registry)? {
            return Ok(d.clone());
        }
        Err(StateError::ConstraintViolation(format!(
            "no matching child node definition for {name}",
        )))
    }

    /// Find the applicable property definition for `(name, value type,
    /// multi-valued)`.
    pub fn applicable_prop_def(
        &self,
        name: &Name,
        value_type: ValueType,
        multiple: bool,
    ) -> Result<PropDef, StateError> {
        if let Some(defs) = self.named_prop_defs.get(name)
            && let Some(d) = best_prop_match(defs, value_type, multiple)
        {
            return Ok(d.clone());
        }
        if let Some(d) = best_prop_match(&self.residual_prop_defs, value_type, multiple) {
            return Ok(d.clone());
        }
        Err(StateError::ConstraintViolation(format!(
            "no matching property definition for {name} ({value_type}, {})",
            if multiple { "multiple" } else { "single" },
        )))
    }

    /// Whether a child named `name` (with optional primary type) may be added
    /// manually.
    pub fn check_add_node(
        &self,
        name: &Name,
        primary: Option<&Name>,
        registry: &NodeTypeRegistry,
    ) -> Result<(), StateError> {
        let def = self.applicable_child_def(name, primary, registry)?;
        if def.protected {
            return Err(StateError::ConstraintViolation(format!(
                "{name} is protected",
            )));
        }
        if def.auto_created {
            return Err(StateError::ConstraintViolation(format!(
                "{name} is auto-created and cannot be added manually",
            )));
        }
        Ok(())
    }

    /// Whether the named item may be removed.
    pub fn check_remove_item(&self, name: &Name) -> Result<(), StateError> {
        let prop_defs = self.named_prop_defs(name).iter();
        let child_defs = self.named_child_defs(name).iter();
        for (mandatory, protected) in prop_defs
            .map(|d| (d.mandatory, d.protected))
            .chain(child_defs.map(|d| (d.mandatory, d.protected)))
        {
            if mandatory {
                return Err(StateError::ConstraintViolation(format!(
                    "{name} is mandatory",
                )));
            }
            if protected {
                return Err(StateError::ConstraintViolation(format!(
                    "{name} is protected",
                )));
            }
        }
        Ok(())
    }
}

fn first_matching_child<'a>(
    defs: &'a [ChildNodeDef],
    primary: Option<&Name>,
    registry: &NodeTypeRegistry,
) -> Result<Option<&'a ChildNodeDef>, StateError> {
    for d in defs {
        match primary {
            Some(pt) => {
                let ent = registry.effective(pt)?;
                if d.required_primary_types.iter().all(|rt| ent.includes(rt)) {
                    return Ok(Some(d));
                }
            }
            None => {
                if d.default_primary_type.is_some() {
                    return Ok(Some(d));
                }
            }
        }
    }
    Ok(None)
}

fn best_prop_match(defs: &[PropDef], value_type: ValueType, multiple: bool) -> Option<&PropDef> {
    let mut best: Option<(&PropDef, u8)> = None;
    for d in defs {
        let type_match = d.required_type == ValueType::Undefined
            || value_type == ValueType::Undefined
            || d.required_type == value_type;
        if !type_match {
            continue;
        }
        let exact_multi = d.multiple == multiple;
        let typed = d.required_type != ValueType::Undefined;
        if exact_multi && typed {
            // Best possible: typed and correct cardinality.
            return Some(d);
        }
        // Multi-ness equality dominates typed-ness.
        let score = (exact_multi as u8) << 1 | typed as u8;
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((d, score)),
        }
    }
    best.map(|(d, _)| d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::names::{NS_NT_URI, NT_BASE, NT_UNSTRUCTURED};
    use crate::nodetype::NodeTypeRegistry;

    fn tname(local: &str) -> Name {
        Name::new("test", local)
    }

    fn registry_with(defs: Vec<NodeTypeDef>) -> NodeTypeRegistry {
        let registry = NodeTypeRegistry::new();
        for def in defs {
            registry.register(def).unwrap();
        }
        registry
    }

    #[test]
    fn supertype_closure_is_included() {
        let a = NodeTypeDef::new(tname("a"))
            .supertypes(vec![NT_BASE.clone()])
            .with_prop(PropDef::new(
                tname("a"),
                tname("p"),
                ValueType::String,
                false,
            ));
        let b = NodeTypeDef::new(tname("b")).supertypes(vec![tname("a")]);
        let registry = registry_with(vec![a, b]);

        let ent = registry.effective(&tname("b")).unwrap();
        assert!(ent.includes(&tname("b")));
        assert!(ent.includes(&tname("a")));
        assert!(ent.includes(&NT_BASE));
        assert_eq!(ent.named_prop_defs(&tname("p")).len(), 1);
    }

    #[test]
    fn auto_created_collision_in_supertypes_conflicts() {
        // Two supertypes both declare auto-created property `p` with
        // different required types; resolving the subtype must fail and the
        // message must name the property and both declaring types.
        let a = NodeTypeDef::new(tname("a")).with_prop(
            PropDef::new(tname("a"), tname("p"), ValueType::String, false).auto_created(),
        );
        let b = NodeTypeDef::new(tname("b")).with_prop(
            PropDef::new(tname("b"), tname("p"), ValueType::Long, false).auto_created(),
        );
        let registry = registry_with(vec![a, b]);

        let t1 = NodeTypeDef::new(tname("t1")).supertypes(vec![tname("a"), tname("b")]);
        let err = registry.register(t1).unwrap_err();
        let StateError::Conflict(msg) = &err else {
            panic!("expected Conflict, got {err:?}");
        };
        assert!(msg.contains("p"), "{msg}");
        assert!(msg.contains("a") && msg.contains("b"), "{msg}");
    }

    #[test]
    fn same_type_same_multi_props_conflict() {
        let a = NodeTypeDef::new(tname("a")).with_prop(PropDef::new(
            tname("a"),
            tname("p"),
            ValueType::String,
            false,
        ));
        let b = NodeTypeDef::new(tname("b")).with_prop(PropDef::new(
            tname("b"),
            tname("p"),
            ValueType::String,
            false,
        ));
        let registry = registry_with(vec![a, b]);
        let t = NodeTypeDef::new(tname("t")).supertypes(vec![tname("a"), tname("b")]);
        assert!(matches!(
            registry.register(t),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn distinct_typed_props_coexist() {
        let a = NodeTypeDef::new(tname("a")).with_prop(PropDef::new(
            tname("a"),
            tname("p"),
            ValueType::String,
            false,
        ));
        let b = NodeTypeDef::new(tname("b")).with_prop(PropDef::new(
            tname("b"),
            tname("p"),
            ValueType::Long,
            false,
        ));
        let registry = registry_with(vec![a, b]);
        let t = NodeTypeDef::new(tname("t")).supertypes(vec![tname("a"), tname("b")]);
        registry.register(t).unwrap();
        let ent = registry.effective(&tname("t")).unwrap();
        assert_eq!(ent.named_prop_defs(&tname("p")).len(), 2);
    }

    #[test]
    fn same_named_child_defs_conflict() {
        let a = NodeTypeDef::new(tname("a"))
            .with_child(ChildNodeDef::new(tname("a"), tname("c")));
        let b = NodeTypeDef::new(tname("b"))
            .with_child(ChildNodeDef::new(tname("b"), tname("c")));
        let registry = registry_with(vec![a, b]);
        let t = NodeTypeDef::new(tname("t")).supertypes(vec![tname("a"), tname("b")]);
        assert!(matches!(
            registry.register(t),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn merge_order_independence() {
        // Effective type of {x, y, z} must not depend on merge order.
        let x = NodeTypeDef::new(tname("x")).with_prop(PropDef::new(
            tname("x"),
            tname("px"),
            ValueType::String,
            false,
        ));
        let y = NodeTypeDef::new(tname("y")).with_prop(PropDef::new(
            tname("y"),
            tname("py"),
            ValueType::Long,
            true,
        ));
        let z = NodeTypeDef::new(tname("z"))
            .with_child(ChildNodeDef::new(tname("z"), tname("cz")));
        let registry = registry_with(vec![x, y, z]);

        let orders: Vec<Vec<Name>> = vec![
            vec![tname("x"), tname("y"), tname("z")],
            vec![tname("z"), tname("y"), tname("x")],
            vec![tname("y"), tname("x"), tname("z")],
        ];
        let ents: Vec<_> = orders
            .iter()
            .map(|order| {
                registry
                    .effective_of(&order[0], &order[1..])
                    .unwrap()
            })
            .collect();
        for ent in &ents {
            let mut types: Vec<String> = ent.all_types().map(|n| n.to_string()).collect();
            types.sort();
            let mut first: Vec<String> = ents[0].all_types().map(|n| n.to_string()).collect();
            first.sort();
            assert_eq!(types, first);
            assert_eq!(ent.named_prop_defs(&tname("px")).len(), 1);
            assert_eq!(ent.named_prop_defs(&tname("py")).len(), 1);
            assert_eq!(ent.named_child_defs(&tname("cz")).len(), 1);
        }
    }

    #[test]
    fn applicable_prop_def_prefers_exact_match() {
        let t = NodeTypeDef::new(tname("t"))
            .with_prop(PropDef::new(
                tname("t"),
                tname("p"),
                ValueType::Undefined,
                false,
            ))
            .with_prop(PropDef::new(
                tname("t"),
                tname("p"),
                ValueType::String,
                false,
            ));
        let registry = registry_with(vec![t]);
        let ent = registry.effective(&tname("t")).unwrap();

        let d = ent
            .applicable_prop_def(&tname("p"), ValueType::String, false)
            .unwrap();
        assert_eq!(d.required_type, ValueType::String);

        // LONG only matches the untyped definition.
        let d = ent
            .applicable_prop_def(&tname("p"), ValueType::Long, false)
            .unwrap();
        assert_eq!(d.required_type, ValueType::Undefined);

        // Wrong cardinality with no multi def still resolves to the best
        // single-valued def.
        let d = ent
            .applicable_prop_def(&tname("p"), ValueType::String, true)
            .unwrap();
        assert_eq!(d.required_type, ValueType::String);
    }

    #[test]
    fn residual_defs_apply_to_unknown_names() {
        let registry = NodeTypeRegistry::new();
        let ent = registry.effective(&NT_UNSTRUCTURED).unwrap();
        // nt:unstructured carries residual property and child defs.
        ent.applicable_prop_def(&tname("anything"), ValueType::Long, false)
            .unwrap();
        let d = ent
            .applicable_child_def(&tname("anychild"), None, &registry)
            .unwrap();
        assert_eq!(d.default_primary_type.as_ref(), Some(&*NT_UNSTRUCTURED));
    }

    #[test]
    fn check_add_and_remove() {
        let t = NodeTypeDef::new(tname("t"))
            .with_prop(
                PropDef::new(tname("t"), tname("prot"), ValueType::String, false).protected(),
            )
            .with_child(
                ChildNodeDef::new(tname("t"), tname("fixed"))
                    .default_type(NT_UNSTRUCTURED.clone())
                    .mandatory(),
            )
            .with_child(
                ChildNodeDef::new(tname("t"), tname("open"))
                    .default_type(NT_UNSTRUCTURED.clone()),
            );
        let registry = registry_with(vec![t]);
        let ent = registry.effective(&tname("t")).unwrap();

        ent.check_add_node(&tname("open"), None, &registry).unwrap();
        ent.check_add_node(&tname("open"), Some(&NT_UNSTRUCTURED), &registry)
            .unwrap();
        assert!(
            ent.check_add_node(&tname("missing"), None, &registry)
                .is_err()
        );

        assert!(ent.check_remove_item(&tname("fixed")).is_err());
        assert!(ent.check_remove_item(&tname("prot")).is_err());
        ent.check_remove_item(&tname("open")).unwrap();
    }

    #[test]
    fn required_primary_types_gate_child_defs() {
        let nt_file = Name::new(NS_NT_URI, "file");
        let file_def = NodeTypeDef::new(nt_file.clone()).supertypes(vec![NT_BASE.clone()]);
        let t = NodeTypeDef::new(tname("t")).with_child(
            ChildNodeDef::new(tname("t"), tname("c")).required_types(vec![nt_file.clone()]),
        );
        let registry = registry_with(vec![file_def, t]);
        let ent = registry.effective(&tname("t")).unwrap();

        ent.applicable_child_def(&tname("c"), Some(&nt_file), &registry)
            .unwrap();
        assert!(
            ent.applicable_child_def(&tname("c"), Some(&NT_UNSTRUCTURED), &registry)
                .is_err()
        );
    }
}
