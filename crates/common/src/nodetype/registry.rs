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

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::error::StateError;
use crate::names::{
    JCR_CREATED, JCR_FROZEN_MIXIN_TYPES, JCR_FROZEN_NODE, JCR_FROZEN_PRIMARY_TYPE, JCR_FROZEN_UUID,
    JCR_MIXIN_TYPES, JCR_PREDECESSORS, JCR_PRIMARY_TYPE, JCR_ROOT_VERSION, JCR_SUCCESSORS,
    JCR_SYSTEM, JCR_UUID, JCR_VERSION_LABELS, JCR_VERSION_STORAGE, JCR_VERSIONABLE_UUID,
    MIX_REFERENCEABLE, NT_BASE, NT_FROZEN_NODE, NT_UNSTRUCTURED, NT_VERSION, NT_VERSION_HISTORY,
    NT_VERSION_LABELS, Name, REP_ROOT, REP_SYSTEM, REP_VERSION_STORAGE,
};
use crate::nodetype::effective::EffectiveNodeType;
use crate::nodetype::{ChildNodeDef, NodeTypeDef, OnParentVersion, PropDef};
use crate::value::{Value, ValueType};

/// The process-wide registry of node-type definitions.
///
/// Registration validates a definition by resolving its effective type, so
/// every `Conflict` surfaces here and never on a read path. Effective types
/// are cached; re-registration rebuilds all transitive dependents via the
/// declaring-type index and drops their cache entries.
pub struct NodeTypeRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    defs: IndexMap<Name, NodeTypeDef, RandomState>,
    ent_cache: HashMap<Name, Arc<EffectiveNodeType>, RandomState>,
    /// type name → names of types that directly list it as a supertype.
    dependents: HashMap<Name, IndexSet<Name, RandomState>, RandomState>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry {
    /// A registry pre-loaded with the built-in types every repository
    /// carries.
    pub fn new() -> Self {
        let registry = Self {
            inner: RwLock::new(Inner {
                defs: IndexMap::default(),
                ent_cache: HashMap::default(),
                dependents: HashMap::default(),
            }),
        };
        for def in builtin_types() {
            registry
                .register(def)
                .expect("built-in node types are consistent");
        }
        registry
    }

    /// Register a new node type. Fails with `Conflict` if the name is taken,
    /// a referenced type is unknown, or the effective type cannot be
    /// resolved.
    pub fn register(&self, def: NodeTypeDef) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        if inner.defs.contains_key(&def.name) {
            return Err(StateError::Conflict(format!(
                "node type {} is already registered",
                def.name,
            )));
        }
        inner.check_references(&def)?;

        // Validate by resolving, in a scratch copy of the def table.
        inner.defs.insert(def.name.clone(), def.clone());
        let resolved = inner.resolve(&def.name, &mut IndexSet::default());
        match resolved {
            Ok(ent) => {
                inner.ent_cache.insert(def.name.clone(), ent);
                for st in &def.supertypes {
                    inner
                        .dependents
                        .entry(st.clone())
                        .or_default()
                        .insert(def.name.clone());
                }
                Ok(())
            }
            Err(e) => {
                inner.defs.shift_remove(&def.name);
                Err(e)
            }
        }
    }

    /// Replace an existing definition. All transitive dependents are
    /// re-resolved; if any fails, the old definition is restored and the
    /// error surfaced.
    pub fn reregister(&self, def: NodeTypeDef) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        let Some(old) = inner.defs.get(&def.name).cloned() else {
            return Err(StateError::Conflict(format!(
                "node type {} is not registered",
                def.name,
            )));
        };
        inner.check_references(&def)?;

        let affected = inner.transitive_dependents(&def.name);
        inner.defs.insert(def.name.clone(), def.clone());
        for name in &affected {
            inner.ent_cache.remove(name);
        }

        for name in &affected {
            if let Err(e) = inner.resolve(name, &mut IndexSet::default()) {
                // Roll back and rebuild the dependents' old cache entries
                // lazily.
                inner.defs.insert(def.name.clone(), old);
                for name in &affected {
                    inner.ent_cache.remove(name);
                }
                return Err(e);
            }
        }

        for st in &old.supertypes {
            if let Some(deps) = inner.dependents.get_mut(st) {
                deps.shift_remove(&def.name);
            }
        }
        for st in &def.supertypes {
            inner
                .dependents
                .entry(st.clone())
                .or_default()
                .insert(def.name.clone());
        }
        debug!(name = %def.name, dependents = affected.len(), "re-registered node type");
        Ok(())
    }

    pub fn is_registered(&self, name: &Name) -> bool {
        self.inner.read().unwrap().defs.contains_key(name)
    }

    pub fn get(&self, name: &Name) -> Option<NodeTypeDef> {
        self.inner.read().unwrap().defs.get(name).cloned()
    }

    pub fn registered_names(&self) -> Vec<Name> {
        self.inner.read().unwrap().defs.keys().cloned().collect()
    }

    /// The effective type of a single registered node type.
    pub fn effective(&self, name: &Name) -> Result<Arc<EffectiveNodeType>, StateError> {
        {
            let inner = self.inner.read().unwrap();
            if let Some(ent) = inner.ent_cache.get(name) {
                return Ok(ent.clone());
            }
        }
        let mut inner = self.inner.write().unwrap();
        inner.resolve(name, &mut IndexSet::default())
    }

    /// The effective type of a primary type plus a mixin set, built by
    /// aggregation merge. Order independent.
    pub fn effective_of(
        &self,
        primary: &Name,
        mixins: &[Name],
    ) -> Result<Arc<EffectiveNodeType>, StateError> {
        let mut ent = (*self.effective(primary)?).clone();
        for mixin in mixins {
            ent = ent.merge(&*self.effective(mixin)?)?;
        }
        Ok(Arc::new(ent))
    }

    /// Validate a value list against a property definition: cardinality,
    /// type, and declared value constraints.
    pub fn validate_values(&self, def: &PropDef, values: &[Value]) -> Result<(), StateError> {
        if !def.multiple && values.len() > 1 {
            return Err(StateError::ConstraintViolation(format!(
                "{} is single-valued but {} values were supplied",
                def.name,
                values.len(),
            )));
        }
        for v in values {
            if def.required_type != ValueType::Undefined && v.value_type() != def.required_type {
                return Err(StateError::ConstraintViolation(format!(
                    "{} requires {} but value is {}",
                    def.name,
                    def.required_type,
                    v.value_type(),
                )));
            }
            check_constraints(def, v)?;
        }
        Ok(())
    }
}

/// Declared value constraints. Textual types match against the constraint
/// set literally; numeric types accept interval constraints of the form
/// `[low,high]` / `(low,high)` with either bound optional. REFERENCE
/// constraints name required target types and are not checkable without
/// state access, so they pass here.
fn check_constraints(def: &PropDef, value: &Value) -> Result<(), StateError> {
    if def.value_constraints.is_empty() {
        return Ok(());
    }
    let fail = || {
        Err(StateError::ConstraintViolation(format!(
            "value of {} violates constraints {:?}",
            def.name, def.value_constraints,
        )))
    };
    match value {
        Value::String(s) | Value::Path(s) | Value::Date(s) => {
            if def.value_constraints.iter().any(|c| c == s) {
                Ok(())
            } else {
                fail()
            }
        }
        Value::Name(n) => {
            let rendered = n.to_string();
            if def.value_constraints.iter().any(|c| *c == rendered) {
                Ok(())
            } else {
                fail()
            }
        }
        Value::Boolean(b) => {
            if def.value_constraints.iter().any(|c| c == &b.to_string()) {
                Ok(())
            } else {
                fail()
            }
        }
        Value::Long(v) => {
            if def
                .value_constraints
                .iter()
                .any(|c| interval_contains(c, *v as f64))
            {
                Ok(())
            } else {
                fail()
            }
        }
        Value::Double(v) => {
            if def
                .value_constraints
                .iter()
                .any(|c| interval_contains(c, *v))
            {
                Ok(())
            } else {
                fail()
            }
        }
        Value::Reference(_) | Value::Binary(_) => Ok(()),
    }
}

fn interval_contains(constraint: &str, v: f64) -> bool {
    let c = constraint.trim();
    let Some(first) = c.chars().next() else {
        return false;
    };
    let Some(last) = c.chars().last() else {
        return false;
    };
    let low_inclusive = match first {
        '[' => true,
        '(' => false,
        _ => return false,
    };
    let high_inclusive = match last {
        ']' => true,
        ')' => false,
        _ => return false,
    };
    let body = &c[1..c.len() - 1];
    let Some((low, high)) = body.split_once(',') else {
        return false;
    };
    let low = low.trim();
    let high = high.trim();
    if !low.is_empty() {
        let Ok(low) = low.parse::<f64>() else {
            return false;
        };
        if v < low || (!low_inclusive && v == low) {
            return false;
        }
    }
    if !high.is_empty() {
        let Ok(high) = high.parse::<f64>() else {
            return false;
        };
        if v > high || (!high_inclusive && v == high) {
            return false;
        }
    }
    true
}

impl Inner {
    /// Referenced types (supertypes, required/default child types) must be
    /// registered (or be the definition itself).
    fn check_references(&self, def: &NodeTypeDef) -> Result<(), StateError> {
        let known = |n: &Name| *n == def.name || self.defs.contains_key(n);
        for st in &def.supertypes {
            if *st == def.name {
                return Err(StateError::Conflict(format!(
                    "node type {} lists itself as a supertype",
                    def.name,
                )));
            }
            if !known(st) {
                return Err(StateError::Conflict(format!(
                    "{}: unknown supertype {st}",
                    def.name,
                )));
            }
        }
        for cnd in &def.child_node_defs {
            for rt in &cnd.required_primary_types {
                if !known(rt) {
                    return Err(StateError::Conflict(format!(
                        "{}: unknown required primary type {rt}",
                        def.name,
                    )));
                }
            }
            if let Some(dt) = &cnd.default_primary_type
                && !known(dt)
            {
                return Err(StateError::Conflict(format!(
                    "{}: unknown default primary type {dt}",
                    def.name,
                )));
            }
        }
        Ok(())
    }

    /// Resolve (and cache) the effective type of `name`, recursing through
    /// supertypes. `visiting` detects inheritance cycles.
    fn resolve(
        &mut self,
        name: &Name,
        visiting: &mut IndexSet<Name, RandomState>,
    ) -> Result<Arc<EffectiveNodeType>, StateError> {
        if let Some(ent) = self.ent_cache.get(name) {
            return Ok(ent.clone());
        }
        if !visiting.insert(name.clone()) {
            return Err(StateError::Conflict(format!(
                "inheritance cycle through {name}",
            )));
        }
        let Some(def) = self.defs.get(name).cloned() else {
            visiting.shift_remove(name);
            return Err(StateError::Conflict(format!("unknown node type {name}")));
        };
        let mut supers = Vec::with_capacity(def.supertypes.len());
        for st in &def.supertypes {
            supers.push(self.resolve(st, visiting)?);
        }
        visiting.shift_remove(name);
        let ent = Arc::new(EffectiveNodeType::from_def(&def, &supers)?);
        self.ent_cache.insert(name.clone(), ent.clone());
        Ok(ent)
    }

    /// The type itself plus everything that transitively inherits from it,
    /// in dependency order.
    fn transitive_dependents(&self, name: &Name) -> Vec<Name> {
        let mut out: IndexSet<Name, RandomState> = IndexSet::default();
        let mut queue = vec![name.clone()];
        while let Some(n) = queue.pop() {
            if !out.insert(n.clone()) {
                continue;
            }
            if let Some(deps) = self.dependents.get(&n) {
                queue.extend(deps.iter().cloned());
            }
        }
        out.into_iter().collect()
    }
}

/// The built-in bootstrap vocabulary: the base and unstructured types, the
/// referenceable mixin, and the version-storage types.
fn builtin_types() -> Vec<NodeTypeDef> {
    let nt_base = NodeTypeDef::new(NT_BASE.clone())
        .with_prop(
            PropDef::new(
                NT_BASE.clone(),
                JCR_PRIMARY_TYPE.clone(),
                ValueType::Name,
                false,
            )
            .auto_created()
            .mandatory()
            .protected()
            .on_parent_version(OnParentVersion::Compute),
        )
        .with_prop(
            PropDef::new(
                NT_BASE.clone(),
                JCR_MIXIN_TYPES.clone(),
                ValueType::Name,
                true,
            )
            .protected()
            .on_parent_version(OnParentVersion::Compute),
        );

    let nt_unstructured = NodeTypeDef::new(NT_UNSTRUCTURED.clone())
        .supertypes(vec![NT_BASE.clone()])
        .orderable()
        .with_child(
            ChildNodeDef::new(NT_UNSTRUCTURED.clone(), Name::residual())
                .default_type(NT_UNSTRUCTURED.clone())
                .same_name_siblings()
                .on_parent_version(OnParentVersion::Version),
        )
        .with_prop(PropDef::new(
            NT_UNSTRUCTURED.clone(),
            Name::residual(),
            ValueType::Undefined,
            false,
        ))
        .with_prop(PropDef::new(
            NT_UNSTRUCTURED.clone(),
            Name::residual(),
            ValueType::Undefined,
            true,
        ));

    let mix_referenceable = NodeTypeDef::new(MIX_REFERENCEABLE.clone())
        .mixin()
        .with_prop(
            PropDef::new(
                MIX_REFERENCEABLE.clone(),
                JCR_UUID.clone(),
                ValueType::String,
                false,
            )
            .auto_created()
            .mandatory()
            .protected()
            .on_parent_version(OnParentVersion::Initialize),
        );

    let nt_frozen_node = NodeTypeDef::new(NT_FROZEN_NODE.clone())
        .supertypes(vec![NT_BASE.clone()])
        .orderable()
        .with_prop(
            PropDef::new(
                NT_FROZEN_NODE.clone(),
                JCR_FROZEN_PRIMARY_TYPE.clone(),
                ValueType::Name,
                false,
            )
            .auto_created()
            .mandatory()
            .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_FROZEN_NODE.clone(),
                JCR_FROZEN_MIXIN_TYPES.clone(),
                ValueType::Name,
                true,
            )
            .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_FROZEN_NODE.clone(),
                JCR_FROZEN_UUID.clone(),
                ValueType::String,
                false,
            )
            .auto_created()
            .mandatory()
            .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_FROZEN_NODE.clone(),
                Name::residual(),
                ValueType::Undefined,
                false,
            )
            .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_FROZEN_NODE.clone(),
                Name::residual(),
                ValueType::Undefined,
                true,
            )
            .protected(),
        )
        .with_child(
            ChildNodeDef::new(NT_FROZEN_NODE.clone(), Name::residual())
                .same_name_siblings()
                .protected(),
        );

    let nt_version_labels = NodeTypeDef::new(NT_VERSION_LABELS.clone())
        .supertypes(vec![NT_BASE.clone()])
        .with_prop(
            PropDef::new(
                NT_VERSION_LABELS.clone(),
                Name::residual(),
                ValueType::Reference,
                false,
            )
            .protected(),
        );

    let nt_version = NodeTypeDef::new(NT_VERSION.clone())
        .supertypes(vec![NT_BASE.clone(), MIX_REFERENCEABLE.clone()])
        .with_prop(
            PropDef::new(NT_VERSION.clone(), JCR_CREATED.clone(), ValueType::Date, false)
                .auto_created()
                .mandatory()
                .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_VERSION.clone(),
                JCR_PREDECESSORS.clone(),
                ValueType::Reference,
                true,
            )
            .protected(),
        )
        .with_prop(
            PropDef::new(
                NT_VERSION.clone(),
                JCR_SUCCESSORS.clone(),
                ValueType::Reference,
                true,
            )
            .protected(),
        )
        .with_child(
            ChildNodeDef::new(NT_VERSION.clone(), JCR_FROZEN_NODE.clone())
                .required_types(vec![NT_FROZEN_NODE.clone()])
                .protected(),
        );

    let nt_version_history = NodeTypeDef::new(NT_VERSION_HISTORY.clone())
        .supertypes(vec![NT_BASE.clone(), MIX_REFERENCEABLE.clone()])
        .with_prop(
            PropDef::new(
                NT_VERSION_HISTORY.clone(),
                JCR_VERSIONABLE_UUID.clone(),
                ValueType::String,
                false,
            )
            .auto_created()
            .mandatory()
            .protected(),
        )
        .with_child(
            ChildNodeDef::new(NT_VERSION_HISTORY.clone(), JCR_ROOT_VERSION.clone())
                .required_types(vec![NT_VERSION.clone()])
                .default_type(NT_VERSION.clone())
                .auto_created()
                .mandatory()
                .protected(),
        )
        .with_child(
            ChildNodeDef::new(NT_VERSION_HISTORY.clone(), JCR_VERSION_LABELS.clone())
                .required_types(vec![NT_VERSION_LABELS.clone()])
                .default_type(NT_VERSION_LABELS.clone())
                .auto_created()
                .mandatory()
                .protected(),
        )
        .with_child(
            ChildNodeDef::new(NT_VERSION_HISTORY.clone(), Name::residual())
                .required_types(vec![NT_VERSION.clone()])
                .default_type(NT_VERSION.clone())
                .protected(),
        );

    let rep_version_storage = NodeTypeDef::new(REP_VERSION_STORAGE.clone())
        .supertypes(vec![NT_BASE.clone()])
        .with_child(
            ChildNodeDef::new(REP_VERSION_STORAGE.clone(), Name::residual())
                .default_type(REP_VERSION_STORAGE.clone())
                .protected(),
        );

    let rep_system = NodeTypeDef::new(REP_SYSTEM.clone())
        .supertypes(vec![NT_BASE.clone()])
        .with_child(
            ChildNodeDef::new(REP_SYSTEM.clone(), JCR_VERSION_STORAGE.clone())
                .required_types(vec![REP_VERSION_STORAGE.clone()])
                .default_type(REP_VERSION_STORAGE.clone())
                .mandatory()
                .protected(),
        )
        .with_child(
            ChildNodeDef::new(REP_SYSTEM.clone(), Name::residual())
                .default_type(NT_UNSTRUCTURED.clone()),
        );

    let rep_root = NodeTypeDef::new(REP_ROOT.clone())
        .supertypes(vec![NT_UNSTRUCTURED.clone()])
        .with_child(
            ChildNodeDef::new(REP_ROOT.clone(), JCR_SYSTEM.clone())
                .required_types(vec![REP_SYSTEM.clone()])
                .default_type(REP_SYSTEM.clone())
                .mandatory(),
        );

    vec![
        nt_base,
        nt_unstructured,
        mix_referenceable,
        nt_frozen_node,
        nt_version_labels,
        nt_version,
        nt_version_history,
        rep_version_storage,
        rep_system,
        rep_root,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tname(local: &str) -> Name {
        Name::new("test", local)
    }

    #[test]
    fn builtins_resolve() {
        let registry = NodeTypeRegistry::new();
        for name in registry.registered_names() {
            registry.effective(&name).unwrap();
        }
        let ent = registry.effective(&NT_VERSION_HISTORY).unwrap();
        assert!(ent.includes(&MIX_REFERENCEABLE));
        assert!(ent.includes(&NT_BASE));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = NodeTypeRegistry::new();
        registry
            .register(NodeTypeDef::new(tname("t")))
            .unwrap();
        assert!(matches!(
            registry.register(NodeTypeDef::new(tname("t"))),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn unknown_supertype_rejected() {
        let registry = NodeTypeRegistry::new();
        let def = NodeTypeDef::new(tname("t")).supertypes(vec![tname("ghost")]);
        assert!(matches!(
            registry.register(def),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn inheritance_cycle_detected() {
        let registry = NodeTypeRegistry::new();
        registry.register(NodeTypeDef::new(tname("a"))).unwrap();
        registry
            .register(NodeTypeDef::new(tname("b")).supertypes(vec![tname("a")]))
            .unwrap();
        // Re-register a with supertype b, closing the loop.
        let err = registry
            .reregister(NodeTypeDef::new(tname("a")).supertypes(vec![tname("b")]))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        // The failed re-registration must not have clobbered the old def.
        assert!(registry.get(&tname("a")).unwrap().supertypes.is_empty());
        registry.effective(&tname("b")).unwrap();
    }

    #[test]
    fn reregistration_rebuilds_dependents() {
        let registry = NodeTypeRegistry::new();
        registry.register(NodeTypeDef::new(tname("a"))).unwrap();
        registry
            .register(NodeTypeDef::new(tname("b")).supertypes(vec![tname("a")]))
            .unwrap();

        let before = registry.effective(&tname("b")).unwrap();
        assert!(before.named_prop_defs(&tname("p")).is_empty());

        registry
            .reregister(NodeTypeDef::new(tname("a")).with_prop(PropDef::new(
                tname("a"),
                tname("p"),
                ValueType::String,
                false,
            )))
            .unwrap();
        let after = registry.effective(&tname("b")).unwrap();
        assert_eq!(after.named_prop_defs(&tname("p")).len(), 1);
    }

    #[test]
    fn reregistration_conflict_rolls_back() {
        let registry = NodeTypeRegistry::new();
        registry
            .register(NodeTypeDef::new(tname("a")).with_prop(PropDef::new(
                tname("a"),
                tname("p"),
                ValueType::String,
                false,
            )))
            .unwrap();
        registry
            .register(
                NodeTypeDef::new(tname("b"))
                    .supertypes(vec![tname("a")])
                    .with_prop(PropDef::new(
                        tname("b"),
                        tname("q"),
                        ValueType::String,
                        false,
                    )),
            )
            .unwrap();

        // Changing a's property to collide with b's q (same name, type and
        // cardinality) must fail re-resolution of the dependent b.
        let bad = NodeTypeDef::new(tname("a")).with_prop(PropDef::new(
            tname("a"),
            tname("q"),
            ValueType::String,
            false,
        ));
        assert!(matches!(
            registry.reregister(bad),
            Err(StateError::Conflict(_))
        ));
        // Old definition restored.
        let ent = registry.effective(&tname("b")).unwrap();
        assert_eq!(ent.named_prop_defs(&tname("p")).len(), 1);
        assert_eq!(ent.named_prop_defs(&tname("q")).len(), 1);
    }

    #[test]
    fn value_constraint_checks() {
        let registry = NodeTypeRegistry::new();
        let string_def = PropDef::new(tname("t"), tname("color"), ValueType::String, false)
            .constraints(vec!["red".into(), "green".into()]);
        registry
            .validate_values(&string_def, &[Value::String("red".into())])
            .unwrap();
        assert!(
            registry
                .validate_values(&string_def, &[Value::String("blue".into())])
                .is_err()
        );

        let long_def = PropDef::new(tname("t"), tname("n"), ValueType::Long, false)
            .constraints(vec!["[0,100)".into()]);
        registry
            .validate_values(&long_def, &[Value::Long(0)])
            .unwrap();
        registry
            .validate_values(&long_def, &[Value::Long(99)])
            .unwrap();
        assert!(registry.validate_values(&long_def, &[Value::Long(100)]).is_err());
        assert!(registry.validate_values(&long_def, &[Value::Long(-1)]).is_err());

        // Cardinality.
        assert!(
            registry
                .validate_values(
                    &PropDef::new(tname("t"), tname("s"), ValueType::Long, false),
                    &[Value::Long(1), Value::Long(2)],
                )
                .is_err()
        );
        // Type mismatch.
        assert!(
            registry
                .validate_values(
                    &PropDef::new(tname("t"), tname("s"), ValueType::Long, false),
                    &[Value::String("1".into())],
                )
                .is_err()
        );
    }
}
