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

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use lazy_static::lazy_static;

/// Namespace URI for built-in repository item names (`jcr:` prefix).
pub const NS_JCR_URI: &str = "http://www.jcp.org/jcr/1.0";
/// Namespace URI for built-in primary node types (`nt:` prefix).
pub const NS_NT_URI: &str = "http://www.jcp.org/jcr/nt/1.0";
/// Namespace URI for built-in mixin node types (`mix:` prefix).
pub const NS_MIX_URI: &str = "http://www.jcp.org/jcr/mix/1.0";
/// Namespace URI for repository-internal implementation types.
pub const NS_REP_URI: &str = "internal";

/// A qualified item name: `(namespace-uri, local-name)`, compared and hashed
/// by value. Cheap to clone; both halves are shared strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    ns: Arc<str>,
    local: Arc<str>,
}

impl Name {
    pub fn new(ns: &str, local: &str) -> Self {
        Self {
            ns: Arc::from(ns),
            local: Arc::from(local),
        }
    }

    /// The residual ("match any") item-definition name, spelled `*`.
    pub fn residual() -> Self {
        RESIDUAL.clone()
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn is_residual(&self) -> bool {
        self.ns.is_empty() && &*self.local == "*"
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

impl Debug for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name({self})")
    }
}

macro_rules! jcr_names {
    ($($ident:ident => ($ns:expr, $local:expr)),+ $(,)?) => {
        lazy_static! {
            $(pub static ref $ident: Name = Name::new($ns, $local);)+
        }
    };
}

jcr_names! {
    RESIDUAL => ("", "*"),

    JCR_PRIMARY_TYPE => (NS_JCR_URI, "primaryType"),
    JCR_MIXIN_TYPES => (NS_JCR_URI, "mixinTypes"),
    JCR_UUID => (NS_JCR_URI, "uuid"),
    JCR_SYSTEM => (NS_JCR_URI, "system"),
    JCR_VERSION_STORAGE => (NS_JCR_URI, "versionStorage"),
    JCR_ROOT_VERSION => (NS_JCR_URI, "rootVersion"),
    JCR_VERSION_LABELS => (NS_JCR_URI, "versionLabels"),
    JCR_FROZEN_NODE => (NS_JCR_URI, "frozenNode"),
    JCR_FROZEN_PRIMARY_TYPE => (NS_JCR_URI, "frozenPrimaryType"),
    JCR_FROZEN_MIXIN_TYPES => (NS_JCR_URI, "frozenMixinTypes"),
    JCR_FROZEN_UUID => (NS_JCR_URI, "frozenUuid"),
    JCR_VERSIONABLE_UUID => (NS_JCR_URI, "versionableUuid"),
    JCR_PREDECESSORS => (NS_JCR_URI, "predecessors"),
    JCR_SUCCESSORS => (NS_JCR_URI, "successors"),
    JCR_CREATED => (NS_JCR_URI, "created"),

    NT_BASE => (NS_NT_URI, "base"),
    NT_UNSTRUCTURED => (NS_NT_URI, "unstructured"),
    NT_VERSION => (NS_NT_URI, "version"),
    NT_VERSION_HISTORY => (NS_NT_URI, "versionHistory"),
    NT_VERSION_LABELS => (NS_NT_URI, "versionLabels"),
    NT_FROZEN_NODE => (NS_NT_URI, "frozenNode"),

    MIX_REFERENCEABLE => (NS_MIX_URI, "referenceable"),

    REP_ROOT => (NS_REP_URI, "root"),
    REP_SYSTEM => (NS_REP_URI, "system"),
    REP_VERSION_STORAGE => (NS_REP_URI, "versionStorage"),
}
