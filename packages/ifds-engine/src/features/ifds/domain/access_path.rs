//! Access paths
//!
//! A symbolic storage location: a base (local, `this`, formal argument or
//! static field) followed by field/element accessors. Paths are the unit every
//! dataflow fact is keyed on, and `limit(k)` keeps their number finite.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Div;

use crate::shared::models::FieldRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathBase {
    Local(String),
    This,
    Argument(u32),
    Static(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessor {
    Field(FieldRef),
    /// Any array element
    Element,
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Field(field) => write!(f, ".{}", field.name),
            Accessor::Element => write!(f, "[*]"),
        }
    }
}

/// Immutable symbolic location; equality is structural
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPath {
    base: PathBase,
    accessors: Vec<Accessor>,
}

impl AccessPath {
    pub fn new(base: PathBase, accessors: Vec<Accessor>) -> Self {
        Self { base, accessors }
    }

    pub fn from_local(name: impl Into<String>) -> Self {
        Self::new(PathBase::Local(name.into()), Vec::new())
    }

    pub fn from_this() -> Self {
        Self::new(PathBase::This, Vec::new())
    }

    pub fn from_argument(index: u32) -> Self {
        Self::new(PathBase::Argument(index), Vec::new())
    }

    pub fn from_static_field(field: FieldRef) -> Self {
        Self::new(PathBase::Static(field), Vec::new())
    }

    /// `base` followed by `extra` accessors
    pub fn from_other(base: &AccessPath, extra: impl IntoIterator<Item = Accessor>) -> Self {
        base.extend(extra)
    }

    pub fn base(&self) -> &PathBase {
        &self.base
    }

    pub fn accessors(&self) -> &[Accessor] {
        &self.accessors
    }

    /// Copy with `suffix` appended
    pub fn extend(&self, suffix: impl IntoIterator<Item = Accessor>) -> Self {
        let mut accessors = self.accessors.clone();
        accessors.extend(suffix);
        Self::new(self.base.clone(), accessors)
    }

    /// Non-strict prefix test: same base and `other`'s accessors lead ours
    pub fn starts_with(&self, other: &AccessPath) -> bool {
        self.base == other.base && self.accessors.starts_with(&other.accessors)
    }

    /// Like [`AccessPath::starts_with`] but false for a missing path
    pub fn starts_with_opt(&self, other: Option<&AccessPath>) -> bool {
        other.is_some_and(|o| self.starts_with(o))
    }

    /// Accessor suffix that leads from `other` to `self`
    pub fn minus(&self, other: &AccessPath) -> Option<Vec<Accessor>> {
        if self.starts_with(other) {
            Some(self.accessors[other.accessors.len()..].to_vec())
        } else {
            None
        }
    }

    /// Truncate the accessor chain to at most `k` entries
    pub fn limit(&self, k: usize) -> Self {
        if self.accessors.len() <= k {
            return self.clone();
        }
        Self::new(self.base.clone(), self.accessors[..k].to_vec())
    }

    pub fn is_static(&self) -> bool {
        matches!(self.base, PathBase::Static(_))
    }

    /// Statics and any path through a field or element live on the heap
    pub fn is_on_heap(&self) -> bool {
        self.is_static() || !self.accessors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

impl Div<&[Accessor]> for &AccessPath {
    type Output = AccessPath;

    fn div(self, suffix: &[Accessor]) -> AccessPath {
        self.extend(suffix.iter().cloned())
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            PathBase::Local(name) => write!(f, "{}", name)?,
            PathBase::This => write!(f, "this")?,
            PathBase::Argument(index) => write!(f, "arg{}", index)?,
            PathBase::Static(field) => write!(f, "{}", field)?,
        }
        for accessor in &self.accessors {
            write!(f, "{}", accessor)?;
        }
        Ok(())
    }
}
