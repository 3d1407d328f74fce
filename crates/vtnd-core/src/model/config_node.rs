// ── Configuration key-value nodes ──
//
// A `ConfigKeyVal` is one configuration object instance, or a query
// pattern over a set of instances when its key is shorter than the key
// type's full depth. Multi-value results are plain `Vec<ConfigKeyVal>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::key_type::KeyType;

// ── ConfigKey ───────────────────────────────────────────────────────

/// Structured key: the names of every ancestor followed by the object's
/// own name, e.g. `["vtn1", "vbr1", "if1"]` for a bridge interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigKey(Vec<String>);

impl ConfigKey {
    /// The empty key, addressing the universal root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Key of a direct child named `name`.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        parts.push(name.into());
        Self(parts)
    }

    /// Key of the containing object, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// The object's own name (last component).
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Whether `self` lies at or below `prefix`.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Replace the leaf name, keeping all ancestors.
    pub fn renamed(&self, new_leaf: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        if let Some(last) = parts.last_mut() {
            *last = new_leaf.into();
        }
        Self(parts)
    }

    /// Move `self` from under `from` to under `to`, keeping the suffix.
    /// `None` if `self` is not at or below `from`.
    pub fn rebased(&self, from: &Self, to: &Self) -> Option<Self> {
        let suffix = self.0.strip_prefix(from.0.as_slice())?;
        let mut parts = to.0.clone();
        parts.extend_from_slice(suffix);
        Some(Self(parts))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        write!(f, "{}", self.0.join("/"))
    }
}

// ── CtrlrDomain ─────────────────────────────────────────────────────

/// Controller and domain an object instance is realized on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CtrlrDomain {
    pub ctrlr: String,
    pub domain: String,
}

impl CtrlrDomain {
    /// Domain assumed when a controller does not report one.
    pub const DEFAULT_DOMAIN: &'static str = "(DEFAULT)";

    pub fn new(ctrlr: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            ctrlr: ctrlr.into(),
            domain: domain.into(),
        }
    }

    pub fn default_domain(ctrlr: impl Into<String>) -> Self {
        Self::new(ctrlr, Self::DEFAULT_DOMAIN)
    }
}

impl fmt::Display for CtrlrDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ctrlr, self.domain)
    }
}

// ── ConfigKeyVal ────────────────────────────────────────────────────

/// One configuration object instance or query pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigKeyVal {
    pub key_type: KeyType,
    pub key: ConfigKey,
    /// Attribute payloads; opaque to the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<serde_json::Value>,
    /// Per-controller placement, when the object is bound to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<CtrlrDomain>,
}

impl ConfigKeyVal {
    pub fn new(key_type: KeyType, key: ConfigKey) -> Self {
        Self {
            key_type,
            key,
            values: Vec::new(),
            user_data: None,
        }
    }

    /// The universal root node, used as the starting point of whole-tree reads.
    pub fn root() -> Self {
        Self::new(KeyType::Root, ConfigKey::root())
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.values.push(value);
        self
    }

    pub fn with_user_data(mut self, user_data: CtrlrDomain) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn is_root(&self) -> bool {
        self.key_type == KeyType::Root
    }

    /// Owning VTN name for VTN-scoped objects.
    pub fn vtn_name(&self) -> Option<&str> {
        if self.key_type.is_vtn_scoped() {
            self.key.parts().first().map(String::as_str)
        } else {
            None
        }
    }

    /// Controller this object is bound to, if any.
    pub fn ctrlr(&self) -> Option<&str> {
        self.user_data.as_ref().map(|ud| ud.ctrlr.as_str())
    }
}

impl fmt::Display for ConfigKeyVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.key_type, self.key)
    }
}
