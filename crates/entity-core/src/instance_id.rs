//! Canonical entity instance identifiers: `@<name>@<key>`.
//!
//! The leading `@` doubles as a reserved prefix: any orchestration instance
//! id starting with `@` belongs to an entity and must never be surfaced to
//! orchestration-level queries (see [`InstanceId::is_entity_id`]).

use std::fmt;

use thiserror::Error;

/// Errors raised while parsing or constructing an [`InstanceId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceIdError {
    /// The string did not start with `@`.
    #[error("instance id {raw:?} must start with '@'")]
    MissingLeadingSigil { raw: String },

    /// The string had no second `@` separating name from key.
    #[error("instance id {raw:?} has no second '@' separating name from key")]
    MissingSeparator { raw: String },

    /// The name portion was empty.
    #[error("instance id {raw:?} has an empty name")]
    EmptyName { raw: String },

    /// The key portion was empty.
    #[error("instance id {raw:?} has an empty key")]
    EmptyKey { raw: String },

    /// The name contained a literal `@`, which is reserved as a separator.
    #[error("entity name {name:?} must not contain '@'")]
    NameContainsSigil { name: String },
}

/// Canonical identifier for an entity: a case-folded `name` and a
/// case-preserving `key`.
///
/// Equality and hashing are defined over `(name.to_lowercase(), key)` —
/// constructing two `InstanceId`s that differ only in the case of `name`
/// yields identifiers that compare equal and canonicalize to the same
/// wire string.
#[derive(Debug, Clone)]
pub struct InstanceId {
    name: String,
    key: String,
}

impl InstanceId {
    /// Construct an `InstanceId`, lower-casing `name` for storage.
    ///
    /// Rejects an empty `name`, an empty `key`, or a `name` containing `@`.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Result<Self, InstanceIdError> {
        let name = name.into();
        let key = key.into();

        if name.is_empty() {
            return Err(InstanceIdError::EmptyName { raw: format!("@{name}@{key}") });
        }
        if key.is_empty() {
            return Err(InstanceIdError::EmptyKey { raw: format!("@{name}@{key}") });
        }
        if name.contains('@') {
            return Err(InstanceIdError::NameContainsSigil { name });
        }

        Ok(Self { name: name.to_lowercase(), key })
    }

    /// Parse the canonical wire form `@<name>@<key>`.
    pub fn parse(raw: &str) -> Result<Self, InstanceIdError> {
        let rest = raw.strip_prefix('@').ok_or_else(|| InstanceIdError::MissingLeadingSigil {
            raw: raw.to_string(),
        })?;

        let sep = rest.find('@').ok_or_else(|| InstanceIdError::MissingSeparator {
            raw: raw.to_string(),
        })?;

        let (name, key_with_sigil) = rest.split_at(sep);
        let key = &key_with_sigil[1..];

        Self::new(name, key)
    }

    /// The case-folded entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The case-preserving entity key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the canonical wire form `@<name>@<key>`.
    pub fn to_canonical_string(&self) -> String {
        format!("@{}@{}", self.name, self.key)
    }

    /// Whether a raw orchestration-level instance id string belongs to an
    /// entity (begins with `@`) and must therefore be rejected by
    /// orchestration queries.
    pub fn is_entity_id(raw: &str) -> bool {
        raw.starts_with('@')
    }

    /// Total order used for lock acquisition (spec: lexicographic on
    /// `(name, key)`), and for stable query result ordering.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.name, &self.key)
    }
}

impl PartialEq for InstanceId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.key == other.key
    }
}

impl Eq for InstanceId {}

impl PartialOrd for InstanceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::hash::Hash for InstanceId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl TryFrom<&str> for InstanceId {
    type Error = InstanceIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}
