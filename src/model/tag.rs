use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TAG_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_94b0_2f0e_4c6b_9a43_0d1b_6e2f_a003);

/// Provenance of a tag. A tag accumulates origins; it is never duplicated
/// per origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagOrigin {
    Discovered,
    UserDefined,
}

/// Key/value pair as it appears on a request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagSpec {
    pub key: String,
    pub value: String,
}

impl TagSpec {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A blank key or value is rejected with `ENDPOINT_TAG_NULL_EMPTY`.
    pub fn is_blank(&self) -> bool {
        self.key.trim().is_empty() || self.value.trim().is_empty()
    }

    /// The identity of this key/value pair within one tenant.
    pub fn scoped(&self, tenant_scope: &str) -> TagIdentity {
        TagIdentity {
            key: self.key.clone(),
            value: self.value.clone(),
            tenant_scope: tenant_scope.to_string(),
        }
    }
}

/// `(key, value, tenant_scope)`: the full equality key of a tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagIdentity {
    pub key: String,
    pub value: String,
    pub tenant_scope: String,
}

impl TagIdentity {
    pub fn id(&self) -> String {
        let name = format!("{}\u{0}{}\u{0}{}", self.tenant_scope, self.key, self.value);
        Uuid::new_v5(&TAG_NAMESPACE, name.as_bytes()).to_string()
    }
}

impl fmt::Display for TagIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} [{}]", self.key, self.value, self.tenant_scope)
    }
}

/// Shared tag entity. Accounts reference it by id; it is never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub key: String,
    pub value: String,
    pub tenant_scope: String,
    /// Grows over time; a discovered tag later attached by a user carries both.
    pub origins: BTreeSet<TagOrigin>,
    pub version: u64,
}

impl Tag {
    pub fn new(identity: &TagIdentity, origin: TagOrigin) -> Self {
        Self {
            id: identity.id(),
            key: identity.key.clone(),
            value: identity.value.clone(),
            tenant_scope: identity.tenant_scope.clone(),
            origins: BTreeSet::from([origin]),
            version: 0,
        }
    }

    pub fn identity(&self) -> TagIdentity {
        TagIdentity {
            key: self.key.clone(),
            value: self.value.clone(),
            tenant_scope: self.tenant_scope.clone(),
        }
    }
}
