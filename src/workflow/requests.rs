//! Request documents accepted by the account workflows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::engine::ExecutionMode;
use crate::model::{CredentialInput, ProviderType, TagSpec};
use crate::reconcile::{CollectionAction, CollectionUpdate, OwnerUpdate};

/// Registers a new account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub provider_type: Option<ProviderType>,
    /// Parsed into the credential variant the provider type calls for.
    pub credential: CredentialInput,
    pub region: Option<String>,
    pub tags: Vec<TagSpec>,
    /// Provider-specific settings, including the billing properties.
    pub custom_properties: BTreeMap<String, String>,
    pub service_tags: BTreeSet<String>,
    /// Org members to add to the account's authorization group.
    pub owners: Vec<String>,
    /// Org the account belongs to; also the scope of every uniqueness check.
    pub org_ref: String,
    /// Identity issuing the request; an implicit member of the new
    /// account's authorization group.
    pub created_by: Option<String>,
    pub mode: ExecutionMode,
}

/// One ADD/REMOVE of a key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub action: CollectionAction,
    pub key: String,
    pub value: String,
}

impl TagUpdate {
    pub fn add(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Add,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Remove,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn spec(&self) -> TagSpec {
        TagSpec::new(&self.key, &self.value)
    }
}

/// Changes an existing account. Every field besides `account_ref` and
/// `mode` is a mutator; at least one must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRequest {
    pub account_ref: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// New credential values. The variant cannot change.
    pub credential: Option<CredentialInput>,
    pub tag_updates: Vec<TagUpdate>,
    /// Per-key ADD/REMOVE. Adding all three billing properties provisions a
    /// usage report.
    pub property_updates: BTreeMap<String, CollectionUpdate>,
    pub owner_updates: Vec<OwnerUpdate>,
    pub service_tag_updates: Vec<CollectionUpdate>,
    pub mode: ExecutionMode,
}

impl UpdateRequest {
    pub fn new(account_ref: impl Into<String>) -> Self {
        Self {
            account_ref: account_ref.into(),
            ..Default::default()
        }
    }

    /// The credential input, unless absent or sent with every field empty.
    pub fn credential(&self) -> Option<&CredentialInput> {
        self.credential.as_ref().filter(|c| !c.is_empty())
    }

    /// Whether the request changes anything at all.
    pub fn has_mutators(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.credential().is_some()
            || !self.tag_updates.is_empty()
            || !self.property_updates.is_empty()
            || !self.owner_updates.is_empty()
            || !self.service_tag_updates.is_empty()
    }

    /// Tags split into (adds, removes).
    pub fn tag_changes(&self) -> (Vec<TagSpec>, Vec<TagSpec>) {
        let (adds, removes): (Vec<&TagUpdate>, Vec<&TagUpdate>) = self
            .tag_updates
            .iter()
            .partition(|u| u.action == CollectionAction::Add);
        (
            adds.into_iter().map(TagUpdate::spec).collect(),
            removes.into_iter().map(TagUpdate::spec).collect(),
        )
    }
}

/// Removes an account, its credential and its authorization group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteRequest {
    pub account_ref: String,
    pub mode: ExecutionMode,
}

impl DeleteRequest {
    pub fn new(account_ref: impl Into<String>) -> Self {
        Self {
            account_ref: account_ref.into(),
            ..Default::default()
        }
    }
}

/// Dry-run of a create: nothing is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateRequest {
    pub provider_type: Option<ProviderType>,
    pub credential: CredentialInput,
    pub region: Option<String>,
    pub custom_properties: BTreeMap<String, String>,
    pub owners: Vec<String>,
    /// Org whose accounts are checked for duplicates.
    pub org_ref: String,
    pub mode: ExecutionMode,
}
