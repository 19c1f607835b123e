//! Document store seam.
//!
//! The workflows operate exclusively through [`DocumentStore`]. Every
//! document carries a `version`; `replace_*` succeeds only when the caller's
//! version matches the stored one and bumps it on write. `insert_*` is
//! create-if-absent on the document id.
//!
//! Credential uniqueness rests on [`IdentityClaim`] documents: their ids are
//! derived from the principal, so the create-if-absent insert is the point
//! where two racing creates for the same credential are told apart.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Account, CredentialDocument, IdentityClaim, Tag};

/// Failures reported by a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One page of a paginated query.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the following page; `None` once drained.
    pub next: Option<String>,
}

/// Predicate over the global tag table.
#[derive(Debug, Clone, Default)]
pub struct TagQuery {
    pub key: Option<String>,
    pub value: Option<String>,
    pub tenant_scope: Option<String>,
}

impl TagQuery {
    /// Unset fields match anything.
    pub fn matches(&self, tag: &Tag) -> bool {
        self.key.as_ref().is_none_or(|k| *k == tag.key)
            && self.value.as_ref().is_none_or(|v| *v == tag.value)
            && self
                .tenant_scope
                .as_ref()
                .is_none_or(|t| *t == tag.tenant_scope)
    }
}

/// Persistence for every document the workflows touch.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ── Accounts ──

    async fn insert_account(&self, account: &Account) -> StoreResult<Account>;
    async fn get_account(&self, id: &str) -> StoreResult<Option<Account>>;
    async fn replace_account(&self, account: &Account) -> StoreResult<Account>;
    async fn delete_account(&self, id: &str) -> StoreResult<()>;
    /// Accounts of one org in stable id order, `limit` per page.
    async fn query_accounts(
        &self,
        org_ref: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<Account>>;

    // ── Credentials ──

    async fn insert_credential(&self, doc: &CredentialDocument) -> StoreResult<CredentialDocument>;
    async fn get_credential(&self, id: &str) -> StoreResult<Option<CredentialDocument>>;
    async fn replace_credential(&self, doc: &CredentialDocument)
    -> StoreResult<CredentialDocument>;
    async fn delete_credential(&self, id: &str) -> StoreResult<()>;

    // ── Identity claims ──

    async fn insert_claim(&self, claim: &IdentityClaim) -> StoreResult<IdentityClaim>;
    async fn get_claim(&self, id: &str) -> StoreResult<Option<IdentityClaim>>;
    /// Deletes the claim only while `account_id` still holds it. Returns
    /// whether a claim was removed.
    async fn release_claim(&self, id: &str, account_id: &str) -> StoreResult<bool>;

    // ── Tags ──

    async fn insert_tag(&self, tag: &Tag) -> StoreResult<Tag>;
    async fn get_tag(&self, id: &str) -> StoreResult<Option<Tag>>;
    async fn replace_tag(&self, tag: &Tag) -> StoreResult<Tag>;
    async fn query_tags(&self, query: &TagQuery) -> StoreResult<Vec<Tag>>;
}
