use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{DocumentStore, Page, StoreError, StoreResult, TagQuery};
use crate::model::{Account, CredentialDocument, IdentityClaim, Tag};

/// In-process [`DocumentStore`] used by the CLI and tests.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<BTreeMap<String, Account>>,
    credentials: RwLock<BTreeMap<String, CredentialDocument>>,
    claims: RwLock<BTreeMap<String, IdentityClaim>>,
    tags: RwLock<BTreeMap<String, Tag>>,
    account_pages_served: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of account pages returned so far.
    pub fn account_pages_served(&self) -> usize {
        self.account_pages_served.load(Ordering::Relaxed)
    }
}

fn check_version(id: &str, expected: u64, actual: u64) -> StoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            id: id.to_string(),
            expected,
            actual,
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists(account.id.clone()));
        }
        let mut stored = account.clone();
        stored.version = 1;
        accounts.insert(stored.id.clone(), stored.clone());
        tracing::debug!(id = %stored.id, "inserted account");
        Ok(stored)
    }

    async fn get_account(&self, id: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn replace_account(&self, account: &Account) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        let current = accounts
            .get_mut(&account.id)
            .ok_or_else(|| StoreError::NotFound(account.id.clone()))?;
        check_version(&account.id, account.version, current.version)?;
        let mut stored = account.clone();
        stored.version = current.version + 1;
        stored.updated_at = Utc::now();
        *current = stored.clone();
        Ok(stored)
    }

    async fn delete_account(&self, id: &str) -> StoreResult<()> {
        self.accounts.write().await.remove(id);
        Ok(())
    }

    async fn query_accounts(
        &self,
        org_ref: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<Account>> {
        if limit == 0 {
            return Err(StoreError::Backend("page size must be positive".into()));
        }
        let accounts = self.accounts.read().await;
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.to_string()),
            None => Bound::Unbounded,
        };
        let mut items: Vec<Account> = accounts
            .range((lower, Bound::Unbounded))
            .map(|(_, a)| a)
            .filter(|a| a.org_ref == org_ref)
            .take(limit + 1)
            .cloned()
            .collect();

        let next = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|a| a.id.clone())
        } else {
            None
        };
        self.account_pages_served.fetch_add(1, Ordering::Relaxed);
        Ok(Page { items, next })
    }

    async fn insert_credential(&self, doc: &CredentialDocument) -> StoreResult<CredentialDocument> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&doc.id) {
            return Err(StoreError::AlreadyExists(doc.id.clone()));
        }
        let mut stored = doc.clone();
        stored.version = 1;
        credentials.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_credential(&self, id: &str) -> StoreResult<Option<CredentialDocument>> {
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn replace_credential(
        &self,
        doc: &CredentialDocument,
    ) -> StoreResult<CredentialDocument> {
        let mut credentials = self.credentials.write().await;
        let current = credentials
            .get_mut(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
        check_version(&doc.id, doc.version, current.version)?;
        let mut stored = doc.clone();
        stored.version = current.version + 1;
        stored.updated_at = Utc::now();
        *current = stored.clone();
        Ok(stored)
    }

    async fn delete_credential(&self, id: &str) -> StoreResult<()> {
        self.credentials.write().await.remove(id);
        Ok(())
    }

    async fn insert_claim(&self, claim: &IdentityClaim) -> StoreResult<IdentityClaim> {
        let mut claims = self.claims.write().await;
        if claims.contains_key(&claim.id) {
            return Err(StoreError::AlreadyExists(claim.id.clone()));
        }
        let mut stored = claim.clone();
        stored.version = 1;
        claims.insert(stored.id.clone(), stored.clone());
        tracing::debug!(id = %stored.id, account_id = %stored.account_id, "identity claimed");
        Ok(stored)
    }

    async fn get_claim(&self, id: &str) -> StoreResult<Option<IdentityClaim>> {
        Ok(self.claims.read().await.get(id).cloned())
    }

    async fn release_claim(&self, id: &str, account_id: &str) -> StoreResult<bool> {
        let mut claims = self.claims.write().await;
        match claims.get(id) {
            Some(claim) if claim.account_id == account_id => {
                claims.remove(id);
                tracing::debug!(id, account_id, "identity released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let mut tags = self.tags.write().await;
        if tags.contains_key(&tag.id) {
            return Err(StoreError::AlreadyExists(tag.id.clone()));
        }
        let mut stored = tag.clone();
        stored.version = 1;
        tags.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_tag(&self, id: &str) -> StoreResult<Option<Tag>> {
        Ok(self.tags.read().await.get(id).cloned())
    }

    async fn replace_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let mut tags = self.tags.write().await;
        let current = tags
            .get_mut(&tag.id)
            .ok_or_else(|| StoreError::NotFound(tag.id.clone()))?;
        check_version(&tag.id, tag.version, current.version)?;
        let mut stored = tag.clone();
        stored.version = current.version + 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn query_tags(&self, query: &TagQuery) -> StoreResult<Vec<Tag>> {
        Ok(self
            .tags
            .read()
            .await
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountStatus, CredentialKind, ProviderType, TagOrigin, TagSpec};
    use std::collections::{BTreeMap, BTreeSet};

    fn account(id: &str, org: &str) -> Account {
        let now = Utc::now();
        Account {
            id: id.to_string(),
            name: format!("name-{id}"),
            description: None,
            provider_type: ProviderType::Aws,
            credential_ref: format!("cred-{id}"),
            credential_kind: CredentialKind::Keys,
            credential_identity: format!("ak-{id}"),
            region: None,
            custom_properties: BTreeMap::new(),
            tag_refs: BTreeSet::new(),
            owner_identities: BTreeSet::new(),
            org_ref: org.to_string(),
            service_tags: BTreeSet::new(),
            status: AccountStatus::Active,
            created_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_is_create_if_absent() {
        let store = MemoryStore::new();
        let stored = store.insert_account(&account("a", "org")).await.unwrap();
        assert_eq!(stored.version, 1);

        let err = store.insert_account(&account("a", "org")).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists("a".into()));
    }

    #[tokio::test]
    async fn replace_rejects_stale_version() {
        let store = MemoryStore::new();
        let stored = store.insert_account(&account("a", "org")).await.unwrap();

        let mut fresh = stored.clone();
        fresh.name = "renamed".into();
        let fresh = store.replace_account(&fresh).await.unwrap();
        assert_eq!(fresh.version, 2);

        let err = store.replace_account(&stored).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn query_pages_through_one_org_only() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store
                .insert_account(&account(&format!("a{i}"), "org-1"))
                .await
                .unwrap();
        }
        store.insert_account(&account("b0", "org-2")).await.unwrap();

        let first = store.query_accounts("org-1", None, 3).await.unwrap();
        assert_eq!(first.items.len(), 3);
        let second = store
            .query_accounts("org-1", first.next.as_deref(), 3)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 3);
        let third = store
            .query_accounts("org-1", second.next.as_deref(), 3)
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next.is_none());
        assert_eq!(store.account_pages_served(), 3);
        assert!(third.items.iter().all(|a| a.org_ref == "org-1"));
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_ends_without_cursor() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store
                .insert_account(&account(&format!("a{i}"), "org"))
                .await
                .unwrap();
        }
        let first = store.query_accounts("org", None, 2).await.unwrap();
        let second = store
            .query_accounts("org", first.next.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn claims_are_exclusive_and_released_only_by_holder() {
        let store = MemoryStore::new();
        let claim = IdentityClaim::new("org", ProviderType::Aws, "ak", "acct-1");
        assert_eq!(store.insert_claim(&claim).await.unwrap().version, 1);

        let rival = IdentityClaim::new("org", ProviderType::Aws, "ak", "acct-2");
        assert_eq!(
            store.insert_claim(&rival).await.unwrap_err(),
            StoreError::AlreadyExists(claim.id.clone())
        );

        assert!(!store.release_claim(&claim.id, "acct-2").await.unwrap());
        assert_eq!(
            store.get_claim(&claim.id).await.unwrap().unwrap().account_id,
            "acct-1"
        );
        assert!(store.release_claim(&claim.id, "acct-1").await.unwrap());
        assert!(store.get_claim(&claim.id).await.unwrap().is_none());
        assert!(!store.release_claim(&claim.id, "acct-1").await.unwrap());

        store.insert_claim(&rival).await.unwrap();
    }

    #[tokio::test]
    async fn tag_query_filters_on_all_given_fields() {
        let store = MemoryStore::new();
        for org in ["org-a", "org-b"] {
            let tag = Tag::new(&TagSpec::new("env", "prod").scoped(org), TagOrigin::UserDefined);
            store.insert_tag(&tag).await.unwrap();
        }
        let all = store
            .query_tags(&TagQuery {
                key: Some("env".into()),
                value: Some("prod".into()),
                tenant_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let one = store
            .query_tags(&TagQuery {
                tenant_scope: Some("org-a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }
}
