//! Uniqueness scan over an org's accounts.

use std::sync::Arc;

use crate::error::{AccountError, Result};
use crate::model::{Account, AccountRef, ProviderType};
use crate::store::DocumentStore;

/// What a new or changed account must not share with any other account in
/// the same org.
#[derive(Debug, Clone, Default)]
pub struct DuplicateQuery {
    /// Credential identity, matched within one provider type.
    pub credential: Option<(ProviderType, String)>,
    pub bucket: Option<String>,
    /// Account to ignore (the one being updated).
    pub exclude: Option<String>,
}

impl DuplicateQuery {
    pub fn is_empty(&self) -> bool {
        self.credential.is_none() && self.bucket.is_none()
    }

    fn conflict_with(&self, account: &Account) -> Option<Conflict> {
        if !account.is_active() || self.exclude.as_deref() == Some(account.id.as_str()) {
            return None;
        }
        if let Some(bucket) = &self.bucket
            && account.bills_bucket() == Some(bucket.as_str())
        {
            return Some(Conflict::Bucket {
                bucket: bucket.clone(),
                existing: account.reference(),
            });
        }
        if let Some((provider, identity)) = &self.credential
            && account.provider_type == *provider
            && account.credential_identity == *identity
        {
            return Some(Conflict::Credential {
                existing: account.reference(),
            });
        }
        None
    }
}

/// The first account found violating a [`DuplicateQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Bucket { bucket: String, existing: AccountRef },
    Credential { existing: AccountRef },
}

impl Conflict {
    pub fn existing(&self) -> &AccountRef {
        match self {
            Conflict::Bucket { existing, .. } | Conflict::Credential { existing } => existing,
        }
    }
}

impl From<Conflict> for AccountError {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::Bucket { bucket, existing } => {
                AccountError::BucketAlreadyExists { bucket, existing }
            }
            Conflict::Credential { existing } => AccountError::AlreadyExists { existing },
        }
    }
}

/// Enforces per-org uniqueness of credential identity and billing bucket.
///
/// The page size is fixed at construction; scans never read it from global
/// configuration.
pub struct DuplicateDetector {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
}

impl DuplicateDetector {
    /// A page size of zero is raised to one.
    pub fn new(store: Arc<dyn DocumentStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Scans the org page by page and stops at the first match. "No
    /// conflict" is only returned after the last page.
    pub async fn find_conflict(&self, org_ref: &str, query: &DuplicateQuery) -> Result<Option<Conflict>> {
        if query.is_empty() {
            return Ok(None);
        }

        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .store
                .query_accounts(org_ref, cursor.as_deref(), self.page_size)
                .await?;
            pages += 1;

            if let Some(conflict) = page.items.iter().find_map(|a| query.conflict_with(a)) {
                tracing::debug!(org_ref, pages, existing = %conflict.existing(), "duplicate found");
                return Ok(Some(conflict));
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(org_ref, pages, "no duplicate");
        Ok(None)
    }

    /// [`find_conflict`](Self::find_conflict), turning a match into its error.
    pub async fn ensure_unique(&self, org_ref: &str, query: &DuplicateQuery) -> Result<()> {
        match self.find_conflict(org_ref, query).await? {
            Some(conflict) => Err(conflict.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::model::{AccountStatus, BILLS_BUCKET, CredentialKind};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn account(i: usize, org: &str, bucket: Option<&str>) -> Account {
        let now = Utc::now();
        let mut custom_properties = BTreeMap::new();
        if let Some(b) = bucket {
            custom_properties.insert(BILLS_BUCKET.to_string(), b.to_string());
        }
        Account {
            id: format!("id-{i:03}"),
            name: format!("acct-{i}"),
            description: None,
            provider_type: ProviderType::Aws,
            credential_ref: format!("cred-{i}"),
            credential_kind: CredentialKind::Keys,
            credential_identity: format!("ak-{i}"),
            region: None,
            custom_properties,
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

    async fn seeded(n: usize, bucket_at: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            let bucket = format!("bucket-{i}");
            let bucket = (i == bucket_at).then_some(bucket.as_str());
            store.insert_account(&account(i, "org", bucket)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn finds_bucket_on_last_page() {
        let store = seeded(25, 24).await;
        let detector = DuplicateDetector::new(store.clone(), 5);

        let query = DuplicateQuery {
            bucket: Some("bucket-24".into()),
            ..Default::default()
        };
        let conflict = detector.find_conflict("org", &query).await.unwrap().unwrap();
        assert_eq!(conflict.existing().name, "acct-24");
        assert_eq!(store.account_pages_served(), 5);

        let err = detector.ensure_unique("org", &query).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EndpointWithBucketAlreadyExists);
    }

    #[tokio::test]
    async fn drains_every_page_before_reporting_no_conflict() {
        let store = seeded(25, usize::MAX).await;
        let detector = DuplicateDetector::new(store.clone(), 5);

        let query = DuplicateQuery {
            bucket: Some("nope".into()),
            ..Default::default()
        };
        assert!(detector.find_conflict("org", &query).await.unwrap().is_none());
        assert_eq!(store.account_pages_served(), 5);
    }

    #[tokio::test]
    async fn stops_at_first_match() {
        let store = seeded(25, 2).await;
        let detector = DuplicateDetector::new(store.clone(), 5);
        let query = DuplicateQuery {
            bucket: Some("bucket-2".into()),
            ..Default::default()
        };
        assert!(detector.find_conflict("org", &query).await.unwrap().is_some());
        assert_eq!(store.account_pages_served(), 1);
    }

    #[tokio::test]
    async fn credential_match_respects_exclusion_and_provider() {
        let store = seeded(3, usize::MAX).await;
        let detector = DuplicateDetector::new(store, 2);

        let mut query = DuplicateQuery {
            credential: Some((ProviderType::Aws, "ak-1".into())),
            ..Default::default()
        };
        let conflict = detector.find_conflict("org", &query).await.unwrap();
        assert!(matches!(conflict, Some(Conflict::Credential { .. })));

        query.exclude = Some("id-001".into());
        assert!(detector.find_conflict("org", &query).await.unwrap().is_none());

        let other_provider = DuplicateQuery {
            credential: Some((ProviderType::Azure, "ak-1".into())),
            ..Default::default()
        };
        assert!(detector.find_conflict("org", &other_provider).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_accounts_are_not_candidates() {
        let store = Arc::new(MemoryStore::new());
        let mut doomed = account(0, "org", Some("b1"));
        doomed.status = AccountStatus::Deleting;
        store.insert_account(&doomed).await.unwrap();

        let detector = DuplicateDetector::new(store, 5);
        let query = DuplicateQuery {
            bucket: Some("b1".into()),
            ..Default::default()
        };
        assert!(detector.find_conflict("org", &query).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_orgs_are_out_of_scope() {
        let store = seeded(3, 0).await;
        let detector = DuplicateDetector::new(store, 5);
        let query = DuplicateQuery {
            bucket: Some("bucket-0".into()),
            ..Default::default()
        };
        assert!(detector.find_conflict("other-org", &query).await.unwrap().is_none());
    }
}
