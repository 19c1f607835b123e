//! Authorization-group membership seam.
//!
//! Each account owns one authorization group. Org membership and org-admin
//! rights are held elsewhere and only ever read here.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{StoreError, StoreResult};

/// Org membership lookups and per-account authorization groups.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn is_org_member(&self, org_ref: &str, identity: &str) -> StoreResult<bool>;
    async fn is_org_admin(&self, org_ref: &str, identity: &str) -> StoreResult<bool>;

    /// Creates the account's group with `members`; a no-op if it already
    /// exists in the same org.
    async fn create_account_group(
        &self,
        account_id: &str,
        org_ref: &str,
        members: &BTreeSet<String>,
    ) -> StoreResult<()>;
    async fn add_group_member(&self, account_id: &str, identity: &str) -> StoreResult<()>;
    async fn remove_group_member(&self, account_id: &str, identity: &str) -> StoreResult<()>;
    async fn group_members(&self, account_id: &str) -> StoreResult<Option<BTreeSet<String>>>;
    /// Removes the account's group; a no-op if it is already gone.
    async fn delete_account_group(&self, account_id: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct OrgEntry {
    members: BTreeSet<String>,
    admins: BTreeSet<String>,
}

#[derive(Debug)]
struct AccountGroup {
    org_ref: String,
    members: BTreeSet<String>,
}

/// In-process [`AuthzStore`].
#[derive(Default)]
pub struct MemoryAuthz {
    orgs: RwLock<BTreeMap<String, OrgEntry>>,
    groups: RwLock<BTreeMap<String, AccountGroup>>,
}

impl MemoryAuthz {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds org membership; the real source of membership is outside this crate.
    pub async fn add_org_member(&self, org_ref: &str, identity: &str) {
        self.orgs
            .write()
            .await
            .entry(org_ref.to_string())
            .or_default()
            .members
            .insert(identity.to_string());
    }

    /// Admins are implicitly members.
    pub async fn add_org_admin(&self, org_ref: &str, identity: &str) {
        let mut orgs = self.orgs.write().await;
        let entry = orgs.entry(org_ref.to_string()).or_default();
        entry.members.insert(identity.to_string());
        entry.admins.insert(identity.to_string());
    }
}

#[async_trait]
impl AuthzStore for MemoryAuthz {
    async fn is_org_member(&self, org_ref: &str, identity: &str) -> StoreResult<bool> {
        Ok(self
            .orgs
            .read()
            .await
            .get(org_ref)
            .is_some_and(|o| o.members.contains(identity)))
    }

    async fn is_org_admin(&self, org_ref: &str, identity: &str) -> StoreResult<bool> {
        Ok(self
            .orgs
            .read()
            .await
            .get(org_ref)
            .is_some_and(|o| o.admins.contains(identity)))
    }

    async fn create_account_group(
        &self,
        account_id: &str,
        org_ref: &str,
        members: &BTreeSet<String>,
    ) -> StoreResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .entry(account_id.to_string())
            .or_insert_with(|| AccountGroup {
                org_ref: org_ref.to_string(),
                members: members.clone(),
            });
        if group.org_ref != org_ref {
            return Err(StoreError::AlreadyExists(format!(
                "authz group for {account_id} in {}",
                group.org_ref
            )));
        }
        Ok(())
    }

    async fn add_group_member(&self, account_id: &str, identity: &str) -> StoreResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(account_id)
            .ok_or_else(|| StoreError::NotFound(format!("authz group for {account_id}")))?;
        group.members.insert(identity.to_string());
        Ok(())
    }

    async fn remove_group_member(&self, account_id: &str, identity: &str) -> StoreResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(account_id)
            .ok_or_else(|| StoreError::NotFound(format!("authz group for {account_id}")))?;
        group.members.remove(identity);
        Ok(())
    }

    async fn group_members(&self, account_id: &str) -> StoreResult<Option<BTreeSet<String>>> {
        Ok(self
            .groups
            .read()
            .await
            .get(account_id)
            .map(|g| g.members.clone()))
    }

    async fn delete_account_group(&self, account_id: &str) -> StoreResult<()> {
        self.groups.write().await.remove(account_id);
        Ok(())
    }
}
