//! Resolves owner updates into authorization-group membership changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::patcher::CollectionAction;
use crate::authz::AuthzStore;
use crate::error::{AccountError, Result};

/// One owner change: ADD grants group membership, REMOVE revokes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUpdate {
    pub action: CollectionAction,
    pub identity: String,
}

impl OwnerUpdate {
    pub fn add(identity: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Add,
            identity: identity.into(),
        }
    }

    pub fn remove(identity: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Remove,
            identity: identity.into(),
        }
    }
}

/// Validated owner changes, not yet applied to the authorization group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerPlan {
    /// The account's explicit owners after the update.
    pub owners: BTreeSet<String>,
    /// Identities to add to the authorization group.
    pub grant: BTreeSet<String>,
    /// Identities to remove from the authorization group. For an org admin
    /// this drops only the explicit membership, never the org-level rights.
    pub revoke: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum Applied {
    Granted,
    Revoked,
}

/// Keeps an account's owners and its authorization group in step.
pub struct OwnershipSynchronizer {
    authz: Arc<dyn AuthzStore>,
}

impl OwnershipSynchronizer {
    pub fn new(authz: Arc<dyn AuthzStore>) -> Self {
        Self { authz }
    }

    /// Checks every ADD identity against the org and folds the updates over
    /// `current`. The first non-member rejects the whole batch.
    pub async fn resolve(
        &self,
        org_ref: &str,
        current: &BTreeSet<String>,
        updates: &[OwnerUpdate],
    ) -> Result<OwnerPlan> {
        for update in updates {
            if update.action == CollectionAction::Add
                && !self.authz.is_org_member(org_ref, &update.identity).await?
            {
                return Err(AccountError::InvalidOwner {
                    identity: update.identity.clone(),
                    org: org_ref.to_string(),
                });
            }
        }

        let mut plan = OwnerPlan {
            owners: current.clone(),
            ..Default::default()
        };
        // Later updates for the same identity win.
        for update in updates {
            let id = update.identity.clone();
            match update.action {
                CollectionAction::Add => {
                    plan.revoke.remove(&id);
                    plan.owners.insert(id.clone());
                    plan.grant.insert(id);
                }
                CollectionAction::Remove => {
                    plan.grant.remove(&id);
                    plan.owners.remove(&id);
                    plan.revoke.insert(id);
                }
            }
        }
        Ok(plan)
    }

    /// Applies `plan` to the account's group. If any change fails, the
    /// changes already made are undone before the error is returned.
    pub async fn apply(&self, org_ref: &str, account_id: &str, plan: &OwnerPlan) -> Result<()> {
        let mut applied: Vec<(Applied, &str)> = Vec::new();

        let outcome = async {
            for identity in &plan.grant {
                self.authz.add_group_member(account_id, identity).await?;
                applied.push((Applied::Granted, identity.as_str()));
            }
            for identity in &plan.revoke {
                if self.authz.is_org_admin(org_ref, identity).await? {
                    tracing::debug!(%identity, account_id, "revoking explicit membership; org-admin rights are untouched");
                }
                self.authz.remove_group_member(account_id, identity).await?;
                applied.push((Applied::Revoked, identity.as_str()));
            }
            Ok::<(), AccountError>(())
        }
        .await;

        if let Err(err) = outcome {
            for (change, identity) in applied.into_iter().rev() {
                let undo = match change {
                    Applied::Granted => self.authz.remove_group_member(account_id, identity).await,
                    Applied::Revoked => self.authz.add_group_member(account_id, identity).await,
                };
                if let Err(e) = undo {
                    tracing::warn!(%identity, account_id, "failed to undo membership change: {e}");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// [`resolve`](Self::resolve) then [`apply`](Self::apply); returns the new
    /// explicit owner set.
    pub async fn sync(
        &self,
        org_ref: &str,
        account_id: &str,
        current: &BTreeSet<String>,
        updates: &[OwnerUpdate],
    ) -> Result<BTreeSet<String>> {
        let plan = self.resolve(org_ref, current, updates).await?;
        self.apply(org_ref, account_id, &plan).await?;
        Ok(plan.owners)
    }
}
