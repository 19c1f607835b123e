//! Resolves requested tags against the global tag table.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Tag, TagIdentity, TagOrigin, TagSpec};
use crate::store::{DocumentStore, StoreError};

/// Net tag changes for one request, after cancelling out pairs that are
/// both added and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPlan {
    /// Tags to create or reuse and reference.
    pub attach: Vec<TagIdentity>,
    /// Ids of tags whose reference is dropped.
    pub detach: BTreeSet<String>,
}

impl TagPlan {
    /// Scopes every spec to `tenant_scope`; a pair present in both lists
    /// cancels out.
    pub fn new(tenant_scope: &str, adds: &[TagSpec], removes: &[TagSpec]) -> Self {
        let adds: BTreeSet<TagIdentity> = adds.iter().map(|t| t.scoped(tenant_scope)).collect();
        let removes: BTreeSet<TagIdentity> =
            removes.iter().map(|t| t.scoped(tenant_scope)).collect();

        Self {
            attach: adds.difference(&removes).cloned().collect(),
            detach: removes.difference(&adds).map(TagIdentity::id).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attach.is_empty() && self.detach.is_empty()
    }
}

/// Turns tag adds and removes into an account's tag references, creating
/// or widening shared tag entities as needed.
pub struct TagReconciler {
    store: Arc<dyn DocumentStore>,
}

impl TagReconciler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Returns the account's new tag references.
    ///
    /// Removing only drops the reference; the tag entity stays, since other
    /// accounts and discovered resources may still point at it.
    pub async fn reconcile(
        &self,
        tenant_scope: &str,
        existing: &BTreeSet<String>,
        adds: &[TagSpec],
        removes: &[TagSpec],
    ) -> Result<BTreeSet<String>> {
        let plan = TagPlan::new(tenant_scope, adds, removes);
        let mut refs = existing.clone();
        for identity in &plan.attach {
            let tag = self.ensure_user_defined(identity).await?;
            refs.insert(tag.id);
        }
        for id in &plan.detach {
            refs.remove(id);
        }
        Ok(refs)
    }

    /// Finds or creates the tag for `identity` and makes sure its origin
    /// includes USER_DEFINED.
    pub async fn ensure_user_defined(&self, identity: &TagIdentity) -> Result<Tag> {
        let id = identity.id();
        let existing = match self.store.get_tag(&id).await? {
            Some(tag) => tag,
            None => match self
                .store
                .insert_tag(&Tag::new(identity, TagOrigin::UserDefined))
                .await
            {
                Ok(created) => {
                    tracing::debug!(tag = %identity, "created tag");
                    return Ok(created);
                }
                // Lost a create race; the winner's document is the tag.
                Err(StoreError::AlreadyExists(_)) => self
                    .store
                    .get_tag(&id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?,
                Err(e) => return Err(e.into()),
            },
        };
        self.widen(existing).await
    }

    async fn widen(&self, tag: Tag) -> Result<Tag> {
        if tag.origins.contains(&TagOrigin::UserDefined) {
            return Ok(tag);
        }
        let mut widened = tag.clone();
        widened.origins.insert(TagOrigin::UserDefined);
        match self.store.replace_tag(&widened).await {
            Ok(stored) => {
                tracing::debug!(tag = %stored.identity(), "widened tag origin");
                Ok(stored)
            }
            Err(StoreError::VersionConflict { .. }) => {
                // A concurrent writer may have widened it already.
                let current = self
                    .store
                    .get_tag(&tag.id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(tag.id.clone()))?;
                if current.origins.contains(&TagOrigin::UserDefined) {
                    Ok(current)
                } else {
                    Err(StoreError::VersionConflict {
                        id: tag.id,
                        expected: tag.version,
                        actual: current.version,
                    }
                    .into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TagQuery};

    fn reconciler() -> (Arc<MemoryStore>, TagReconciler) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), TagReconciler::new(store))
    }

    #[tokio::test]
    async fn adding_same_tag_twice_yields_one_entity() {
        let (store, tags) = reconciler();
        let adds = [TagSpec::new("env", "prod")];

        let first = tags.reconcile("org", &BTreeSet::new(), &adds, &[]).await.unwrap();
        let second = tags.reconcile("org", &first, &adds, &[]).await.unwrap();
        assert_eq!(first, second);

        let all = store.query_tags(&TagQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].origins, BTreeSet::from([TagOrigin::UserDefined]));
    }

    #[tokio::test]
    async fn add_and_remove_same_pair_nets_to_nothing() {
        let (store, tags) = reconciler();
        let spec = TagSpec::new("k", "v");
        let refs = tags
            .reconcile("org", &BTreeSet::new(), &[spec.clone()], &[spec])
            .await
            .unwrap();
        assert!(refs.is_empty());
        assert!(store.query_tags(&TagQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_and_remove_same_pair_keeps_existing_reference() {
        let (_, tags) = reconciler();
        let spec = TagSpec::new("k", "v");
        let existing = tags
            .reconcile("org", &BTreeSet::new(), &[spec.clone()], &[])
            .await
            .unwrap();
        let refs = tags
            .reconcile("org", &existing, &[spec.clone()], &[spec])
            .await
            .unwrap();
        assert_eq!(refs, existing);
    }

    #[tokio::test]
    async fn discovered_tag_is_widened_not_duplicated() {
        let (store, tags) = reconciler();
        let identity = TagSpec::new("team", "infra").scoped("org");
        store
            .insert_tag(&Tag::new(&identity, TagOrigin::Discovered))
            .await
            .unwrap();

        let tag = tags.ensure_user_defined(&identity).await.unwrap();
        assert_eq!(
            tag.origins,
            BTreeSet::from([TagOrigin::Discovered, TagOrigin::UserDefined])
        );
        assert_eq!(store.query_tags(&TagQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_keeps_tag_entity() {
        let (store, tags) = reconciler();
        let spec = TagSpec::new("k", "v");
        let refs = tags
            .reconcile("org", &BTreeSet::new(), &[spec.clone()], &[])
            .await
            .unwrap();
        let refs = tags.reconcile("org", &refs, &[], &[spec]).await.unwrap();
        assert!(refs.is_empty());
        assert_eq!(store.query_tags(&TagQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_pairs_in_two_orgs_are_distinct() {
        let (store, tags) = reconciler();
        let adds = [TagSpec::new("env", "prod")];
        let a = tags.reconcile("org-a", &BTreeSet::new(), &adds, &[]).await.unwrap();
        let b = tags.reconcile("org-b", &BTreeSet::new(), &adds, &[]).await.unwrap();
        assert_ne!(a, b);

        let shared = store
            .query_tags(&TagQuery {
                key: Some("env".into()),
                value: Some("prod".into()),
                tenant_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn plan_cancels_pairs_present_in_both_sets() {
        let plan = TagPlan::new(
            "org",
            &[TagSpec::new("a", "1"), TagSpec::new("b", "2")],
            &[TagSpec::new("a", "1"), TagSpec::new("c", "3")],
        );
        assert_eq!(plan.attach, vec![TagSpec::new("b", "2").scoped("org")]);
        assert_eq!(
            plan.detach,
            BTreeSet::from([TagSpec::new("c", "3").scoped("org").id()])
        );
        assert!(TagPlan::new("org", &[], &[]).is_empty());
    }
}
