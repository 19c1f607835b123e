//! The four account workflows and the service that fronts them.

mod create;
mod delete;
mod requests;
mod update;
mod validate;

pub use create::{CreateStage, CreateWorkflow};
pub use delete::{DeleteStage, DeleteWorkflow};
pub use requests::{CreateRequest, DeleteRequest, TagUpdate, UpdateRequest, ValidateRequest};
pub use update::{UpdateStage, UpdateWorkflow};
pub use validate::{ValidateStage, ValidateWorkflow};

use std::sync::Arc;

use crate::authz::AuthzStore;
use crate::config::AccountsConfig;
use crate::engine::{Task, WorkflowEngine};
use crate::error::{AccountError, Result};
use crate::model::{Account, IdentityClaim, TagSpec};
use crate::provider::AdapterRegistry;
use crate::reconcile::{DuplicateDetector, OwnershipSynchronizer, TagReconciler, UsageReportProvisioner};
use crate::signal::EnumerationSignal;
use crate::store::{DocumentStore, StoreError};

/// Everything the workflows talk to, shared by all of them.
pub struct Collaborators {
    /// Accounts, credentials, identity claims and tags.
    pub(crate) store: Arc<dyn DocumentStore>,
    /// Org membership and per-account authorization groups.
    pub(crate) authz: Arc<dyn AuthzStore>,
    pub(crate) duplicates: DuplicateDetector,
    pub(crate) tags: TagReconciler,
    pub(crate) owners: OwnershipSynchronizer,
    pub(crate) reports: UsageReportProvisioner,
    /// Told about every credential rotation.
    pub(crate) signal: Arc<dyn EnumerationSignal>,
    /// Skip usage-report provisioning entirely.
    pub(crate) suppress_remote_calls: bool,
    // Page size for account listings; scans take theirs from the detector.
    page_size: usize,
}

impl Collaborators {
    /// Builds the reconcilers over `store`, `authz` and `adapters`, using the
    /// page size and remote-call switch from `config`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        authz: Arc<dyn AuthzStore>,
        adapters: AdapterRegistry,
        signal: Arc<dyn EnumerationSignal>,
        config: &AccountsConfig,
    ) -> Self {
        Self {
            duplicates: DuplicateDetector::new(Arc::clone(&store), config.query_page_size),
            tags: TagReconciler::new(Arc::clone(&store)),
            owners: OwnershipSynchronizer::new(Arc::clone(&authz)),
            reports: UsageReportProvisioner::new(adapters),
            suppress_remote_calls: config.suppress_remote_calls,
            page_size: config.query_page_size.max(1),
            store,
            authz,
            signal,
        }
    }

    /// Loads an ACTIVE account; anything else is not found.
    pub(crate) async fn load_active(&self, account_id: &str) -> Result<Account> {
        match self.store.get_account(account_id).await? {
            Some(account) if account.is_active() => Ok(account),
            _ => Err(AccountError::NotFound(account_id.to_string())),
        }
    }

    /// Writes `account` back under its current version and refreshes it
    /// with the stored copy.
    pub(crate) async fn save(&self, account: &mut Account) -> Result<()> {
        account.touch();
        *account = self.store.replace_account(account).await?;
        Ok(())
    }

    /// Claims a credential identity for `claim.account_id`.
    ///
    /// Succeeds when the claim is new or already held by the same account. A
    /// claim left behind by an account that is gone or DELETING is taken
    /// over; one held by an ACTIVE account fails naming that account.
    pub(crate) async fn claim_identity(&self, claim: &IdentityClaim) -> Result<()> {
        for _ in 0..2 {
            match self.store.insert_claim(claim).await {
                Ok(_) => return Ok(()),
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
            let Some(held) = self.store.get_claim(&claim.id).await? else {
                continue;
            };
            if held.account_id == claim.account_id {
                return Ok(());
            }
            match self.store.get_account(&held.account_id).await? {
                Some(holder) if holder.is_active() => {
                    return Err(AccountError::AlreadyExists {
                        existing: holder.reference(),
                    });
                }
                _ => {
                    tracing::debug!(claim_id = %held.id, stale_holder = %held.account_id, "taking over stale identity claim");
                    self.store.release_claim(&held.id, &held.account_id).await?;
                }
            }
        }
        Err(StoreError::AlreadyExists(claim.id.clone()).into())
    }

    /// Releases the claim `account` holds on its current identity, if any.
    pub(crate) async fn release_identity(&self, account: &Account) -> Result<()> {
        let claim = IdentityClaim::for_account(account);
        self.store.release_claim(&claim.id, &account.id).await?;
        Ok(())
    }
}

/// Every tag needs a non-blank key and value.
pub(crate) fn check_tags<'a>(tags: impl IntoIterator<Item = &'a TagSpec>) -> Result<()> {
    if tags.into_iter().any(TagSpec::is_blank) {
        return Err(AccountError::TagNullEmpty);
    }
    Ok(())
}

/// Entry point for account lifecycle operations.
///
/// Each operation returns its task document. Direct-mode tasks come back
/// terminal; queued-mode tasks come back CREATED and can be followed through
/// the matching engine accessor.
pub struct AccountService {
    deps: Arc<Collaborators>,
    create: WorkflowEngine<CreateWorkflow>,
    update: WorkflowEngine<UpdateWorkflow>,
    delete: WorkflowEngine<DeleteWorkflow>,
    validate: WorkflowEngine<ValidateWorkflow>,
}

impl AccountService {
    pub fn new(deps: Collaborators) -> Self {
        let deps = Arc::new(deps);
        Self {
            create: WorkflowEngine::new(CreateWorkflow::new(Arc::clone(&deps))),
            update: WorkflowEngine::new(UpdateWorkflow::new(Arc::clone(&deps))),
            delete: WorkflowEngine::new(DeleteWorkflow::new(Arc::clone(&deps))),
            validate: WorkflowEngine::new(ValidateWorkflow::new(Arc::clone(&deps))),
            deps,
        }
    }

    /// Starts a create. A missing `orgRef` is rejected here, before any task
    /// exists.
    pub async fn create(&self, request: CreateRequest) -> Result<Task<CreateStage>> {
        self.create.start(request).await
    }

    /// Starts an update. A missing `accountRef` is rejected before any task
    /// exists; an update that changes nothing fails its task.
    pub async fn update(&self, request: UpdateRequest) -> Result<Task<UpdateStage>> {
        self.update.start(request).await
    }

    /// Starts a delete.
    pub async fn delete(&self, request: DeleteRequest) -> Result<Task<DeleteStage>> {
        self.delete.start(request).await
    }

    /// Starts a dry-run validation. Nothing is persisted.
    pub async fn validate(&self, request: ValidateRequest) -> Result<Task<ValidateStage>> {
        self.validate.start(request).await
    }

    /// Engine running create tasks, for polling, waiting, cancel and resume.
    pub fn creates(&self) -> &WorkflowEngine<CreateWorkflow> {
        &self.create
    }

    pub fn updates(&self) -> &WorkflowEngine<UpdateWorkflow> {
        &self.update
    }

    pub fn deletes(&self) -> &WorkflowEngine<DeleteWorkflow> {
        &self.delete
    }

    pub fn validations(&self) -> &WorkflowEngine<ValidateWorkflow> {
        &self.validate
    }

    /// The account with this id, in any status.
    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.deps
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| AccountError::NotFound(account_id.to_string()))
    }

    /// Every account of `org_ref`, in id order.
    pub async fn list_accounts(&self, org_ref: &str) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .deps
                .store
                .query_accounts(org_ref, cursor.as_deref(), self.deps.page_size)
                .await?;
            accounts.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(accounts),
            }
        }
    }
}
