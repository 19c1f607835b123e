use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::Collaborators;
use super::requests::UpdateRequest;
use crate::engine::{ExecutionMode, Step, SubStage, Workflow};
use crate::error::{AccountError, Result};
use crate::model::{Account, BILLS_BUCKET, BillingConfig, Credential, IdentityClaim};
use crate::reconcile::{CollectionAction, DuplicateQuery, credential, patcher};
use crate::signal::EnumerationRequest;
use crate::store::StoreError;

/// Substages of an update, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStage {
    ValidateInput,
    CheckDuplicate,
    ApplyCredential,
    ApplyTagsAndProperties,
    ProvisionUsageReport,
    ApplyOwners,
    SignalEnumeration,
    Success,
    Error,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStage::ValidateInput => write!(f, "VALIDATE_INPUT"),
            UpdateStage::CheckDuplicate => write!(f, "CHECK_DUPLICATE"),
            UpdateStage::ApplyCredential => write!(f, "APPLY_CREDENTIAL"),
            UpdateStage::ApplyTagsAndProperties => write!(f, "APPLY_TAGS_AND_PROPERTIES"),
            UpdateStage::ProvisionUsageReport => write!(f, "PROVISION_USAGE_REPORT"),
            UpdateStage::ApplyOwners => write!(f, "APPLY_OWNERS"),
            UpdateStage::SignalEnumeration => write!(f, "SIGNAL_ENUMERATION"),
            UpdateStage::Success => write!(f, "SUCCESS"),
            UpdateStage::Error => write!(f, "ERROR"),
        }
    }
}

impl SubStage for UpdateStage {
    const INITIAL: Self = UpdateStage::ValidateInput;
    const SUCCESS: Self = UpdateStage::Success;
    const ERROR: Self = UpdateStage::Error;
}

/// State carried between update substages and kept for resume.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    request: UpdateRequest,
    account: Option<Account>,
    /// Credential after APPLY_CREDENTIAL, when the request carried one.
    credential: Option<Credential>,
    /// Claim held before APPLY_CREDENTIAL, released once the account has
    /// moved to a new identity.
    previous_claim: Option<IdentityClaim>,
    rotated: bool,
}

impl UpdateContext {
    fn account(&self) -> Result<&Account> {
        self.account
            .as_ref()
            .ok_or_else(|| AccountError::InvalidRequest("account has not been loaded".into()))
    }
}

/// Applies credential, tag, property and owner changes to one account.
pub struct UpdateWorkflow {
    deps: Arc<Collaborators>,
}

impl UpdateWorkflow {
    pub fn new(deps: Arc<Collaborators>) -> Self {
        Self { deps }
    }

    async fn run(&self, stage: UpdateStage, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        match stage {
            UpdateStage::ValidateInput => self.validate_input(ctx).await,
            UpdateStage::CheckDuplicate => self.check_duplicate(ctx).await,
            UpdateStage::ApplyCredential => self.apply_credential(ctx).await,
            UpdateStage::ApplyTagsAndProperties => self.apply_tags_and_properties(ctx).await,
            UpdateStage::ProvisionUsageReport => self.provision_usage_report(ctx).await,
            UpdateStage::ApplyOwners => self.apply_owners(ctx).await,
            UpdateStage::SignalEnumeration => self.signal_enumeration(ctx),
            UpdateStage::Success | UpdateStage::Error => Ok(Step::Finish),
        }
    }

    async fn validate_input(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let request = &ctx.request;
        if !request.has_mutators() {
            return Err(AccountError::NothingToUpdate);
        }
        if request.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AccountError::NameRequired);
        }
        if request.tag_updates.iter().any(|u| u.spec().is_blank()) {
            return Err(AccountError::TagNullEmpty);
        }

        let account = self.deps.load_active(&request.account_ref).await?;
        ctx.account = Some(account);
        Ok(Step::Advance(UpdateStage::CheckDuplicate))
    }

    async fn check_duplicate(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let account = ctx.account()?;
        let request = &ctx.request;

        let bucket = request
            .property_updates
            .get(BILLS_BUCKET)
            .filter(|u| u.action == CollectionAction::Add)
            .map(|u| u.value.clone());
        // A differently shaped credential is rejected by APPLY_CREDENTIAL with
        // the field it lacks; only a well-formed rotation is checked here.
        let credential = request
            .credential()
            .and_then(|input| input.parse_as(account.credential_kind).ok())
            .map(|c| (account.provider_type, c.identity(account.region.as_deref())));

        let query = DuplicateQuery {
            credential,
            bucket,
            exclude: Some(account.id.clone()),
        };
        self.deps
            .duplicates
            .ensure_unique(&account.org_ref, &query)
            .await?;
        Ok(Step::Advance(UpdateStage::ApplyCredential))
    }

    async fn apply_credential(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let Some(input) = ctx.request.credential() else {
            return Ok(Step::Advance(UpdateStage::ApplyTagsAndProperties));
        };
        let mut account = self.deps.load_active(&ctx.account()?.id).await?;
        let next = credential::validate(account.credential_kind, input)?;
        let identity = next.identity(account.region.as_deref());
        let previous = ctx
            .previous_claim
            .get_or_insert_with(|| IdentityClaim::for_account(&account))
            .clone();
        if identity != account.credential_identity {
            let claim = IdentityClaim::new(&account.org_ref, account.provider_type, &identity, &account.id);
            self.deps.claim_identity(&claim).await?;
        }

        let mut doc = self
            .deps
            .store
            .get_credential(&account.credential_ref)
            .await?
            .ok_or_else(|| StoreError::NotFound(account.credential_ref.clone()))?;

        if credential::is_rotation(&doc.credential, &next) {
            doc.credential = next.clone();
            doc.updated_at = Utc::now();
            self.deps.store.replace_credential(&doc).await?;
            ctx.rotated = true;
            tracing::info!(account_id = %account.id, kind = %next.kind(), "credential rotated");
        }

        if identity != account.credential_identity {
            account.credential_identity = identity;
            self.deps.save(&mut account).await?;
        }
        if previous.identity != account.credential_identity {
            self.deps
                .store
                .release_claim(&previous.id, &account.id)
                .await?;
        }
        ctx.credential = Some(next);
        ctx.account = Some(account);
        Ok(Step::Advance(UpdateStage::ApplyTagsAndProperties))
    }

    async fn apply_tags_and_properties(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let request = &ctx.request;
        let mut account = self.deps.load_active(&ctx.account()?.id).await?;
        let before = account.clone();

        if let Some(name) = &request.name {
            account.name = name.clone();
        }
        if let Some(description) = &request.description {
            account.description = Some(description.clone());
        }

        let (adds, removes) = request.tag_changes();
        if !adds.is_empty() || !removes.is_empty() {
            account.tag_refs = self
                .deps
                .tags
                .reconcile(&account.org_ref, &account.tag_refs, &adds, &removes)
                .await?;
        }
        account.custom_properties = patcher::apply(&account.custom_properties, &request.property_updates);
        account.service_tags = patcher::apply_set(&account.service_tags, &request.service_tag_updates);

        if account != before {
            self.deps.save(&mut account).await?;
        }
        ctx.account = Some(account);
        Ok(Step::Advance(UpdateStage::ProvisionUsageReport))
    }

    /// Runs only when the update adds every billing property at once.
    async fn provision_usage_report(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let next = Step::Advance(UpdateStage::ApplyOwners);
        if !patcher::adds_all_billing(&ctx.request.property_updates) {
            return Ok(next);
        }
        let account = ctx.account()?;
        if self.deps.suppress_remote_calls {
            tracing::debug!(account_id = %account.id, "remote calls suppressed; skipping usage report");
            return Ok(next);
        }
        let BillingConfig::Complete {
            bucket,
            prefix,
            report_name,
        } = account.billing()
        else {
            return Ok(next);
        };

        let credential = match &ctx.credential {
            Some(credential) => credential.clone(),
            None => {
                self.deps
                    .store
                    .get_credential(&account.credential_ref)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(account.credential_ref.clone()))?
                    .credential
            }
        };
        self.deps
            .reports
            .ensure(account.provider_type, &credential, bucket, prefix, report_name)
            .await?;
        Ok(next)
    }

    async fn apply_owners(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        let updates = &ctx.request.owner_updates;
        if !updates.is_empty() {
            let mut account = self.deps.load_active(&ctx.account()?.id).await?;
            let owners = self
                .deps
                .owners
                .sync(&account.org_ref, &account.id, &account.owner_identities, updates)
                .await?;
            if owners != account.owner_identities {
                account.owner_identities = owners;
                self.deps.save(&mut account).await?;
            }
            ctx.account = Some(account);
        }
        Ok(Step::Advance(UpdateStage::SignalEnumeration))
    }

    fn signal_enumeration(&self, ctx: &mut UpdateContext) -> Result<Step<UpdateStage>> {
        if ctx.rotated {
            let account = ctx.account()?;
            self.deps.signal.request_enumeration(EnumerationRequest {
                account_id: account.id.clone(),
                org_ref: account.org_ref.clone(),
            });
            tracing::debug!(account_id = %account.id, "re-enumeration requested");
        }
        Ok(Step::Finish)
    }
}

#[async_trait]
impl Workflow for UpdateWorkflow {
    type Request = UpdateRequest;
    type Stage = UpdateStage;
    type Context = UpdateContext;

    const NAME: &'static str = "update";

    fn check_shape(&self, request: &UpdateRequest) -> Result<()> {
        if request.account_ref.trim().is_empty() {
            return Err(AccountError::InvalidRequest("accountRef is required".into()));
        }
        Ok(())
    }

    fn mode(&self, request: &UpdateRequest) -> ExecutionMode {
        request.mode
    }

    fn init(&self, request: UpdateRequest) -> UpdateContext {
        UpdateContext {
            request,
            account: None,
            credential: None,
            previous_claim: None,
            rotated: false,
        }
    }

    async fn handle(&self, stage: UpdateStage, ctx: &mut UpdateContext) -> Step<UpdateStage> {
        self.run(stage, ctx).await.unwrap_or_else(Step::Fail)
    }

    fn resource_ref(&self, ctx: &UpdateContext) -> Option<String> {
        ctx.account
            .as_ref()
            .map(|a| a.id.clone())
            .or_else(|| Some(ctx.request.account_ref.clone()))
    }
}
