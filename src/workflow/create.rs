use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::requests::CreateRequest;
use super::{Collaborators, check_tags};
use crate::engine::{ExecutionMode, Step, SubStage, Workflow};
use crate::error::{AccountError, Result};
use crate::model::{
    Account, AccountStatus, BILLS_BUCKET, BillingConfig, Credential, CredentialDocument,
    IdentityClaim, ProviderType,
};
use crate::reconcile::{DuplicateQuery, OwnerUpdate};

/// Substages of a create, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateStage {
    ValidateInput,
    CheckDuplicate,
    CreateCredentialAndAccount,
    ReconcileTags,
    SyncOwners,
    ProvisionUsageReport,
    CreateAuthzArtifacts,
    Success,
    Error,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateStage::ValidateInput => write!(f, "VALIDATE_INPUT"),
            CreateStage::CheckDuplicate => write!(f, "CHECK_DUPLICATE"),
            CreateStage::CreateCredentialAndAccount => write!(f, "CREATE_CREDENTIAL_AND_ACCOUNT"),
            CreateStage::ReconcileTags => write!(f, "RECONCILE_TAGS"),
            CreateStage::SyncOwners => write!(f, "SYNC_OWNERS"),
            CreateStage::ProvisionUsageReport => write!(f, "PROVISION_USAGE_REPORT"),
            CreateStage::CreateAuthzArtifacts => write!(f, "CREATE_AUTHZ_ARTIFACTS"),
            CreateStage::Success => write!(f, "SUCCESS"),
            CreateStage::Error => write!(f, "ERROR"),
        }
    }
}

impl SubStage for CreateStage {
    const INITIAL: Self = CreateStage::ValidateInput;
    const SUCCESS: Self = CreateStage::Success;
    const ERROR: Self = CreateStage::Error;
}

/// State carried between create substages and kept for resume.
#[derive(Debug, Clone)]
pub struct CreateContext {
    request: CreateRequest,
    /// Assigned up front so a resumed task creates the same account.
    account_id: String,
    credential: Option<Credential>,
    account: Option<Account>,
}

impl CreateContext {
    fn provider(&self) -> Result<ProviderType> {
        self.request
            .provider_type
            .ok_or(AccountError::ProviderTypeRequired)
    }

    fn credential(&self) -> Result<&Credential> {
        self.credential
            .as_ref()
            .ok_or_else(|| AccountError::InvalidRequest("credential has not been validated".into()))
    }

    fn account_id(&self) -> Result<&str> {
        self.account
            .as_ref()
            .map(|a| a.id.as_str())
            .ok_or_else(|| AccountError::InvalidRequest("account has not been created".into()))
    }
}

/// Validates, deduplicates and persists a new account, then attaches its
/// tags, owners, usage report and authorization group.
pub struct CreateWorkflow {
    deps: Arc<Collaborators>,
}

impl CreateWorkflow {
    pub fn new(deps: Arc<Collaborators>) -> Self {
        Self { deps }
    }

    async fn run(&self, stage: CreateStage, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        match stage {
            CreateStage::ValidateInput => self.validate_input(ctx),
            CreateStage::CheckDuplicate => self.check_duplicate(ctx).await,
            CreateStage::CreateCredentialAndAccount => self.create_records(ctx).await,
            CreateStage::ReconcileTags => self.reconcile_tags(ctx).await,
            CreateStage::SyncOwners => self.sync_owners(ctx).await,
            CreateStage::ProvisionUsageReport => self.provision_usage_report(ctx).await,
            CreateStage::CreateAuthzArtifacts => self.create_authz_artifacts(ctx).await,
            CreateStage::Success | CreateStage::Error => Ok(Step::Finish),
        }
    }

    fn validate_input(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        let request = &ctx.request;
        if request.name.trim().is_empty() {
            return Err(AccountError::NameRequired);
        }
        let provider = ctx.provider()?;
        let credential = request
            .credential
            .parse_as(request.credential.kind_for(provider))?;
        check_tags(&request.tags)?;

        ctx.credential = Some(credential);
        Ok(Step::Advance(CreateStage::CheckDuplicate))
    }

    async fn check_duplicate(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        let identity = ctx.credential()?.identity(ctx.request.region.as_deref());
        let query = DuplicateQuery {
            credential: Some((ctx.provider()?, identity)),
            bucket: ctx.request.custom_properties.get(BILLS_BUCKET).cloned(),
            exclude: None,
        };
        self.deps
            .duplicates
            .ensure_unique(&ctx.request.org_ref, &query)
            .await?;
        Ok(Step::Advance(CreateStage::CreateCredentialAndAccount))
    }

    async fn create_records(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        if ctx.account.is_some() {
            return Ok(Step::Advance(CreateStage::ReconcileTags));
        }

        let request = &ctx.request;
        let provider = ctx.provider()?;
        let credential = ctx.credential()?.clone();
        let identity = credential.identity(request.region.as_deref());
        let id = ctx.account_id.clone();

        // Two creates for the same principal can both pass CHECK_DUPLICATE;
        // only one of them gets the claim.
        let claim = IdentityClaim::new(&request.org_ref, provider, &identity, &id);
        self.deps.claim_identity(&claim).await?;

        let doc = CredentialDocument::new(&id, &request.org_ref, credential.clone());
        let now = Utc::now();
        let account = Account {
            id: id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            provider_type: provider,
            credential_ref: doc.id.clone(),
            credential_kind: credential.kind(),
            credential_identity: identity,
            region: request.region.clone(),
            custom_properties: request.custom_properties.clone(),
            tag_refs: BTreeSet::new(),
            owner_identities: BTreeSet::new(),
            org_ref: request.org_ref.clone(),
            service_tags: request.service_tags.clone(),
            status: AccountStatus::Active,
            created_by: request.created_by.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let stored = match self.deps.store.insert_account(&account).await {
            Ok(stored) => stored,
            Err(e) => {
                self.undo_claim(&claim).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.deps.store.insert_credential(&doc).await {
            if let Err(undo) = self.deps.store.delete_account(&id).await {
                tracing::warn!(account_id = %id, "failed to remove account after credential insert failed: {undo}");
            }
            self.undo_claim(&claim).await;
            return Err(e.into());
        }

        tracing::info!(account_id = %id, name = %stored.name, %provider, "account created");
        ctx.account = Some(stored);
        Ok(Step::Advance(CreateStage::ReconcileTags))
    }

    async fn undo_claim(&self, claim: &IdentityClaim) {
        if let Err(undo) = self.deps.store.release_claim(&claim.id, &claim.account_id).await {
            tracing::warn!(account_id = %claim.account_id, "failed to release identity claim: {undo}");
        }
    }

    async fn reconcile_tags(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        if !ctx.request.tags.is_empty() {
            let mut account = self.deps.load_active(ctx.account_id()?).await?;
            let refs = self
                .deps
                .tags
                .reconcile(&account.org_ref, &account.tag_refs, &ctx.request.tags, &[])
                .await?;
            if refs != account.tag_refs {
                account.tag_refs = refs;
                self.deps.save(&mut account).await?;
            }
            ctx.account = Some(account);
        }
        Ok(Step::Advance(CreateStage::SyncOwners))
    }

    /// Owners are validated and recorded here; they join the authorization
    /// group when it is created.
    async fn sync_owners(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        let updates: Vec<OwnerUpdate> = ctx
            .request
            .owners
            .iter()
            .map(|o| OwnerUpdate::add(o.as_str()))
            .collect();
        if !updates.is_empty() {
            let mut account = self.deps.load_active(ctx.account_id()?).await?;
            let plan = self
                .deps
                .owners
                .resolve(&account.org_ref, &account.owner_identities, &updates)
                .await?;
            if plan.owners != account.owner_identities {
                account.owner_identities = plan.owners;
                self.deps.save(&mut account).await?;
            }
            ctx.account = Some(account);
        }
        Ok(Step::Advance(CreateStage::ProvisionUsageReport))
    }

    async fn provision_usage_report(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        let account = self.deps.load_active(ctx.account_id()?).await?;
        match account.billing() {
            BillingConfig::Complete { .. } if self.deps.suppress_remote_calls => {
                tracing::debug!(account_id = %account.id, "remote calls suppressed; skipping usage report");
            }
            BillingConfig::Complete {
                bucket,
                prefix,
                report_name,
            } => {
                self.deps
                    .reports
                    .ensure(
                        account.provider_type,
                        ctx.credential()?,
                        bucket,
                        prefix,
                        report_name,
                    )
                    .await?;
            }
            BillingConfig::Partial | BillingConfig::Absent => {}
        }
        Ok(Step::Advance(CreateStage::CreateAuthzArtifacts))
    }

    async fn create_authz_artifacts(&self, ctx: &mut CreateContext) -> Result<Step<CreateStage>> {
        let account = self.deps.load_active(ctx.account_id()?).await?;
        let mut members = account.owner_identities.clone();
        members.extend(account.created_by.clone());
        self.deps
            .authz
            .create_account_group(&account.id, &account.org_ref, &members)
            .await?;
        tracing::debug!(account_id = %account.id, members = members.len(), "authorization group created");
        ctx.account = Some(account);
        Ok(Step::Finish)
    }
}

#[async_trait]
impl Workflow for CreateWorkflow {
    type Request = CreateRequest;
    type Stage = CreateStage;
    type Context = CreateContext;

    const NAME: &'static str = "create";

    fn check_shape(&self, request: &CreateRequest) -> Result<()> {
        if request.org_ref.trim().is_empty() {
            return Err(AccountError::InvalidRequest("orgRef is required".into()));
        }
        Ok(())
    }

    fn mode(&self, request: &CreateRequest) -> ExecutionMode {
        request.mode
    }

    fn init(&self, request: CreateRequest) -> CreateContext {
        CreateContext {
            request,
            account_id: Account::new_id(),
            credential: None,
            account: None,
        }
    }

    async fn handle(&self, stage: CreateStage, ctx: &mut CreateContext) -> Step<CreateStage> {
        self.run(stage, ctx).await.unwrap_or_else(Step::Fail)
    }

    fn resource_ref(&self, ctx: &CreateContext) -> Option<String> {
        ctx.account.as_ref().map(|a| a.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::AuthzStore;
    use crate::config::AccountsConfig;
    use crate::engine::TaskStage;
    use crate::error::{ErrorCode, FailureClass};
    use crate::model::{BILLS_PREFIX, CredentialInput, TagSpec, USAGE_REPORT_NAME};
    use crate::provider::MockAdapter;
    use crate::store::{DocumentStore, TagQuery};
    use crate::workflow::testing::*;

    fn with_bucket(mut request: CreateRequest, bucket: &str) -> CreateRequest {
        request
            .custom_properties
            .insert(BILLS_BUCKET.to_string(), bucket.to_string());
        request
    }

    fn with_billing(request: CreateRequest, bucket: &str, prefix: &str, report: &str) -> CreateRequest {
        let mut request = with_bucket(request, bucket);
        request
            .custom_properties
            .insert(BILLS_PREFIX.to_string(), prefix.to_string());
        request
            .custom_properties
            .insert(USAGE_REPORT_NAME.to_string(), report.to_string());
        request
    }

    #[tokio::test]
    async fn second_account_on_same_bucket_fails_naming_first() {
        let h = harness().await;
        let a = h
            .service
            .create(with_bucket(aws_create("acct-a", "ak"), "b1"))
            .await
            .unwrap();
        assert_eq!(a.stage, TaskStage::Finished);
        assert_eq!(a.sub_stage, CreateStage::Success);

        let b = h
            .service
            .create(with_bucket(aws_create("acct-b", "ak2"), "b1"))
            .await
            .unwrap();
        assert_eq!(b.stage, TaskStage::Failed);
        assert_eq!(b.failed_at, Some(CreateStage::CheckDuplicate));
        let failure = b.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::EndpointWithBucketAlreadyExists);
        assert_eq!(failure.status_code, 409);
        let existing = failure.conflicting.unwrap();
        assert_eq!(existing.name, "acct-a");
        assert_eq!(Some(existing.id), a.resource_ref);

        assert_eq!(h.service.list_accounts("org").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_principal_twice_is_already_exists() {
        let h = harness().await;
        h.service.create(aws_create("acct-a", "ak")).await.unwrap();
        let again = h.service.create(aws_create("acct-a2", "ak")).await.unwrap();
        let failure = again.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::EndpointAlreadyExists);
        assert_eq!(failure.conflicting.unwrap().name, "acct-a");
    }

    #[tokio::test]
    async fn identity_of_a_deleting_account_is_available() {
        let h = harness().await;
        let a = h
            .service
            .create(aws_create("acct-a", "ak"))
            .await
            .unwrap()
            .resource_ref
            .unwrap();
        // A delete that stopped after claiming the account leaves it DELETING.
        let mut account = h.store.get_account(&a).await.unwrap().unwrap();
        account.status = AccountStatus::Deleting;
        h.store.replace_account(&account).await.unwrap();

        let b = h.service.create(aws_create("acct-b", "ak")).await.unwrap();
        assert_eq!(b.stage, TaskStage::Finished);
        let claim_id = IdentityClaim::derive_id("org", ProviderType::Aws, "ak");
        assert_eq!(
            h.store.get_claim(&claim_id).await.unwrap().unwrap().account_id,
            b.resource_ref.unwrap()
        );
    }

    #[tokio::test]
    async fn creates_account_credential_tags_and_group() {
        let h = harness().await;
        let mut request = aws_create("acct-a", "ak");
        request.tags = vec![TagSpec::new("env", "prod")];
        request.owners = vec!["bob".into()];
        request.region = Some("us-east-1".into());

        let task = h.service.create(request).await.unwrap();
        assert_eq!(task.stage, TaskStage::Finished);
        assert_eq!(
            task.stage_history,
            vec![
                CreateStage::ValidateInput,
                CreateStage::CheckDuplicate,
                CreateStage::CreateCredentialAndAccount,
                CreateStage::ReconcileTags,
                CreateStage::SyncOwners,
                CreateStage::ProvisionUsageReport,
                CreateStage::CreateAuthzArtifacts,
            ]
        );

        let id = task.resource_ref.unwrap();
        let account = h.service.get_account(&id).await.unwrap();
        assert_eq!(account.credential_identity, "ak");
        assert_eq!(account.owner_identities, BTreeSet::from(["bob".to_string()]));
        assert_eq!(account.tag_refs.len(), 1);

        let doc = h
            .store
            .get_credential(&account.credential_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.credential.identity(None), "ak");

        let members = h.authz.group_members(&id).await.unwrap().unwrap();
        assert_eq!(members, BTreeSet::from(["alice".to_string(), "bob".to_string()]));

        let tags = h.store.query_tags(&TagQuery::default()).await.unwrap();
        assert_eq!(tags[0].tenant_scope, "org");
    }

    #[tokio::test]
    async fn missing_org_is_rejected_without_a_task() {
        let h = harness().await;
        let mut request = aws_create("acct-a", "ak");
        request.org_ref = String::new();
        let err = h.service.create(request).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert!(h.service.list_accounts("org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn input_errors_fail_in_validate_input() {
        let h = harness().await;

        let mut request = aws_create("", "ak");
        let task = h.service.create(request.clone()).await.unwrap();
        assert_eq!(task.failed_at, Some(CreateStage::ValidateInput));
        assert_eq!(task.failure.unwrap().code, ErrorCode::EndpointNameRequired);

        request.name = "acct".into();
        request.provider_type = None;
        let task = h.service.create(request.clone()).await.unwrap();
        assert_eq!(task.failure.unwrap().code, ErrorCode::EndpointTypeRequired);

        request.provider_type = Some(ProviderType::Aws);
        request.credential = CredentialInput {
            access_key_id: Some("ak".into()),
            ..Default::default()
        };
        let task = h.service.create(request.clone()).await.unwrap();
        let failure = task.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::CredentialsRequired);
        assert!(failure.message.contains("secretKey"));

        request.credential = CredentialInput::keys("ak", "sk");
        request.tags = vec![TagSpec::new("env", " ")];
        let task = h.service.create(request).await.unwrap();
        let failure = task.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::EndpointTagNullEmpty);
        assert_eq!(failure.class, FailureClass::Validation);
    }

    #[tokio::test]
    async fn invalid_owner_fails_and_resume_completes_once_fixed() {
        let h = harness().await;
        let mut request = aws_create("acct-a", "ak");
        request.owners = vec!["bob".into(), "dave".into()];

        let failed = h.service.create(request).await.unwrap();
        assert_eq!(failed.failed_at, Some(CreateStage::SyncOwners));
        assert_eq!(failed.failure.unwrap().code, ErrorCode::InvalidEndpointOwner);
        let id = failed.resource_ref.clone().unwrap();
        assert!(h.authz.group_members(&id).await.unwrap().is_none());

        h.authz.add_org_member("org", "dave").await;
        let resumed = h.service.creates().resume(&failed.id).await.unwrap();
        assert_eq!(resumed.stage, TaskStage::Finished);
        assert_eq!(resumed.stage_history[0], CreateStage::SyncOwners);
        assert_eq!(resumed.resource_ref.as_deref(), Some(id.as_str()));

        assert_eq!(h.service.list_accounts("org").await.unwrap().len(), 1);
        let members = h.authz.group_members(&id).await.unwrap().unwrap();
        assert!(members.contains("dave") && members.contains("bob"));
    }

    #[tokio::test]
    async fn complete_billing_provisions_report() {
        let h = harness().await;
        let request = with_billing(aws_create("acct-a", "ak"), "b1", "cur", "daily");
        let task = h.service.create(request).await.unwrap();
        assert_eq!(task.stage, TaskStage::Finished);
        assert_eq!(h.adapter.create_calls(), 1);
        assert_eq!(h.adapter.report("daily").unwrap().bucket, "b1");
    }

    #[tokio::test]
    async fn partial_billing_is_metadata_only() {
        let h = harness().await;
        let task = h
            .service
            .create(with_bucket(aws_create("acct-a", "ak"), "b1"))
            .await
            .unwrap();
        assert_eq!(task.stage, TaskStage::Finished);
        assert_eq!(h.adapter.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn suppressed_remote_calls_skip_provisioning() {
        let h = harness_with(
            MockAdapter::new().with_denied_bucket("b1"),
            AccountsConfig {
                suppress_remote_calls: true,
                ..Default::default()
            },
        )
        .await;
        let request = with_billing(aws_create("acct-a", "ak"), "b1", "cur", "daily");
        let task = h.service.create(request).await.unwrap();
        assert_eq!(task.stage, TaskStage::Finished);
        assert_eq!(h.adapter.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn denied_bucket_fails_as_upstream_after_commit() {
        let h = harness_with(MockAdapter::new().with_denied_bucket("b1"), AccountsConfig::default()).await;
        let request = with_billing(aws_create("acct-a", "ak"), "b1", "cur", "daily");
        let task = h.service.create(request).await.unwrap();

        assert_eq!(task.failed_at, Some(CreateStage::ProvisionUsageReport));
        let failure = task.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::S3BucketPermissionsError);
        assert_eq!(failure.status_code, 502);
        // Earlier substages stay committed.
        assert!(h.service.get_account(&task.resource_ref.unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn queued_create_completes_in_background() {
        let h = harness().await;
        let mut request = aws_create("acct-a", "ak");
        request.mode = ExecutionMode::Queued;

        let task = h.service.create(request).await.unwrap();
        assert_eq!(task.stage, TaskStage::Created);
        let done = h.service.creates().wait(&task.id).await.unwrap();
        assert_eq!(done.stage, TaskStage::Finished);
        assert!(done.resource_ref.is_some());
    }
}
