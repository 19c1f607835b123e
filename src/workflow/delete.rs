use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Collaborators;
use super::requests::DeleteRequest;
use crate::engine::{ExecutionMode, Step, SubStage, Workflow};
use crate::error::{AccountError, Result};
use crate::model::{Account, AccountStatus};
use crate::store::{StoreError, StoreResult};

/// Substages of a delete, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteStage {
    ValidateInput,
    LoadAccount,
    RevokeAuthz,
    DeleteAccountAndCredential,
    Success,
    Error,
}

impl fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteStage::ValidateInput => write!(f, "VALIDATE_INPUT"),
            DeleteStage::LoadAccount => write!(f, "LOAD_ACCOUNT"),
            DeleteStage::RevokeAuthz => write!(f, "REVOKE_AUTHZ"),
            DeleteStage::DeleteAccountAndCredential => write!(f, "DELETE_ACCOUNT_AND_CREDENTIAL"),
            DeleteStage::Success => write!(f, "SUCCESS"),
            DeleteStage::Error => write!(f, "ERROR"),
        }
    }
}

impl SubStage for DeleteStage {
    const INITIAL: Self = DeleteStage::ValidateInput;
    const SUCCESS: Self = DeleteStage::Success;
    const ERROR: Self = DeleteStage::Error;
}

#[derive(Debug, Clone)]
pub struct DeleteContext {
    request: DeleteRequest,
    account: Option<Account>,
}

impl DeleteContext {
    fn account(&self) -> Result<&Account> {
        self.account
            .as_ref()
            .ok_or_else(|| AccountError::InvalidRequest("account has not been loaded".into()))
    }
}

/// Tears an account down: authorization group first, then its documents.
pub struct DeleteWorkflow {
    deps: Arc<Collaborators>,
}

/// Treats an already-missing document as deleted.
fn gone(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}

impl DeleteWorkflow {
    pub fn new(deps: Arc<Collaborators>) -> Self {
        Self { deps }
    }

    async fn run(&self, stage: DeleteStage, ctx: &mut DeleteContext) -> Result<Step<DeleteStage>> {
        match stage {
            // A delete carries nothing beyond the reference, which
            // `check_shape` has already required before the task existed.
            DeleteStage::ValidateInput => Ok(Step::Advance(DeleteStage::LoadAccount)),
            DeleteStage::LoadAccount => self.load_account(ctx).await,
            DeleteStage::RevokeAuthz => {
                let account = ctx.account()?;
                self.deps.authz.delete_account_group(&account.id).await?;
                Ok(Step::Advance(DeleteStage::DeleteAccountAndCredential))
            }
            DeleteStage::DeleteAccountAndCredential => {
                let account = ctx.account()?;
                gone(self.deps.store.delete_credential(&account.credential_ref).await)?;
                gone(self.deps.store.delete_account(&account.id).await)?;
                self.deps.release_identity(account).await?;
                tracing::info!(account_id = %account.id, name = %account.name, "account deleted");
                Ok(Step::Finish)
            }
            DeleteStage::Success | DeleteStage::Error => Ok(Step::Finish),
        }
    }

    /// Marks the account DELETING so duplicate scans stop seeing it and
    /// releases its identity claim, freeing the credential for a new
    /// account. An account already DELETING is picked up as is.
    async fn load_account(&self, ctx: &mut DeleteContext) -> Result<Step<DeleteStage>> {
        let id = &ctx.request.account_ref;
        let mut account = self
            .deps
            .store
            .get_account(id)
            .await?
            .ok_or_else(|| AccountError::NotFound(id.clone()))?;

        if account.status == AccountStatus::Active {
            account.status = AccountStatus::Deleting;
            self.deps.save(&mut account).await?;
        }
        self.deps.release_identity(&account).await?;
        ctx.account = Some(account);
        Ok(Step::Advance(DeleteStage::RevokeAuthz))
    }
}

#[async_trait]
impl Workflow for DeleteWorkflow {
    type Request = DeleteRequest;
    type Stage = DeleteStage;
    type Context = DeleteContext;

    const NAME: &'static str = "delete";

    fn check_shape(&self, request: &DeleteRequest) -> Result<()> {
        if request.account_ref.trim().is_empty() {
            return Err(AccountError::InvalidRequest("accountRef is required".into()));
        }
        Ok(())
    }

    fn mode(&self, request: &DeleteRequest) -> ExecutionMode {
        request.mode
    }

    fn init(&self, request: DeleteRequest) -> DeleteContext {
        DeleteContext {
            request,
            account: None,
        }
    }

    async fn handle(&self, stage: DeleteStage, ctx: &mut DeleteContext) -> Step<DeleteStage> {
        self.run(stage, ctx).await.unwrap_or_else(Step::Fail)
    }

    fn resource_ref(&self, ctx: &DeleteContext) -> Option<String> {
        Some(ctx.request.account_ref.clone())
    }
}
