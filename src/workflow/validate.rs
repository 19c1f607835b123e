use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Collaborators;
use super::requests::ValidateRequest;
use crate::engine::{ExecutionMode, Step, SubStage, Workflow};
use crate::error::{AccountError, Result};
use crate::model::{BILLS_BUCKET, Credential};
use crate::reconcile::{DuplicateQuery, OwnerUpdate};

/// Substages of a dry-run validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidateStage {
    ValidateInput,
    CheckDuplicate,
    ValidateOwners,
    Success,
    Error,
}

impl fmt::Display for ValidateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidateStage::ValidateInput => write!(f, "VALIDATE_INPUT"),
            ValidateStage::CheckDuplicate => write!(f, "CHECK_DUPLICATE"),
            ValidateStage::ValidateOwners => write!(f, "VALIDATE_OWNERS"),
            ValidateStage::Success => write!(f, "SUCCESS"),
            ValidateStage::Error => write!(f, "ERROR"),
        }
    }
}

impl SubStage for ValidateStage {
    const INITIAL: Self = ValidateStage::ValidateInput;
    const SUCCESS: Self = ValidateStage::Success;
    const ERROR: Self = ValidateStage::Error;
}

#[derive(Debug, Clone)]
pub struct ValidateContext {
    request: ValidateRequest,
    credential: Option<Credential>,
}

/// Runs the create checks without writing anything.
pub struct ValidateWorkflow {
    deps: Arc<Collaborators>,
}

impl ValidateWorkflow {
    pub fn new(deps: Arc<Collaborators>) -> Self {
        Self { deps }
    }

    async fn run(&self, stage: ValidateStage, ctx: &mut ValidateContext) -> Result<Step<ValidateStage>> {
        let request = &ctx.request;
        match stage {
            ValidateStage::ValidateInput => {
                let provider = request
                    .provider_type
                    .ok_or(AccountError::ProviderTypeRequired)?;
                let credential = request
                    .credential
                    .parse_as(request.credential.kind_for(provider))?;
                ctx.credential = Some(credential);
                Ok(Step::Advance(ValidateStage::CheckDuplicate))
            }
            ValidateStage::CheckDuplicate => {
                let provider = request
                    .provider_type
                    .ok_or(AccountError::ProviderTypeRequired)?;
                let credential = ctx.credential.as_ref().ok_or_else(|| {
                    AccountError::InvalidRequest("credential has not been validated".into())
                })?;
                let query = DuplicateQuery {
                    credential: Some((provider, credential.identity(request.region.as_deref()))),
                    bucket: request.custom_properties.get(BILLS_BUCKET).cloned(),
                    exclude: None,
                };
                self.deps
                    .duplicates
                    .ensure_unique(&request.org_ref, &query)
                    .await?;
                Ok(Step::Advance(ValidateStage::ValidateOwners))
            }
            ValidateStage::ValidateOwners => {
                let updates: Vec<OwnerUpdate> = request
                    .owners
                    .iter()
                    .map(|o| OwnerUpdate::add(o.as_str()))
                    .collect();
                self.deps
                    .owners
                    .resolve(&request.org_ref, &BTreeSet::new(), &updates)
                    .await?;
                Ok(Step::Finish)
            }
            ValidateStage::Success | ValidateStage::Error => Ok(Step::Finish),
        }
    }
}

#[async_trait]
impl Workflow for ValidateWorkflow {
    type Request = ValidateRequest;
    type Stage = ValidateStage;
    type Context = ValidateContext;

    const NAME: &'static str = "validate";

    fn check_shape(&self, request: &ValidateRequest) -> Result<()> {
        if request.org_ref.trim().is_empty() {
            return Err(AccountError::InvalidRequest("orgRef is required".into()));
        }
        Ok(())
    }

    fn mode(&self, request: &ValidateRequest) -> ExecutionMode {
        request.mode
    }

    fn init(&self, request: ValidateRequest) -> ValidateContext {
        ValidateContext {
            request,
            credential: None,
        }
    }

    async fn handle(&self, stage: ValidateStage, ctx: &mut ValidateContext) -> Step<ValidateStage> {
        self.run(stage, ctx).await.unwrap_or_else(Step::Fail)
    }

    fn resource_ref(&self, _ctx: &ValidateContext) -> Option<String> {
        None
    }
}
