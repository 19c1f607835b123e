//! Drives batches of account operations for the command line.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::authz::MemoryAuthz;
use crate::config::AccountsConfig;
use crate::engine::{Task, TaskFailure, TaskStage, Workflow, WorkflowEngine};
use crate::error::Result;
use crate::model::{BILLS_BUCKET, CredentialInput, ProviderType};
use crate::provider::{AdapterRegistry, HttpAdapter, MockAdapter, ProviderAdapter, ProviderError};
use crate::signal::EnumerationSignal;
use crate::store::MemoryStore;
use crate::workflow::{
    AccountService, Collaborators, CreateRequest, DeleteRequest, TagUpdate, UpdateRequest,
    ValidateRequest,
};

const PROVIDERS: [ProviderType; 4] = [
    ProviderType::Aws,
    ProviderType::Azure,
    ProviderType::AzureEa,
    ProviderType::Vsphere,
];

/// One entry of an operations file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Create(CreateRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Validate(ValidateRequest),
}

impl Operation {
    pub fn label(&self) -> String {
        match self {
            Operation::Create(r) => format!("create {}", r.name),
            Operation::Update(r) => format!("update {}", r.account_ref),
            Operation::Delete(r) => format!("delete {}", r.account_ref),
            Operation::Validate(r) => format!("validate in {}", r.org_ref),
        }
    }
}

/// Terminal state of one operation, independent of the workflow type.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub workflow: String,
    pub stage: TaskStage,
    pub failure: Option<TaskFailure>,
    pub resource_ref: Option<String>,
    pub document: serde_json::Value,
}

impl Outcome {
    fn from_task<S: Serialize>(task: &Task<S>) -> Self {
        Self {
            workflow: task.workflow.clone(),
            stage: task.stage,
            failure: task.failure.clone(),
            resource_ref: task.resource_ref.clone(),
            document: serde_json::to_value(task).unwrap_or_default(),
        }
    }
}

/// Builds the adapters named by the config: the HTTP adapter service for
/// every provider when a URL is set, the in-memory adapter otherwise.
pub fn adapters(config: &AccountsConfig) -> std::result::Result<AdapterRegistry, ProviderError> {
    let mut registry = AdapterRegistry::new();
    match &config.adapter_base_url {
        Some(url) => {
            for provider in PROVIDERS {
                let adapter = HttpAdapter::new(url.as_str(), provider, config.adapter_timeout())?;
                registry = registry.register(provider, Arc::new(adapter));
            }
        }
        None => {
            let mock: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new());
            for provider in PROVIDERS {
                registry = registry.register(provider, Arc::clone(&mock));
            }
        }
    }
    Ok(registry)
}

/// Runs operations in order against an in-process store.
pub struct Orchestrator {
    service: AccountService,
    authz: Arc<MemoryAuthz>,
    orgs: BTreeSet<String>,
}

impl Orchestrator {
    pub fn new(
        config: &AccountsConfig,
        adapters: AdapterRegistry,
        signal: Arc<dyn EnumerationSignal>,
    ) -> Self {
        let authz = Arc::new(MemoryAuthz::new());
        let deps = Collaborators::new(
            Arc::new(MemoryStore::new()),
            authz.clone(),
            adapters,
            signal,
            config,
        );
        Self {
            service: AccountService::new(deps),
            authz,
            orgs: BTreeSet::new(),
        }
    }

    pub fn service(&self) -> &AccountService {
        &self.service
    }

    pub async fn add_member(&self, org_ref: &str, identity: &str) {
        self.authz.add_org_member(org_ref, identity).await;
    }

    /// Runs one operation to completion. Queued operations are waited on.
    ///
    /// `Err` means the request was rejected before a task existed.
    pub async fn execute(&mut self, operation: Operation) -> Result<Outcome> {
        match operation {
            Operation::Create(request) => {
                self.orgs.insert(request.org_ref.clone());
                let task = self.service.create(request).await?;
                Ok(settle(self.service.creates(), task).await)
            }
            Operation::Update(mut request) => {
                request.account_ref = self.resolve_ref(&request.account_ref).await;
                let task = self.service.update(request).await?;
                Ok(settle(self.service.updates(), task).await)
            }
            Operation::Delete(mut request) => {
                request.account_ref = self.resolve_ref(&request.account_ref).await;
                let task = self.service.delete(request).await?;
                Ok(settle(self.service.deletes(), task).await)
            }
            Operation::Validate(request) => {
                let task = self.service.validate(request).await?;
                Ok(settle(self.service.validations(), task).await)
            }
        }
    }

    /// Ids are assigned at create, so files usually name accounts instead. A reference
    /// that is not a known id is looked up by name in the orgs seen so far.
    async fn resolve_ref(&self, reference: &str) -> String {
        if self.service.get_account(reference).await.is_ok() {
            return reference.to_string();
        }
        for org in &self.orgs {
            let Ok(accounts) = self.service.list_accounts(org).await else {
                continue;
            };
            if let Some(account) = accounts.into_iter().find(|a| a.name == reference) {
                tracing::debug!(name = reference, id = %account.id, "resolved account by name");
                return account.id;
            }
        }
        reference.to_string()
    }
}

async fn settle<W: Workflow>(engine: &WorkflowEngine<W>, task: Task<W::Stage>) -> Outcome {
    if task.is_terminal() {
        return Outcome::from_task(&task);
    }
    match engine.wait(&task.id).await {
        Some(done) => Outcome::from_task(&done),
        None => Outcome::from_task(&task),
    }
}

/// Org used by the `demo` command.
pub const DEMO_ORG: &str = "demo-org";

/// Two accounts competing for one bucket, then a tag add and remove.
pub fn demo_operations() -> Vec<Operation> {
    let create = |name: &str, key: &str| CreateRequest {
        name: name.to_string(),
        provider_type: Some(ProviderType::Aws),
        credential: CredentialInput::keys(key, format!("{key}-secret")),
        custom_properties: [(BILLS_BUCKET.to_string(), "b1".to_string())].into(),
        org_ref: DEMO_ORG.to_string(),
        created_by: Some("alice".to_string()),
        ..Default::default()
    };

    let mut add_tags = UpdateRequest::new("acct-a");
    add_tags.tag_updates = vec![TagUpdate::add("k1", "v1"), TagUpdate::add("k2", "v2")];
    let mut remove_tag = UpdateRequest::new("acct-a");
    remove_tag.tag_updates = vec![TagUpdate::remove("k1", "v1")];

    vec![
        Operation::Create(create("acct-a", "ak")),
        Operation::Create(create("acct-b", "ak2")),
        Operation::Update(add_tags),
        Operation::Update(remove_tag),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionMode;
    use crate::error::ErrorCode;
    use crate::signal::ChannelSignal;

    fn orchestrator() -> Orchestrator {
        let config = AccountsConfig::default();
        let (signal, _) = ChannelSignal::new();
        Orchestrator::new(&config, adapters(&config).unwrap(), Arc::new(signal))
    }

    #[tokio::test]
    async fn demo_runs_to_expected_outcomes() {
        let mut orch = orchestrator();
        let mut stages = Vec::new();
        for op in demo_operations() {
            stages.push(orch.execute(op).await.unwrap());
        }

        assert_eq!(stages[0].stage, TaskStage::Finished);
        let conflict = stages[1].failure.as_ref().unwrap();
        assert_eq!(conflict.code, ErrorCode::EndpointWithBucketAlreadyExists);
        assert_eq!(conflict.conflicting.as_ref().unwrap().name, "acct-a");
        assert_eq!(stages[2].stage, TaskStage::Finished);
        assert_eq!(stages[3].stage, TaskStage::Finished);

        let accounts = orch.service().list_accounts(DEMO_ORG).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].tag_refs.len(), 1);
        assert_eq!(stages[3].resource_ref.as_deref(), Some(accounts[0].id.as_str()));
    }

    #[tokio::test]
    async fn operations_file_parses_and_queued_ops_are_waited_on() {
        let ops: Vec<Operation> = serde_json::from_str(
            r#"[
                {"op": "create", "name": "a", "providerType": "aws",
                 "credential": {"accessKeyId": "ak", "secretKey": "sk"},
                 "orgRef": "org", "owners": ["bob"], "mode": "queued"},
                {"op": "validate", "providerType": "aws",
                 "credential": {"accessKeyId": "ak", "secretKey": "sk"}, "orgRef": "org"},
                {"op": "delete", "accountRef": "a"}
            ]"#,
        )
        .unwrap();
        assert!(matches!(&ops[0], Operation::Create(r) if r.mode == ExecutionMode::Queued));

        let mut orch = orchestrator();
        orch.add_member("org", "bob").await;
        let mut ops = ops.into_iter();

        let created = orch.execute(ops.next().unwrap()).await.unwrap();
        assert_eq!(created.stage, TaskStage::Finished);
        assert_eq!(created.document["stage"], "FINISHED");

        let validated = orch.execute(ops.next().unwrap()).await.unwrap();
        assert_eq!(
            validated.failure.unwrap().code,
            ErrorCode::EndpointAlreadyExists
        );

        let deleted = orch.execute(ops.next().unwrap()).await.unwrap();
        assert_eq!(deleted.stage, TaskStage::Finished);
        assert!(orch.service().list_accounts("org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn structural_rejection_is_an_error() {
        let mut orch = orchestrator();
        let err = orch
            .execute(Operation::Delete(DeleteRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn http_adapters_when_url_configured() {
        let config = AccountsConfig {
            adapter_base_url: Some("http://adapter.local".into()),
            ..Default::default()
        };
        let registry = adapters(&config).unwrap();
        assert!(PROVIDERS.iter().all(|p| registry.get(*p).is_some()));
    }
}
