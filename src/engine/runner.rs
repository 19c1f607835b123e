use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use super::step::{self, Step, SubStage, Transition};
use super::task::{ExecutionMode, Task, TaskStage};
use crate::error::{AccountError, Result};

/// A workflow the engine can drive: a substage enum plus one handler.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Request: Send + 'static;
    type Stage: SubStage;
    /// Working state carried between substages. Saved after every handler
    /// so a failed task can be resumed from the substage that failed.
    type Context: Clone + Send + Sync + 'static;

    const NAME: &'static str;

    /// Structural validation. An error here is returned synchronously and
    /// no task is created.
    fn check_shape(&self, request: &Self::Request) -> Result<()>;

    fn mode(&self, request: &Self::Request) -> ExecutionMode;

    fn init(&self, request: Self::Request) -> Self::Context;

    /// Runs the handler of `stage`.
    async fn handle(&self, stage: Self::Stage, ctx: &mut Self::Context) -> Step<Self::Stage>;

    /// Account the task is acting on, once known.
    fn resource_ref(&self, ctx: &Self::Context) -> Option<String>;
}

struct Entry<W: Workflow> {
    tx: watch::Sender<Task<W::Stage>>,
    context: W::Context,
    cancel_requested: bool,
}

/// Drives tasks of one workflow type and keeps their documents.
pub struct WorkflowEngine<W: Workflow> {
    workflow: Arc<W>,
    // TODO: evict terminal entries once a retention window is configurable.
    tasks: Arc<RwLock<HashMap<String, Entry<W>>>>,
}

impl<W: Workflow> Clone for WorkflowEngine<W> {
    fn clone(&self) -> Self {
        Self {
            workflow: Arc::clone(&self.workflow),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<W: Workflow> WorkflowEngine<W> {
    pub fn new(workflow: W) -> Self {
        Self {
            workflow: Arc::new(workflow),
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validates `request`, creates its task and runs it.
    ///
    /// Direct-mode requests return the terminal task; queued-mode requests
    /// return as soon as the task exists.
    pub async fn start(&self, request: W::Request) -> Result<Task<W::Stage>> {
        self.workflow.check_shape(&request)?;
        let mode = self.workflow.mode(&request);
        let context = self.workflow.init(request);
        let task = Task::new(W::NAME, mode, W::Stage::INITIAL);
        Ok(self.launch(task, context).await)
    }

    /// Re-runs a FAILED task as a new task, starting at the substage that
    /// failed and reusing the context saved when it failed.
    pub async fn resume(&self, task_id: &str) -> Result<Task<W::Stage>> {
        let (previous, context) = {
            let tasks = self.tasks.read().await;
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| AccountError::InvalidRequest(format!("unknown task {task_id}")))?;
            (entry.tx.borrow().clone(), entry.context.clone())
        };

        let from = match (previous.stage, previous.failed_at) {
            (TaskStage::Failed, Some(from)) => from,
            _ => {
                return Err(AccountError::InvalidRequest(format!(
                    "task {task_id} is {} and cannot be resumed",
                    previous.stage
                )));
            }
        };

        tracing::info!(task_id, workflow = W::NAME, sub_stage = %from, "resuming task");
        let task = Task::resuming(&previous, from);
        Ok(self.launch(task, context).await)
    }

    /// Latest published state of the task.
    pub async fn get(&self, task_id: &str) -> Option<Task<W::Stage>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|e| e.tx.borrow().clone())
    }

    /// Receives every published state of the task.
    pub async fn subscribe(&self, task_id: &str) -> Option<watch::Receiver<Task<W::Stage>>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|e| e.tx.subscribe())
    }

    /// Waits until the task is terminal. The engine imposes no timeout;
    /// callers bound the wait themselves.
    pub async fn wait(&self, task_id: &str) -> Option<Task<W::Stage>> {
        let mut rx = self.subscribe(task_id).await?;
        let task = rx.wait_for(|t| t.is_terminal()).await.ok()?.clone();
        Some(task)
    }

    /// Asks a running task to stop before its next substage. Returns false
    /// if the task is unknown or already terminal.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(entry) if !entry.tx.borrow().is_terminal() => {
                entry.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    async fn launch(&self, task: Task<W::Stage>, context: W::Context) -> Task<W::Stage> {
        let (tx, _) = watch::channel(task.clone());
        self.tasks.write().await.insert(
            task.id.clone(),
            Entry {
                tx,
                context: context.clone(),
                cancel_requested: false,
            },
        );
        tracing::info!(task_id = %task.id, workflow = W::NAME, mode = ?task.mode, "task created");

        match task.mode {
            ExecutionMode::Direct => self.drive(task, context).await,
            ExecutionMode::Queued => {
                let engine = self.clone();
                let queued = task.clone();
                tokio::spawn(async move {
                    engine.drive(queued, context).await;
                });
                task
            }
        }
    }

    async fn drive(&self, mut task: Task<W::Stage>, mut ctx: W::Context) -> Task<W::Stage> {
        step::start(&mut task);
        self.publish(&task, &ctx).await;

        loop {
            if self.cancel_requested(&task.id).await {
                step::cancel(&mut task);
                self.publish(&task, &ctx).await;
                break;
            }

            let stage = task.sub_stage;
            tracing::debug!(task_id = %task.id, workflow = W::NAME, sub_stage = %stage, "running substage");
            let outcome = self.workflow.handle(stage, &mut ctx).await;
            if let Step::Fail(err) = &outcome {
                tracing::warn!(
                    task_id = %task.id,
                    workflow = W::NAME,
                    sub_stage = %stage,
                    code = %err.code(),
                    "substage failed: {err}"
                );
            }

            let transition = step::apply(&mut task, outcome);
            task.resource_ref = self.workflow.resource_ref(&ctx).or(task.resource_ref);
            self.publish(&task, &ctx).await;

            if !matches!(transition, Transition::Next(_)) {
                break;
            }
        }

        tracing::info!(task_id = %task.id, workflow = W::NAME, stage = %task.stage, "task completed");
        task
    }

    async fn publish(&self, task: &Task<W::Stage>, ctx: &W::Context) {
        if let Some(entry) = self.tasks.write().await.get_mut(&task.id) {
            entry.context = ctx.clone();
            entry.tx.send_replace(task.clone());
        }
    }

    async fn cancel_requested(&self, task_id: &str) -> bool {
        self.tasks
            .read()
            .await
            .get(task_id)
            .is_some_and(|e| e.cancel_requested)
    }
}
