use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AccountError, ErrorCode, FailureClass};
use crate::model::AccountRef;

/// Coarse lifecycle of a task, shared by every workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    Created,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl TaskStage {
    /// FINISHED, FAILED and CANCELLED are final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStage::Finished | TaskStage::Failed | TaskStage::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStage::Created => write!(f, "CREATED"),
            TaskStage::Started => write!(f, "STARTED"),
            TaskStage::Finished => write!(f, "FINISHED"),
            TaskStage::Failed => write!(f, "FAILED"),
            TaskStage::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Direct callers block until the task is terminal; queued callers get the
/// task back immediately and poll or subscribe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Direct,
    Queued,
}

/// Terminal failure recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    /// HTTP-style status derived from `class`.
    pub status_code: u16,
    pub code: ErrorCode,
    pub class: FailureClass,
    pub message: String,
    /// Existing account a conflict was detected against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicting: Option<AccountRef>,
}

impl From<&AccountError> for TaskFailure {
    fn from(err: &AccountError) -> Self {
        Self {
            status_code: err.status_code(),
            code: err.code(),
            class: err.class(),
            message: err.to_string(),
            conflicting: err.conflicting().cloned(),
        }
    }
}

/// One workflow invocation. `S` is the workflow's substage enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task<S> {
    pub id: String,
    pub workflow: String,
    pub stage: TaskStage,
    pub sub_stage: S,
    /// Substages whose handler has run, in order.
    pub stage_history: Vec<S>,
    /// Substage whose handler failed, when `stage` is FAILED.
    pub failed_at: Option<S>,
    pub mode: ExecutionMode,
    pub failure: Option<TaskFailure>,
    /// Account the task created or acted on, once known.
    pub resource_ref: Option<String>,
    /// Task this one resumes.
    pub resumed_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S> Task<S> {
    pub fn new(workflow: &str, mode: ExecutionMode, first: S) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow: workflow.to_string(),
            stage: TaskStage::Created,
            sub_stage: first,
            stage_history: Vec::new(),
            failed_at: None,
            mode,
            failure: None,
            resource_ref: None,
            resumed_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh task picking up where `previous` failed.
    pub fn resuming(previous: &Task<S>, from: S) -> Self {
        let mut task = Self::new(&previous.workflow, previous.mode, from);
        task.resumed_from = Some(previous.id.clone());
        task.resource_ref = previous.resource_ref.clone();
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountRef;

    #[test]
    fn task_creation_defaults() {
        let task = Task::new("create", ExecutionMode::Direct, 7u8);
        assert_eq!(task.stage, TaskStage::Created);
        assert_eq!(task.sub_stage, 7);
        assert!(task.stage_history.is_empty());
        assert!(task.failure.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn resumed_task_links_previous() {
        let mut first = Task::new("update", ExecutionMode::Queued, 1u8);
        first.resource_ref = Some("acct".into());
        let second = Task::resuming(&first, 3u8);
        assert_ne!(second.id, first.id);
        assert_eq!(second.resumed_from.as_deref(), Some(first.id.as_str()));
        assert_eq!(second.sub_stage, 3);
        assert_eq!(second.mode, ExecutionMode::Queued);
        assert_eq!(second.resource_ref.as_deref(), Some("acct"));
    }

    #[test]
    fn failure_from_conflict_error() {
        let err = AccountError::AlreadyExists {
            existing: AccountRef {
                id: "1".into(),
                name: "acct-a".into(),
            },
        };
        let failure = TaskFailure::from(&err);
        assert_eq!(failure.status_code, 409);
        assert_eq!(failure.code, ErrorCode::EndpointAlreadyExists);
        assert_eq!(failure.conflicting.unwrap().name, "acct-a");
    }

    #[test]
    fn terminal_stages() {
        assert!(TaskStage::Finished.is_terminal());
        assert!(TaskStage::Failed.is_terminal());
        assert!(TaskStage::Cancelled.is_terminal());
        assert!(!TaskStage::Started.is_terminal());
        assert_eq!(TaskStage::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn task_serialization_uses_wire_names() {
        let task = Task::new("delete", ExecutionMode::Queued, "LOAD_ACCOUNT".to_string());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["stage"], "CREATED");
        assert_eq!(json["mode"], "queued");
        assert_eq!(json["subStage"], "LOAD_ACCOUNT");
    }
}
