//! Reconciliation steps shared by the account workflows.

pub mod credential;
mod duplicate;
mod owners;
pub mod patcher;
mod tags;
mod usage_report;

pub use duplicate::{Conflict, DuplicateDetector, DuplicateQuery};
pub use owners::{OwnerPlan, OwnerUpdate, OwnershipSynchronizer};
pub use patcher::{CollectionAction, CollectionUpdate};
pub use tags::{TagPlan, TagReconciler};
pub use usage_report::{ReportOutcome, UsageReportProvisioner};
