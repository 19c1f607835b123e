//! Resumable workflows for the lifecycle of multi-tenant cloud accounts.
//!
//! [`workflow::AccountService`] is the entry point: it creates, updates,
//! deletes and validates accounts through tasks driven by
//! [`engine::WorkflowEngine`].

pub mod authz;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod reconcile;
pub mod signal;
pub mod store;
pub mod ui;
pub mod workflow;
