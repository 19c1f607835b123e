use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::ProviderAdapter;
use super::error::ProviderError;
use super::types::ReportDefinition;
use crate::model::Credential;

/// In-memory adapter. Buckets are accessible unless listed as missing or
/// denied; reports live in a map keyed by name.
#[derive(Default)]
pub struct MockAdapter {
    missing_buckets: Mutex<BTreeSet<String>>,
    denied_buckets: Mutex<BTreeSet<String>>,
    reports: Mutex<BTreeMap<String, ReportDefinition>>,
    create_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `check_bucket` on this bucket fails as not found.
    pub fn with_missing_bucket(self, bucket: &str) -> Self {
        if let Ok(mut missing) = self.missing_buckets.lock() {
            missing.insert(bucket.to_string());
        }
        self
    }

    /// `check_bucket` on this bucket fails as access denied.
    pub fn with_denied_bucket(self, bucket: &str) -> Self {
        if let Ok(mut denied) = self.denied_buckets.lock() {
            denied.insert(bucket.to_string());
        }
        self
    }

    /// Seeds an existing report.
    pub fn with_report(self, report: ReportDefinition) -> Self {
        if let Ok(mut reports) = self.reports.lock() {
            reports.insert(report.name.clone(), report);
        }
        self
    }

    /// Number of `create_report` calls received.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::Relaxed)
    }

    pub fn report(&self, name: &str) -> Option<ReportDefinition> {
        self.reports.lock().ok()?.get(name).cloned()
    }
}

fn poisoned() -> ProviderError {
    ProviderError::ApiError {
        status: 500,
        message: "mock adapter state poisoned".into(),
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn check_bucket(&self, _credential: &Credential, bucket: &str) -> Result<(), ProviderError> {
        if self
            .missing_buckets
            .lock()
            .map_err(|_| poisoned())?
            .contains(bucket)
        {
            return Err(ProviderError::BucketNotFound(bucket.to_string()));
        }
        if self
            .denied_buckets
            .lock()
            .map_err(|_| poisoned())?
            .contains(bucket)
        {
            return Err(ProviderError::AccessDenied(format!(
                "no write access to bucket `{bucket}`"
            )));
        }
        Ok(())
    }

    async fn find_report(
        &self,
        _credential: &Credential,
        name: &str,
    ) -> Result<Option<ReportDefinition>, ProviderError> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.reports.lock().map_err(|_| poisoned())?.get(name).cloned())
    }

    async fn create_report(
        &self,
        _credential: &Credential,
        report: &ReportDefinition,
    ) -> Result<(), ProviderError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        self.reports
            .lock()
            .map_err(|_| poisoned())?
            .insert(report.name.clone(), report.clone());
        Ok(())
    }
}
