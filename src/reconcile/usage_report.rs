//! Provider-side billing export provisioning.

use crate::error::{AccountError, Result};
use crate::model::{Credential, ProviderType};
use crate::provider::{AdapterRegistry, ProviderError, ReportDefinition};

/// What [`UsageReportProvisioner::ensure`] found on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Created,
    AlreadyPresent,
}

/// Idempotently provisions cost-and-usage reports through the provider
/// adapters.
pub struct UsageReportProvisioner {
    adapters: AdapterRegistry,
}

impl UsageReportProvisioner {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self { adapters }
    }

    /// Makes sure a report named `report_name` exports into `bucket`/`prefix`.
    ///
    /// A report of that name writing anywhere else is a conflict. The
    /// name identifies a report; the prefix only picks where it writes, so
    /// a bucket already exporting under another prefix is no obstacle.
    pub async fn ensure(
        &self,
        provider: ProviderType,
        credential: &Credential,
        bucket: &str,
        prefix: &str,
        report_name: &str,
    ) -> Result<ReportOutcome> {
        let adapter = self
            .adapters
            .get(provider)
            .ok_or(AccountError::AdapterUnavailable(provider))?;

        adapter
            .check_bucket(credential, bucket)
            .await
            .map_err(|e| AccountError::BucketPermissions {
                bucket: bucket.to_string(),
                reason: bucket_reason(&e),
            })?;

        let existing = adapter
            .find_report(credential, report_name)
            .await
            .map_err(|e| AccountError::CostUsage(format!("looking up report `{report_name}`: {e}")))?;

        if let Some(existing) = existing {
            if existing.bucket == bucket && existing.prefix == prefix {
                tracing::debug!(report = report_name, bucket, "usage report already present");
                return Ok(ReportOutcome::AlreadyPresent);
            }
            return Err(AccountError::CostUsage(format!(
                "report `{report_name}` already exports to `{}/{}`",
                existing.bucket, existing.prefix
            )));
        }

        let report = ReportDefinition::new(report_name, bucket, prefix);
        adapter
            .create_report(credential, &report)
            .await
            .map_err(|e| AccountError::CostUsage(format!("creating report `{report_name}`: {e}")))?;
        tracing::info!(report = report_name, bucket, prefix, %provider, "created usage report");
        Ok(ReportOutcome::Created)
    }
}

fn bucket_reason(err: &ProviderError) -> String {
    match err {
        ProviderError::BucketNotFound(_) => "bucket does not exist".to_string(),
        other => other.to_string(),
    }
}
