//! Wire types exchanged with the provider adapter service.

use serde::{Deserialize, Serialize};

use crate::model::Credential;

/// A provider-side billing export definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefinition {
    pub name: String,
    pub bucket: String,
    pub prefix: String,
    #[serde(default = "default_time_unit")]
    pub time_unit: String,
}

fn default_time_unit() -> String {
    "HOURLY".to_string()
}

impl ReportDefinition {
    pub fn new(name: &str, bucket: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            time_unit: default_time_unit(),
        }
    }
}

/// Body of `POST {base}/{provider}/buckets/check`.
#[derive(Debug, Serialize)]
pub(crate) struct BucketCheckRequest<'a> {
    pub credential: &'a Credential,
    pub bucket: &'a str,
}

/// Body of `POST {base}/{provider}/reports/lookup`.
#[derive(Debug, Serialize)]
pub(crate) struct ReportLookupRequest<'a> {
    pub credential: &'a Credential,
    pub name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportLookupResponse {
    pub report: ReportDefinition,
}

/// Body of `POST {base}/{provider}/reports`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateReportRequest<'a> {
    pub credential: &'a Credential,
    pub report: &'a ReportDefinition,
}
