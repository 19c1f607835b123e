//! Per-provider adapter seam.
//!
//! Adapters are the only code that talks to a provider's own API. The
//! workflows reach them through an [`AdapterRegistry`] keyed by
//! [`ProviderType`].

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::HttpAdapter;
pub use error::ProviderError;
pub use mock::MockAdapter;
pub use types::ReportDefinition;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Credential, ProviderType};

/// Provider API calls needed for usage-report provisioning. One adapter
/// serves one provider type.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Verifies the credential can write billing exports into `bucket`.
    async fn check_bucket(&self, credential: &Credential, bucket: &str) -> Result<(), ProviderError>;

    /// Looks a usage report up by name.
    async fn find_report(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<Option<ReportDefinition>, ProviderError>;

    /// Creates the report. Callers look it up first; creating an existing
    /// name is the adapter's error to report.
    async fn create_report(
        &self,
        credential: &Credential,
        report: &ReportDefinition,
    ) -> Result<(), ProviderError>;
}

/// Adapters by provider type.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the adapter for `provider`.
    pub fn register(mut self, provider: ProviderType, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(provider, adapter);
        self
    }

    pub fn get(&self, provider: ProviderType) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
