use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credential::{Credential, CredentialKind};

/// Custom property holding the billing export bucket.
pub const BILLS_BUCKET: &str = "billsBucket";
/// Custom property holding the key prefix of the billing export.
pub const BILLS_PREFIX: &str = "billsPrefix";
/// Custom property holding the cost-and-usage report name.
pub const USAGE_REPORT_NAME: &str = "costUsageReportName";

/// The three properties that together describe a billing export.
pub const BILLING_PROPERTIES: [&str; 3] = [BILLS_BUCKET, BILLS_PREFIX, USAGE_REPORT_NAME];

const CLAIM_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_94b0_2f0e_4c6b_9a43_0d1b_6e2f_a001);
const CREDENTIAL_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_94b0_2f0e_4c6b_9a43_0d1b_6e2f_a002);

/// Cloud provider an account targets. Decides which credential variant a
/// create expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Aws,
    Azure,
    AzureEa,
    Vsphere,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Aws => write!(f, "aws"),
            ProviderType::Azure => write!(f, "azure"),
            ProviderType::AzureEa => write!(f, "azure_ea"),
            ProviderType::Vsphere => write!(f, "vsphere"),
        }
    }
}

/// Lifecycle of an account document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    /// A delete workflow has claimed the account.
    Deleting,
}

/// Stable, non-secret reference to an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub name: String,
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Billing properties found in an account's custom properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingConfig<'a> {
    Complete {
        bucket: &'a str,
        prefix: &'a str,
        report_name: &'a str,
    },
    Partial,
    Absent,
}

impl<'a> BillingConfig<'a> {
    pub fn from_properties(props: &'a BTreeMap<String, String>) -> Self {
        match (
            props.get(BILLS_BUCKET),
            props.get(BILLS_PREFIX),
            props.get(USAGE_REPORT_NAME),
        ) {
            (Some(bucket), Some(prefix), Some(report_name)) => BillingConfig::Complete {
                bucket,
                prefix,
                report_name,
            },
            (None, None, None) => BillingConfig::Absent,
            _ => BillingConfig::Partial,
        }
    }
}

/// Persisted cloud account document. Secrets live in the linked
/// [`CredentialDocument`], never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    /// `None` is "unset"; `Some("")` is a valid, empty description.
    pub description: Option<String>,
    pub provider_type: ProviderType,
    /// Id of the linked [`CredentialDocument`].
    pub credential_ref: String,
    /// Fixed at create; updates may rotate values but not change the kind.
    pub credential_kind: CredentialKind,
    /// Non-secret principal of the current credential, unique per org.
    pub credential_identity: String,
    pub region: Option<String>,
    pub custom_properties: BTreeMap<String, String>,
    /// Ids of the shared [`Tag`](super::Tag) entities attached to the account.
    pub tag_refs: BTreeSet<String>,
    /// Explicit owners. The creator is a group member without being listed.
    pub owner_identities: BTreeSet<String>,
    pub org_ref: String,
    pub service_tags: BTreeSet<String>,
    pub status: AccountStatus,
    pub created_by: Option<String>,
    /// Optimistic-concurrency version, bumped by the store on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account id. It does not depend on the credential, which can be
    /// rotated; uniqueness of the credential is held by [`IdentityClaim`].
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Id and name, safe to put in errors and logs.
    pub fn reference(&self) -> AccountRef {
        AccountRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// The billing bucket, if set. Unique within the org.
    pub fn bills_bucket(&self) -> Option<&str> {
        self.custom_properties.get(BILLS_BUCKET).map(String::as_str)
    }

    pub fn billing(&self) -> BillingConfig<'_> {
        BillingConfig::from_properties(&self.custom_properties)
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Marks a credential identity as held by one account of an org.
///
/// The id is derived from (org, provider, identity), so two creates racing
/// for the same principal collide on the claim insert. Rotation moves the
/// claim to the new identity; delete releases it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaim {
    pub id: String,
    pub org_ref: String,
    pub provider_type: ProviderType,
    pub identity: String,
    /// Account currently holding the identity.
    pub account_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl IdentityClaim {
    pub fn derive_id(org_ref: &str, provider: ProviderType, identity: &str) -> String {
        let name = format!("{org_ref}\u{0}{provider}\u{0}{identity}");
        Uuid::new_v5(&CLAIM_NAMESPACE, name.as_bytes()).to_string()
    }

    pub fn new(org_ref: &str, provider: ProviderType, identity: &str, account_id: &str) -> Self {
        Self {
            id: Self::derive_id(org_ref, provider, identity),
            org_ref: org_ref.to_string(),
            provider_type: provider,
            identity: identity.to_string(),
            account_id: account_id.to_string(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// The claim `account` holds on its current credential identity.
    pub fn for_account(account: &Account) -> Self {
        Self::new(
            &account.org_ref,
            account.provider_type,
            &account.credential_identity,
            &account.id,
        )
    }
}

/// Stored credential, keyed independently of the account that links it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDocument {
    pub id: String,
    pub org_ref: String,
    pub credential: Credential,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl CredentialDocument {
    /// One credential document per account, keyed by the account id.
    pub fn derive_id(account_id: &str) -> String {
        Uuid::new_v5(&CREDENTIAL_NAMESPACE, account_id.as_bytes()).to_string()
    }

    pub fn new(account_id: &str, org_ref: &str, credential: Credential) -> Self {
        Self {
            id: Self::derive_id(account_id),
            org_ref: org_ref.to_string(),
            credential,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}
