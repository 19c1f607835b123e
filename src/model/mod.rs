//! Account, credential and tag documents handled by the workflows.

mod account;
mod credential;
mod tag;

pub use account::{
    Account, AccountRef, AccountStatus, BILLING_PROPERTIES, BILLS_BUCKET, BILLS_PREFIX,
    BillingConfig, CredentialDocument, IdentityClaim, ProviderType, USAGE_REPORT_NAME,
};
pub use credential::{
    ArnRoleCredential, AzureKeysCredential, Credential, CredentialInput, CredentialKind,
    KeysCredential, MissingField, VspherePasswordCredential,
};
pub use tag::{Tag, TagIdentity, TagOrigin, TagSpec};
