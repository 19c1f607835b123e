use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AccountRef, CredentialKind, MissingField, ProviderType};
use crate::store::StoreError;

/// Stable machine-readable codes carried on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    CredentialsRequired,
    EndpointNameRequired,
    EndpointTypeRequired,
    EndpointWithBucketAlreadyExists,
    EndpointAlreadyExists,
    EndpointNothingToUpdate,
    EndpointTagNullEmpty,
    EndpointNotFound,
    InvalidEndpointOwner,
    S3BucketPermissionsError,
    S3CostUsageException,
    ProviderAdapterUnavailable,
    ConcurrentModification,
    StoreError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde names so logs and documents agree.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// Classifies a failure so callers can tell business outcomes from
/// infrastructure ones without matching on codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Input rejected by a validation rule.
    Validation,
    /// Uniqueness or concurrency rule violated.
    Conflict,
    NotFound,
    /// Provider API or network failure.
    Upstream,
    Internal,
}

impl FailureClass {
    pub fn status_code(self) -> u16 {
        match self {
            FailureClass::Validation => 400,
            FailureClass::Conflict => 409,
            FailureClass::NotFound => 404,
            FailureClass::Upstream => 502,
            FailureClass::Internal => 500,
        }
    }
}

/// Everything a workflow or the service can fail with.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("endpoint name is required")]
    NameRequired,

    #[error("endpoint type is required")]
    ProviderTypeRequired,

    #[error("credentials are required: `{field}` is missing for {kind} credentials")]
    CredentialsRequired {
        kind: CredentialKind,
        field: &'static str,
    },

    #[error("tag key and value must not be empty")]
    TagNullEmpty,

    #[error("nothing to update")]
    NothingToUpdate,

    #[error("endpoint {existing} already uses bucket `{bucket}`")]
    BucketAlreadyExists { bucket: String, existing: AccountRef },

    #[error("endpoint {existing} already exists with the same credentials")]
    AlreadyExists { existing: AccountRef },

    #[error("endpoint `{0}` not found")]
    NotFound(String),

    #[error("`{identity}` is not a member of organization `{org}`")]
    InvalidOwner { identity: String, org: String },

    #[error("bucket `{bucket}` is not accessible: {reason}")]
    BucketPermissions { bucket: String, reason: String },

    #[error("cost and usage report error: {0}")]
    CostUsage(String),

    #[error("no provider adapter registered for {0}")]
    AdapterUnavailable(ProviderType),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<MissingField> for AccountError {
    fn from(missing: MissingField) -> Self {
        AccountError::CredentialsRequired {
            kind: missing.kind,
            field: missing.field,
        }
    }
}

impl AccountError {
    /// Stable machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            AccountError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AccountError::NameRequired => ErrorCode::EndpointNameRequired,
            AccountError::ProviderTypeRequired => ErrorCode::EndpointTypeRequired,
            AccountError::CredentialsRequired { .. } => ErrorCode::CredentialsRequired,
            AccountError::TagNullEmpty => ErrorCode::EndpointTagNullEmpty,
            AccountError::NothingToUpdate => ErrorCode::EndpointNothingToUpdate,
            AccountError::BucketAlreadyExists { .. } => ErrorCode::EndpointWithBucketAlreadyExists,
            AccountError::AlreadyExists { .. } => ErrorCode::EndpointAlreadyExists,
            AccountError::NotFound(_) => ErrorCode::EndpointNotFound,
            AccountError::InvalidOwner { .. } => ErrorCode::InvalidEndpointOwner,
            AccountError::BucketPermissions { .. } => ErrorCode::S3BucketPermissionsError,
            AccountError::CostUsage(_) => ErrorCode::S3CostUsageException,
            AccountError::AdapterUnavailable(_) => ErrorCode::ProviderAdapterUnavailable,
            AccountError::Store(StoreError::VersionConflict { .. }) => {
                ErrorCode::ConcurrentModification
            }
            AccountError::Store(_) => ErrorCode::StoreError,
        }
    }

    /// Failure class used to pick the task status code.
    pub fn class(&self) -> FailureClass {
        match self {
            AccountError::InvalidRequest(_)
            | AccountError::NameRequired
            | AccountError::ProviderTypeRequired
            | AccountError::CredentialsRequired { .. }
            | AccountError::TagNullEmpty
            | AccountError::NothingToUpdate
            | AccountError::InvalidOwner { .. } => FailureClass::Validation,
            AccountError::BucketAlreadyExists { .. }
            | AccountError::AlreadyExists { .. }
            | AccountError::Store(StoreError::VersionConflict { .. })
            | AccountError::Store(StoreError::AlreadyExists(_)) => FailureClass::Conflict,
            AccountError::NotFound(_) => FailureClass::NotFound,
            AccountError::BucketPermissions { .. }
            | AccountError::CostUsage(_)
            | AccountError::AdapterUnavailable(_) => FailureClass::Upstream,
            AccountError::Store(_) => FailureClass::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.class().status_code()
    }

    /// The existing account a conflict was detected against.
    pub fn conflicting(&self) -> Option<&AccountRef> {
        match self {
            AccountError::BucketAlreadyExists { existing, .. }
            | AccountError::AlreadyExists { existing } => Some(existing),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AccountError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn acct() -> AccountRef {
        AccountRef {
            id: "a-1".into(),
            name: "acct-a".into(),
        }
    }

    #[test]
    fn error_code_display_matches_wire_name() {
        assert_eq!(
            ErrorCode::EndpointWithBucketAlreadyExists.to_string(),
            "ENDPOINT_WITH_BUCKET_ALREADY_EXISTS"
        );
        assert_eq!(ErrorCode::S3CostUsageException.to_string(), "S3_COST_USAGE_EXCEPTION");
        assert_eq!(
            serde_json::to_string(&ErrorCode::S3BucketPermissionsError).unwrap(),
            "\"S3_BUCKET_PERMISSIONS_ERROR\""
        );
    }

    #[test]
    fn conflicts_carry_existing_account() {
        let err = AccountError::BucketAlreadyExists {
            bucket: "b1".into(),
            existing: acct(),
        };
        assert_eq!(err.code(), ErrorCode::EndpointWithBucketAlreadyExists);
        assert_eq!(err.class(), FailureClass::Conflict);
        assert_eq!(err.conflicting(), Some(&acct()));
        assert_eq!(err.to_string(), "endpoint acct-a (a-1) already uses bucket `b1`");
    }

    #[test]
    fn upstream_and_business_use_different_status_classes() {
        let upstream = AccountError::BucketPermissions {
            bucket: "b".into(),
            reason: "denied".into(),
        };
        let business = AccountError::AlreadyExists { existing: acct() };
        assert_eq!(upstream.status_code(), 502);
        assert_eq!(business.status_code(), 409);
        assert_ne!(upstream.class(), business.class());
    }

    #[test]
    fn missing_field_maps_to_credentials_required() {
        let err: AccountError = MissingField {
            kind: CredentialKind::ArnRole,
            field: "arn",
        }
        .into();
        assert_eq!(err.code(), ErrorCode::CredentialsRequired);
        assert_eq!(
            err.to_string(),
            "credentials are required: `arn` is missing for arn_role credentials"
        );
    }

    #[test]
    fn version_conflicts_are_concurrency_failures() {
        let err = AccountError::from(StoreError::VersionConflict {
            id: "x".into(),
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.code(), ErrorCode::ConcurrentModification);
        assert_eq!(err.status_code(), 409);
    }
}
