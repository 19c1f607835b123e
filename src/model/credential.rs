//! Credential shapes accepted for cloud accounts.
//!
//! A [`Credential`] is exactly one of four variants. Requests do not carry a
//! `Credential` directly: they carry a [`CredentialInput`] field bag which is
//! parsed against the schema of a single [`CredentialKind`]. Parsing reports
//! the first field that kind's schema requires and the input lacks.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::account::ProviderType;

/// Discriminant of [`Credential`], immutable for the lifetime of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Keys,
    ArnRole,
    AzureKeys,
    VspherePassword,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Keys => write!(f, "keys"),
            CredentialKind::ArnRole => write!(f, "arn_role"),
            CredentialKind::AzureKeys => write!(f, "azure_keys"),
            CredentialKind::VspherePassword => write!(f, "vsphere_password"),
        }
    }
}

/// Access-key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysCredential {
    pub access_key_id: String,
    pub secret_key: String,
}

/// Cross-account role assumed through an external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArnRoleCredential {
    pub arn: String,
    pub external_id: String,
}

/// Azure service principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeysCredential {
    pub client_id: String,
    pub client_key: String,
    pub subscription_id: String,
    pub tenant_id: String,
}

/// vSphere user/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VspherePasswordCredential {
    pub username: String,
    pub password: String,
}

/// Exactly one credential shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    Keys(KeysCredential),
    ArnRole(ArnRoleCredential),
    AzureKeys(AzureKeysCredential),
    VspherePassword(VspherePasswordCredential),
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Keys(_) => CredentialKind::Keys,
            Credential::ArnRole(_) => CredentialKind::ArnRole,
            Credential::AzureKeys(_) => CredentialKind::AzureKeys,
            Credential::VspherePassword(_) => CredentialKind::VspherePassword,
        }
    }

    /// Non-secret value identifying the principal behind this credential.
    ///
    /// vSphere users are only unique per host, so the region (the vCenter
    /// address) is folded in.
    pub fn identity(&self, region: Option<&str>) -> String {
        match self {
            Credential::Keys(c) => c.access_key_id.clone(),
            Credential::ArnRole(c) => c.arn.clone(),
            Credential::AzureKeys(c) => {
                format!("{}/{}/{}", c.tenant_id, c.subscription_id, c.client_id)
            }
            Credential::VspherePassword(c) => {
                format!("{}@{}", c.username, region.unwrap_or_default())
            }
        }
    }
}

/// Flat, loosely-typed credential fields as they arrive on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A field required by a credential schema was absent or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingField {
    pub kind: CredentialKind,
    pub field: &'static str,
}

impl CredentialInput {
    /// Input for an access-key pair.
    pub fn keys(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key_id: Some(access_key_id.into()),
            secret_key: Some(secret_key.into()),
            ..Default::default()
        }
    }

    pub fn arn_role(arn: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            arn: Some(arn.into()),
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    /// True when no field was sent at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Picks the variant a new account of `provider` should use.
    pub fn kind_for(&self, provider: ProviderType) -> CredentialKind {
        match provider {
            ProviderType::Aws if self.arn.is_some() => CredentialKind::ArnRole,
            ProviderType::Aws => CredentialKind::Keys,
            ProviderType::Azure | ProviderType::AzureEa => CredentialKind::AzureKeys,
            ProviderType::Vsphere => CredentialKind::VspherePassword,
        }
    }

    /// Runs `kind`'s schema check over the input.
    pub fn parse_as(&self, kind: CredentialKind) -> Result<Credential, MissingField> {
        let need = |value: &Option<String>, field: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(MissingField { kind, field })
        };

        let credential = match kind {
            CredentialKind::Keys => Credential::Keys(KeysCredential {
                access_key_id: need(&self.access_key_id, "accessKeyId")?,
                secret_key: need(&self.secret_key, "secretKey")?,
            }),
            CredentialKind::ArnRole => Credential::ArnRole(ArnRoleCredential {
                arn: need(&self.arn, "arn")?,
                external_id: need(&self.external_id, "externalId")?,
            }),
            CredentialKind::AzureKeys => Credential::AzureKeys(AzureKeysCredential {
                client_id: need(&self.client_id, "clientId")?,
                client_key: need(&self.client_key, "clientKey")?,
                subscription_id: need(&self.subscription_id, "subscriptionId")?,
                tenant_id: need(&self.tenant_id, "tenantId")?,
            }),
            CredentialKind::VspherePassword => {
                Credential::VspherePassword(VspherePasswordCredential {
                    username: need(&self.username, "username")?,
                    password: need(&self.password, "password")?,
                })
            }
        };
        Ok(credential)
    }
}
