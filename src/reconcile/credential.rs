//! Credential changes on update.
//!
//! An account's credential kind never changes. An update is parsed against
//! the schema of the kind the account already has, so a differently shaped
//! update fails naming the first field that schema is missing.

use crate::error::Result;
use crate::model::{Credential, CredentialInput, CredentialKind};

/// Parses `requested` as a rotation of a `current`-kind credential.
pub fn validate(current: CredentialKind, requested: &CredentialInput) -> Result<Credential> {
    let credential = requested.parse_as(current)?;
    debug_assert_eq!(credential.kind(), current);
    Ok(credential)
}

/// True when `next` holds different secret or identity values than `previous`.
pub fn is_rotation(previous: &Credential, next: &Credential) -> bool {
    previous != next
}
