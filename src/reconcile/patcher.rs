//! ADD/REMOVE deltas over multi-valued properties.
//!
//! Pure reducers: the same change-list applied to the same input always
//! yields the same output, and re-applying it is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::BILLING_PROPERTIES;

/// Direction of a collection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionAction {
    Add,
    Remove,
}

/// Delta for one key of a property map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionUpdate {
    pub action: CollectionAction,
    pub value: String,
}

impl CollectionUpdate {
    pub fn add(value: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Add,
            value: value.into(),
        }
    }

    pub fn remove(value: impl Into<String>) -> Self {
        Self {
            action: CollectionAction::Remove,
            value: value.into(),
        }
    }
}

/// ADD overwrites the key. REMOVE deletes the key only while it still holds
/// the given value; an absent key is left absent.
pub fn apply(
    current: &BTreeMap<String, String>,
    updates: &BTreeMap<String, CollectionUpdate>,
) -> BTreeMap<String, String> {
    let mut next = current.clone();
    for (key, update) in updates {
        match update.action {
            CollectionAction::Add => {
                next.insert(key.clone(), update.value.clone());
            }
            CollectionAction::Remove => {
                if next.get(key) == Some(&update.value) {
                    next.remove(key);
                }
            }
        }
    }
    next
}

/// Set flavour of [`apply`]: each update adds or removes its value.
pub fn apply_set(current: &BTreeSet<String>, updates: &[CollectionUpdate]) -> BTreeSet<String> {
    let mut next = current.clone();
    for update in updates {
        match update.action {
            CollectionAction::Add => {
                next.insert(update.value.clone());
            }
            CollectionAction::Remove => {
                next.remove(&update.value);
            }
        }
    }
    next
}

/// True when the updates ADD every billing property together. A subset only
/// changes metadata.
pub fn adds_all_billing(updates: &BTreeMap<String, CollectionUpdate>) -> bool {
    BILLING_PROPERTIES.iter().all(|key| {
        updates
            .get(*key)
            .is_some_and(|u| u.action == CollectionAction::Add)
    })
}
