//! Attempt session record and its pure update operations.
//!
//! A [`TestSession`] is the persisted state of one student's attempt. Every
//! update operation consumes the record and returns the next one; callers
//! hand the result to [`SessionStore::save`] to persist it.

mod store;

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;

pub use store::*;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::ContextDeclaration;
use crate::error::{SessionError, SessionResult};

/// The ordered item list an attempt is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Realization {
    /// Deterministic seed for any per-attempt randomization.
    pub seed: u32,
    /// Item identifiers in navigation order.
    pub item_identifiers: Vec<String>,
}

/// Persisted navigation position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPosition {
    /// Index into `realization.itemIdentifiers`, or `-1` before the first item.
    pub current_item_index: i64,
    /// Section owning the current item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section_identifier: Option<String>,
}

impl Default for SessionPosition {
    fn default() -> Self {
        Self {
            current_item_index: -1,
            current_section_identifier: None,
        }
    }
}

/// Link between an item and its response session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSessionLink {
    /// Response-session id reported by the item; may change across reloads.
    pub pie_session_id: String,
    /// Whether the item reported a complete response.
    pub is_completed: bool,
}

/// A response event reported by a rendered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    /// Item that produced the event.
    pub item_identifier: String,
    /// Response-session id attached to the event.
    pub response_session_id: String,
    /// Whether the response is complete.
    pub is_completed: bool,
}

/// One student's attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSession {
    /// Deterministic attempt identifier.
    pub test_session_identifier: String,
    /// Assessment the attempt belongs to.
    pub assessment_id: String,
    /// Bound item ordering.
    pub realization: Realization,
    /// Current position.
    pub navigation_state: SessionPosition,
    /// Identifiers of items the student has seen.
    #[serde(default)]
    pub visited_items: BTreeSet<String>,
    /// Response-session linkage keyed by item identifier.
    #[serde(default)]
    pub item_sessions: BTreeMap<String, ItemSessionLink>,
    /// Free-form context variables.
    #[serde(default)]
    pub context_variables: serde_json::Map<String, Value>,
    /// Save counter, incremented on every persist.
    pub version: u64,
    /// Time of the last persist.
    pub updated_at: DateTime<Utc>,
}

impl TestSession {
    /// Create a fresh, not-yet-started attempt.
    pub fn new(
        identity: &SessionIdentity,
        assessment_id: impl Into<String>,
        item_identifiers: Vec<String>,
    ) -> Self {
        Self {
            test_session_identifier: identity.test_session_identifier.clone(),
            assessment_id: assessment_id.into(),
            realization: Realization {
                seed: identity.seed,
                item_identifiers,
            },
            navigation_state: SessionPosition::default(),
            visited_items: BTreeSet::new(),
            item_sessions: BTreeMap::new(),
            context_variables: serde_json::Map::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Seed context variables from declaration defaults.
    pub fn with_context_defaults(mut self, declarations: &[ContextDeclaration]) -> Self {
        for decl in declarations {
            if let Some(default) = &decl.default_value {
                self.context_variables
                    .entry(decl.identifier.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        self
    }

    /// Whether the index invariant holds.
    pub fn has_valid_position(&self) -> bool {
        let index = self.navigation_state.current_item_index;
        index == -1 || (index >= 0 && (index as usize) < self.realization.item_identifiers.len())
    }

    /// Identifier of the current item, if started.
    pub fn current_item(&self) -> Option<&str> {
        usize::try_from(self.navigation_state.current_item_index)
            .ok()
            .and_then(|i| self.realization.item_identifiers.get(i))
            .map(String::as_str)
    }

    /// Mark an item as visited.
    pub fn upsert_visited_item(mut self, identifier: impl Into<String>) -> Self {
        self.visited_items.insert(identifier.into());
        self
    }

    /// Move to a position. Out-of-range indices are a caller defect.
    pub fn set_current_position(mut self, position: SessionPosition) -> SessionResult<Self> {
        let index = position.current_item_index;
        let total = self.realization.item_identifiers.len();
        if !(index == -1 || (index >= 0 && (index as usize) < total)) {
            return Err(SessionError::IndexOutOfRange { index, total });
        }
        self.navigation_state = position;
        Ok(self)
    }

    /// Move to an item by identifier and mark it visited.
    pub fn go_to_item(
        self,
        identifier: &str,
        section_identifier: Option<String>,
    ) -> SessionResult<Self> {
        let index = self
            .realization
            .item_identifiers
            .iter()
            .position(|id| id == identifier)
            .ok_or_else(|| SessionError::UnknownItem {
                identifier: identifier.to_string(),
            })?;
        self.set_current_position(SessionPosition {
            current_item_index: index as i64,
            current_section_identifier: section_identifier,
        })
        .map(|s| s.upsert_visited_item(identifier))
    }

    /// Record the response-session linkage reported by an item.
    pub fn upsert_item_session_from_response_event(mut self, event: &ResponseEvent) -> Self {
        if !self
            .realization
            .item_identifiers
            .contains(&event.item_identifier)
        {
            debug!(
                item = %event.item_identifier,
                "Response event for an item outside the realization"
            );
        }
        self.item_sessions.insert(
            event.item_identifier.clone(),
            ItemSessionLink {
                pie_session_id: event.response_session_id.clone(),
                is_completed: event.is_completed,
            },
        );
        self
    }

    /// Set a context variable.
    pub fn set_context_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_variables.insert(key.into(), value);
        self
    }

    /// Whether every realized item reported a complete response.
    pub fn is_complete(&self) -> bool {
        !self.realization.item_identifiers.is_empty()
            && self.realization.item_identifiers.iter().all(|id| {
                self.item_sessions
                    .get(id)
                    .map(|link| link.is_completed)
                    .unwrap_or(false)
            })
    }

    /// Replace a stale realization, keeping all attempt progress.
    ///
    /// Returns `true` when the realization changed. The seed is kept; the
    /// position is clamped only when it would otherwise break the index
    /// invariant.
    pub fn realign(&mut self, item_identifiers: &[String]) -> bool {
        if self.realization.item_identifiers == item_identifiers {
            return false;
        }
        self.realization.item_identifiers = item_identifiers.to_vec();
        self.clamp_position();
        true
    }

    /// Bring an invalid position back into range. Indices past the end move
    /// to the last item; negative ones reset to not started.
    ///
    /// Returns `true` when the position changed.
    pub fn clamp_position(&mut self) -> bool {
        if self.has_valid_position() {
            return false;
        }
        let index = self.navigation_state.current_item_index;
        self.navigation_state.current_item_index = if index < 0 {
            -1
        } else {
            self.realization.item_identifiers.len() as i64 - 1
        };
        self.navigation_state.current_section_identifier = None;
        true
    }
}
