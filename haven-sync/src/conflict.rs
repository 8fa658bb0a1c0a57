//! Conflict classification and resolution.
//!
//! Detection happens while applying deltas (see [`crate::delta`]); this
//! module owns the taxonomy, the resolution strategies, and the merge
//! function registry. "Merge" is not a universal CRDT: only entity types
//! with a registered structural merge actually merge, and everything
//! else degrades to taking the remote version, explicitly and audibly.

use crate::delta::{content_hash, SyncDelta};
use crate::error::{SyncError, SyncResult};
use haven_store::{ConflictOutcome, ConflictRecord, Store, SyncLogEntry};
use haven_types::{now_ms, ConflictId, ConflictType, SpaceId, SyncOperation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// How the user (or policy) wants a conflict settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Keep local state; the remote delta is recorded as seen but not
    /// applied.
    UseLocal,
    /// Apply the remote snapshot over local state.
    UseRemote,
    /// Combine both versions with the entity type's registered merge
    /// function; falls back to `UseRemote` when none is registered.
    Merge,
}

/// A structural merge over two plaintext versions of an entity.
pub type MergeFn = Arc<dyn Fn(&[u8], &[u8]) -> SyncResult<Vec<u8>> + Send + Sync>;

/// Classifies how a local entity and an incoming delta diverged.
pub(crate) fn classify_conflict(
    local: &haven_store::EntityRecord,
    delta: &SyncDelta,
) -> ConflictType {
    match (local.deleted, delta.operation) {
        (true, _) => ConflictType::DeleteUpdate,
        (false, SyncOperation::Delete) => ConflictType::UpdateDelete,
        (false, _) => ConflictType::UpdateUpdate,
    }
}

/// Resolves recorded conflicts against the store.
#[derive(Clone)]
pub struct ConflictResolver {
    store: Store,
    merge_fns: HashMap<String, MergeFn>,
}

impl ConflictResolver {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            merge_fns: HashMap::new(),
        }
    }

    /// Registers a merge function for an entity type.
    pub fn register_merge(&mut self, entity_type: impl Into<String>, merge: MergeFn) {
        self.merge_fns.insert(entity_type.into(), merge);
    }

    /// Registers the built-in JSON deep merge for an entity type.
    pub fn register_json_merge(&mut self, entity_type: impl Into<String>) {
        self.register_merge(entity_type, Arc::new(|a, b| merge_json_payloads(a, b)));
    }

    /// Open conflicts for a space, oldest first.
    pub fn unresolved(&self, space_id: &SpaceId) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self.store.unresolved_conflicts(space_id)?)
    }

    /// Resolves one conflict with the given strategy.
    ///
    /// Transactional: either the resulting state commits and the
    /// conflict closes, or nothing changes and the conflict stays open.
    pub fn resolve(&self, conflict_id: &ConflictId, strategy: ResolutionStrategy) -> SyncResult<()> {
        let conflict = self
            .store
            .get_conflict(conflict_id)?
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
        if conflict.resolved {
            return Err(SyncError::ConflictNotFound(format!(
                "{conflict_id} (already resolved)"
            )));
        }

        let (label, outcome) = match strategy {
            ResolutionStrategy::UseLocal => ("use_local".to_string(), ConflictOutcome::KeepLocal),
            ResolutionStrategy::UseRemote => (
                "use_remote".to_string(),
                ConflictOutcome::WriteRemote {
                    tombstone: conflict.remote_operation == SyncOperation::Delete,
                },
            ),
            ResolutionStrategy::Merge => self.merge_outcome(&conflict)?,
        };

        let remote_hash = if conflict.remote_operation == SyncOperation::Delete {
            String::new()
        } else {
            content_hash(&conflict.remote_snapshot)
        };
        let log = SyncLogEntry {
            space_id: conflict.space_id,
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id,
            device_id: conflict.remote_device_id,
            operation: conflict.remote_operation,
            sequence: conflict.remote_sequence,
            content_hash: remote_hash,
            synced_at: now_ms(),
        };

        self.store
            .resolve_conflict(conflict_id, &label, outcome, &log, now_ms())?;
        info!(conflict = %conflict_id, resolution = %label, "conflict resolved");
        Ok(())
    }

    fn merge_outcome(&self, conflict: &ConflictRecord) -> SyncResult<(String, ConflictOutcome)> {
        let mergeable = conflict.conflict_type == ConflictType::UpdateUpdate;
        if mergeable {
            if let Some(merge) = self.merge_fns.get(&conflict.entity_type) {
                let merged = merge(&conflict.local_snapshot, &conflict.remote_snapshot)?;
                let hash = content_hash(&merged);
                return Ok((
                    "merge".to_string(),
                    ConflictOutcome::WriteMerged {
                        payload: merged,
                        content_hash: hash,
                    },
                ));
            }
        }

        warn!(
            conflict = %conflict.id,
            entity_type = %conflict.entity_type,
            conflict_type = %conflict.conflict_type,
            "no merge available, falling back to remote version"
        );
        Ok((
            "merge:fallback-remote".to_string(),
            ConflictOutcome::WriteRemote {
                tombstone: conflict.remote_operation == SyncOperation::Delete,
            },
        ))
    }
}

/// Deep merge of two JSON payloads: objects merge recursively, arrays
/// take the set union (preserving local order), scalars prefer remote.
pub fn merge_json_payloads(local: &[u8], remote: &[u8]) -> SyncResult<Vec<u8>> {
    let local_value: serde_json::Value = serde_json::from_slice(local)?;
    let remote_value: serde_json::Value = serde_json::from_slice(remote)?;
    let merged = merge_json_values(&local_value, &remote_value);
    Ok(serde_json::to_vec(&merged)?)
}

fn merge_json_values(local: &serde_json::Value, remote: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value::{Array, Null, Object};

    match (local, remote) {
        (Object(local_obj), Object(remote_obj)) => {
            let mut merged = local_obj.clone();
            for (key, remote_val) in remote_obj {
                let combined = match merged.get(key) {
                    Some(local_val) => match (local_val, remote_val) {
                        (Object(_), Object(_)) => merge_json_values(local_val, remote_val),
                        (Array(l), Array(r)) => Array(merge_arrays(l, r)),
                        _ => remote_val.clone(),
                    },
                    None => remote_val.clone(),
                };
                merged.insert(key.clone(), combined);
            }
            Object(merged)
        }
        (Array(l), Array(r)) => Array(merge_arrays(l, r)),
        (_, Null) => local.clone(),
        (Null, _) => remote.clone(),
        _ => remote.clone(),
    }
}

/// Set union keyed by serialized value, local items first.
fn merge_arrays(local: &[serde_json::Value], remote: &[serde_json::Value]) -> Vec<serde_json::Value> {
    use std::collections::HashSet;

    let mut result = local.to_vec();
    let mut seen: HashSet<String> = local.iter().map(ToString::to_string).collect();

    for item in remote {
        let key = item.to_string();
        if seen.insert(key) {
            result.push(item.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_deep_merge() {
        let local = json!({"a": 1, "nested": {"x": 1}});
        let remote = json!({"b": 2, "nested": {"y": 2}});
        let merged = merge_json_values(&local, &remote);
        assert_eq!(merged, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 2}}));
    }

    #[test]
    fn scalars_prefer_remote() {
        let merged = merge_json_values(&json!({"title": "old"}), &json!({"title": "new"}));
        assert_eq!(merged, json!({"title": "new"}));
    }

    #[test]
    fn arrays_take_set_union() {
        let local = json!({"tags": ["work", "important"]});
        let remote = json!({"tags": ["important", "urgent"]});
        let merged = merge_json_values(&local, &remote);
        assert_eq!(merged["tags"], json!(["work", "important", "urgent"]));
    }

    #[test]
    fn null_never_wins() {
        assert_eq!(merge_json_values(&json!("kept"), &json!(null)), json!("kept"));
        assert_eq!(merge_json_values(&json!(null), &json!("new")), json!("new"));
    }

    #[test]
    fn merged_payload_differs_from_both_inputs() {
        let local = br#"{"a":1}"#;
        let remote = br#"{"b":2}"#;
        let merged = merge_json_payloads(local, remote).unwrap();
        assert_ne!(merged, local.to_vec());
        assert_ne!(merged, remote.to_vec());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(merge_json_payloads(b"\xFF\x00", b"{}").is_err());
    }
}
