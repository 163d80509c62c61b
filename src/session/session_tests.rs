//! Unit tests for the session record and store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::error::{StorageError, StorageResult};
use crate::storage::{KeyValueStorage, MemoryStorage, MockKeyValueStorage};
use pretty_assertions::assert_eq;
use serde_json::json;

fn items(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn fresh(ids: &[&str]) -> TestSession {
    let identity = SessionIdentity {
        test_session_identifier: "tsess-test".to_string(),
        seed: 7,
    };
    TestSession::new(&identity, "math-1", items(ids))
}

// ============================================================================
// Pure operations
// ============================================================================

#[test]
fn test_new_session_not_started() {
    let session = fresh(&["a", "b"]);
    assert_eq!(session.navigation_state.current_item_index, -1);
    assert!(session.visited_items.is_empty());
    assert!(session.has_valid_position());
    assert_eq!(session.current_item(), None);
}

#[test]
fn test_set_current_position_validates_range() {
    let session = fresh(&["a", "b"]);
    let moved = session
        .clone()
        .set_current_position(SessionPosition {
            current_item_index: 1,
            current_section_identifier: Some("s1".into()),
        })
        .unwrap();
    assert_eq!(moved.current_item(), Some("b"));
    // the original record is untouched
    assert_eq!(session.navigation_state.current_item_index, -1);

    let err = moved
        .set_current_position(SessionPosition {
            current_item_index: 2,
            current_section_identifier: None,
        })
        .unwrap_err();
    assert_eq!(err, SessionError::IndexOutOfRange { index: 2, total: 2 });
}

#[test]
fn test_go_to_item_marks_visited() {
    let session = fresh(&["a", "b"]).go_to_item("b", None).unwrap();
    assert_eq!(session.navigation_state.current_item_index, 1);
    assert!(session.visited_items.contains("b"));

    let err = session.go_to_item("zzz", None).unwrap_err();
    assert!(matches!(err, SessionError::UnknownItem { .. }));
}

#[test]
fn test_item_session_keyed_by_item_identifier() {
    let session = fresh(&["a", "b"])
        .upsert_item_session_from_response_event(&ResponseEvent {
            item_identifier: "a".into(),
            response_session_id: "resp-1".into(),
            is_completed: false,
        })
        .upsert_item_session_from_response_event(&ResponseEvent {
            item_identifier: "a".into(),
            response_session_id: "resp-2".into(),
            is_completed: true,
        });
    assert_eq!(session.item_sessions.len(), 1);
    assert_eq!(session.item_sessions["a"].pie_session_id, "resp-2");
    assert!(session.item_sessions["a"].is_completed);
    assert!(!session.is_complete());

    let done = session.upsert_item_session_from_response_event(&ResponseEvent {
        item_identifier: "b".into(),
        response_session_id: "resp-3".into(),
        is_completed: true,
    });
    assert!(done.is_complete());
}

#[test]
fn test_context_defaults_and_variables() {
    let decls: Vec<ContextDeclaration> = serde_json::from_value(json!([
        { "identifier": "LANG", "defaultValue": "en" },
        { "identifier": "NO_DEFAULT" }
    ]))
    .unwrap();
    let session = fresh(&["a"])
        .with_context_defaults(&decls)
        .set_context_variable("ATTEMPT", json!(2));
    assert_eq!(session.context_variables["LANG"], json!("en"));
    assert_eq!(session.context_variables["ATTEMPT"], json!(2));
    assert!(!session.context_variables.contains_key("NO_DEFAULT"));
}

#[test]
fn test_realign_keeps_history_and_clamps() {
    let mut session = fresh(&["a", "b", "c"])
        .go_to_item("c", None)
        .unwrap()
        .upsert_visited_item("a");
    let visited = session.visited_items.clone();

    assert!(!session.realign(&items(&["a", "b", "c"])));
    assert!(session.realign(&items(&["a", "b"])));
    assert_eq!(session.realization.seed, 7);
    assert_eq!(session.visited_items, visited);
    assert_eq!(session.navigation_state.current_item_index, 1);
    assert!(session.has_valid_position());
}

#[test]
fn test_clamp_position_repairs_invalid_index() {
    let mut past_end = fresh(&["a", "b"]);
    past_end.navigation_state.current_item_index = 5;
    past_end.navigation_state.current_section_identifier = Some("s1".into());
    assert!(past_end.clamp_position());
    assert_eq!(past_end.navigation_state.current_item_index, 1);
    assert_eq!(past_end.navigation_state.current_section_identifier, None);

    let mut negative = fresh(&["a", "b"]);
    negative.navigation_state.current_item_index = -4;
    assert!(negative.clamp_position());
    assert_eq!(negative.navigation_state.current_item_index, -1);

    let mut valid = fresh(&["a", "b"]);
    assert!(!valid.clamp_position());
}

#[test]
fn test_session_json_shape() {
    let value = serde_json::to_value(fresh(&["a"])).unwrap();
    assert_eq!(value["testSessionIdentifier"], "tsess-test");
    assert_eq!(value["realization"]["itemIdentifiers"], json!(["a"]));
    assert_eq!(value["navigationState"]["currentItemIndex"], -1);
    assert!(value.get("updatedAt").is_some());
    assert!(value.get("version").is_some());
}

// ============================================================================
// Store
// ============================================================================

#[test]
fn test_identifier_is_deterministic_per_triple() {
    let store = SessionStore::in_memory();
    let key = AttemptKey::new("math-1").with_assignment("asg-1").with_user("u-1");
    let a = store.derive_identifier(&key);
    let b = store.derive_identifier(&key);
    assert_eq!(a, b);

    let other = store.derive_identifier(&AttemptKey::new("math-1").with_user("u-2"));
    assert_ne!(a.test_session_identifier, other.test_session_identifier);
}

#[test]
fn test_anonymous_id_persists_in_storage() {
    let backend = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(backend.clone());
    let first = store.anonymous_id();
    assert!(first.starts_with("anon-"));
    assert_eq!(store.anonymous_id(), first);
    assert_eq!(backend.get("pie:anonymous-id").unwrap(), Some(first.clone()));

    // a second store over the same device storage sees the same id
    let again = SessionStore::new(backend);
    let key = AttemptKey::new("math-1");
    assert_eq!(store.derive_identifier(&key), again.derive_identifier(&key));
}

#[test]
fn test_load_or_create_persists_immediately() {
    let backend = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(backend.clone()).with_key_prefix("district");
    let key = AttemptKey::new("math-1").with_user("u-1");
    let session = store.load_or_create(&key, &items(&["a", "b"]), &[]);

    assert_eq!(session.version, 1);
    let stored = backend
        .get(&format!("district:test-session:{}", session.test_session_identifier))
        .unwrap();
    assert!(stored.is_some());
}

#[test]
fn test_save_bumps_version() {
    let store = SessionStore::in_memory();
    let key = AttemptKey::new("math-1").with_user("u-1");
    let session = store.load_or_create(&key, &items(&["a"]), &[]);
    let saved = store.save(session.upsert_visited_item("a"));
    assert_eq!(saved.version, 2);

    let reloaded = store.load_or_create(&key, &items(&["a"]), &[]);
    assert_eq!(reloaded.version, 2);
    assert!(reloaded.visited_items.contains("a"));
}

#[test]
fn test_corrupt_record_is_replaced() {
    let backend = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(backend.clone());
    let key = AttemptKey::new("math-1").with_user("u-1");
    let identity = store.derive_identifier(&key);
    backend
        .set(
            &format!("pie:test-session:{}", identity.test_session_identifier),
            "{not json",
        )
        .unwrap();

    let session = store.load_or_create(&key, &items(&["a"]), &[]);
    assert_eq!(session.version, 1);
    assert_eq!(session.navigation_state.current_item_index, -1);
}

#[test]
fn test_restored_out_of_range_position_is_repaired() {
    let backend = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(backend.clone());
    let key = AttemptKey::new("math-1").with_user("u-1");
    let session = store.load_or_create(&key, &items(&["a", "b"]), &[]);

    // same realization, hand-edited position
    let mut edited = serde_json::to_value(&session).unwrap();
    edited["navigationState"]["currentItemIndex"] = json!(7);
    let record_key = format!("pie:test-session:{}", session.test_session_identifier);
    backend.set(&record_key, &edited.to_string()).unwrap();

    let restored = store.load_or_create(&key, &items(&["a", "b"]), &[]);
    assert!(restored.has_valid_position());
    assert_eq!(restored.navigation_state.current_item_index, 1);
    assert_eq!(restored.version, session.version + 1);

    let stored: TestSession =
        serde_json::from_str(&backend.get(&record_key).unwrap().unwrap()).unwrap();
    assert_eq!(stored.navigation_state.current_item_index, 1);

    backend.set(&record_key, &edited.to_string()).unwrap();
    let loaded = store.load(&session.test_session_identifier).unwrap();
    assert!(loaded.has_valid_position());
}

#[test]
fn test_failing_backend_degrades_to_memory() {
    let mut mock = MockKeyValueStorage::new();
    mock.expect_get().returning(|_| {
        Err(StorageError::Unavailable {
            message: "storage disabled".to_string(),
        })
    });
    mock.expect_set().never();
    mock.expect_remove().never();

    let store = SessionStore::new(Arc::new(mock));
    let key = AttemptKey::new("math-1");
    let session = store.load_or_create(&key, &items(&["a", "b"]), &[]);
    assert!(store.is_degraded());
    assert_eq!(session.version, 1);

    // continuity within the process still works through the fallback
    let moved = store.save(
        session
            .set_current_position(SessionPosition {
                current_item_index: 1,
                current_section_identifier: None,
            })
            .unwrap(),
    );
    let reloaded = store.load_or_create(&key, &items(&["a", "b"]), &[]);
    assert_eq!(reloaded.navigation_state.current_item_index, 1);
    assert_eq!(reloaded.version, moved.version);
}

/// Memory-backed storage that starts failing once switched off.
#[derive(Default)]
struct SwitchableStorage {
    inner: MemoryStorage,
    down: AtomicBool,
}

impl SwitchableStorage {
    fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                message: "quota exceeded".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStorage for SwitchableStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.remove(key)
    }
}

#[test]
fn test_backend_failing_mid_process_keeps_identity_and_progress() {
    let backend = Arc::new(SwitchableStorage::default());
    let store = SessionStore::new(backend.clone());
    let key = AttemptKey::new("math-1");

    let session = store.load_or_create(&key, &items(&["a", "b", "c"]), &[]);
    let saved = store.save(
        session
            .set_current_position(SessionPosition {
                current_item_index: 1,
                current_section_identifier: None,
            })
            .unwrap()
            .upsert_visited_item("b"),
    );

    backend.take_down();

    let identity = store.derive_identifier(&key);
    assert!(store.is_degraded());
    assert_eq!(identity.test_session_identifier, saved.test_session_identifier);

    let reloaded = store.load_or_create(&key, &items(&["a", "b", "c"]), &[]);
    assert_eq!(reloaded.navigation_state.current_item_index, 1);
    assert!(reloaded.visited_items.contains("b"));
    assert_eq!(reloaded.version, saved.version);

    // writes after degradation still round-trip in memory
    let advanced = store.save(reloaded.go_to_item("c", None).unwrap());
    let again = store.load(&advanced.test_session_identifier).unwrap();
    assert_eq!(again.navigation_state.current_item_index, 2);
}

#[test]
fn test_remove_deletes_record() {
    let store = SessionStore::in_memory();
    let key = AttemptKey::new("math-1").with_user("u-1");
    let session = store.load_or_create(&key, &items(&["a"]), &[]);
    store.remove(&session.test_session_identifier);
    assert!(store.load(&session.test_session_identifier).is_none());
}
