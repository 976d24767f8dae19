//! Persistence for permission rules and thread memory
//!
//! Session grants are never stored; they die with the session.

mod store;

pub use store::{FileStore, InMemoryStore, StateStore};

use crate::core::GateResult;
use crate::memory::ThreadSnapshot;
use crate::permissions::PermissionRules;

fn rules_key(session_id: &str) -> String {
    format!("permissions/{}", session_id)
}

fn thread_key(thread_id: &str) -> String {
    format!("memory/{}", thread_id)
}

/// Save a session's permission rules
pub fn save_rules(
    store: &dyn StateStore,
    session_id: &str,
    rules: &PermissionRules,
) -> GateResult<()> {
    store.set(&rules_key(session_id), serde_json::to_value(rules)?)
}

/// Load a session's permission rules, `None` if never saved
pub fn load_rules(store: &dyn StateStore, session_id: &str) -> GateResult<Option<PermissionRules>> {
    store
        .get(&rules_key(session_id))?
        .map(serde_json::from_value)
        .transpose()
        .map_err(Into::into)
}

/// Save a thread's memory records
pub fn save_thread(
    store: &dyn StateStore,
    thread_id: &str,
    snapshot: &ThreadSnapshot,
) -> GateResult<()> {
    store.set(&thread_key(thread_id), serde_json::to_value(snapshot)?)
}

/// Load a thread's memory records, `None` if never saved
pub fn load_thread(store: &dyn StateStore, thread_id: &str) -> GateResult<Option<ThreadSnapshot>> {
    store
        .get(&thread_key(thread_id))?
        .map(serde_json::from_value)
        .transpose()
        .map_err(Into::into)
}

/// Forget a thread's memory records
pub fn delete_thread(store: &dyn StateStore, thread_id: &str) -> GateResult<()> {
    store.remove(&thread_key(thread_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MessageRecord, ObservationEntry};
    use crate::permissions::{PermissionPolicy, ToolCategory};
    use tempfile::TempDir;

    #[test]
    fn test_rules_round_trip() {
        let store = InMemoryStore::new();
        assert!(load_rules(&store, "s1").unwrap().is_none());

        let rules = PermissionRules::new()
            .with_category(ToolCategory::Execute, PermissionPolicy::Deny)
            .with_tool("view", PermissionPolicy::Ask);
        save_rules(&store, "s1", &rules).unwrap();

        assert_eq!(load_rules(&store, "s1").unwrap(), Some(rules));
        assert!(load_rules(&store, "s2").unwrap().is_none());
    }

    #[test]
    fn test_thread_round_trip_on_disk() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::with_dir(temp.path());

        let snapshot = ThreadSnapshot {
            threshold: 30_000,
            reflection_threshold: 40_000,
            pending_messages: vec![MessageRecord::user("hello", 2)],
            observations: vec![ObservationEntry::new("- greeted", 3)],
        };
        save_thread(&store, "thread-1", &snapshot).unwrap();

        // A fresh store over the same directory sees the data
        let reopened = FileStore::with_dir(temp.path());
        assert_eq!(load_thread(&reopened, "thread-1").unwrap(), Some(snapshot));

        delete_thread(&reopened, "thread-1").unwrap();
        assert!(load_thread(&reopened, "thread-1").unwrap().is_none());
    }

    #[test]
    fn test_wrong_shape_is_serialization_error() {
        let store = InMemoryStore::new();
        store
            .set("permissions/s1", serde_json::json!({"tools": {"view": 3}}))
            .unwrap();
        assert!(matches!(
            load_rules(&store, "s1"),
            Err(crate::core::GateError::Serialization(_))
        ));
    }
}
