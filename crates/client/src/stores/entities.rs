//! Per-session entity caches: resources, queue, tasks, schedules, legion
//! communications and input drafts.
//!
//! Every mutation swaps in a fresh `Arc` for the touched scope so snapshot
//! readers never observe a half-applied update.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use legion_protocol::{LegionMessage, QueueItem, Resource, Schedule, TaskItem};

/// Scoped map keyed by entity id
#[derive(Debug, Clone)]
pub struct KeyedCache<T> {
    scopes: HashMap<String, Arc<BTreeMap<String, T>>>,
}

impl<T> Default for KeyedCache<T> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
        }
    }
}

impl<T: Clone + PartialEq> KeyedCache<T> {
    /// Returns false when the stored value was already identical.
    pub fn upsert(&mut self, scope: &str, key: &str, item: T) -> bool {
        let entries = self.scopes.entry(scope.to_string()).or_default();
        if entries.get(key) == Some(&item) {
            return false;
        }
        Arc::make_mut(entries).insert(key.to_string(), item);
        true
    }

    pub fn remove(&mut self, scope: &str, key: &str) -> Option<T> {
        let entries = self.scopes.get_mut(scope)?;
        if !entries.contains_key(key) {
            return None;
        }
        Arc::make_mut(entries).remove(key)
    }

    pub fn get(&self, scope: &str) -> Arc<BTreeMap<String, T>> {
        self.scopes.get(scope).cloned().unwrap_or_default()
    }

    pub fn clear_scope(&mut self, scope: &str) {
        self.scopes.remove(scope);
    }
}

/// Scoped list replaced wholesale on every update
#[derive(Debug, Clone)]
pub struct ListCache<T> {
    scopes: HashMap<String, Arc<Vec<T>>>,
}

impl<T> Default for ListCache<T> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
        }
    }
}

impl<T: Clone + PartialEq> ListCache<T> {
    /// Returns false when nothing changed.
    pub fn replace(&mut self, scope: &str, items: Vec<T>) -> bool {
        if self.scopes.get(scope).is_some_and(|held| **held == items) {
            return false;
        }
        self.scopes.insert(scope.to_string(), Arc::new(items));
        true
    }

    pub fn get(&self, scope: &str) -> Arc<Vec<T>> {
        self.scopes.get(scope).cloned().unwrap_or_default()
    }

    pub fn clear_scope(&mut self, scope: &str) {
        self.scopes.remove(scope);
    }
}

#[derive(Debug, Default)]
pub struct EntityStores {
    pub resources: KeyedCache<Resource>,
    pub queue: ListCache<QueueItem>,
    pub tasks: ListCache<TaskItem>,
    pub schedules: KeyedCache<Schedule>,
    /// Keyed by legion id, then communication id
    pub legion: KeyedCache<LegionMessage>,
    drafts: HashMap<String, String>,
}

impl EntityStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource(&mut self, session_id: &str, resource: Resource) -> bool {
        let key = resource.resource_id.clone();
        self.resources.upsert(session_id, &key, resource)
    }

    pub fn remove_resource(&mut self, session_id: &str, resource_id: &str) -> bool {
        self.resources.remove(session_id, resource_id).is_some()
    }

    /// Queue is kept sorted by position.
    pub fn replace_queue(&mut self, session_id: &str, mut items: Vec<QueueItem>) -> bool {
        items.sort_by_key(|item| item.position);
        self.queue.replace(session_id, items)
    }

    pub fn replace_tasks(&mut self, session_id: &str, tasks: Vec<TaskItem>) -> bool {
        self.tasks.replace(session_id, tasks)
    }

    pub fn upsert_schedule(&mut self, session_id: &str, schedule: Schedule) -> bool {
        let key = schedule.schedule_id.clone();
        self.schedules.upsert(session_id, &key, schedule)
    }

    pub fn remove_schedule(&mut self, session_id: &str, schedule_id: &str) -> bool {
        self.schedules.remove(session_id, schedule_id).is_some()
    }

    pub fn add_legion_message(&mut self, message: LegionMessage) -> bool {
        let scope = message.legion_id.clone();
        let key = message.comm_id.clone();
        self.legion.upsert(&scope, &key, message)
    }

    /// Legion communications ordered by timestamp
    pub fn legion_timeline(&self, legion_id: &str) -> Vec<LegionMessage> {
        let mut messages: Vec<LegionMessage> = self.legion.get(legion_id).values().cloned().collect();
        messages.sort_by_key(|m| m.timestamp.millis_or_zero());
        messages
    }

    /// Drop everything scoped to a deleted session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.resources.clear_scope(session_id);
        self.queue.clear_scope(session_id);
        self.tasks.clear_scope(session_id);
        self.schedules.clear_scope(session_id);
        self.drafts.remove(session_id);
    }

    // -----------------------------------------------------------------------
    // Input drafts (memory only)
    // -----------------------------------------------------------------------

    pub fn set_draft(&mut self, session_id: &str, text: String) {
        if text.is_empty() {
            self.drafts.remove(session_id);
        } else {
            self.drafts.insert(session_id.to_string(), text);
        }
    }

    pub fn draft(&self, session_id: &str) -> Option<&str> {
        self.drafts.get(session_id).map(String::as_str)
    }

    pub fn take_draft(&mut self, session_id: &str) -> Option<String> {
        self.drafts.remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_protocol::{ResourceKind, TaskStatus, Timestamp};

    fn resource(id: &str, title: &str) -> Resource {
        Resource {
            resource_id: id.to_string(),
            session_id: "s".to_string(),
            kind: ResourceKind::Image,
            title: title.to_string(),
            description: None,
            mime_type: Some("image/png".to_string()),
            size_bytes: Some(1024),
            created_at: None,
        }
    }

    fn queued(id: &str, position: u32) -> QueueItem {
        QueueItem {
            queue_id: id.to_string(),
            session_id: "s".to_string(),
            content: format!("queued {id}"),
            position,
            created_at: None,
        }
    }

    #[test]
    fn resource_upsert_replaces_scope_arc() {
        let mut stores = EntityStores::new();
        assert!(stores.register_resource("s", resource("r1", "diagram")));
        let before = stores.resources.get("s");

        assert!(stores.register_resource("s", resource("r1", "diagram v2")));
        assert_eq!(before["r1"].title, "diagram");
        assert_eq!(stores.resources.get("s")["r1"].title, "diagram v2");
        assert!(!stores.register_resource("s", resource("r1", "diagram v2")));
    }

    #[test]
    fn remove_unknown_resource_is_noop() {
        let mut stores = EntityStores::new();
        assert!(!stores.remove_resource("s", "missing"));
        stores.register_resource("s", resource("r1", "a"));
        assert!(stores.remove_resource("s", "r1"));
        assert!(stores.resources.get("s").is_empty());
    }

    #[test]
    fn queue_sorted_by_position() {
        let mut stores = EntityStores::new();
        stores.replace_queue("s", vec![queued("b", 2), queued("a", 1)]);
        let ids: Vec<_> = stores.queue.get("s").iter().map(|q| q.queue_id.clone()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(!stores.replace_queue("s", vec![queued("a", 1), queued("b", 2)]));
    }

    #[test]
    fn tasks_replace_wholesale() {
        let mut stores = EntityStores::new();
        let task = TaskItem {
            task_id: "1".to_string(),
            content: "Write tests".to_string(),
            status: TaskStatus::InProgress,
            active_form: Some("Writing tests".to_string()),
        };
        assert!(stores.replace_tasks("s", vec![task]));
        assert!(stores.replace_tasks("s", vec![]));
        assert!(stores.tasks.get("s").is_empty());
    }

    #[test]
    fn legion_timeline_ordered_by_timestamp() {
        let mut stores = EntityStores::new();
        for (id, ts) in [("c2", 200), ("c1", 100)] {
            stores.add_legion_message(LegionMessage {
                comm_id: id.to_string(),
                legion_id: "L".to_string(),
                from_session_id: None,
                to_session_id: None,
                content: id.to_string(),
                timestamp: Timestamp::from_millis(ts),
                metadata: None,
            });
        }
        let ids: Vec<_> = stores
            .legion_timeline("L")
            .into_iter()
            .map(|m| m.comm_id)
            .collect();
        assert_eq!(ids, ["c1", "c2"]);
    }

    #[test]
    fn drafts_are_per_session() {
        let mut stores = EntityStores::new();
        stores.set_draft("a", "half a thought".to_string());
        assert_eq!(stores.draft("a"), Some("half a thought"));
        assert_eq!(stores.draft("b"), None);
        stores.set_draft("a", String::new());
        assert_eq!(stores.draft("a"), None);
        stores.set_draft("b", "x".to_string());
        assert_eq!(stores.take_draft("b").as_deref(), Some("x"));
        assert_eq!(stores.draft("b"), None);
    }

    #[test]
    fn forget_session_drops_scoped_entities() {
        let mut stores = EntityStores::new();
        stores.register_resource("s", resource("r1", "a"));
        stores.replace_queue("s", vec![queued("q", 0)]);
        stores.set_draft("s", "draft".to_string());
        stores.forget_session("s");
        assert!(stores.resources.get("s").is_empty());
        assert!(stores.queue.get("s").is_empty());
        assert!(stores.draft("s").is_none());
    }
}
