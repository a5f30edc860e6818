//! Session metadata, ordering and current focus

use std::collections::HashMap;
use std::sync::Arc;

use legion_protocol::{SessionInfo, SessionState, StateChange};
use tracing::debug;

/// Read access to session state for stores that need it
pub trait SessionLookup {
    fn current_session_id(&self) -> Option<&str>;
    fn session_state(&self, session_id: &str) -> Option<SessionState>;
}

/// What selecting a session in a given state requires before it can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPlan {
    /// Already live
    Ready,
    /// Call the start endpoint, then poll
    Start,
    /// Start already in progress, poll only
    Poll,
}

impl StartPlan {
    pub fn for_state(state: SessionState) -> Self {
        match state {
            SessionState::Created | SessionState::Terminated | SessionState::Error => {
                StartPlan::Start
            }
            SessionState::Starting => StartPlan::Poll,
            SessionState::Active | SessionState::Paused => StartPlan::Ready,
        }
    }
}

/// A state change applied to a known session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<SessionState>,
    pub current: SessionState,
}

impl Transition {
    /// Left {active, paused, starting}
    pub fn left_live(&self) -> bool {
        !self.current.is_live() && self.previous.map_or(true, SessionState::is_live)
    }

    pub fn changed(&self) -> bool {
        self.previous != Some(self.current)
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, SessionInfo>,
    ordered: Arc<Vec<SessionInfo>>,
    current: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_order(&mut self) {
        let mut list: Vec<SessionInfo> = self.sessions.values().cloned().collect();
        list.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        self.ordered = Arc::new(list);
    }

    /// Replace the whole list (REST list or `sessions_list` frame).
    pub fn replace_all(&mut self, sessions: Vec<SessionInfo>) {
        self.sessions = sessions
            .into_iter()
            .map(|s| (s.session_id.clone(), s))
            .collect();
        self.rebuild_order();
    }

    /// Insert or update one session; returns the transition.
    pub fn upsert(&mut self, session: SessionInfo) -> Transition {
        let previous = self.sessions.get(&session.session_id).map(|s| s.state);
        let current = session.state;
        self.sessions.insert(session.session_id.clone(), session);
        self.rebuild_order();
        Transition { previous, current }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionInfo> {
        let removed = self.sessions.remove(session_id);
        if removed.is_some() {
            self.rebuild_order();
            if self.current.as_deref() == Some(session_id) {
                self.current = None;
            }
        }
        removed
    }

    /// Apply a `state_change` payload. Unknown sessions are only created
    /// when the change carries a full session record.
    pub fn apply_state_change(&mut self, session_id: &str, change: &StateChange) -> Option<Transition> {
        if let Some(full) = &change.session {
            let mut full = full.clone();
            full.state = change.state;
            if change.error_message.is_some() {
                full.error_message = change.error_message.clone();
            }
            return Some(self.upsert(full));
        }

        let Some(session) = self.sessions.get_mut(session_id) else {
            debug!(
                component = "session_store",
                event = "state_change.unknown_session",
                session_id = %session_id,
                state = change.state.as_str(),
                "State change for a session not in the list"
            );
            return None;
        };
        let previous = Some(session.state);
        session.state = change.state;
        session.error_message = change.error_message.clone();
        if let Some(mode) = change.current_permission_mode {
            session.current_permission_mode = mode;
        }
        self.rebuild_order();
        Some(Transition {
            previous,
            current: change.state,
        })
    }

    pub fn set_current(&mut self, session_id: Option<String>) {
        self.current = session_id;
    }

    pub fn current(&self) -> Option<&SessionInfo> {
        self.sessions.get(self.current.as_deref()?)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionInfo> {
        self.sessions.get(session_id)
    }

    /// Sessions sorted by `order`, then name
    pub fn list(&self) -> Arc<Vec<SessionInfo>> {
        Arc::clone(&self.ordered)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionLookup for SessionStore {
    fn current_session_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_protocol::PermissionMode;

    fn session(id: &str, order: i64, state: SessionState) -> SessionInfo {
        SessionInfo {
            session_id: id.to_string(),
            name: format!("session {id}"),
            state,
            current_permission_mode: PermissionMode::Default,
            order,
            project_id: None,
            error_message: None,
            updated_at: None,
        }
    }

    fn change(state: SessionState) -> StateChange {
        StateChange {
            session_id: None,
            state,
            error_message: None,
            current_permission_mode: None,
            session: None,
        }
    }

    #[test]
    fn list_is_sorted_by_order() {
        let mut store = SessionStore::new();
        store.replace_all(vec![
            session("c", 2, SessionState::Active),
            session("a", 0, SessionState::Active),
            session("b", 1, SessionState::Paused),
        ]);
        let ids: Vec<_> = store.list().iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn state_change_reports_transition() {
        let mut store = SessionStore::new();
        store.upsert(session("a", 0, SessionState::Active));

        let mut terminated = change(SessionState::Error);
        terminated.error_message = Some("sdk crashed".to_string());
        let transition = store.apply_state_change("a", &terminated).unwrap();

        assert!(transition.left_live());
        assert!(transition.changed());
        assert_eq!(store.session_state("a"), Some(SessionState::Error));
        assert_eq!(store.get("a").unwrap().error_message.as_deref(), Some("sdk crashed"));
    }

    #[test]
    fn dead_to_dead_is_not_leaving_live() {
        let transition = Transition {
            previous: Some(SessionState::Terminated),
            current: SessionState::Error,
        };
        assert!(!transition.left_live());
    }

    #[test]
    fn unknown_session_state_change_is_ignored() {
        let mut store = SessionStore::new();
        assert!(store.apply_state_change("ghost", &change(SessionState::Active)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn state_change_with_full_record_inserts() {
        let mut store = SessionStore::new();
        let mut with_session = change(SessionState::Starting);
        with_session.session = Some(session("n", 5, SessionState::Created));
        let transition = store.apply_state_change("n", &with_session).unwrap();
        assert_eq!(transition.previous, None);
        assert_eq!(store.session_state("n"), Some(SessionState::Starting));
    }

    #[test]
    fn removing_current_clears_focus() {
        let mut store = SessionStore::new();
        store.upsert(session("a", 0, SessionState::Active));
        store.set_current(Some("a".to_string()));
        assert_eq!(store.current_session_id(), Some("a"));
        store.remove("a");
        assert!(store.current().is_none());
        assert!(store.current_session_id().is_none());
    }

    #[test]
    fn start_plan_by_state() {
        assert_eq!(StartPlan::for_state(SessionState::Created), StartPlan::Start);
        assert_eq!(StartPlan::for_state(SessionState::Terminated), StartPlan::Start);
        assert_eq!(StartPlan::for_state(SessionState::Error), StartPlan::Start);
        assert_eq!(StartPlan::for_state(SessionState::Starting), StartPlan::Poll);
        assert_eq!(StartPlan::for_state(SessionState::Active), StartPlan::Ready);
        assert_eq!(StartPlan::for_state(SessionState::Paused), StartPlan::Ready);
    }
}
