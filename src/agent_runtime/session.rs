//! Session map for C8's multi-turn chat contract.
//!
//! A thin `DashMap`-backed store, following the same per-key concurrent map
//! idiom `supervisor::Supervisor` uses for instances, with an idle-eviction
//! sweep ticker shaped like `scheduler::tokio_scheduler`'s periodic tick loop.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::llm::Message;

pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: Instant,
    pub last_active: Instant,
}

impl Session {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Fetch an existing session by id, or create a fresh one when `id` is
    /// `None` or not found (the "absent session id" branch of the session
    /// contract never errors — it just starts a new conversation).
    pub fn get_or_create(&self, id: Option<&str>) -> String {
        if let Some(id) = id {
            if let Some(mut entry) = self.sessions.get_mut(id) {
                entry.touch();
                return id.to_string();
            }
        }
        let session = Session::new();
        let new_id = session.id.clone();
        self.sessions.insert(new_id.clone(), session);
        new_id
    }

    pub fn append(&self, id: &str, message: Message) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.messages.push(message);
            session.touch();
        }
    }

    pub fn history(&self, id: &str) -> Vec<Message> {
        self.sessions.get(id).map(|s| s.messages.clone()).unwrap_or_default()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Evict every session idle longer than the configured timeout. Run on
    /// every generate/chat call and periodically from the shutdown/sweep
    /// ticker.
    pub fn sweep(&self) -> usize {
        let cutoff = self.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.last_active.elapsed() < cutoff);
        before - self.sessions.len()
    }

    /// Spawn a background task that sweeps on a fixed tick, for callers that
    /// want eviction independent of request traffic.
    pub fn spawn_sweeper(store: std::sync::Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_with_no_id_makes_new_session() {
        let store = SessionStore::new(Duration::from_secs(1800));
        let id = store.get_or_create(None);
        assert_eq!(store.active_count(), 1);
        assert!(store.history(&id).is_empty());
    }

    #[test]
    fn get_or_create_with_unknown_id_makes_new_session_anyway() {
        let store = SessionStore::new(Duration::from_secs(1800));
        let id = store.get_or_create(Some("does-not-exist"));
        assert_ne!(id, "does-not-exist");
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn append_and_history_round_trip() {
        let store = SessionStore::new(Duration::from_secs(1800));
        let id = store.get_or_create(None);
        store.append(&id, Message::user("hello"));
        store.append(&id, Message::assistant("hi"));
        assert_eq!(store.history(&id).len(), 2);
    }

    #[test]
    fn sweep_evicts_idle_sessions() {
        let store = SessionStore::new(Duration::from_millis(0));
        let id = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));
        let evicted = store.sweep();
        assert_eq!(evicted, 1);
        assert!(store.history(&id).is_empty());
    }

    #[test]
    fn delete_removes_session() {
        let store = SessionStore::new(Duration::from_secs(1800));
        let id = store.get_or_create(None);
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
    }
}
