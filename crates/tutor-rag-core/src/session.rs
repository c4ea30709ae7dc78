//! Per-conversation turn history.
//!
//! [`SessionStore`] maps a session identifier to an ordered list of
//! [`Turn`]s. It is shared, process-wide state, so it is built for
//! concurrent access:
//!
//! - The id → session map sits behind one `Mutex<LruCache>` that is held only
//!   for the lookup or insert itself.
//! - Each [`Session`] owns its own `Mutex<Vec<Turn>>`. Appends to one session
//!   are serialized; appends to different sessions never wait on each other's
//!   turn lock.
//!
//! # Eviction
//!
//! The store is a bounded cache. Inserting a session at capacity evicts the
//! least-recently-accessed one, and a session idle for longer than
//! [`SessionPolicy::idle_ttl`] is treated as absent: the next reference
//! starts a fresh, empty session under the same id. Turns inside a live
//! session are never mutated or removed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;

use crate::models::Turn;

/// Session id used when a chat request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Capacity and expiry settings for a [`SessionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Maximum number of live sessions. Values below 1 are treated as 1.
    pub capacity: usize,
    /// Sessions idle longer than this are discarded. `None` disables expiry.
    pub idle_ttl: Option<Duration>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            capacity: 1024,
            idle_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

/// One conversation.
#[derive(Debug)]
pub struct Session {
    id: String,
    turns: Mutex<Vec<Turn>>,
    last_access: Mutex<Instant>,
}

impl Session {
    fn new(id: &str, now: Instant) -> Self {
        Self {
            id: id.to_string(),
            turns: Mutex::new(Vec::new()),
            last_access: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the turns in chronological order.
    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.turns).clone()
    }

    pub fn turn_count(&self) -> usize {
        lock(&self.turns).len()
    }

    fn push(&self, turn: Turn) {
        lock(&self.turns).push(turn);
    }

    fn touch(&self, now: Instant) {
        *lock(&self.last_access) = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*lock(&self.last_access))
    }
}

/// Bounded, concurrent session-id → history map.
pub struct SessionStore {
    sessions: Mutex<LruCache<String, Arc<Session>>>,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        let capacity = NonZeroUsize::new(policy.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Return the session for `session_id`, creating an empty one on first
    /// reference (or after the previous one expired or was evicted).
    pub fn get_or_create(&self, session_id: &str) -> Arc<Session> {
        self.get_or_create_at(session_id, Instant::now())
    }

    /// Append a completed turn to the session's history.
    pub fn append_turn(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        retrieved_chunk_ids: Vec<String>,
    ) {
        self.append_turn_at(
            session_id,
            question,
            answer,
            retrieved_chunk_ids,
            Instant::now(),
        );
    }

    /// Chronological turns of `session_id`.
    pub fn history_of(&self, session_id: &str) -> Vec<Turn> {
        self.get_or_create(session_id).turns()
    }

    /// Whether a live (unexpired) session exists, without creating one or
    /// changing its recency.
    pub fn contains(&self, session_id: &str) -> bool {
        let now = Instant::now();
        let map = lock(&self.sessions);
        map.peek(session_id)
            .map(|s| !self.is_expired(s, now))
            .unwrap_or(false)
    }

    /// Number of sessions currently held, including expired ones not yet
    /// purged.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn get_or_create_at(&self, session_id: &str, now: Instant) -> Arc<Session> {
        let mut map = lock(&self.sessions);

        if let Some(existing) = map.get(session_id) {
            if !self.is_expired(existing, now) {
                existing.touch(now);
                return Arc::clone(existing);
            }
        }

        let session = Arc::new(Session::new(session_id, now));
        map.put(session_id.to_string(), Arc::clone(&session));
        session
    }

    fn append_turn_at(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        retrieved_chunk_ids: Vec<String>,
        now: Instant,
    ) {
        // The map lock is released before the per-session lock is taken.
        let session = self.get_or_create_at(session_id, now);
        session.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
            retrieved_chunk_ids,
            timestamp: Utc::now(),
        });
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut map = lock(&self.sessions);
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, s)| self.is_expired(s, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            map.pop(id);
        }
        expired.len()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        self.policy
            .idle_ttl
            .map(|ttl| session.idle_for(now) > ttl)
            .unwrap_or(false)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
