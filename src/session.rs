//! Session storage behind a trait so the pipeline does not care where
//! in-progress sessions live.
//!
//! [`InMemorySessionStore`] keeps sessions in a `HashMap` behind
//! `std::sync::RwLock`. Expired sessions are evicted only by an explicit
//! [`SessionStore::sweep_expired`] call.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use casegen_core::pipeline::PipelineSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PipelineSession>>;

    /// Insert or replace.
    async fn put(&self, session: PipelineSession) -> Result<()>;

    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// All sessions, most recently active first.
    async fn list(&self) -> Result<Vec<PipelineSession>>;

    /// Remove sessions idle for longer than `ttl`; returns how many.
    async fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, PipelineSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, PipelineSession>>> {
        self.sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, PipelineSession>>> {
        self.sessions
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<PipelineSession>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn put(&self, session: PipelineSession) -> Result<()> {
        self.write()?.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<PipelineSession>> {
        let mut sessions: Vec<PipelineSession> = self.read()?.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut sessions = self.write()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, ttl));
        Ok(before - sessions.len())
    }
}
