// Tailgate - app/pool.rs
//
// Connection pool: one reusable remote session per server identity.
//
// Architecture:
//   - All map mutations happen under one `tokio::sync::Mutex`. The lock is
//     never held across blocking work: liveness probes, session creation and
//     session close all run on the blocking pool with the lock released.
//   - A per-server creation gate (an async mutex per server id) serialises
//     acquire for one server, so two concurrent callers never log in twice.
//     Acquires for different servers proceed independently.
//   - Capacity is bounded: inserting a new server while full evicts the
//     least-recently-used entry first.
//   - Sessions are shared as `Arc<dyn RemoteSession>`. When an entry leaves
//     the map (reaped, evicted, found dead, shutdown) the session is closed
//     only if the pool held the last reference; otherwise it is released when
//     the last stream using it drops it.

use crate::core::model::ServerProfile;
use crate::core::remote::{RemoteConnector, RemoteSession};
use crate::util::error::RemoteError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

struct PooledConnection {
    session: Arc<dyn RemoteSession>,
    last_used: Instant,
    idle_timeout: Duration,
}

impl PooledConnection {
    /// Idle means past its timeout *and* not held by any active stream.
    fn is_idle(&self, now: Instant) -> bool {
        now.duration_since(self.last_used) > self.idle_timeout
            && Arc::strong_count(&self.session) == 1
    }
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<String, PooledConnection>,
    gates: HashMap<String, Arc<AsyncMutex<()>>>,
    closed: bool,
}

impl PoolState {
    fn take_session(
        &mut self,
        server_id: &str,
        session: &Arc<dyn RemoteSession>,
    ) -> Option<Arc<dyn RemoteSession>> {
        match self.entries.get(server_id) {
            Some(entry) if Arc::ptr_eq(&entry.session, session) => {
                self.entries.remove(server_id).map(|e| e.session)
            }
            _ => None,
        }
    }

    fn evict_lru(&mut self) -> Option<(String, Arc<dyn RemoteSession>)> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(id, _)| id.clone())?;
        self.entries.remove(&oldest).map(|e| (oldest, e.session))
    }
}

/// Owns and reuses remote sessions, keyed by `host:port`.
pub struct ConnectionPool {
    connector: Arc<dyn RemoteConnector>,
    max_connections: usize,
    state: AsyncMutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn RemoteConnector>, max_connections: usize) -> Self {
        Self {
            connector,
            max_connections: max_connections.max(1),
            state: AsyncMutex::new(PoolState::default()),
        }
    }

    /// Return a live session for `profile`, reusing the cached one when its
    /// liveness probe passes and creating a new one otherwise.
    ///
    /// Failures are never cached: the next call tries again from scratch.
    pub async fn acquire(
        &self,
        profile: &Arc<ServerProfile>,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let server_id = profile.id.as_str();

        let gate = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(RemoteError::PoolClosed);
            }
            Arc::clone(state.gates.entry(server_id.to_string()).or_default())
        };
        let _creating = gate.lock().await;

        let cached = {
            let state = self.state.lock().await;
            if state.closed {
                return Err(RemoteError::PoolClosed);
            }
            state.entries.get(server_id).map(|e| Arc::clone(&e.session))
        };

        if let Some(session) = cached {
            let probe = Arc::clone(&session);
            let alive = match tokio::task::spawn_blocking(move || probe.is_alive()).await {
                Ok(alive) => alive,
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "Liveness probe did not complete");
                    false
                }
            };

            let mut state = self.state.lock().await;
            if alive {
                if let Some(entry) = state.entries.get_mut(server_id) {
                    entry.last_used = Instant::now();
                }
                tracing::debug!(server = %server_id, "Reusing pooled session");
                return Ok(session);
            }

            tracing::warn!(server = %server_id, "Pooled session failed liveness probe; replacing");
            let dead = state.take_session(server_id, &session);
            drop(state);
            drop(session);
            if let Some(dead) = dead {
                retire(server_id, dead).await;
            }
        }

        let connector = Arc::clone(&self.connector);
        let target = Arc::clone(profile);
        let created = tokio::task::spawn_blocking(move || connector.connect(&target))
            .await
            .map_err(RemoteError::from)
            .and_then(|r| r);
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "Failed to create remote session");
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            retire(server_id, session).await;
            return Err(RemoteError::PoolClosed);
        }

        let mut retired = Vec::new();
        if !state.entries.contains_key(server_id) && state.entries.len() >= self.max_connections {
            if let Some((evicted_id, evicted)) = state.evict_lru() {
                tracing::info!(
                    server = %evicted_id,
                    max_connections = self.max_connections,
                    "Pool full; evicting least-recently-used session"
                );
                retired.push((evicted_id, evicted));
            }
        }
        let replaced = state.entries.insert(
            server_id.to_string(),
            PooledConnection {
                session: Arc::clone(&session),
                last_used: Instant::now(),
                idle_timeout: profile.idle_timeout,
            },
        );
        if let Some(old) = replaced {
            retired.push((server_id.to_string(), old.session));
        }
        let pooled = state.entries.len();
        drop(state);

        tracing::info!(server = %server_id, pooled, "Remote session pooled");
        for (id, old) in retired {
            retire(&id, old).await;
        }
        Ok(session)
    }

    /// Close and remove entries idle past their profile's timeout. Entries
    /// still held by an active stream are kept. Returns how many were reaped.
    pub async fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, Arc<dyn RemoteSession>)> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_idle(now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| state.entries.remove(&id).map(|e| (id, e.session)))
                .collect()
        };

        let count = expired.len();
        for (id, session) in expired {
            tracing::info!(server = %id, "Reaping idle remote session");
            retire(&id, session).await;
        }
        count
    }

    /// Close every pooled session and refuse further acquires. Idempotent.
    pub async fn release_all(&self) {
        let drained: Vec<(String, Arc<dyn RemoteSession>)> = {
            let mut state = self.state.lock().await;
            if state.closed && state.entries.is_empty() {
                return;
            }
            state.closed = true;
            state.gates.clear();
            state.entries.drain().map(|(id, e)| (id, e.session)).collect()
        };

        tracing::info!(sessions = drained.len(), "Releasing all remote sessions");
        for (id, session) in drained {
            retire(&id, session).await;
        }
    }

    /// Number of pooled entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, server_id: &str) -> bool {
        self.state.lock().await.entries.contains_key(server_id)
    }
}

/// Drop the pool's reference to `session`, closing it off-thread when nobody
/// else holds it.
async fn retire(server_id: &str, session: Arc<dyn RemoteSession>) {
    if Arc::strong_count(&session) > 1 {
        tracing::debug!(server = %server_id, "Session still in use; released on last drop");
        return;
    }
    if let Err(e) = tokio::task::spawn_blocking(move || session.close()).await {
        tracing::warn!(server = %server_id, error = %e, "Session close did not complete");
    }
}
