// Tailgate - app/service.rs
//
// The public entry point: resolve an id, dispatch to the local or remote
// path, and hand back a uniform record stream.
//
// `TailService` is constructed explicitly and torn down with `shutdown()`;
// there is no process-wide instance. `tail()` spawns one producer task per
// call and therefore must be called from inside a tokio runtime.

use crate::app::catalog::Catalog;
use crate::app::pool::ConnectionPool;
use crate::app::remote::RemoteTailAdapter;
use crate::app::stream::{self, TailStream};
use crate::app::tail::LocalTailSession;
use crate::core::model::{Locality, LogSource, RemoteFile, ServerProfile, TailRecord};
use crate::core::remote::RemoteConnector;
use crate::platform::fs;
use crate::util::constants;
use crate::util::error::TailgateError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for a `TailService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub max_connections: usize,
    pub tail_window_bytes: u64,
    /// How long a local tail waits for a change signal before polling.
    pub watch_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_connections: constants::DEFAULT_MAX_CONNECTIONS,
            tail_window_bytes: constants::DEFAULT_TAIL_WINDOW_BYTES,
            watch_timeout: Duration::from_millis(constants::WATCH_WAIT_TIMEOUT_MS),
        }
    }
}

pub struct TailService {
    catalog: Catalog,
    pool: Arc<ConnectionPool>,
    remote: RemoteTailAdapter,
    settings: ServiceSettings,
}

impl TailService {
    pub fn new(
        catalog: Catalog,
        connector: Arc<dyn RemoteConnector>,
        settings: ServiceSettings,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(connector, settings.max_connections));
        let remote = RemoteTailAdapter::new(Arc::clone(&pool), settings.tail_window_bytes);
        tracing::debug!(
            sources = catalog.sources().len(),
            servers = catalog.servers().len(),
            max_connections = settings.max_connections,
            "Tail service ready"
        );
        Self {
            catalog,
            pool,
            remote,
            settings,
        }
    }

    /// Look up the source for `id`.
    pub fn resolve(&self, id: &str) -> Result<Arc<LogSource>, TailgateError> {
        self.catalog
            .resolve(id)
            .ok_or_else(|| TailgateError::NotFound { id: id.to_string() })
    }

    /// Start tailing `id`. An unknown id yields a stream holding only the
    /// not-found sentinel. Dropping the stream cancels the producer.
    pub fn tail(&self, id: &str) -> TailStream {
        let source = match self.resolve(id) {
            Ok(source) => source,
            Err(e) => {
                tracing::info!(error = %e, "Tail requested for unknown source");
                return TailStream::single(TailRecord::NotFound);
            }
        };

        let (sink, stream) = stream::channel();
        match source.locality().clone() {
            Locality::Local => {
                tracing::info!(source = %source.id, path = %source.path.display(), "Starting local tail");
                let session = LocalTailSession::new(source, self.settings.tail_window_bytes)
                    .with_watch_timeout(self.settings.watch_timeout);
                tokio::spawn(session.run(sink));
            }
            Locality::Remote(server) => {
                tracing::info!(source = %source.id, server = %server.id, "Starting remote tail");
                let adapter = self.remote.clone();
                tokio::spawn(async move { adapter.tail(source, server, sink).await });
            }
        }
        stream
    }

    /// Truncate the file behind `id` to zero length. Returns false for an
    /// unknown id, a missing local file, a denied remote path, or any
    /// failure; the reason is logged.
    pub async fn clear(&self, id: &str) -> bool {
        let source = match self.resolve(id) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "Clear requested for unknown source");
                return false;
            }
        };

        let result = match source.locality() {
            Locality::Local => clear_local(&source).await,
            Locality::Remote(server) => self.remote.clear(&source, server).await,
        };
        match result {
            Ok(()) => {
                tracing::info!(source = %source.id, "Log cleared");
                true
            }
            Err(e) => {
                tracing::warn!(source = %source.id, error = %e, "Clear failed");
                false
            }
        }
    }

    /// List files on `server` beneath `path` matching `pattern`.
    pub async fn list_remote_directory(
        &self,
        server: &Arc<ServerProfile>,
        path: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<RemoteFile>, TailgateError> {
        self.remote.list(server, path, pattern, recursive).await
    }

    /// Close pooled sessions idle past their timeout.
    pub async fn reap_idle(&self) -> usize {
        self.pool.reap_idle().await
    }

    /// Close every pooled session. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.pool.release_all().await;
    }

    /// Configured sources in config order.
    pub fn sources(&self) -> Vec<Arc<LogSource>> {
        self.catalog.sources()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of sessions currently pooled.
    pub async fn pooled_sessions(&self) -> usize {
        self.pool.len().await
    }
}

async fn clear_local(source: &LogSource) -> Result<(), TailgateError> {
    let path = source.path.clone();
    let target = path.clone();
    let result = tokio::task::spawn_blocking(move || fs::truncate_existing(&target))
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)));
    result.map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => TailgateError::NotFound {
            id: path.display().to_string(),
        },
        _ => TailgateError::Io {
            path,
            operation: "truncate",
            source,
        },
    })
}
