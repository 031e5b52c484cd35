//! WebSocket sync server with room-based routing.
//!
//! ```text
//! Client A ──┐  /rooms/{roomId}                 ┌── RoomAuthority (trip)
//!            ├── handshake ── RoomRegistry ─────┤
//! Client B ──┘  (path + bearer)                 └── RoomAuthority (offsite)
//! ```
//!
//! Every accepted TCP connection runs as its own task. A failing connection
//! affects only itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::registry::RoomRegistry;
use crate::session::{run_session, SessionContext};

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_handshakes: u64,
}

#[derive(Default)]
pub(crate) struct AtomicServerStats {
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub total_messages: AtomicU64,
    pub rejected_handshakes: AtomicU64,
}

impl AtomicServerStats {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            rejected_handshakes: self.rejected_handshakes.load(Ordering::Relaxed),
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    context: Arc<SessionContext>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let heartbeat = match config.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let context = Arc::new(SessionContext {
            registry: Arc::new(RoomRegistry::new(config.room_config())),
            authenticator,
            stats: Arc::new(AtomicServerStats::default()),
            heartbeat,
        });
        Self { config, context }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");
            self.context
                .stats
                .total_connections
                .fetch_add(1, Ordering::Relaxed);

            let context = self.context.clone();
            tokio::spawn(async move {
                if let Err(e) = run_session(stream, addr, context).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.context.stats.snapshot()
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.context.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;

    #[test]
    fn test_new_server_is_idle() {
        let auth = Arc::new(StaticTokenAuthenticator::new());
        let server = SyncServer::new(ServerConfig::default(), auth);
        assert_eq!(server.stats(), ServerStats::default());
        assert_eq!(server.config().bind_addr, "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_registry_uses_configured_limits() {
        let config = ServerConfig {
            max_sessions_per_room: 3,
            ..ServerConfig::default()
        };
        let server = SyncServer::new(config, Arc::new(StaticTokenAuthenticator::new()));
        let registry = server.registry();
        assert_eq!(registry.config().max_sessions_per_room, 3);
        assert_eq!(registry.room_count().await, 0);
    }
}
