//! `ConnectionServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::errors::{Result, ServerError};
use crate::events::{EventHub, ServerEvent};
use crate::health::{self, HealthResponse};
use crate::monitor::HealthMonitor;
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::connection::run_connection;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::session::ClientInfo;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
}

struct Running {
    addr: SocketAddr,
    coordinator: ShutdownCoordinator,
    task: JoinHandle<()>,
}

enum Lifecycle {
    Stopped,
    Starting,
    Running(Running),
    Stopping,
}

/// Accepts client connections and bridges them to the session registry.
///
/// `stopped → starting → running → stopping → stopped`. The server can be
/// started again after it has stopped.
pub struct ConnectionServer {
    ctx: Arc<ServerContext>,
    state: Mutex<Lifecycle>,
}

impl ConnectionServer {
    /// Create a stopped server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: ServerContext::new(config),
            state: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Bind and start serving. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, Lifecycle::Stopped) {
                return Err(ServerError::AlreadyRunning);
            }
            *state = Lifecycle::Starting;
        }

        let bind = self.ctx.config.bind_addr();
        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(source) => {
                *self.state.lock() = Lifecycle::Stopped;
                return Err(ServerError::BindFailed { addr: bind, source });
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                *self.state.lock() = Lifecycle::Stopped;
                return Err(ServerError::BindFailed { addr: bind, source });
            }
        };

        let coordinator = ShutdownCoordinator::new();
        let router = build_router(AppState {
            ctx: Arc::clone(&self.ctx),
            shutdown: coordinator.child_token(),
        });
        let token = coordinator.token();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server loop failed");
            }
        });

        info!(%addr, service = %self.ctx.config.service_name, "hot-reload server started");
        *self.state.lock() = Lifecycle::Running(Running {
            addr,
            coordinator,
            task,
        });
        Ok(addr)
    }

    /// Stop the health monitor, disconnect every session and close the
    /// listener. No-op unless running.
    ///
    /// Returns whether this call stopped the server.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, Lifecycle::Stopping) {
                Lifecycle::Running(running) => running,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        let _ = self.ctx.monitor.stop().await;
        let removed = self.ctx.registry.disconnect_all("server stopping").await;
        for session in &removed {
            self.ctx.events.emit(ServerEvent::ClientDisconnected {
                session_id: session.id().clone(),
                reason: "server stopping".to_owned(),
            });
        }
        running
            .coordinator
            .graceful_shutdown(vec![running.task], Some(DEFAULT_SHUTDOWN_TIMEOUT))
            .await;

        *self.state.lock() = Lifecycle::Stopped;
        info!(addr = %running.addr, disconnected = removed.len(), "hot-reload server stopped");
        true
    }

    /// Whether the listener is up.
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), Lifecycle::Running(_))
    }

    /// Bound address while running.
    pub fn address(&self) -> Result<SocketAddr> {
        match &*self.state.lock() {
            Lifecycle::Running(running) => Ok(running.addr),
            _ => Err(ServerError::NotRunning),
        }
    }

    /// Snapshot of every registered client, ordered by id.
    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .ctx
            .registry
            .all_sessions()
            .iter()
            .map(|s| s.info())
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Router bound to a token that is never cancelled. For in-process
    /// request tests; [`start`](Self::start) builds its own.
    pub fn router(&self) -> Router {
        build_router(AppState {
            ctx: Arc::clone(&self.ctx),
            shutdown: CancellationToken::new(),
        })
    }

    /// Shared components.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Effective configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    /// Broadcaster over this server's sessions.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.ctx.broadcaster
    }

    /// Health monitor over this server's sessions. Not started by
    /// [`start`](Self::start); stopped by [`stop`](Self::stop).
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.ctx.monitor
    }

    /// Lifecycle notifications.
    pub fn events(&self) -> &EventHub {
        &self.ctx.events
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(upgrade_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(&state.ctx.config.service_name))
}

/// Any other path: WebSocket upgrade, or 404 for plain HTTP.
async fn upgrade_handler(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .max_message_size(state.ctx.config.max_message_size)
            .on_upgrade(move |socket| run_connection(socket, state.ctx, state.shutdown))
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
