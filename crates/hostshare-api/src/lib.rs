//! hostshare-api: the ShareService, an HTTP listener serving this device's
//! shared host records to LAN peers.

pub mod handlers;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use hostshare_core::{DeviceInfo, HostRecord, PortRange, SharedHostRecord, StartupError};
use hostshare_services::SharedNodeStore;

pub use handlers::ApiState;

/// How long `stop` waits for in-flight requests before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/nodes", get(handlers::handle_nodes))
        .route("/node/{id}", get(handlers::handle_node))
        .route("/health", get(handlers::handle_health))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .fallback(handlers::handle_not_found)
        .layer(axum::middleware::from_fn(handlers::require_get))
        .layer(cors)
}

// ── Port selection ────────────────────────────────────────────────────────────

fn bind_port(port: u16) -> std::io::Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// First port in `range` that can be bound, probed by bind-then-close.
///
/// Another process may take the port before the caller binds it; `start`
/// uses [`bind_in_range`] instead and keeps the listener.
pub fn find_available_port(range: PortRange) -> Result<u16, StartupError> {
    range
        .ports()
        .find(|&port| std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok())
        .ok_or(StartupError::NoAvailablePort {
            start: range.start,
            end: range.end,
        })
}

/// Bind the first free port in `range` and hand back the live listener.
pub fn bind_in_range(range: PortRange) -> Result<std::net::TcpListener, StartupError> {
    for port in range.ports() {
        match bind_port(port) {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::trace!(port, error = %e, "port unavailable"),
        }
    }
    Err(StartupError::NoAvailablePort {
        start: range.start,
        end: range.end,
    })
}

// ── ShareService ──────────────────────────────────────────────────────────────

/// Identity and listener state, as reported to the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareStatus {
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub port: Option<u16>,
    pub is_running: bool,
    pub shared_count: usize,
}

struct Server {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ShareService {
    state: ApiState,
    range: PortRange,
    port: AtomicU16,
    server: Mutex<Option<Server>>,
}

impl ShareService {
    pub fn new(device: DeviceInfo, range: PortRange) -> Self {
        Self {
            state: ApiState {
                device: Arc::new(device),
                nodes: SharedNodeStore::new(),
            },
            range,
            port: AtomicU16::new(0),
            server: Mutex::new(None),
        }
    }

    /// Bind and start serving. `None` scans the configured range; `Some(0)`
    /// takes an OS-assigned port. Returns the bound port; a second call while
    /// running returns the existing one.
    pub async fn start(&self, port: Option<u16>) -> Result<u16, StartupError> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            return Ok(running.port);
        }

        let listener = match port {
            Some(port) => bind_port(port).map_err(|source| StartupError::HttpBind { port, source })?,
            None => bind_in_range(self.range)?,
        };
        let requested = port.unwrap_or(self.range.start);
        let bound = listener
            .local_addr()
            .map_err(|source| StartupError::HttpBind {
                port: requested,
                source,
            })?
            .port();
        let listener = tokio::net::TcpListener::from_std(listener)
            .map_err(|source| StartupError::HttpBind { port: bound, source })?;

        let (shutdown, rx) = oneshot::channel();
        let app = router(self.state.clone());
        let task = tokio::spawn(async move {
            let signal = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                tracing::warn!(error = %e, "share server exited with error");
            }
        });

        self.port.store(bound, Ordering::SeqCst);
        tracing::info!(port = bound, "share service listening on 0.0.0.0");
        *server = Some(Server {
            port: bound,
            shutdown,
            task,
        });
        Ok(bound)
    }

    /// Close the listener and drop every shared record. Safe to call twice.
    pub async fn stop(&self) {
        let running = self.server.lock().await.take();
        self.state.nodes.clear();
        self.port.store(0, Ordering::SeqCst);

        let Some(server) = running else {
            return;
        };
        let _ = server.shutdown.send(());
        let mut task = server.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            task.abort();
            let _ = task.await;
        }
        tracing::info!(port = server.port, "share service stopped");
    }

    pub fn share_node(&self, node_id: &str, record: &HostRecord) -> SharedHostRecord {
        let shared = self.state.nodes.share(node_id, record, &self.state.device);
        tracing::info!(node_id, "node shared");
        shared
    }

    pub fn unshare_node(&self, node_id: &str) -> bool {
        let existed = self.state.nodes.unshare(node_id);
        if existed {
            tracing::info!(node_id, "node unshared");
        }
        existed
    }

    pub fn is_node_shared(&self, node_id: &str) -> bool {
        self.state.nodes.contains(node_id)
    }

    pub fn shared_nodes(&self) -> Vec<SharedHostRecord> {
        self.state.nodes.list()
    }

    pub fn shared_count(&self) -> usize {
        self.state.nodes.len()
    }

    /// Bound port while running.
    pub fn port(&self) -> Option<u16> {
        match self.port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    pub fn is_running(&self) -> bool {
        self.port().is_some()
    }

    pub fn device_info(&self) -> ShareStatus {
        ShareStatus {
            device: (*self.state.device).clone(),
            port: self.port(),
            is_running: self.is_running(),
            shared_count: self.shared_count(),
        }
    }
}
