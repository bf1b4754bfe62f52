use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use ragex_index::RagService;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::router::build_router;

const DEFAULT_MODEL_NAME: &str = "ragex";

#[derive(Clone)]
pub(crate) struct AppState {
    pub service: Arc<dyn RagService>,
    pub model_name: Arc<str>,
    pub started_at: Instant,
    pub started_rfc3339: Arc<str>,
    pub default_k: usize,
}

pub struct GatewayServer {
    addr: SocketAddr,
    auth_token: Option<String>,
    rate_limit: u32,
    max_body_size: usize,
    model_name: String,
    default_k: usize,
    service: Arc<dyn RagService>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(
        bind: &str,
        port: u16,
        service: Arc<dyn RagService>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let addr = resolve_addr(bind, port);
        if addr.ip().is_unspecified() {
            tracing::warn!(
                %addr,
                "gateway listens on all interfaces; configure gateway.auth_token"
            );
        }

        Self {
            addr,
            auth_token: None,
            rate_limit: 120,
            max_body_size: 1_048_576,
            model_name: DEFAULT_MODEL_NAME.into(),
            default_k: 5,
            service,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Name reported in `/api/tags` and in every answer.
    #[must_use]
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Number of chunks retrieved per HTTP question.
    #[must_use]
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k.max(1);
        self
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the HTTP gateway server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal I/O error.
    pub async fn serve(self) -> Result<(), GatewayError> {
        let state = AppState {
            service: self.service,
            model_name: Arc::from(self.model_name),
            started_at: Instant::now(),
            started_rfc3339: Arc::from(chrono::Utc::now().to_rfc3339()),
            default_k: self.default_k,
        };

        let auth_enabled = self.auth_token.is_some();
        let router = build_router(state, self.auth_token, self.rate_limit, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::Bind(self.addr.to_string(), e))?;
        tracing::info!(
            addr = %self.addr,
            auth = auth_enabled,
            rate_limit = self.rate_limit,
            "gateway listening"
        );

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            tracing::info!("gateway shutting down");
        })
        .await
        .map_err(|e| GatewayError::Server(format!("{e}")))?;

        Ok(())
    }
}

/// `bind:port` as a socket address; an unparsable host falls back to loopback.
fn resolve_addr(bind: &str, port: u16) -> SocketAddr {
    match bind.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(e) => {
            tracing::warn!(bind, error = %e, "invalid gateway.bind, using 127.0.0.1");
            SocketAddr::from(([127, 0, 0, 1], port))
        }
    }
}
