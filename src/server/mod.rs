//! HTTP boundary (feature `server`).
//!
//! ## Routes
//!
//! | Method     | Path                           | Handler |
//! |------------|--------------------------------|---------|
//! | GET        | `/health`                      | liveness + rasteriser availability |
//! | POST, PUT  | `/api/upload/chunk`            | store one chunk |
//! | POST       | `/api/upload/assemble`         | assemble a session, returns a registry key |
//! | POST       | `/api/convert/images-to-pdf`   | images → PDF (streamed) |
//! | POST       | `/api/convert/pdf-to-images`   | PDF → ZIP of PNG pages (streamed) |
//!
//! A GET on any of the `/api/...` paths returns a short usage hint.
//!
//! All shared state is built once in [`AppState::new`] and injected; nothing
//! here is a process global, so tests can run several routers side by side.

pub mod error;
pub mod handlers;

use crate::config::ServiceConfig;
use crate::pipeline::rasterize::Rasterizer;
use crate::registry::ArtifactRegistry;
use crate::scratch::{Reaper, ScratchSpace};
use crate::upload::{Assembler, ChunkStore, SessionLedger};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use exec_probe::Capability;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Everything a handler may touch.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub scratch: ScratchSpace,
    pub ledger: Arc<SessionLedger>,
    pub registry: Arc<ArtifactRegistry>,
    pub chunks: ChunkStore,
    pub assembler: Assembler,
    pub rasterizer: Rasterizer,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        let capability = Rasterizer::capability_for(&config);
        Self::with_capability(config, capability)
    }

    /// Build the state around an already constructed (possibly probed)
    /// rasteriser capability.
    pub fn with_capability(config: ServiceConfig, capability: Arc<Capability>) -> Self {
        let scratch = ScratchSpace::new(&config.scratch_root);
        let ledger = Arc::new(SessionLedger::new());
        let registry = Arc::new(ArtifactRegistry::from_config(&config));
        let chunks = ChunkStore::new(scratch.clone(), ledger.clone());
        let assembler = Assembler::new(scratch.clone(), ledger.clone(), registry.clone());
        let rasterizer = Rasterizer::new(capability, &config);

        Self {
            config: Arc::new(config),
            scratch,
            ledger,
            registry,
            chunks,
            assembler,
            rasterizer,
        }
    }

    /// A scratch reaper bound to this state's namespace and ledger.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.scratch.clone(),
            self.config.reaper_max_age,
            self.config.reaper_interval,
        )
        .with_ledger(self.ledger.clone())
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_body = state.config.max_request_bytes;
    let cors = cors_layer(&state.config.allowed_origins);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/upload/chunk",
            get(handlers::chunk_hint)
                .post(handlers::upload_chunk)
                .put(handlers::upload_chunk),
        )
        .route(
            "/api/upload/assemble",
            get(handlers::assemble_hint).post(handlers::assemble),
        )
        .route(
            "/api/convert/images-to-pdf",
            get(handlers::images_to_pdf_hint).post(handlers::images_to_pdf_handler),
        )
        .route(
            "/api/convert/pdf-to-images",
            get(handlers::pdf_to_images_hint).post(handlers::pdf_to_images_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body));

    let app = match cors {
        Some(cors) => app.layer(cors),
        None => app,
    };
    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(std::time::Duration::from_secs(3600));

    if origins.iter().any(|o| o == "*") {
        return Some(base.allow_origin(Any));
    }

    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    Some(base.allow_origin(AllowOrigin::list(list)))
}

/// Serve `app` on `listener` until Ctrl+C or SIGTERM.
pub async fn serve(app: Router, listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Starting server");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_disabled_without_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["https://app.example.com".to_string()]).is_some());
        assert!(cors_layer(&["*".to_string()]).is_some());
    }

    #[test]
    fn state_components_share_one_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ServiceConfig::builder()
            .scratch_root(tmp.path())
            .build()
            .unwrap();
        let state = AppState::new(config);
        assert_eq!(state.scratch.root(), tmp.path());
        assert_eq!(state.rasterizer.capability().program(), "pdftoppm");
    }
}
