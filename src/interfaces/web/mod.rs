pub(crate) mod auth;
mod error;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::context::AppContext;
use crate::core::lifecycle::LifecycleComponent;

pub use error::{ApiError, ApiResult};
pub use router::build_api_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: AppContext,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) api_token: Option<String>,
}

pub struct ApiServer {
    state: AppState,
    shutdown: CancellationToken,
}

pub struct ApiServerConfig {
    pub ctx: AppContext,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                ctx: config.ctx,
                log_tx: config.log_tx,
                api_host: config.api_host,
                api_port: config.api_port,
                api_token: config.api_token,
            },
            shutdown: CancellationToken::new(),
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().event("lagged").data("Log stream lagged")),
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        if self.state.api_token.is_none() && !auth::is_loopback(&self.state.api_host) {
            warn!(
                "API bound to {} without {}; every request will be rejected",
                self.state.api_host,
                auth::API_TOKEN_ENV
            );
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;
        let app = router::build_api_router(self.state.clone());
        let shutdown = self.shutdown.clone();

        info!("API Server running at http://{addr}");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        self.shutdown.cancel();
        Ok(())
    }
}
