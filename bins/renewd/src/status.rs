#![cfg(feature = "web-api")]

use std::net::SocketAddr;
use std::time::Instant;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use renew_core::job::TaskState;
use renew_core::store::{DefaultKv, KvKeyStore, KvSerde};
use crate::module::{Module, ModuleCtx};
use crate::scheduler::state_key;

#[derive(Clone)]
struct AppState {
    kv: DefaultKv,
    started: Instant,
}

#[derive(Serialize)]
struct Status {
    uptime_ms: u64,
    key_count: usize,
    earliest_expiry: Option<String>,
    task: TaskState,
}

/// Read-only `/status` endpoint for the renewal task.
pub struct StatusServer {
    addr: SocketAddr,
}

impl StatusServer {
    pub fn new(addr: SocketAddr) -> Self { Self { addr } }
}

impl Module for StatusServer {
    fn name(&self) -> &'static str { "status" }

    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let state = AppState { kv: ctx.kv.clone(), started: Instant::now() };

            let app = Router::new()
                .route("/status", get(status))
                .with_state(state);

            let listener = tokio::net::TcpListener::bind(self.addr).await?;
            info!("status server listening on http://{}", self.addr);

            // clone into a mutable receiver to await .changed()
            let mut shutdown = ctx.shutdown.clone();

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await?;

            Ok(())
        })
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let task = state.kv.get_t::<TaskState>(&state_key()).ok().flatten().unwrap_or_default();
    let records = KvKeyStore::new(state.kv.clone()).records().unwrap_or_default();
    let earliest_expiry = records.iter().filter_map(|r| r.expires_on).min().map(|d| d.to_string());
    Json(Status {
        uptime_ms: state.started.elapsed().as_millis() as u64,
        key_count: records.len(),
        earliest_expiry,
        task,
    })
}
