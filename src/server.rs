use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::snapshot::{PriceRecord, SnapshotStore};

const STATUS_TEXT: &str = "API PIMA funcionando. Usa /precios para ver los datos.";
const MISSING_SNAPSHOT: &str = "No existe el archivo de cache";

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(store: SnapshotStore) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/precios", get(prices))
        .with_state(Arc::new(store))
}

/// Serve until `shutdown` flips to true.
pub async fn serve(
    bind: &str,
    store: SnapshotStore,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, snapshot = %store.path().display(), "Serving prices");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn index() -> &'static str {
    STATUS_TEXT
}

async fn prices(State(store): State<Arc<SnapshotStore>>) -> Result<Json<Vec<PriceRecord>>, ApiError> {
    match store.load().await {
        Ok(Some(records)) => Ok(Json(records)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, MISSING_SNAPSHOT)),
        Err(e) => {
            error!("Failed to load snapshot: {:#}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))
        }
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}
