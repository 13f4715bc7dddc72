//! HTTP front end: the host-side request stream routed through the worker.
//!
//! Every request that does not target a `/_worker/*` control route is
//! resolved against the configured origin and handed to the worker's
//! fetch path, so controlled clients get cache-first serving; control
//! routes deliver messages and report status.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::net::{FetchRequest, HttpNetwork};
use crate::worker::{FetchOutcome, Worker, WorkerMessage};

#[derive(Clone)]
struct AppState {
  worker: Arc<Worker<HttpNetwork>>,
  config: Arc<Config>,
}

#[derive(Serialize)]
struct StatusResponse {
  version: String,
  state: String,
  entries: usize,
}

#[derive(Serialize)]
struct MessageAck {
  state: String,
}

/// Headers that only make sense on the original connection.
const SKIPPED_HEADERS: [&str; 3] = ["connection", "transfer-encoding", "content-length"];

/// Serve until the process is stopped.
pub async fn run(
  worker: Arc<Worker<HttpNetwork>>,
  config: Arc<Config>,
  addr: SocketAddr,
) -> Result<()> {
  let state = AppState { worker, config };

  let app = Router::new()
    .route("/_worker/status", get(get_status))
    .route("/_worker/message", post(post_message))
    .fallback(handle_request)
    .with_state(state);

  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  info!(%addr, "Serving");

  axum::serve(listener, app)
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
  axum::Json(StatusResponse {
    version: state.worker.version().to_string(),
    state: worker_state(&state),
    entries: state.worker.store_entries().unwrap_or(0),
  })
}

async fn post_message(
  State(state): State<AppState>,
  axum::Json(message): axum::Json<WorkerMessage>,
) -> Response {
  match state.worker.handle_message(message).await {
    Ok(()) => axum::Json(MessageAck {
      state: worker_state(&state),
    })
    .into_response(),
    Err(e) => {
      error!("Message handling failed: {:#}", e);
      (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Message handling failed: {:#}", e),
      )
        .into_response()
    }
  }
}

async fn handle_request(State(state): State<AppState>, request: Request) -> Response {
  let method = request.method().as_str().to_string();
  let target = request
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");

  let url = match state.config.origin.join(target) {
    Ok(url) => url,
    Err(e) => {
      return (StatusCode::BAD_REQUEST, format!("Invalid request path: {}", e)).into_response()
    }
  };

  match state.worker.fetch(&FetchRequest::new(&method, url)).await {
    Ok(outcome) => to_http_response(outcome),
    Err(e) => {
      // Cache miss with no reachable upstream: the failure is the answer.
      (
        StatusCode::BAD_GATEWAY,
        format!("Upstream fetch failed: {:#}", e),
      )
        .into_response()
    }
  }
}

fn worker_state(state: &AppState) -> String {
  state
    .worker
    .state()
    .map(|s| s.to_string())
    .unwrap_or_else(|_| "unknown".to_string())
}

fn to_http_response(outcome: FetchOutcome) -> Response {
  let status =
    StatusCode::from_u16(outcome.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

  let mut builder = Response::builder().status(status);
  for (name, value) in outcome.headers() {
    if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
      continue;
    }
    builder = builder.header(name.as_str(), value.as_str());
  }

  match builder.body(Body::from(outcome.into_body())) {
    Ok(response) => response,
    Err(e) => {
      error!("Failed to build response: {}", e);
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}
