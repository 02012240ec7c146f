//! HTTP pub/sub surface: health, stats, the pending snapshot and a
//! server-sent-events channel of accepted entries.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::{Stream, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::PubSubConfig;
use crate::error::StorerError;
use crate::fetcher::Fetcher;
use crate::follow::{ChannelMessage, FollowRequest, follow_stream};
use crate::service::StorerService;

/// Shared state of every handler.
pub struct AppState {
    pub storer: StorerService,
    pub config: PubSubConfig,
    /// Destination files, for followers asking for history.
    pub history: Option<Arc<Fetcher>>,
}

/// Build the router. The channel route comes from
/// [`PubSubConfig::channel_path`].
pub fn create_router(state: Arc<AppState>) -> Router {
    let channel = state.config.channel_path();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/statusz", get(statusz))
        .route("/pending", get(pending))
        .route(&channel, get(channel_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn unavailable(e: StorerError) -> Response {
    let status = match e {
        StorerError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

/// GET /statusz - storer statistics.
async fn statusz(State(state): State<Arc<AppState>>) -> Response {
    match state.storer.stats(false) {
        Ok(stats) => Json(json!({
            "stats": stats,
            "subscribers": state.storer.broadcaster().subscriber_count(),
        }))
        .into_response(),
        Err(e) => unavailable(e),
    }
}

/// GET /pending - entries not yet rotated, as a bare JSON array.
async fn pending(State(state): State<Arc<AppState>>) -> Response {
    match state.storer.pending() {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => unavailable(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelParams {
    /// Replay rotated entries from this timestamp before the pending ones.
    pub since_ms: Option<i64>,
}

/// GET {mount}/{channel} - SSE stream: snapshot first, then live entries.
async fn channel_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChannelParams>,
) -> impl IntoResponse {
    let request = FollowRequest {
        since_ms: params.since_ms,
        snapshot_timeout: state.config.snapshot_timeout(),
    };
    info!("New follower (since_ms={:?})", params.since_ms);
    let keepalive = KeepAlive::default()
        .interval(state.config.keepalive())
        .text(state.config.keepalive_text.clone());
    Sse::new(entry_events(&state, request)).keep_alive(keepalive)
}

fn entry_events(
    state: &AppState,
    request: FollowRequest,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static + use<> {
    let source = Arc::new(state.storer.clone());
    let entries = follow_stream(source, state.history.clone(), request);
    let stopped = state.storer.stopped();

    let stream = async_stream::stream! {
        futures::pin_mut!(entries);
        while let Some(next) = entries.next().await {
            match next {
                Ok(entry) => {
                    let data = serde_json::to_string(&ChannelMessage { entry })
                        .unwrap_or_default();
                    yield Ok(Event::default().event("entry").data(data));
                }
                Err(e) => {
                    warn!("Follower terminated: {e}");
                    let data = json!({ "error": e.to_string() }).to_string();
                    yield Ok(Event::default().event("error").data(data));
                    break;
                }
            }
        }
    };
    stream.take_until(stopped)
}

/// Serve `state` on `listener` until `shutdown` resolves, then give open
/// connections `grace` to finish before dropping them.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let (signal_tx, signal_rx) = tokio::sync::watch::channel(false);
    let app = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!("Pub/sub listening on http://{addr}");
    }
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let mut rx = signal_rx;
        let _ = rx.wait_for(|s| *s).await;
    });
    let server = server.into_future();
    futures::pin_mut!(server);

    tokio::select! {
        result = &mut server => return result,
        _ = shutdown => {
            info!("Pub/sub shutting down");
            let _ = signal_tx.send(true);
        }
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Pub/sub connections still open after {grace:?}, closing");
            Ok(())
        }
    }
}
