//! Signal listener routes and server loop

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, Level};

use crate::scheduler::SchedulerStatus;
use crate::wake::SignalSender;
use crate::worker::UploadStats;

/// State shared by the listener handlers
#[derive(Clone)]
pub struct ListenerState {
    signals: SignalSender,
    status: watch::Receiver<SchedulerStatus>,
    stats: Arc<UploadStats>,
}

impl ListenerState {
    pub fn new(
        signals: SignalSender,
        status: watch::Receiver<SchedulerStatus>,
        stats: Arc<UploadStats>,
    ) -> Self {
        Self {
            signals,
            status,
            stats,
        }
    }
}

/// Build the listener router
pub fn router(state: ListenerState) -> Router {
    Router::new()
        .route("/signal", post(signal))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::DEBUG)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
}

/// Serve `router` on `addr` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Signal listener on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Signal listener stopped");
    Ok(())
}

/// Wake the scheduler
async fn signal(State(state): State<ListenerState>) -> Response {
    match state.signals.notify() {
        Ok(()) => {
            debug!("Accepted work signal");
            (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
        },
        Err(e) => {
            debug!(error = %e, "Work signal refused");
            e.into_response()
        },
    }
}

/// Scheduler state and upload counters
async fn health(State(state): State<ListenerState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    let stats = state.stats.snapshot();

    Json(json!({
        "status": status.state,
        "cycles": status.cycles,
        "dispatched": status.dispatched,
        "backoff_resets": status.backoff_resets,
        "next_poll_ms": status.next_poll.as_millis() as u64,
        "uploaded": stats.uploaded,
        "failed": stats.failed,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::scheduler::{status_channel, SchedulerState};
    use crate::wake::signal_slot;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn post_signal() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/signal")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_second_signal_is_busy_until_taken() {
        let (tx, mut rx) = signal_slot();
        let (_status_tx, status_rx) = status_channel(Duration::from_secs(1));
        let app = router(ListenerState::new(tx, status_rx, Arc::default()));

        let response = app.clone().oneshot(post_signal()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app.clone().oneshot(post_signal()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "signal listener busy");

        assert!(rx.try_take());
        let response = app.oneshot(post_signal()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_signal_after_shutdown_is_unavailable() {
        let (tx, rx) = signal_slot();
        drop(rx);
        let (_status_tx, status_rx) = status_channel(Duration::from_secs(1));
        let app = router(ListenerState::new(tx, status_rx, Arc::default()));

        let response = app.oneshot(post_signal()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_reports_scheduler_status() {
        let (tx, _rx) = signal_slot();
        let (status_tx, status_rx) = status_channel(Duration::from_secs(1));
        status_tx.send_modify(|s| {
            s.cycles = 4;
            s.dispatched = 9;
            s.next_poll = Duration::from_secs(3);
            s.state = SchedulerState::Stopping;
        });
        let app = router(ListenerState::new(tx, status_rx, Arc::default()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "stopping");
        assert_eq!(body["cycles"], 4);
        assert_eq!(body["dispatched"], 9);
        assert_eq!(body["next_poll_ms"], 3000);
        assert_eq!(body["uploaded"], 0);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let (tx, _rx) = signal_slot();
        let (_status_tx, status_rx) = status_channel(Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let server = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            router(ListenerState::new(tx, status_rx, Arc::default())),
            cancel.clone(),
        ));
        cancel.cancel();

        assert!(server.await.unwrap().is_ok());
    }
}
