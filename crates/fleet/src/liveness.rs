// ABOUTME: Read-only HTTP liveness endpoint for external health checks.
// ABOUTME: Serves the latest registry snapshot; never touches the supervisor task.

use crate::error::LivenessError;
use crate::registry::{Snapshot, WorkerStatus};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub workers: Vec<String>,
    pub count: usize,
}

impl From<&Snapshot> for HealthResponse {
    fn from(snapshot: &Snapshot) -> Self {
        let workers = snapshot.identities();
        Self {
            healthy: true,
            count: workers.len(),
            workers,
        }
    }
}

/// Build the router over a snapshot receiver.
pub fn router(snapshots: watch::Receiver<Snapshot>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workers", get(workers))
        .with_state(snapshots)
}

/// Always 200: being reachable is the signal.
async fn health(State(snapshots): State<watch::Receiver<Snapshot>>) -> Json<HealthResponse> {
    let response = HealthResponse::from(&*snapshots.borrow());
    Json(response)
}

async fn workers(State(snapshots): State<watch::Receiver<Snapshot>>) -> Json<Vec<WorkerStatus>> {
    let workers = snapshots.borrow().workers.clone();
    Json(workers)
}

/// A bound but not yet serving liveness endpoint.
pub struct LivenessServer {
    listener: TcpListener,
    router: Router,
}

impl LivenessServer {
    /// Bind to `addr`; port 0 picks an ephemeral port.
    pub async fn bind(
        addr: &str,
        snapshots: watch::Receiver<Snapshot>,
    ) -> Result<Self, LivenessError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LivenessError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            router: router(snapshots),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LivenessError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<(), LivenessError> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn status(identity: &str, pid: u32) -> WorkerStatus {
        WorkerStatus {
            identity: identity.to_string(),
            pid: Some(pid),
            generation: 1,
            started_at: Utc::now(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_with_no_workers() {
        let (_tx, rx) = watch::channel(Snapshot::default());
        let (code, body): (_, HealthResponse) = get_json(router(rx), "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert!(body.healthy);
        assert!(body.workers.is_empty());
        assert_eq!(body.count, 0);
    }

    #[tokio::test]
    async fn test_health_reflects_latest_snapshot() {
        let (tx, rx) = watch::channel(Snapshot::default());
        let app = router(rx);

        tx.send_replace(Snapshot {
            workers: vec![status("agent-a", 10), status("agent-b", 11)],
        });

        let (code, body): (_, HealthResponse) = get_json(app, "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.workers, vec!["agent-a", "agent-b"]);
        assert_eq!(body.count, 2);
    }

    #[tokio::test]
    async fn test_workers_lists_details() {
        let (_tx, rx) = watch::channel(Snapshot {
            workers: vec![status("agent-a", 42)],
        });
        let (code, body): (_, Vec<WorkerStatus>) = get_json(router(rx), "/workers").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].pid, Some(42));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (_tx, rx) = watch::channel(Snapshot::default());
        let response = router(rx)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port_and_serve() {
        let (_tx, rx) = watch::channel(Snapshot {
            workers: vec![status("agent-z", 7)],
        });
        let server = LivenessServer::bind("127.0.0.1:0", rx).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let task = tokio::spawn(server.serve());
        let body: HealthResponse = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.workers, vec!["agent-z"]);
        task.abort();
    }
}
