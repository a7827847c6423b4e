//! HTTP side-channel: WebSocket upgrade, health and score endpoints.

use crate::client_manager::RateWindow;
use crate::config::{RatePolicy, SCORE_SUBMIT_POLICY};
use crate::network::{self, EventSender};
use crate::room::RoomStatus;
use crate::scores::SharedScores;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use shared::{sanitize_nickname, LeaderboardEntry};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Windows kept before expired ones are pruned.
const LIMITER_PRUNE_THRESHOLD: usize = 1024;

/// Fixed-window limiter keyed by caller IP.
#[derive(Debug)]
pub struct IpRateLimiter {
    policy: RatePolicy,
    windows: Mutex<HashMap<IpAddr, RateWindow>>,
}

impl IpRateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, ip: IpAddr, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.len() >= LIMITER_PRUNE_THRESHOLD {
            windows.retain(|_, window| !window.is_expired(now));
        }

        match windows.get_mut(&ip) {
            Some(window) => window.admit(now, self.policy),
            None => {
                windows.insert(ip, RateWindow::open(now, self.policy));
                true
            }
        }
    }

    pub fn tracked(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub events: EventSender,
    pub status: Arc<RoomStatus>,
    pub scores: SharedScores,
    pub score_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(events: EventSender, status: Arc<RoomStatus>, scores: SharedScores) -> Self {
        Self {
            events,
            status,
            scores,
            score_limiter: Arc::new(IpRateLimiter::new(SCORE_SUBMIT_POLICY)),
        }
    }
}

pub fn router(state: AppState, origin: Option<&str>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/world", get(world_info))
        .route("/api/status", get(service_status))
        .route("/api/score", post(submit_score))
        .layer(cors_layer(origin))
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allowed = origin.and_then(|origin| match origin.parse::<HeaderValue>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid CORS origin {:?}, allowing any", origin);
            None
        }
    });

    match allowed {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| network::handle_socket(socket, addr, state.events))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub players: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<usize>,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let current = state.status.get();
    let arena = state.status.mode() == "arena";
    Json(Health {
        status: "ok".to_string(),
        players: current.players,
        food: arena.then_some(current.food),
        blocks: (!arena).then_some(current.blocks),
    })
}

async fn leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.status.get().leaderboard)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldInfo {
    pub blocks: usize,
    pub players: usize,
}

async fn world_info(State(state): State<AppState>) -> Json<WorldInfo> {
    let current = state.status.get();
    Json(WorldInfo {
        blocks: current.blocks,
        players: current.players,
    })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service: String,
    pub version: String,
    pub mode: String,
    pub uptime_secs: u64,
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: "arcade-realtime".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.status.mode().to_string(),
        uptime_secs: state.status.uptime_secs(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ScoreSubmission {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub length: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreAccepted {
    pub success: bool,
    pub rank: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

async fn submit_score(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    // Checked before parsing so malformed bodies also spend the budget
    if !state.score_limiter.check(addr.ip(), Instant::now()) {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
    }

    let body: ScoreSubmission = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            warn!("Rejected score body from {}: {}", addr.ip(), e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let (nickname, length) = match (body.nickname, body.length) {
        (Some(nickname), Some(length)) if length > 0 && !nickname.trim().is_empty() => {
            (sanitize_nickname(&nickname), length)
        }
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing required fields"),
    };

    let scores = Arc::clone(&state.scores);
    let result = tokio::task::spawn_blocking(move || {
        let mut store = match scores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.submit(&nickname, length, Utc::now())
    })
    .await;

    match result {
        Ok(Ok(rank)) => Json(ScoreAccepted {
            success: true,
            rank,
        })
        .into_response(),
        Ok(Err(e)) => {
            error!("Failed to save score: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save score")
        }
        Err(e) => {
            error!("Score task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save score")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::StatusSnapshot;
    use crate::scores::ScoreStore;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn state(mode: &'static str, scores_path: std::path::PathBuf) -> AppState {
        let (events, _rx) = mpsc::unbounded_channel();
        AppState::new(
            events,
            Arc::new(RoomStatus::new(mode)),
            ScoreStore::load(scores_path).shared(),
        )
    }

    fn caller() -> ConnectInfo<SocketAddr> {
        ConnectInfo("10.0.0.7:5555".parse().unwrap())
    }

    fn submission(nickname: Option<&str>, length: Option<u64>) -> Bytes {
        Bytes::from(serde_json::json!({ "nickname": nickname, "length": length }).to_string())
    }

    #[tokio::test]
    async fn test_health_reports_arena_food() {
        let dir = tempdir().unwrap();
        let state = state("arena", dir.path().join("scores.json"));
        state.status.update(StatusSnapshot {
            players: 3,
            food: 1000,
            ..StatusSnapshot::default()
        });

        let Json(body) = health(State(state)).await;
        assert_eq!(
            body,
            Health {
                status: "ok".to_string(),
                players: 3,
                food: Some(1000),
                blocks: None
            }
        );
    }

    #[tokio::test]
    async fn test_health_reports_blocks() {
        let dir = tempdir().unwrap();
        let state = state("blocks", dir.path().join("scores.json"));
        state.status.update(StatusSnapshot {
            players: 1,
            blocks: 12,
            ..StatusSnapshot::default()
        });

        let Json(body) = health(State(state.clone())).await;
        assert_eq!(body.blocks, Some(12));
        assert_eq!(body.food, None);

        let Json(world) = world_info(State(state)).await;
        assert_eq!(world, WorldInfo { blocks: 12, players: 1 });
    }

    #[tokio::test]
    async fn test_status_names_mode() {
        let dir = tempdir().unwrap();
        let Json(status) = service_status(State(state("arena", dir.path().join("s.json")))).await;
        assert_eq!(status.mode, "arena");
        assert_eq!(status.service, "arcade-realtime");
    }

    #[tokio::test]
    async fn test_submit_score_returns_rank() {
        let dir = tempdir().unwrap();
        let state = state("arena", dir.path().join("scores.json"));

        let response = submit_score(State(state.clone()), caller(), submission(Some("ana"), Some(30))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = submit_score(State(state.clone()), caller(), submission(Some("bo"), Some(40))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let store = state.scores.lock().unwrap();
        assert_eq!(store.entries()[0].nickname, "bo");
        assert_eq!(store.entries()[1].length, 30);
    }

    #[tokio::test]
    async fn test_submit_score_rejects_missing_fields() {
        let dir = tempdir().unwrap();
        let state = state("arena", dir.path().join("scores.json"));

        for body in [
            submission(None, Some(10)),
            submission(Some("ana"), None),
            submission(Some("ana"), Some(0)),
            submission(Some("  "), Some(5)),
        ] {
            let response = submit_score(State(state.clone()), caller(), body).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_submit_score_rate_limited_per_ip() {
        let dir = tempdir().unwrap();
        let state = state("arena", dir.path().join("scores.json"));

        for _ in 0..5 {
            let response = submit_score(State(state.clone()), caller(), submission(Some("a"), Some(1))).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = submit_score(State(state.clone()), caller(), submission(Some("a"), Some(1))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = ConnectInfo("10.0.0.8:5555".parse().unwrap());
        let response = submit_score(State(state), other, submission(Some("b"), Some(1))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_score_bodies_count_toward_limit() {
        let dir = tempdir().unwrap();
        let state = state("arena", dir.path().join("scores.json"));

        for body in ["not json", "{\"length\":", "[1,2]", "", "{}"] {
            let response = submit_score(State(state.clone()), caller(), Bytes::from(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
        }

        let response = submit_score(State(state), caller(), submission(Some("a"), Some(1))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_submit_score_write_failure_is_500() {
        let dir = tempdir().unwrap();
        // the score path is an existing directory, so the rename fails
        let blocked = dir.path().join("scores.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("inner"), "x").unwrap();
        let state = state("arena", blocked);

        let response = submit_score(State(state), caller(), submission(Some("ana"), Some(3))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_ip_limiter_prunes_expired_windows() {
        let limiter = IpRateLimiter::new(RatePolicy::new(1, Duration::from_secs(60)));
        let start = Instant::now();

        for i in 0..LIMITER_PRUNE_THRESHOLD as u32 {
            let ip = IpAddr::from(i.to_be_bytes());
            assert!(limiter.check(ip, start));
        }
        assert_eq!(limiter.tracked(), LIMITER_PRUNE_THRESHOLD);

        let later = start + Duration::from_secs(61);
        assert!(limiter.check(IpAddr::from([192, 168, 0, 1]), later));
        assert_eq!(limiter.tracked(), 1);
    }
}
