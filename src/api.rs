//! HTTP control surface for the host application.
//!
//! Thin handlers over the shared coordinator: every route takes the lock,
//! forwards to one coordinator call and reports what it did.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::db::Database;
use crate::guide::GuideChange;
use crate::quest::QuestEvent;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Mutex<Coordinator>>,
    /// Completion ledger; `None` when running without persistence
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(coordinator: Coordinator, db: Option<Database>) -> Self {
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
            db,
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub step_id: String,
    pub completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub step_ids: Vec<String>,
}

// =============================================================================
// Router
// =============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/notices", get(drain_notices).post(drain_notices))
        .route("/api/ledger", get(ledger))
        // Quests
        .route("/api/events", post(dispatch_event))
        .route("/api/quests/:id/start", post(start_quest))
        .route("/api/quests/:id/restart", post(restart_quest))
        .route("/api/quests/:id/complete-step", post(complete_quest_step))
        // Guides
        .route("/api/guide/:id", post(set_guide))
        .route("/api/guide/steps/:step/complete", post(complete_guide_step))
        .route("/api/guide/steps/:step/activate", post(activate_guide_step))
        .route("/api/guide/steps/:step/reactivate", post(reactivate_guide_step))
        .route("/api/guide/rollback", post(rollback_guide_step))
        .route("/api/guide/restart", post(restart_guide))
        // Experiments
        .route("/api/experiments/:name/start", post(start_experiment))
        .route("/api/experiments/:name/stop", post(stop_experiment))
        .route("/api/experiments/:name/complete", post(complete_experiment))
        .route("/api/experiments/:name/report", post(report_condition))
        .route("/api/experiments/:name/track", post(start_tracking))
        .route("/api/experiments/:name/untrack", post(stop_tracking))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
        .with_state(state)
}

/// 200 with `{"success": true}` when the call took effect, 409 otherwise
fn outcome(success: bool, action: &str, target: &str) -> (StatusCode, Json<serde_json::Value>) {
    if success {
        (StatusCode::OK, Json(serde_json::json!({ "success": true })))
    } else {
        (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "error": format!("Could not {} '{}'", action, target),
            })),
        )
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.lock().await.snapshot())
}

async fn drain_notices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.lock().await.drain_notices())
}

async fn ledger(State(state): State<AppState>) -> impl IntoResponse {
    let Some(db) = &state.db else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "No ledger configured" })),
        );
    };

    let rows = match db.completed_quests().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Failed to read ledger: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to read ledger" })),
            );
        }
    };
    let total_points = db.total_points().await.unwrap_or_else(|e| {
        warn!("Failed to sum points: {}", e);
        0
    });

    let completed: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            let badges: Vec<String> = serde_json::from_str(&row.badges_json).unwrap_or_default();
            serde_json::json!({
                "quest_id": row.quest_id,
                "points": row.points,
                "badges": badges,
                "completed_at": row.completed_at,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({ "completed": completed, "total_points": total_points })),
    )
}

// =============================================================================
// Quest Handlers
// =============================================================================

async fn dispatch_event(
    State(state): State<AppState>,
    Json(event): Json<QuestEvent>,
) -> impl IntoResponse {
    let kind = event.event_type();
    let accepted = state.coordinator.lock().await.dispatch(event).await;
    Json(serde_json::json!({ "event": kind, "accepted": accepted }))
}

async fn start_quest(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let started = state.coordinator.lock().await.start_quest(&id).await;
    if started {
        info!("Quest '{}' started over HTTP", id);
    }
    outcome(started, "start quest", &id)
}

async fn restart_quest(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let restarted = state.coordinator.lock().await.restart_quest(&id);
    outcome(restarted, "restart quest", &id)
}

async fn complete_quest_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let completed = state.coordinator.lock().await.complete_current_step(&id).await;
    outcome(completed, "complete the current step of", &id)
}

// =============================================================================
// Guide Handlers
// =============================================================================

async fn set_guide(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let set = state.coordinator.lock().await.set_current_guide(&id);
    outcome(set, "load guide", &id)
}

async fn complete_guide_step(
    State(state): State<AppState>,
    Path(step): Path<String>,
) -> impl IntoResponse {
    let change = state.coordinator.lock().await.complete_guide_step(&step).await;
    let result = match change {
        GuideChange::Ignored => "ignored",
        GuideChange::Completed => "completed",
        GuideChange::Finished => "finished",
    };
    Json(serde_json::json!({ "step": step, "result": result }))
}

async fn activate_guide_step(
    State(state): State<AppState>,
    Path(step): Path<String>,
) -> impl IntoResponse {
    let activated = state.coordinator.lock().await.activate_guide_step(&step);
    outcome(activated, "activate guide step", &step)
}

async fn reactivate_guide_step(
    State(state): State<AppState>,
    Path(step): Path<String>,
) -> impl IntoResponse {
    let reactivated = state.coordinator.lock().await.reactivate_guide_step(&step);
    outcome(reactivated, "reactivate guide step", &step)
}

async fn rollback_guide_step(State(state): State<AppState>) -> impl IntoResponse {
    let rolled_back = state.coordinator.lock().await.rollback_guide_step();
    outcome(rolled_back, "roll back", "current guide")
}

async fn restart_guide(State(state): State<AppState>) -> impl IntoResponse {
    let restarted = state.coordinator.lock().await.restart_guide();
    outcome(restarted, "restart", "current guide")
}

// =============================================================================
// Experiment Handlers
// =============================================================================

async fn start_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let started = state.coordinator.lock().await.start_experiment(&name);
    outcome(started, "start experiment", &name)
}

async fn stop_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let stopped = state.coordinator.lock().await.stop_experiment(&name);
    outcome(stopped, "stop experiment", &name)
}

async fn complete_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let notified = state.coordinator.lock().await.notify_experiment_completed(&name);
    outcome(notified, "complete experiment", &name)
}

async fn report_condition(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ReportRequest>,
) -> impl IntoResponse {
    let reported =
        state.coordinator.lock().await.report_condition(&name, &req.step_id, req.completed);
    outcome(reported, "report condition for", &req.step_id)
}

async fn start_tracking(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<TrackRequest>,
) -> impl IntoResponse {
    let tracking = state.coordinator.lock().await.start_tracking(&name, &req.step_ids);
    outcome(tracking, "start tracking on", &name)
}

async fn stop_tracking(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let stopped = state.coordinator.lock().await.stop_all_tracking(&name);
    outcome(stopped, "stop tracking on", &name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::GuideDef;
    use crate::quest::{LoggingRewards, QuestDef, QuestState, Reward, StepDef, StepKind};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut coordinator = Coordinator::new(Arc::new(LoggingRewards));
        coordinator.guides_mut().insert(GuideDef::from_ids("g", &["A", "B"]));
        coordinator.add_quest(QuestDef {
            id: "wave".into(),
            name: "Wave".into(),
            description: String::new(),
            requires: vec![],
            guide: None,
            experiment: None,
            auto_load_guide: true,
            reward: Reward { points: 5, badges: vec![] },
            steps: vec![StepDef {
                id: "wave".into(),
                description: String::new(),
                kind: StepKind::Simple { trigger: Some("waved".into()) },
            }],
        });
        AppState::new(coordinator, None)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(test_state());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_quest_flow_over_http() {
        let state = test_state();
        let app = router(state.clone());

        let (status, _) = call(&app, "POST", "/api/quests/wave/start", None).await;
        assert_eq!(status, StatusCode::OK);

        // Second start is refused
        let (status, body) = call(&app, "POST", "/api/quests/wave/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (_, body) = call(
            &app,
            "POST",
            "/api/events",
            Some(r#"{"type":"signal","name":"waved"}"#),
        )
        .await;
        assert_eq!(body["accepted"], true);
        assert_eq!(
            state.coordinator.lock().await.quest_state("wave"),
            Some(QuestState::Complete)
        );

        let (_, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(body["completed"][0], "wave");

        let (_, notices) = call(&app, "POST", "/api/notices", None).await;
        let kinds: Vec<&str> = notices
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|n| n["type"].as_str())
            .collect();
        assert!(kinds.contains(&"quest_started"));
        assert!(kinds.contains(&"quest_completed"));

        let (_, notices) = call(&app, "GET", "/api/notices", None).await;
        assert!(notices.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guide_routes() {
        let app = router(test_state());

        let (status, _) = call(&app, "POST", "/api/guide/missing", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", "/api/guide/g", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "POST", "/api/guide/steps/A/complete", None).await;
        assert_eq!(body["result"], "completed");
        let (_, body) = call(&app, "POST", "/api/guide/steps/nope/complete", None).await;
        assert_eq!(body["result"], "ignored");
        let (_, body) = call(&app, "POST", "/api/guide/steps/B/complete", None).await;
        assert_eq!(body["result"], "finished");

        let (_, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(body["guide"]["finished"], true);
    }

    #[tokio::test]
    async fn test_experiment_routes() {
        let state = test_state();
        state.coordinator.lock().await.register_experiment("lab");
        let app = router(state.clone());

        let (status, _) = call(&app, "POST", "/api/experiments/lab/start", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "POST", "/api/experiments/ghost/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            "POST",
            "/api/experiments/lab/track",
            Some(r#"{"step_ids":["X"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.coordinator.lock().await.experiments().get("lab").unwrap().is_tracking());

        let (status, _) = call(
            &app,
            "POST",
            "/api/experiments/lab/report",
            Some(r#"{"step_id":"X","completed":true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "POST", "/api/experiments/lab/untrack", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!state.coordinator.lock().await.experiments().get("lab").unwrap().is_tracking());
    }

    #[tokio::test]
    async fn test_ledger_without_db() {
        let app = router(test_state());
        let (status, _) = call(&app, "GET", "/api/ledger", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
