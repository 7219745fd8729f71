//! HTTP server inbound adapter exposing runs via REST and live progress via SSE.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context as AnyhowContext, Result};
use axum::response::sse::{Event, KeepAlive};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::core::{
    domain::{EvaluationUpdate, ProgressEvent, Run, RunComparison},
    error::Error as CoreError,
    ports::{CancelAck, RunDetail, RunService, StartRunRequest},
};

/// Configuration options for the server adapter.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub default_limit: usize,
    pub keep_alive: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            default_limit: 25,
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Server adapter that exposes the `RunService` via HTTP.
pub struct ServerAdapter {
    service: Arc<dyn RunService>,
    options: ServeOptions,
}

impl ServerAdapter {
    pub fn new(service: Arc<dyn RunService>, options: ServeOptions) -> Self {
        Self { service, options }
    }

    /// Run the HTTP server on the given address.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind run service listener")?;
        self.run_with_listener(listener).await
    }

    /// Run the HTTP server with an existing listener (useful for tests).
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<()> {
        let state = Arc::new(ServeState::new(self.service, self.options));
        let router = build_router(state);
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "flowbench serve listening");
        } else {
            info!("flowbench serve listening");
        }
        axum::serve(listener, router.into_make_service())
            .await
            .context("serve endpoint failed")
    }
}

struct ServeState {
    service: Arc<dyn RunService>,
    default_limit: usize,
    keep_alive: Duration,
}

impl ServeState {
    fn new(service: Arc<dyn RunService>, options: ServeOptions) -> Self {
        Self {
            service,
            default_limit: options.default_limit.max(1),
            keep_alive: options.keep_alive.max(Duration::from_secs(1)),
        }
    }

    fn limit_or_default(&self, value: Option<usize>) -> usize {
        value.filter(|v| *v > 0).unwrap_or(self.default_limit)
    }
}

fn build_router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/tests/{id}/runs", post(start_run_handler))
        .route("/runs", get(list_runs_handler))
        .route("/runs/{id}", get(run_detail_handler))
        .route("/runs/{id}/events", get(run_events_handler))
        .route("/runs/{id}/cancel", post(cancel_run_handler))
        .route(
            "/runs/{id}/results/{result_id}/evaluation",
            patch(evaluate_result_handler),
        )
        .route(
            "/runs/{id}/conversations/{conversation_id}/evaluation",
            patch(evaluate_conversation_handler),
        )
        .route("/compare", get(compare_handler))
        .with_state(state)
}

/// Service errors rendered as `{"error": "..."}` with a matching status code.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidState(_) => StatusCode::CONFLICT,
            CoreError::Configuration(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunBody {
    run_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRunResponse {
    run_id: String,
    events_url: String,
}

async fn start_run_handler(
    Path(test_id): Path<String>,
    State(state): State<Arc<ServeState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let request: StartRunBody = if body.iter().all(u8::is_ascii_whitespace) {
        StartRunBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid body: {err}")))?
    };
    let started = state
        .service
        .start_run(StartRunRequest {
            test_id,
            run_id: request.run_id,
        })
        .await?;
    // Dropping the stream only detaches this observer; the run keeps going.
    let run_id = started.run_id;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            events_url: format!("/runs/{run_id}/events"),
            run_id,
        }),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_runs_handler(
    State(state): State<Arc<ServeState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = state.limit_or_default(query.limit);
    let runs: Vec<Run> = state.service.list_runs(limit).await?;
    Ok(Json(json!({ "runs": runs })))
}

async fn run_detail_handler(
    Path(run_id): Path<String>,
    State(state): State<Arc<ServeState>>,
) -> Result<Json<RunDetail>, ApiError> {
    match state.service.get_run(&run_id).await? {
        Some(detail) => Ok(Json(detail)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("run {run_id} not found"),
        )),
    }
}

async fn run_events_handler(
    Path(run_id): Path<String>,
    State(state): State<Arc<ServeState>>,
) -> Result<Response, ApiError> {
    let Some(events) = state.service.subscribe(&run_id) else {
        return match state.service.get_run(&run_id).await? {
            Some(detail) => Err(ApiError::new(
                StatusCode::GONE,
                format!(
                    "run {run_id} is {}; no live events remain",
                    detail.run.status.as_str()
                ),
            )),
            None => Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("run {run_id} not found"),
            )),
        };
    };

    let stream = events.map(|event| Result::<Event, Infallible>::Ok(sse_event(&event)));
    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.keep_alive)
                .text("keep-alive"),
        )
        .into_response())
}

fn sse_event(event: &ProgressEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.name()).data(json),
        Err(err) => {
            tracing::error!(error = %err, event = event.name(), "failed to serialize progress event");
            Event::default().comment("serialization_error")
        }
    }
}

async fn cancel_run_handler(
    Path(run_id): Path<String>,
    State(state): State<Arc<ServeState>>,
) -> Result<Json<CancelAck>, ApiError> {
    Ok(Json(state.service.cancel_run(&run_id).await?))
}

#[derive(Deserialize)]
struct CompareQuery {
    left: String,
    right: String,
}

async fn compare_handler(
    State(state): State<Arc<ServeState>>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<RunComparison>, ApiError> {
    Ok(Json(
        state
            .service
            .compare_runs(&query.left, &query.right)
            .await?,
    ))
}

async fn evaluate_result_handler(
    Path((run_id, result_id)): Path<(String, String)>,
    State(state): State<Arc<ServeState>>,
    Json(update): Json<EvaluationUpdate>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(
        state
            .service
            .evaluate_result(&run_id, &result_id, update)
            .await?,
    ))
}

async fn evaluate_conversation_handler(
    Path((run_id, conversation_id)): Path<(String, String)>,
    State(state): State<Arc<ServeState>>,
    Json(update): Json<EvaluationUpdate>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(
        state
            .service
            .evaluate_conversation(&run_id, &conversation_id, update)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        domain::{
            HumanEvaluation, RunStats, RunStatsReport, RunStatus, TestType,
        },
        error::Result as CoreResult,
        ports::{CancelOutcome, ProgressStream, StartedRun},
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::{collections::HashMap, sync::Mutex};
    use tower::ServiceExt;

    fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.into(),
            test_id: "faq".into(),
            test_name: "FAQ".into(),
            test_type: TestType::Qa,
            status,
            total_questions: 2,
            completed_questions: 1,
            total_scenarios: 0,
            completed_scenarios: 0,
            created_at: 10,
            started_at: Some(11),
            completed_at: None,
            error_message: None,
            is_fully_evaluated: false,
        }
    }

    #[derive(Default)]
    struct MockRunService {
        runs: HashMap<String, Run>,
        live: HashMap<String, Vec<ProgressEvent>>,
        updates: Mutex<Vec<(String, EvaluationUpdate)>>,
    }

    impl MockRunService {
        fn with_run(mut self, id: &str, status: RunStatus) -> Self {
            self.runs.insert(id.to_string(), run(id, status));
            self
        }

        fn with_live_events(mut self, id: &str, events: Vec<ProgressEvent>) -> Self {
            self.live.insert(id.to_string(), events);
            self
        }

        fn lookup(&self, run_id: &str) -> CoreResult<&Run> {
            self.runs
                .get(run_id)
                .ok_or_else(|| CoreError::NotFound(format!("run {run_id}")))
        }
    }

    #[async_trait]
    impl RunService for MockRunService {
        async fn start_run(&self, request: StartRunRequest) -> CoreResult<StartedRun> {
            if request.test_id != "faq" {
                return Err(CoreError::NotFound(format!("test '{}'", request.test_id)));
            }
            Ok(StartedRun {
                run_id: request.run_id.unwrap_or_else(|| "generated".into()),
                events: Box::pin(tokio_stream::empty()),
            })
        }

        async fn cancel_run(&self, run_id: &str) -> CoreResult<CancelAck> {
            let run = self.lookup(run_id)?;
            Ok(CancelAck {
                run_id: run_id.into(),
                status: run.status,
                outcome: if run.status.is_terminal() {
                    CancelOutcome::AlreadyFinished
                } else {
                    CancelOutcome::Signaled
                },
            })
        }

        async fn compare_runs(&self, left: &str, right: &str) -> CoreResult<RunComparison> {
            self.lookup(left)?;
            self.lookup(right)?;
            Err(CoreError::InvalidState("different test types".into()))
        }

        async fn get_run(&self, run_id: &str) -> CoreResult<Option<RunDetail>> {
            Ok(self.runs.get(run_id).map(|run| RunDetail {
                run: run.clone(),
                results: Vec::new(),
                conversations: Vec::new(),
                stats: RunStatsReport::Qa(RunStats::from_results(&[])),
            }))
        }

        async fn list_runs(&self, limit: usize) -> CoreResult<Vec<Run>> {
            Ok(self.runs.values().take(limit).cloned().collect())
        }

        fn subscribe(&self, run_id: &str) -> Option<ProgressStream> {
            let events = self.live.get(run_id)?.clone();
            Some(Box::pin(tokio_stream::iter(events)))
        }

        async fn evaluate_result(
            &self,
            run_id: &str,
            result_id: &str,
            update: EvaluationUpdate,
        ) -> CoreResult<Run> {
            let run = self.lookup(run_id)?;
            if !run.status.is_terminal() {
                return Err(CoreError::InvalidState(format!("run {run_id} is running")));
            }
            self.updates
                .lock()
                .unwrap()
                .push((result_id.to_string(), update));
            Ok(run.clone())
        }

        async fn evaluate_conversation(
            &self,
            run_id: &str,
            _conversation_id: &str,
            _update: EvaluationUpdate,
        ) -> CoreResult<Run> {
            Ok(self.lookup(run_id)?.clone())
        }
    }

    fn app(service: MockRunService) -> Router {
        let state = Arc::new(ServeState::new(Arc::new(service), ServeOptions::default()));
        build_router(state)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut request = axum::http::Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        app.oneshot(
            request
                .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_endpoint_returns_runs() {
        let service = MockRunService::default().with_run("run-a", RunStatus::Running);
        let response = send(app(service), "GET", "/runs", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["runs"][0]["id"], "run-a");
        assert_eq!(json["runs"][0]["status"], "running");
    }

    #[tokio::test]
    async fn detail_endpoint_returns_not_found_for_unknown() {
        let response = send(app(MockRunService::default()), "GET", "/runs/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_endpoint_accepts_runs() {
        let response = send(
            app(MockRunService::default()),
            "POST",
            "/tests/faq/runs",
            Some(r#"{"runId": "nightly"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["runId"], "nightly");
        assert_eq!(json["eventsUrl"], "/runs/nightly/events");

        let response = send(app(MockRunService::default()), "POST", "/tests/faq/runs", None).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn start_endpoint_maps_unknown_test_to_not_found() {
        let response = send(app(MockRunService::default()), "POST", "/tests/other/runs", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("other"));
    }

    #[tokio::test]
    async fn cancel_endpoint_returns_ack() {
        let service = MockRunService::default().with_run("done", RunStatus::Completed);
        let response = send(app(service), "POST", "/runs/done/cancel", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["outcome"], "already_finished");
        assert_eq!(json["status"], "completed");
    }

    #[tokio::test]
    async fn compare_endpoint_maps_invalid_state_to_conflict() {
        let service = MockRunService::default()
            .with_run("a", RunStatus::Completed)
            .with_run("b", RunStatus::Completed);
        let response = send(app(service), "GET", "/compare?left=a&right=b", None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn evaluation_endpoint_rejects_running_runs() {
        let service = MockRunService::default().with_run("live", RunStatus::Running);
        let response = send(
            app(service),
            "PATCH",
            "/runs/live/results/r1/evaluation",
            Some(r#"{"evaluation": "correct"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn evaluation_endpoint_forwards_update() {
        let service = Arc::new(MockRunService::default().with_run("done", RunStatus::Completed));
        let state = Arc::new(ServeState::new(service.clone(), ServeOptions::default()));
        let response = build_router(state)
            .oneshot(
                axum::http::Request::builder()
                    .method("PATCH")
                    .uri("/runs/done/results/r1/evaluation")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"evaluation": "partial", "severity": "minor", "note": "vague"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updates = service.updates.lock().unwrap();
        assert_eq!(updates[0].0, "r1");
        assert_eq!(updates[0].1.evaluation, Some(HumanEvaluation::Partial));
        assert_eq!(updates[0].1.note.as_deref(), Some("vague"));
    }

    #[tokio::test]
    async fn events_endpoint_streams_named_sse_events() {
        let service = MockRunService::default()
            .with_run("live", RunStatus::Running)
            .with_live_events(
                "live",
                vec![
                    ProgressEvent::RunStart {
                        run_id: "live".into(),
                        test_type: TestType::Qa,
                        total_questions: Some(2),
                        total_scenarios: None,
                    },
                    ProgressEvent::Canceled {
                        run_id: "live".into(),
                    },
                ],
            );
        let response = send(app(service), "GET", "/runs/live/events", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: run_start"), "{text}");
        assert!(text.contains(r#""totalQuestions":2"#), "{text}");
        assert!(text.contains("event: canceled"), "{text}");
    }

    #[tokio::test]
    async fn events_endpoint_reports_finished_runs_as_gone() {
        let service = MockRunService::default().with_run("done", RunStatus::Completed);
        let response = send(app(service), "GET", "/runs/done/events", None).await;
        assert_eq!(response.status(), StatusCode::GONE);

        let response = send(app(MockRunService::default()), "GET", "/runs/nope/events", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
