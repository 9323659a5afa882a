//! HTTP 接口：把 ExecutionRouter 的操作映射为 REST 路由
//!
//! 错误统一返回 `{"error": ..., "kind": ...}`，状态码由 ErrorKind 决定。

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::{EngineError, ErrorKind};
use crate::execution::{
    ContinueResponse, ExecutionRouter, ExecutionStatus, RerunRequest, ResumeRequest,
    StartRequest, StartResponse, StatusChange, StatusResponse,
};

type AppState = Arc<ExecutionRouter>;

/// 引擎错误到 HTTP 响应的包装
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": format!("{kind:?}"),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ContinueBody {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
}

pub fn router(engine: Arc<ExecutionRouter>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/executions", post(start).get(list))
        .route("/executions/:id", get(status))
        .route("/executions/:id/continue", post(continue_execution))
        .route("/executions/:id/resume", post(resume))
        .route("/executions/:id/cancel", post(cancel))
        .route("/executions/:id/rerun", post(rerun))
        .with_state(engine)
}

async fn start(
    State(engine): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let response = engine.start(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list(
    State(engine): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StatusResponse>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(s.parse::<ExecutionStatus>().map_err(|_| {
            EngineError::InvalidRequest(format!("unknown status filter: {s}"))
        })?),
        None => None,
    };
    Ok(Json(engine.list_executions(status).await?))
}

async fn status(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(engine.get_status(&id).await?))
}

async fn continue_execution(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ContinueBody>,
) -> Result<Json<ContinueResponse>, ApiError> {
    Ok(Json(engine.continue_execution(&id, &body.message).await?))
}

async fn resume(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<StatusChange>, ApiError> {
    Ok(Json(engine.resume(&id, request).await?))
}

async fn cancel(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<StatusChange>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(engine.cancel(&id, reason).await?))
}

async fn rerun(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RerunRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let response = engine.rerun(&id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::core::EngineBuilder;
    use crate::llm::ScriptedLlmClient;
    use crate::playbook::{InMemoryPlaybookCatalog, Playbook};

    async fn app(responses: &[&str]) -> Router {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::with_responses(responses.iter().copied()));
        let catalog = Arc::new(InMemoryPlaybookCatalog::with_playbooks([Playbook::new(
            "greet",
            "Greeting",
            "Say hello.",
        )]));
        let engine = EngineBuilder::new(AppConfig::default())
            .with_workspace(dir.path())
            .with_llm(llm)
            .with_catalog(catalog)
            .build()
            .await
            .unwrap();
        router(Arc::new(engine))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_execution_is_404() {
        let app = app(&[]).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/executions/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "NotFound");
    }

    #[tokio::test]
    async fn test_start_then_status() {
        let app = app(&["Hi!"]).await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/executions",
                json!({"playbook_code": "greet", "profile_id": "u1", "workspace_id": "w1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let started = body_json(response).await;
        assert_eq!(started["status"], "running");
        assert_eq!(started["initial_output"], "Hi!");

        let id = started["execution_id"].as_str().unwrap().to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/executions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["playbook_code"], "greet");
    }

    #[tokio::test]
    async fn test_unknown_playbook_is_404() {
        let app = app(&[]).await;
        let response = app
            .oneshot(post_json(
                "/executions",
                json!({"playbook_code": "nope", "profile_id": "u1", "workspace_id": "w1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
