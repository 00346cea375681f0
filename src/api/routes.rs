//! HTTP endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tracing::info;

use super::response::ServerResponse;
use super::{Operator, S3_DIR, TASK_ID};
use crate::config::ServerConfig;
use crate::report::{ErrorKind, ModuleInfo, ServerFault};
use crate::worker::{Job, Scheduler, TaskDescriptor};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<ServerConfig>,
    pub module: ModuleInfo,
    /// Job run for every `/air_algorithm` submission.
    pub algorithm: Arc<dyn Job>,
    /// Memory estimate declared for each algorithm task, in bytes.
    pub algorithm_memory_estimate: i64,
}

/// Build the Axum router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/get_config", get(get_config))
        .route("/air_algorithm", post(air_algorithm))
        .route("/tasks", get(tasks))
        .with_state(state)
}

async fn ping() -> &'static str {
    "Pong"
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    ServerResponse::new(Operator::GetConfig.stamp(&state.module)).with_data(state.config.dump())
}

async fn tasks(State(state): State<AppState>) -> impl IntoResponse {
    let summary = serde_json::to_value(state.scheduler.summary()).unwrap_or_default();
    ServerResponse::new(Operator::Tasks.stamp(&state.module)).with_data(summary)
}

/// POST /air_algorithm `{"taskId", "s3Dir"}`
///
/// Admits an algorithm task and answers immediately with `{"taskId"}`;
/// progress and the result arrive through the status store.
async fn air_algorithm(State(state): State<AppState>, body: String) -> impl IntoResponse {
    info!(content = %body, "air_algorithm");
    let response = ServerResponse::new(Operator::AirAlgorithm.stamp(&state.module));

    match submit_algorithm(&state, &body) {
        Ok(task_id) => response.with_data(json!({ TASK_ID: task_id })),
        Err(fault) => response.with_fault(fault),
    }
}

fn submit_algorithm(state: &AppState, body: &str) -> Result<String, ServerFault> {
    let content: Value = serde_json::from_str(body)
        .map_err(|e| ServerFault::new(ErrorKind::Unexpected, 1, e.to_string()))?;

    let column = |name: &str, exclusive_code: u16| {
        content
            .get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ServerFault::new(
                    ErrorKind::InputEmpty,
                    exclusive_code,
                    format!("Column does not exist, {name}."),
                )
            })
    };
    let task_id = column(TASK_ID, 1)?;
    let s3_dir = column(S3_DIR, 2)?;

    let stamp = Operator::AirAlgorithm.stamp(&state.module);
    let descriptor = TaskDescriptor::new(&task_id, stamp, s3_dir).with_payload(content);

    state
        .scheduler
        .submit(
            descriptor,
            Arc::clone(&state.algorithm),
            state.algorithm_memory_estimate,
        )
        .map_err(|e| ServerFault::new(ErrorKind::TaskAdd, e.exclusive_code(), e.to_string()))?;

    Ok(task_id)
}
