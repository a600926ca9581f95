//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The HTTP Read API: a thin `axum` surface over the catalog and the
//! persistence log, plus one write endpoint (`/send`) that republishes a
//! one-shot message the same way the CLI `send` helper does.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus;
use crate::catalog::Catalog;
use crate::config::Configuration;
use crate::db::{self, models::TaskQueryFilter, Pool};
use crate::message::Envelope;
use crate::status::Status;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub pool: Pool,
    pub config: Arc<Configuration>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send", get(send))
        .route("/tasks", get(list_tasks))
        .route("/tasks/reload", get(reload_tasks))
        .route("/tasks/today/notrun", get(today_not_run))
        .route("/tasks/today/:status", get(today_by_status))
        .route("/tasks/lastruntime", get(last_runtime))
        .route("/tasks/categories", get(categories))
        .route("/tasks/lastruntime/sorted/category", get(last_runtime_sorted_by_category))
        .route("/tasks/scheduled", get(scheduled))
        .route("/tasks/repeating", get(repeating))
        .route("/task/history", get(history))
        .route("/task/log", get(log_tail))
        .route("/task/children", get(children))
        .route("/task/parents", get(parents))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (code, Json(json!({"status": "error", "message": message}))).into_response()
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({"status": "ok", "data": data}))
}

#[derive(Debug, Deserialize)]
struct SendParams {
    message: String,
    queue: Option<String>,
    routing_key: Option<String>,
    params: Option<String>,
}

async fn send(State(state): State<AppState>, Query(params): Query<SendParams>) -> Result<Json<Value>, ApiError> {
    let queue = params.queue.unwrap_or_else(|| state.config.bus().ingress_queue().clone());
    let routing_key = params.routing_key.unwrap_or_else(|| state.config.bus().ingress_queue().clone());
    let data = match &params.params {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        None => Value::Null,
    };
    let envelope =
        Envelope::new(state.config.bus().exchange().clone(), queue, params.message.clone()).with_data(data);

    bus::publish_once(state.config.bus(), &envelope, &routing_key).await?;
    Ok(ok(json!({"message": params.message})))
}

#[derive(Debug, Deserialize, Default)]
struct NameFilter {
    name: Option<String>,
}

async fn list_tasks(State(state): State<AppState>, Query(filter): Query<NameFilter>) -> Json<Value> {
    let tasks: Vec<_> = state
        .catalog
        .iterate()
        .into_iter()
        .filter(|t| filter.name.as_deref().map(|n| t.name() == n).unwrap_or(true))
        .collect();
    ok(json!(tasks))
}

async fn reload_tasks(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.catalog.reload().map_err(ApiError::Internal)?;
    Ok(ok(json!({"reloaded": true})))
}

async fn today_by_status(
    State(state): State<AppState>,
    axum::extract::Path(status): axum::extract::Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status: Status = status.parse().map_err(|_| ApiError::BadRequest(format!("Unknown status: {}", status)))?;
    let rows = blocking(state.pool.clone(), move |conn| db::get_tasks_today(conn, Some(status))).await?;
    Ok(ok(json!(rows.into_iter().map(row_to_json).collect::<Vec<_>>())))
}

async fn today_not_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ran_today = blocking(state.pool.clone(), move |conn| db::get_tasks_today(conn, None)).await?;
    let ran_names: std::collections::BTreeSet<String> = ran_today.into_iter().map(|r| r.name).collect();
    let not_run: Vec<_> = state.catalog.iterate().into_iter().filter(|t| !ran_names.contains(t.name())).collect();
    Ok(ok(json!(not_run)))
}

async fn last_runtime(State(state): State<AppState>, Query(filter): Query<NameFilter>) -> Result<Json<Value>, ApiError> {
    let name = filter.name.clone();
    let rows = blocking(state.pool.clone(), move |conn| db::get_tasks_latest(conn, name.as_deref())).await?;
    Ok(ok(json!(rows.into_iter().map(row_to_json).collect::<Vec<_>>())))
}

async fn categories(State(state): State<AppState>) -> Json<Value> {
    ok(json!(state.catalog.categories()))
}

async fn last_runtime_sorted_by_category(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = blocking(state.pool.clone(), |conn| db::get_tasks_latest(conn, None)).await?;
    let tasks = state.catalog.iterate();
    let category_of: BTreeMap<String, String> =
        tasks.into_iter().map(|t| (t.name().clone(), t.category())).collect();

    let mut by_category: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in rows {
        let category = category_of.get(&row.name).cloned().unwrap_or_else(|| "UNKNOWN".to_string());
        by_category.entry(category).or_default().push(row_to_json(row));
    }
    Ok(ok(json!(by_category)))
}

/// Tasks whose triggers look like a clock schedule: `time.HHMM` or
/// `time.interval.N`. No scheduler runs inside this crate — this just
/// recognizes the pattern.
async fn scheduled(State(state): State<AppState>) -> Json<Value> {
    let tasks: Vec<_> = state
        .catalog
        .iterate()
        .into_iter()
        .filter(|t| t.triggers().iter().any(|trig| trig.starts_with("time.") && !trig.starts_with("time.interval.")))
        .collect();
    ok(json!(tasks))
}

async fn repeating(State(state): State<AppState>) -> Json<Value> {
    let tasks: Vec<_> = state
        .catalog
        .iterate()
        .into_iter()
        .filter(|t| t.triggers().iter().any(|trig| trig.starts_with("time.interval.")))
        .collect();
    ok(json!(tasks))
}

#[derive(Debug, Deserialize, Default)]
struct HistoryFilter {
    run_date: Option<NaiveDate>,
    name: Option<String>,
}

async fn history(State(state): State<AppState>, Query(filter): Query<HistoryFilter>) -> Result<Json<Value>, ApiError> {
    let mut builder = TaskQueryFilter::builder();
    if let Some(run_date) = filter.run_date {
        builder = builder.run_date(run_date);
    }
    if let Some(name) = filter.name {
        builder = builder.name(name);
    }
    let query_filter = builder.build();

    let rows = blocking(state.pool.clone(), move |conn| db::get_tasks(conn, &query_filter)).await?;
    Ok(ok(json!(rows.into_iter().map(row_to_json).collect::<Vec<_>>())))
}

async fn log_tail(State(state): State<AppState>, Query(filter): Query<NameFilter>) -> Result<Json<Value>, ApiError> {
    let name = filter.name.ok_or_else(|| ApiError::BadRequest("name is required".to_string()))?;
    let task = state.catalog.get_task_by_name(&name).ok_or_else(|| ApiError::NotFound(name.clone()))?;
    let log_path = task.log().as_ref().ok_or_else(|| ApiError::BadRequest(format!("Task '{}' has no log file", name)))?;

    let file = std::fs::File::open(log_path).map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    let lines: Vec<String> =
        BufReader::new(file).lines().collect::<Result<Vec<_>, _>>().map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    let tail: Vec<String> = lines.into_iter().rev().take(100).rev().collect();
    Ok(ok(json!(tail)))
}

async fn children(State(state): State<AppState>, Query(filter): Query<NameFilter>) -> Result<Json<Value>, ApiError> {
    let name = filter.name.ok_or_else(|| ApiError::BadRequest("name is required".to_string()))?;
    Ok(ok(json!(state.catalog.get_child_tree(&name))))
}

async fn parents(State(state): State<AppState>, Query(filter): Query<NameFilter>) -> Result<Json<Value>, ApiError> {
    let name = filter.name.ok_or_else(|| ApiError::BadRequest("name is required".to_string()))?;
    Ok(ok(json!(state.catalog.get_parent_tree(&name))))
}

fn row_to_json(row: db::models::TaskRow) -> Value {
    json!({
        "id": row.id,
        "run_date": row.run_date,
        "name": row.name,
        "command": row.command,
        "trigger": row.trigger,
        "parameters": row.parameters,
        "log": row.log,
        "status": row.status,
        "time_stamp": row.time_stamp,
    })
}

async fn blocking<T, F>(pool: Pool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut diesel::PgConnection) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut connection = pool.get().map_err(|e| anyhow::anyhow!(e))?;
        f(&mut connection)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?
    .map_err(ApiError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_maps_not_found_to_404() {
        let response = ApiError::NotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn api_error_maps_bad_request_to_400() {
        let response = ApiError::BadRequest("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
