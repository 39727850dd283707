//! Admin JSON API, mounted under `/admin`

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use tenantry_core::{EntitySummary, Error, entity_key};
use tenantry_runtime::{EntityManager, Transition};

use crate::host::AxumHost;

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<EntityManager>,
    pub host: Arc<AxumHost>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/entities", get(list_entities))
        .route("/admin/entities/{entity_type}", get(list_by_type))
        .route("/admin/entities/{entity_type}/{entity_id}", get(get_entity))
        .route(
            "/admin/entities/{entity_type}/{entity_id}/{action}",
            post(apply_transition),
        )
        .route("/admin/stats", get(stats))
        .route("/admin/states", get(states))
        .route("/admin/host", get(host))
        .route("/admin/host/schemas/{schema_id}", get(host_schema))
        .with_state(state)
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Entity { .. } => StatusCode::CONFLICT,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match error {
        Error::NotFound(message) => message,
        other => other.to_string(),
    };
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

async fn list_entities(State(state): State<AdminState>) -> Json<Vec<EntitySummary>> {
    Json(
        state
            .manager
            .registry()
            .all()
            .iter()
            .map(|c| c.summary())
            .collect(),
    )
}

async fn list_by_type(
    State(state): State<AdminState>,
    Path(entity_type): Path<String>,
) -> Json<Vec<EntitySummary>> {
    Json(
        state
            .manager
            .get_entities_by_type(&entity_type)
            .iter()
            .map(|c| c.summary())
            .collect(),
    )
}

async fn get_entity(
    State(state): State<AdminState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Response {
    match state.manager.get_entity(&entity_type, &entity_id) {
        Some(context) => Json(json!({
            "success": true,
            "entity": context.summary(),
            "state": state.manager.lifecycle_manager().get_state(&entity_type, &entity_id),
        }))
        .into_response(),
        None => error_response(Error::NotFound(format!(
            "Entity '{}' not found",
            entity_key(&entity_type, &entity_id)
        ))),
    }
}

async fn apply_transition(
    State(state): State<AdminState>,
    Path((entity_type, entity_id, action)): Path<(String, String, String)>,
) -> Response {
    let transition = match action.parse::<Transition>() {
        Ok(transition) => transition,
        Err(e) => return error_response(e),
    };
    info!(entity = %entity_key(&entity_type, &entity_id), %transition, "Admin transition requested");

    let manager = &state.manager;
    let result = match transition {
        Transition::Reload => manager.reload_entity(&entity_type, &entity_id).await,
        Transition::Suspend => manager.suspend_entity(&entity_type, &entity_id).await,
        Transition::Resume => manager.resume_entity(&entity_type, &entity_id).await,
        Transition::Unload => {
            return match manager.unload_entity(&entity_type, &entity_id).await {
                Ok(removed) => Json(json!({"success": true, "unregistered": removed}))
                    .into_response(),
                Err(e) => error_response(e),
            };
        }
        Transition::Load => {
            return error_response(Error::Validation(
                "Entities are loaded from disk at startup".to_string(),
            ));
        }
    };

    match result {
        Ok(outcome) if outcome.success => Json(outcome).into_response(),
        Ok(outcome) => (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.manager.get_stats())
}

async fn states(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.manager.get_all_entity_states())
}

async fn host(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.host.snapshot())
}

async fn host_schema(
    State(state): State<AdminState>,
    Path(schema_id): Path<String>,
) -> Response {
    match state.host.schema(&schema_id) {
        Some(schema) => Json(schema).into_response(),
        None => error_response(Error::NotFound(format!(
            "Schema '{}' not registered",
            schema_id
        ))),
    }
}
