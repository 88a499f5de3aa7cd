use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::entities::lifecycle::{
    list_deleted, permanent_delete, restore_entity, soft_delete, PurgeResult,
};
use crate::entities::mutations::{
    create_entity, get_entity, list_entities, update_entity, CreateEntity, UpdateEntity,
};
use crate::errors::AppError;
use crate::models::entity::EntityRecord;
use crate::models::event::{Actor, EntityType};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProjectQuery {
    pub project_id: Option<String>,
}

/// Actor for body-less lifecycle calls, e.g. `?actor=llm`.
#[derive(Deserialize)]
pub struct ActorQuery {
    #[serde(default)]
    pub actor: Actor,
}

/// GET /api/v1/entities/:kind
pub async fn handle_list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<ProjectQuery>,
) -> Result<Json<Vec<EntityRecord>>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    let entities =
        list_entities(state.store.as_ref(), entity_type, params.project_id.as_deref()).await?;
    Ok(Json(entities))
}

/// POST /api/v1/entities/:kind
pub async fn handle_create(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<CreateEntity>,
) -> Result<(StatusCode, Json<EntityRecord>), AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    let entity = create_entity(state.store.as_ref(), entity_type, req).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

/// GET /api/v1/entities/:kind/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    Ok(Json(get_entity(state.store.as_ref(), entity_type, &id).await?))
}

/// PATCH /api/v1/entities/:kind/:id
pub async fn handle_update(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<UpdateEntity>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    Ok(Json(
        update_entity(state.store.as_ref(), entity_type, &id, req).await?,
    ))
}

/// DELETE /api/v1/entities/:kind/:id
/// Soft delete: the entity moves to the trash.
pub async fn handle_soft_delete(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<ActorQuery>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    Ok(Json(
        soft_delete(state.store.as_ref(), entity_type, &id, params.actor).await?,
    ))
}

/// GET /api/v1/entities/:kind/deleted
pub async fn handle_list_deleted(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<ProjectQuery>,
) -> Result<Json<Vec<EntityRecord>>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    let entities =
        list_deleted(state.store.as_ref(), entity_type, params.project_id.as_deref()).await?;
    Ok(Json(entities))
}

/// POST /api/v1/entities/:kind/:id/restore
pub async fn handle_restore(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<ActorQuery>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    Ok(Json(
        restore_entity(state.store.as_ref(), entity_type, &id, params.actor).await?,
    ))
}

/// POST /api/v1/entities/:kind/:id/permanent-delete
pub async fn handle_permanent_delete(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<ActorQuery>,
) -> Result<Json<PurgeResult>, AppError> {
    let entity_type = EntityType::from_path_segment(&kind)?;
    Ok(Json(
        permanent_delete(state.store.as_ref(), entity_type, &id, params.actor).await?,
    ))
}
