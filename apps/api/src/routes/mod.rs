pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::audit::handlers as audit;
use crate::entities::handlers as entities;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Audit log, diffs and event-level restore
        .route(
            "/api/v1/audit/logs",
            get(audit::handle_list_logs).post(audit::handle_record_event),
        )
        .route(
            "/api/v1/audit/logs/:event_id",
            get(audit::handle_get_log).delete(audit::handle_delete_log),
        )
        .route("/api/v1/audit/diff/:event_id", get(audit::handle_event_diff))
        .route("/api/v1/audit/restore/:event_id", post(audit::handle_restore))
        // Entities and their trash lifecycle
        .route(
            "/api/v1/entities/:kind",
            get(entities::handle_list).post(entities::handle_create),
        )
        .route(
            "/api/v1/entities/:kind/deleted",
            get(entities::handle_list_deleted),
        )
        .route(
            "/api/v1/entities/:kind/:id",
            get(entities::handle_get)
                .patch(entities::handle_update)
                .delete(entities::handle_soft_delete),
        )
        .route(
            "/api/v1/entities/:kind/:id/restore",
            post(entities::handle_restore),
        )
        .route(
            "/api/v1/entities/:kind/:id/permanent-delete",
            post(entities::handle_permanent_delete),
        )
        .with_state(state)
}
