//! Postgres-backed store. All SQL is runtime-checked (`sqlx::query`, not
//! `sqlx::query!`) so builds never need a live database.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::audit::query::{EventFilter, Watermark};
use crate::errors::AppError;
use crate::models::entity::{EntityRecord, EntityRow, EntityState};
use crate::models::event::{AuditEvent, EntityType, EventRow, NewEvent};
use crate::store::{Committed, EntityWrite, MutationPlan, Store};

const EVENT_COLUMNS: &str =
    "seq, id, project_id, entity_type, entity_id, action_type, actor, metadata, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewEvent,
) -> Result<AuditEvent, AppError> {
    let metadata = serde_json::to_value(&event.metadata)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Unserializable event metadata: {e}")))?;

    let row = sqlx::query_as::<_, EventRow>(&format!(
        r#"
        INSERT INTO audit_events
            (id, project_id, entity_type, entity_id, action_type, actor, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
        RETURNING {EVENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&event.project_id)
    .bind(event.entity_type.as_str())
    .bind(&event.entity_id)
    .bind(event.action_type.as_str())
    .bind(event.actor.as_str())
    .bind(&metadata)
    .fetch_one(&mut **tx)
    .await?;

    row.try_into()
}

async fn write_entity(
    tx: &mut Transaction<'_, Postgres>,
    entity_type: EntityType,
    id: &str,
    state: &EntityState,
    insert: bool,
) -> Result<Option<EntityRecord>, AppError> {
    let sql = if insert {
        r#"
        INSERT INTO entities (entity_type, id, project_id, data, deleted_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (entity_type, id) DO NOTHING
        RETURNING *
        "#
    } else {
        r#"
        UPDATE entities
        SET project_id = $3, data = $4, deleted_at = $5, updated_at = now()
        WHERE entity_type = $1 AND id = $2
        RETURNING *
        "#
    };

    let row: Option<EntityRow> = sqlx::query_as(sql)
        .bind(entity_type.as_str())
        .bind(id)
        .bind(&state.project_id)
        .bind(&state.data)
        .bind(state.deleted_at)
        .fetch_optional(&mut **tx)
        .await?;

    row.map(EntityRecord::try_from).transpose()
}

#[async_trait]
impl Store for PgStore {
    async fn append_event(&self, event: NewEvent) -> Result<AuditEvent, AppError> {
        let mut tx = self.pool.begin().await?;
        let event = insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>, AppError> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM audit_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AuditEvent::try_from).transpose()
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        after: Option<&Watermark>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AppError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {EVENT_COLUMNS} FROM audit_events WHERE TRUE"
        ));

        if let Some(entity_type) = filter.entity_type {
            qb.push(" AND entity_type = ").push_bind(entity_type.as_str());
        }
        if let Some(entity_id) = &filter.entity_id {
            qb.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
        if let Some(project_id) = &filter.project_id {
            qb.push(" AND project_id = ").push_bind(project_id.clone());
        }
        if let Some(since) = filter.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(mark) = after {
            qb.push(" AND (created_at, seq) < (")
                .push_bind(mark.created_at)
                .push(", ")
                .push_bind(mark.seq)
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC, seq DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntityRecord>, AppError> {
        let row: Option<EntityRow> =
            sqlx::query_as("SELECT * FROM entities WHERE entity_type = $1 AND id = $2")
                .bind(entity_type.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(EntityRecord::try_from).transpose()
    }

    async fn list_entities(
        &self,
        entity_type: EntityType,
        project_id: Option<&str>,
        trashed: bool,
    ) -> Result<Vec<EntityRecord>, AppError> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT * FROM entities
            WHERE entity_type = $1
              AND ($2::text IS NULL OR project_id = $2)
              AND (deleted_at IS NOT NULL) = $3
            ORDER BY created_at, id
            "#,
        )
        .bind(entity_type.as_str())
        .bind(project_id)
        .bind(trashed)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityRecord::try_from).collect()
    }

    async fn mutate_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        plan: MutationPlan,
    ) -> Result<Committed, AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock held until commit/rollback: concurrent writers to this
        // entity queue here and see the state this transaction leaves.
        let current: Option<EntityRow> = sqlx::query_as(
            "SELECT * FROM entities WHERE entity_type = $1 AND id = $2 FOR UPDATE",
        )
        .bind(entity_type.as_str())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = current.map(EntityRecord::try_from).transpose()?;

        // Dropping `tx` on any early return rolls back.
        let planned = plan(current.clone())?;

        let entity = match &planned.write {
            EntityWrite::Insert(state) => Some(
                write_entity(&mut tx, entity_type, id, state, true)
                    .await?
                    .ok_or_else(|| AppError::Duplicate(format!("{entity_type} {id}")))?,
            ),
            EntityWrite::Update(state) => Some(
                write_entity(&mut tx, entity_type, id, state, false)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {id}")))?,
            ),
            EntityWrite::Erase => {
                sqlx::query("DELETE FROM entities WHERE entity_type = $1 AND id = $2")
                    .bind(entity_type.as_str())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                None
            }
            EntityWrite::Keep => current,
        };

        let event = match &planned.event {
            Some(new_event) => Some(insert_event(&mut tx, new_event).await?),
            None => None,
        };

        tx.commit().await?;
        debug!(%entity_type, entity_id = id, audited = event.is_some(), "Entity mutation committed");

        Ok(Committed { entity, event })
    }
}
