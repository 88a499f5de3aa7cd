use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Idempotent schema, applied statement by statement at startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        entity_type TEXT NOT NULL,
        id          TEXT NOT NULL,
        project_id  TEXT,
        data        JSONB NOT NULL,
        deleted_at  TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (entity_type, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS entities_project_idx ON entities (entity_type, project_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        seq         BIGSERIAL PRIMARY KEY,
        id          UUID NOT NULL UNIQUE,
        project_id  TEXT,
        entity_type TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        action_type TEXT NOT NULL,
        actor       TEXT NOT NULL,
        metadata    JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS audit_events_timeline_idx ON audit_events (created_at DESC, seq DESC)",
    "CREATE INDEX IF NOT EXISTS audit_events_entity_idx ON audit_events (entity_type, entity_id, created_at DESC, seq DESC)",
    "CREATE INDEX IF NOT EXISTS audit_events_project_idx ON audit_events (project_id, created_at DESC, seq DESC)",
    // Events are immutable. Whole-row DELETE (administrative purge) stays allowed.
    r#"
    CREATE OR REPLACE FUNCTION audit_events_reject_update() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'audit_events rows are immutable';
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS audit_events_immutable ON audit_events",
    r#"
    CREATE TRIGGER audit_events_immutable
        BEFORE UPDATE ON audit_events
        FOR EACH ROW EXECUTE FUNCTION audit_events_reject_update()
    "#,
];

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Applies the schema. Safe to run on every boot.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for (i, statement) in SCHEMA.iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Schema statement #{i} failed"))?;
    }
    info!("Database schema is up to date ({} statements)", SCHEMA.len());
    Ok(())
}
