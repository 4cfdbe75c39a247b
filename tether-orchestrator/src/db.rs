use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Jobs carry their own lease fields; there is no separate lock table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL UNIQUE,
            project_id VARCHAR(255) NOT NULL,
            kind VARCHAR(32) NOT NULL,
            title TEXT NOT NULL,
            args JSONB NOT NULL DEFAULT '[]',
            target_runner_id VARCHAR(255),
            payload_meta JSONB NOT NULL DEFAULT '{}',
            sealed_input_b64 TEXT,
            sealed_input_alg VARCHAR(64),
            sealed_input_key_id VARCHAR(128),
            awaiting_sealed_input BOOLEAN NOT NULL DEFAULT FALSE,
            status VARCHAR(32) NOT NULL,
            lease_id UUID,
            lease_owner VARCHAR(255),
            lease_expires_at TIMESTAMPTZ,
            attempt INTEGER NOT NULL DEFAULT 0,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            result_success BOOLEAN,
            result_exit_code INTEGER,
            result_output JSONB,
            result_error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_events (
            seq BIGSERIAL PRIMARY KEY,
            run_id UUID NOT NULL,
            ts TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            message TEXT NOT NULL,
            data JSONB,
            redacted BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_event_batches (
            run_id UUID NOT NULL,
            batch_id UUID NOT NULL,
            received_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (run_id, batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_large_results (
            run_id UUID PRIMARY KEY,
            result JSONB NOT NULL,
            stored_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runners (
            id VARCHAR(255) PRIMARY KEY,
            capabilities TEXT[] NOT NULL,
            public_key_pem TEXT,
            key_id VARCHAR(128),
            registered_at TIMESTAMPTZ NOT NULL,
            last_heartbeat_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_leasable ON jobs(target_runner_id, status, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_events_run ON run_events(run_id, seq)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runners_last_heartbeat ON runners(last_heartbeat_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
