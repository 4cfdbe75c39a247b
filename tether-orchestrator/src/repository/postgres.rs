//! PostgreSQL store
//!
//! Lease acquisition, renewal, completion and cancel are each a single
//! conditional `UPDATE ... RETURNING`, so two runners racing for the same
//! job cannot both see a row come back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tether_core::domain::event::{EventLevel, RunEvent, StoredEvent};
use tether_core::domain::job::{
    EXIT_CODE_CANCELED, Job, JobResult, JobStatus, Lease, SealedInput,
};
use tether_core::domain::kind::JobKind;
use tether_core::domain::runner::Runner;
use tether_core::dto::status::StoreStatus;
use uuid::Uuid;

use super::{CancelOutcome, REQUIRED_TABLES, Store, StoreError, StoreResult};

const JOB_COLUMNS: &str = r#"
    id, run_id, project_id, kind, title, args, target_runner_id, payload_meta,
    sealed_input_b64, sealed_input_alg, sealed_input_key_id, awaiting_sealed_input,
    status, lease_id, lease_owner, lease_expires_at, attempt, cancel_requested,
    created_at, started_at, completed_at, result_success, result_exit_code,
    result_output, result_error_message
"#;

/// Predicate shared by the lease windows and the acquisition CAS.
/// `$1` is always the evaluation time.
const LEASABLE: &str = r#"
    awaiting_sealed_input = FALSE
    AND cancel_requested = FALSE
    AND (status = 'Queued' OR (status = 'Leased' AND lease_expires_at <= $1))
"#;

fn kind_names(kinds: &[JobKind]) -> Vec<String> {
    kinds.iter().map(|k| k.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        let sealed = job.sealed_input.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, run_id, project_id, kind, title, args, target_runner_id,
                payload_meta, sealed_input_b64, sealed_input_alg, sealed_input_key_id,
                awaiting_sealed_input, status, attempt, cancel_requested, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.run_id)
        .bind(&job.project_id)
        .bind(job.kind.as_str())
        .bind(&job.title)
        .bind(serde_json::json!(job.args))
        .bind(&job.target_runner_id)
        .bind(&job.payload_meta)
        .bind(sealed.map(|s| s.sealed_input_b64.as_str()))
        .bind(sealed.map(|s| s.sealed_input_alg.as_str()))
        .bind(sealed.map(|s| s.sealed_input_key_id.as_str()))
        .bind(job.awaiting_sealed_input)
        .bind(job.status.as_str())
        .bind(job.attempt as i32)
        .bind(job.cancel_requested)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn find_job_by_run(&self, run_id: Uuid) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE run_id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn attach_sealed_input(
        &self,
        job_id: Uuid,
        sealed: &SealedInput,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET sealed_input_b64 = $1, sealed_input_alg = $2, sealed_input_key_id = $3,
                awaiting_sealed_input = FALSE
            WHERE id = $4 AND awaiting_sealed_input = TRUE AND status = 'Queued'
            "#,
        )
        .bind(&sealed.sealed_input_b64)
        .bind(&sealed.sealed_input_alg)
        .bind(&sealed.sealed_input_key_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn targeted_window(
        &self,
        runner_id: &str,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE {LEASABLE} AND target_runner_id = $2 \
             AND kind = ANY($3) ORDER BY created_at ASC, id ASC LIMIT $4"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(runner_id)
            .bind(kind_names(kinds))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn untargeted_window(
        &self,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE {LEASABLE} AND target_runner_id IS NULL \
             AND kind = ANY($2) ORDER BY created_at ASC, id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(kind_names(kinds))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn try_acquire_lease(
        &self,
        job_id: Uuid,
        lease: &Lease,
        kinds: &[JobKind],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'Leased', lease_id = $2, lease_owner = $3, lease_expires_at = $4,
                attempt = attempt + 1, started_at = COALESCE(started_at, $1)
            WHERE id = $5
              AND {LEASABLE}
              AND (target_runner_id IS NULL OR target_runner_id = $3)
              AND kind = ANY($6)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(lease.lease_id)
            .bind(&lease.owner)
            .bind(lease.expires_at)
            .bind(job_id)
            .bind(kind_names(kinds))
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET lease_expires_at = $1
            WHERE id = $2 AND lease_id = $3 AND status = 'Leased'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(expires_at)
            .bind(job_id)
            .bind(lease_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        status: JobStatus,
        result: Option<&JobResult>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, completed_at = $2, result_success = $3, result_exit_code = $4,
                result_output = $5, result_error_message = $6
            WHERE id = $7 AND lease_id = $8 AND status = 'Leased'
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(result.map(|r| r.success))
        .bind(result.map(|r| r.exit_code))
        .bind(result.and_then(|r| r.output.as_ref()))
        .bind(result.and_then(|r| r.error_message.as_deref()))
        .bind(job_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn request_cancel(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CancelOutcome>> {
        let canceled = JobResult::canceled();

        // Queued jobs, and leased jobs whose holder stopped renewing, end now.
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'Canceled', cancel_requested = TRUE, completed_at = $1,
                result_success = FALSE, result_exit_code = $2, result_error_message = $3
            WHERE id = $4
              AND (status = 'Queued' OR (status = 'Leased' AND lease_expires_at <= $1))
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(EXIT_CODE_CANCELED)
            .bind(canceled.error_message.as_deref())
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(CancelOutcome::Canceled(row.try_into()?)));
        }

        let sql = format!(
            r#"
            UPDATE jobs SET cancel_requested = TRUE
            WHERE id = $1 AND status = 'Leased'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(CancelOutcome::Requested(row.try_into()?)));
        }

        Ok(self.find_job(job_id).await?.map(CancelOutcome::AlreadyTerminal))
    }

    // =========================================================================
    // Run events and results
    // =========================================================================

    async fn append_events(
        &self,
        run_id: Uuid,
        batch_id: Uuid,
        events: &[RunEvent],
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO run_event_batches (run_id, batch_id, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(batch_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO run_events (run_id, ts, level, message, data, redacted)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(run_id)
            .bind(event.ts)
            .bind(event.level.as_str())
            .bind(&event.message)
            .bind(&event.data)
            .bind(event.redacted)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_events(
        &self,
        run_id: Uuid,
        after_seq: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT seq, ts, level, message, data, redacted
            FROM run_events
            WHERE run_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(run_id)
        .bind(after_seq.unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    async fn tail_events(&self, run_id: Uuid, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT seq, ts, level, message, data, redacted
            FROM (
                SELECT seq, ts, level, message, data, redacted
                FROM run_events
                WHERE run_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) AS tail
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    async fn put_large_result(
        &self,
        run_id: Uuid,
        result: &serde_json::Value,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO run_large_results (run_id, result, stored_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (run_id) DO UPDATE SET
                result = EXCLUDED.result,
                stored_at = EXCLUDED.stored_at
            "#,
        )
        .bind(run_id)
        .bind(result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_large_result(&self, run_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT result FROM run_large_results WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    // =========================================================================
    // Runners
    // =========================================================================

    async fn upsert_runner(&self, runner: &Runner) -> StoreResult<Runner> {
        let row = sqlx::query_as::<_, RunnerRow>(
            r#"
            INSERT INTO runners (id, capabilities, public_key_pem, key_id, registered_at, last_heartbeat_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                capabilities = EXCLUDED.capabilities,
                public_key_pem = EXCLUDED.public_key_pem,
                key_id = EXCLUDED.key_id,
                last_heartbeat_at = EXCLUDED.last_heartbeat_at
            RETURNING id, capabilities, public_key_pem, key_id, registered_at, last_heartbeat_at
            "#,
        )
        .bind(&runner.id)
        .bind(&runner.capabilities)
        .bind(&runner.public_key_pem)
        .bind(&runner.key_id)
        .bind(runner.registered_at)
        .bind(runner.last_heartbeat_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>> {
        let row = sqlx::query_as::<_, RunnerRow>(
            r#"
            SELECT id, capabilities, public_key_pem, key_id, registered_at, last_heartbeat_at
            FROM runners
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Runner::from))
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        let rows = sqlx::query_as::<_, RunnerRow>(
            r#"
            SELECT id, capabilities, public_key_pem, key_id, registered_at, last_heartbeat_at
            FROM runners
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Runner::from).collect())
    }

    async fn touch_runner(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE runners SET last_heartbeat_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Schema
    // =========================================================================

    async fn schema_status(&self) -> StoreResult<StoreStatus> {
        let wanted: Vec<String> = REQUIRED_TABLES.iter().map(|t| t.to_string()).collect();

        let present: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = ANY($1)
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?;

        let missing_tables: Vec<String> = wanted
            .into_iter()
            .filter(|t| !present.iter().any(|(p,)| p == t))
            .collect();

        Ok(StoreStatus {
            backend: self.backend().to_string(),
            ready: missing_tables.is_empty(),
            missing_tables,
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    run_id: Uuid,
    project_id: String,
    kind: String,
    title: String,
    args: serde_json::Value,
    target_runner_id: Option<String>,
    payload_meta: serde_json::Value,
    sealed_input_b64: Option<String>,
    sealed_input_alg: Option<String>,
    sealed_input_key_id: Option<String>,
    awaiting_sealed_input: bool,
    status: String,
    lease_id: Option<Uuid>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    attempt: i32,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result_success: Option<bool>,
    result_exit_code: Option<i32>,
    result_output: Option<serde_json::Value>,
    result_error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind: JobKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("job {}: unknown status '{}'", row.id, row.status))
        })?;
        let args: Vec<String> = serde_json::from_value(row.args)
            .map_err(|e| StoreError::Corrupt(format!("job {}: args: {}", row.id, e)))?;

        let sealed_input = match (row.sealed_input_b64, row.sealed_input_alg, row.sealed_input_key_id) {
            (Some(b64), Some(alg), Some(key_id)) => Some(SealedInput {
                sealed_input_b64: b64,
                sealed_input_alg: alg,
                sealed_input_key_id: key_id,
            }),
            _ => None,
        };

        let lease = match (row.lease_id, row.lease_owner, row.lease_expires_at) {
            (Some(lease_id), Some(owner), Some(expires_at)) => Some(Lease {
                lease_id,
                owner,
                expires_at,
            }),
            _ => None,
        };

        let result = row.result_success.map(|success| JobResult {
            success,
            exit_code: row.result_exit_code.unwrap_or(0),
            output: row.result_output,
            error_message: row.result_error_message,
        });

        Ok(Job {
            id: row.id,
            run_id: row.run_id,
            project_id: row.project_id,
            kind,
            title: row.title,
            args,
            target_runner_id: row.target_runner_id,
            payload_meta: row.payload_meta,
            sealed_input,
            awaiting_sealed_input: row.awaiting_sealed_input,
            status,
            lease,
            attempt: row.attempt.max(0) as u32,
            cancel_requested: row.cancel_requested,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    ts: DateTime<Utc>,
    level: String,
    message: String,
    data: Option<serde_json::Value>,
    redacted: bool,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            seq: row.seq,
            event: RunEvent {
                ts: row.ts,
                level: EventLevel::parse(&row.level),
                message: row.message,
                data: row.data,
                redacted: row.redacted,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: String,
    capabilities: Vec<String>,
    public_key_pem: Option<String>,
    key_id: Option<String>,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
}

impl From<RunnerRow> for Runner {
    fn from(row: RunnerRow) -> Self {
        Runner {
            id: row.id,
            capabilities: row.capabilities,
            public_key_pem: row.public_key_pem,
            key_id: row.key_id,
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
        }
    }
}
