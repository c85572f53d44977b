//! Postgres-backed grant and request stores.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Unavailable` | Backend unreachable |
//! | `ColumnDecode`, `Decode`, `ColumnNotFound` | `Corrupt` | Row does not match the schema |
//! | `Database`, other | `Backend` | Constraint violations, syntax, etc. |
//!
//! ## Concurrency
//!
//! Request status transitions are a single conditional `UPDATE ... WHERE id = $1
//! AND status = $2`. Postgres row locking makes exactly one of several concurrent
//! transitions from the same status affect a row; the others see zero rows.
//!
//! Approval runs the conditional `UPDATE` and the grant `INSERT` in one
//! transaction. The statement deadline is set inside that transaction
//! (`SET LOCAL statement_timeout`), and a transaction dropped before `COMMIT`
//! is rolled back, so a timeout never commits half an approval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::instrument;

use warden_auth::{EscalationRequest, Grant, RequestStatus, Role, Scope};
use warden_core::{GrantId, RequestId, ResourceId, StoreError, UserId};

use super::{GrantStore, RequestStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        id          UUID PRIMARY KEY,
        user_id     UUID NOT NULL,
        role        TEXT NOT NULL,
        resource_id TEXT NULL,
        expires_at  TIMESTAMPTZ NULL,
        created_by  UUID NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS user_roles_user_id_idx ON user_roles (user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS user_roles_expires_at_idx ON user_roles (expires_at) WHERE expires_at IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS jit_requests (
        id               UUID PRIMARY KEY,
        user_id          UUID NOT NULL,
        role             TEXT NOT NULL,
        resource_id      TEXT NULL,
        duration_minutes INTEGER NOT NULL CHECK (duration_minutes BETWEEN 1 AND 1440),
        reason           TEXT NOT NULL,
        status           TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
        approved_by      UUID NULL,
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jit_requests_status_idx ON jit_requests (status, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS jit_requests_user_id_idx ON jit_requests (user_id, created_at DESC)",
];

/// Create the `user_roles` and `jit_requests` tables if they do not exist.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

/// Postgres-backed grant store (`user_roles` table).
#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    #[instrument(skip(self, grant), fields(grant_id = %grant.id, user_id = %grant.user_id), err)]
    async fn create(&self, grant: &Grant) -> Result<(), StoreError> {
        insert_grant(&*self.pool, grant)
            .await
            .map_err(|e| map_sqlx_error("create_grant", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, role, resource_id, expires_at, created_by, created_at
            FROM user_roles
            WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_grants", e))?;

        rows.iter().map(grant_from_row).collect()
    }

    #[instrument(skip(self), fields(grant_id = %id), err)]
    async fn delete_by_id(&self, id: GrantId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_grant", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM user_roles WHERE expires_at IS NOT NULL AND expires_at <= $1")
                .bind(now)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_expired_grants", e))?;

        Ok(result.rows_affected())
    }
}

async fn insert_grant<'e, E: PgExecutor<'e>>(executor: E, grant: &Grant) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_roles (id, user_id, role, resource_id, expires_at, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(grant.id.as_uuid())
    .bind(grant.user_id.as_uuid())
    .bind(grant.role.as_str())
    .bind(grant.scope.resource_id().map(ResourceId::as_str))
    .bind(grant.expires_at)
    .bind(grant.granted_by.as_uuid())
    .bind(grant.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Postgres-backed request store (`jit_requests` table).
///
/// Approvals also write to `user_roles`, so the pool must point at the same
/// database as the grant store.
#[derive(Debug, Clone)]
pub struct PostgresRequestStore {
    pool: Arc<PgPool>,
    statement_timeout: Option<Duration>,
}

impl PostgresRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            statement_timeout: None,
        }
    }

    /// Server-side deadline for each statement of the approval transaction.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

/// `statement_timeout` value for `limit`. Zero would disable the timeout, so
/// the floor is one millisecond.
fn statement_timeout_setting(limit: Duration) -> String {
    format!("{}ms", limit.as_millis().max(1))
}

const REQUEST_COLUMNS: &str = "id, user_id, role, resource_id, duration_minutes, reason, status, approved_by, created_at, updated_at";

#[async_trait]
impl RequestStore for PostgresRequestStore {
    #[instrument(skip(self, request), fields(request_id = %request.id, user_id = %request.user_id), err)]
    async fn create(&self, request: &EscalationRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jit_requests (
                id, user_id, role, resource_id, duration_minutes, reason,
                status, approved_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.user_id.as_uuid())
        .bind(request.role.as_str())
        .bind(request.scope.resource_id().map(ResourceId::as_str))
        .bind(request.duration_minutes as i32)
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.approved_by.map(uuid::Uuid::from))
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_request", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(request_id = %id), err)]
    async fn get_by_id(&self, id: RequestId) -> Result<Option<EscalationRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM jit_requests WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_request", e))?;

        row.as_ref().map(request_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_pending(&self) -> Result<Vec<EscalationRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM jit_requests WHERE status = 'pending' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_requests", e))?;

        rows.iter().map(request_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<EscalationRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM jit_requests WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_requests", e))?;

        rows.iter().map(request_from_row).collect()
    }

    #[instrument(skip(self), fields(request_id = %id, from = %from, to = %to), err)]
    async fn transition_status(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        decided_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jit_requests
            SET status = $3, approved_by = $4, updated_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(decided_by.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_request_status", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, grant), fields(request_id = %id, grant_id = %grant.id), err)]
    async fn approve_with_grant(
        &self,
        id: RequestId,
        approver: UserId,
        grant: &Grant,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(limit) = self.statement_timeout {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(statement_timeout_setting(limit))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE jit_requests
            SET status = 'approved', approved_by = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(approver.as_uuid())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("approve_request", e))?;

        if updated.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(false);
        }

        insert_grant(&mut *tx, grant)
            .await
            .map_err(|e| map_sqlx_error("create_grant", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(true)
    }
}

fn scope_from_column(resource_id: Option<String>) -> Result<Scope, StoreError> {
    resource_id
        .map(ResourceId::new)
        .transpose()
        .map(Scope::from)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn grant_from_row(row: &sqlx::postgres::PgRow) -> Result<Grant, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_grant", e);
    let role: String = row.try_get("role").map_err(decode)?;

    Ok(Grant {
        id: GrantId::from_uuid(row.try_get("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        scope: scope_from_column(row.try_get("resource_id").map_err(decode)?)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        granted_by: UserId::from_uuid(row.try_get("created_by").map_err(decode)?),
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn request_from_row(row: &sqlx::postgres::PgRow) -> Result<EscalationRequest, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_request", e);
    let role: String = row.try_get("role").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let duration: i32 = row.try_get("duration_minutes").map_err(decode)?;
    let approved_by: Option<uuid::Uuid> = row.try_get("approved_by").map_err(decode)?;

    Ok(EscalationRequest {
        id: RequestId::from_uuid(row.try_get("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        scope: scope_from_column(row.try_get("resource_id").map_err(decode)?)?,
        duration_minutes: u32::try_from(duration)
            .map_err(|_| StoreError::Corrupt(format!("negative duration_minutes: {duration}")))?,
        reason: row.try_get("reason").map_err(decode)?,
        status: status
            .parse::<RequestStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        approved_by: approved_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("timed out acquiring connection in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
