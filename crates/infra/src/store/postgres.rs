//! Postgres-backed store.
//!
//! Every repository operation is a single SQL statement, written once against a
//! generic `PgExecutor` and reused by the pool-backed [`PgStore`] (auto-commit)
//! and the transaction-backed [`PgTx`].
//!
//! ## Job reservation
//!
//! `find_and_reserve_job` picks the oldest eligible row with
//! `FOR UPDATE SKIP LOCKED` inside the same `UPDATE`, so concurrent reservers,
//! in this process or another one, never take the same row.
//!
//! ## Error mapping
//!
//! | Outcome | StoreError |
//! |---------|------------|
//! | `UPDATE ... RETURNING` / `SELECT` matched no row | typed not-found variant |
//! | unique violation on `messages_request_unique` | `DuplicateRequest` |
//! | any `sqlx::Error` | `Database { operation, source }` |
//! | unknown `failed_jobs.reason` | `Corrupt` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{ChatId, FailedJobId, JobId, MessageId, ProblemId, RequestId, UserId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use super::models::{Chat, HistoryPosition, Message, NewMessage, Problem};
use super::{
    ChatRepository, JobRepository, MessageRepository, ProblemRepository, StoreError, StoreResult,
    Transactor, Tx,
};
use crate::outbox::{FailReason, FailedJob, Job};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Pool-backed store; each call commits on its own.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open transaction. Dropping it without `commit` rolls back.
#[derive(Debug)]
pub struct PgTx {
    tx: Mutex<Transaction<'static, Postgres>>,
}

#[async_trait]
impl Transactor for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn Tx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgTx { tx: Mutex::new(tx) }))
    }
}

#[async_trait]
impl Tx for PgTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .into_inner()
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn map_sqlx_error(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::Database { operation, source }
}

const UNIQUE_VIOLATION: &str = "23505";
const REQUEST_UNIQUE_INDEX: &str = "messages_request_unique";

fn is_request_conflict(code: Option<&str>, constraint: Option<&str>) -> bool {
    code == Some(UNIQUE_VIOLATION) && constraint == Some(REQUEST_UNIQUE_INDEX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

struct JobRow(Job);

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let attempts: i32 = row.try_get("attempts")?;
        Ok(JobRow(Job {
            id: JobId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
            attempts: attempts.max(0) as u32,
            available_at: row.try_get("available_at")?,
            reserved_until: row.try_get("reserved_until")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct MessageRow(Message);

impl<'r> FromRow<'r, PgRow> for MessageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let author: Option<Uuid> = row.try_get("author_id")?;
        Ok(MessageRow(Message {
            id: MessageId::from_uuid(row.try_get("id")?),
            chat_id: ChatId::from_uuid(row.try_get("chat_id")?),
            problem_id: ProblemId::from_uuid(row.try_get("problem_id")?),
            author_id: author.map(UserId::from_uuid),
            initial_request_id: RequestId::from_uuid(row.try_get("initial_request_id")?),
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            is_visible_for_client: row.try_get("is_visible_for_client")?,
            is_visible_for_manager: row.try_get("is_visible_for_manager")?,
            is_blocked: row.try_get("is_blocked")?,
            is_service: row.try_get("is_service")?,
            checked_at: row.try_get("checked_at")?,
        }))
    }
}

struct ProblemRow(Problem);

impl<'r> FromRow<'r, PgRow> for ProblemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let manager: Option<Uuid> = row.try_get("manager_id")?;
        let resolve_request: Option<Uuid> = row.try_get("resolve_request_id")?;
        Ok(ProblemRow(Problem {
            id: ProblemId::from_uuid(row.try_get("id")?),
            chat_id: ChatId::from_uuid(row.try_get("chat_id")?),
            manager_id: manager.map(UserId::from_uuid),
            resolved_at: row.try_get("resolved_at")?,
            resolve_request_id: resolve_request.map(RequestId::from_uuid),
            created_at: row.try_get("created_at")?,
        }))
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, problem_id, author_id, initial_request_id, body, \
     created_at, is_visible_for_client, is_visible_for_manager, is_blocked, is_service, checked_at";

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

mod sql {
    use super::*;

    pub async fn create_job<'e, E: PgExecutor<'e>>(
        e: E,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> StoreResult<JobId> {
        let id = JobId::new();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, payload, attempts, available_at, reserved_until, created_at)
            VALUES ($1, $2, $3, 0, $4, $4, now())
            "#,
        )
        .bind(id.as_uuid())
        .bind(name)
        .bind(payload)
        .bind(available_at)
        .execute(e)
        .await
        .map_err(|e| map_sqlx_error("create_job", e))?;
        Ok(id)
    }

    pub async fn find_and_reserve_job<'e, E: PgExecutor<'e>>(
        e: E,
        until: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1, reserved_until = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE available_at <= now() AND reserved_until <= now()
                ORDER BY available_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, name, payload, attempts, available_at, reserved_until, created_at
            "#,
        )
        .bind(until)
        .fetch_optional(e)
        .await
        .map_err(|e| map_sqlx_error("find_and_reserve_job", e))?;
        Ok(row.map(|r| r.0))
    }

    pub async fn create_failed_job<'e, E: PgExecutor<'e>>(
        e: E,
        name: &str,
        payload: &str,
        reason: FailReason,
    ) -> StoreResult<FailedJobId> {
        let id = FailedJobId::new();
        sqlx::query(
            r#"
            INSERT INTO failed_jobs (id, name, payload, reason, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(id.as_uuid())
        .bind(name)
        .bind(payload)
        .bind(reason.as_str())
        .execute(e)
        .await
        .map_err(|e| map_sqlx_error("create_failed_job", e))?;
        Ok(id)
    }

    pub async fn delete_job<'e, E: PgExecutor<'e>>(e: E, id: JobId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(e)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    pub async fn list_failed_jobs<'e, E: PgExecutor<'e>>(
        e: E,
        limit: usize,
    ) -> StoreResult<Vec<FailedJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, payload, reason, created_at
            FROM failed_jobs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(e)
        .await
        .map_err(|e| map_sqlx_error("list_failed_jobs", e))?;

        rows.iter()
            .map(|row| {
                let reason: String = row
                    .try_get("reason")
                    .map_err(|e| map_sqlx_error("list_failed_jobs", e))?;
                let reason = reason.parse::<FailReason>().map_err(|detail| StoreError::Corrupt {
                    operation: "list_failed_jobs",
                    detail,
                })?;
                let decode = || -> Result<FailedJob, sqlx::Error> {
                    Ok(FailedJob {
                        id: FailedJobId::from_uuid(row.try_get("id")?),
                        name: row.try_get("name")?,
                        payload: row.try_get("payload")?,
                        reason,
                        created_at: row.try_get("created_at")?,
                    })
                };
                decode().map_err(|e| map_sqlx_error("list_failed_jobs", e))
            })
            .collect()
    }

    pub async fn get_message_by_id<'e, E: PgExecutor<'e>>(
        e: E,
        id: MessageId,
    ) -> StoreResult<Message> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        sqlx::query_as::<_, MessageRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(e)
            .await
            .map_err(|e| map_sqlx_error("get_message_by_id", e))?
            .map(|r| r.0)
            .ok_or(StoreError::MessageNotFound)
    }

    pub async fn get_message_by_request_id<'e, E: PgExecutor<'e>>(
        e: E,
        request_id: RequestId,
    ) -> StoreResult<Message> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE initial_request_id = $1 AND NOT is_service \
             ORDER BY created_at ASC LIMIT 1"
        );
        sqlx::query_as::<_, MessageRow>(&query)
            .bind(request_id.as_uuid())
            .fetch_optional(e)
            .await
            .map_err(|e| map_sqlx_error("get_message_by_request_id", e))?
            .map(|r| r.0)
            .ok_or(StoreError::MessageNotFound)
    }

    pub async fn create_message<'e, E: PgExecutor<'e>>(
        e: E,
        new: NewMessage,
    ) -> StoreResult<Message> {
        let message = new.into_message(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, chat_id, problem_id, author_id, initial_request_id, body, created_at,
                is_visible_for_client, is_visible_for_manager, is_blocked, is_service
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.chat_id.as_uuid())
        .bind(message.problem_id.as_uuid())
        .bind(message.author_id.map(Uuid::from))
        .bind(message.initial_request_id.as_uuid())
        .bind(&message.body)
        .bind(message.created_at)
        .bind(message.is_visible_for_client)
        .bind(message.is_visible_for_manager)
        .bind(message.is_blocked)
        .bind(message.is_service)
        .execute(e)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db)
                if is_request_conflict(db.code().as_deref(), db.constraint()) =>
            {
                StoreError::DuplicateRequest(message.initial_request_id)
            }
            _ => map_sqlx_error("create_message", err),
        })?;
        Ok(message)
    }

    pub async fn set_message_flag<'e, E: PgExecutor<'e>>(
        e: E,
        operation: &'static str,
        column: &'static str,
        id: MessageId,
    ) -> StoreResult<()> {
        let query =
            format!("UPDATE messages SET {column} = TRUE, checked_at = now() WHERE id = $1");
        let result = sqlx::query(&query)
            .bind(id.as_uuid())
            .execute(e)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MessageNotFound);
        }
        Ok(())
    }

    fn limit(limit: usize) -> i64 {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }

    pub async fn client_chat_messages<'e, E: PgExecutor<'e>>(
        e: E,
        client_id: UserId,
        from: Option<HistoryPosition>,
        max: usize,
    ) -> StoreResult<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE chat_id = (SELECT id FROM chats WHERE client_id = $1) \
               AND is_visible_for_client \
               AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3::uuid)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&query)
            .bind(client_id.as_uuid())
            .bind(from.map(|p| p.created_at))
            .bind(from.map(|p| *p.id.as_uuid()))
            .bind(limit(max))
            .fetch_all(e)
            .await
            .map_err(|e| map_sqlx_error("client_chat_messages", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn manager_chat_messages<'e, E: PgExecutor<'e>>(
        e: E,
        manager_id: UserId,
        chat_id: ChatId,
        from: Option<HistoryPosition>,
        max: usize,
    ) -> StoreResult<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE chat_id = $1 \
               AND is_visible_for_manager AND NOT is_service AND NOT is_blocked \
               AND problem_id IN ( \
                   SELECT id FROM problems \
                   WHERE chat_id = $1 AND manager_id = $2 AND resolved_at IS NULL) \
               AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4::uuid)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $5"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&query)
            .bind(chat_id.as_uuid())
            .bind(manager_id.as_uuid())
            .bind(from.map(|p| p.created_at))
            .bind(from.map(|p| *p.id.as_uuid()))
            .bind(limit(max))
            .fetch_all(e)
            .await
            .map_err(|e| map_sqlx_error("manager_chat_messages", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn chats_of_manager<'e, E: PgExecutor<'e>>(
        e: E,
        manager_id: UserId,
    ) -> StoreResult<Vec<Chat>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.client_id, c.created_at
            FROM chats c
            WHERE EXISTS (
                SELECT 1 FROM problems p
                WHERE p.chat_id = c.id AND p.manager_id = $1 AND p.resolved_at IS NULL
            )
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(manager_id.as_uuid())
        .fetch_all(e)
        .await
        .map_err(|e| map_sqlx_error("chats_of_manager", e))?;

        rows.iter()
            .map(|row| -> Result<Chat, sqlx::Error> {
                Ok(Chat {
                    id: ChatId::from_uuid(row.try_get("id")?),
                    client_id: UserId::from_uuid(row.try_get("client_id")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("chats_of_manager", e))
    }

    pub async fn create_chat_if_not_exists<'e, E: PgExecutor<'e>>(
        e: E,
        client_id: UserId,
    ) -> StoreResult<ChatId> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO chats (id, client_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (client_id) DO UPDATE SET client_id = EXCLUDED.client_id
            RETURNING id
            "#,
        )
        .bind(ChatId::new().as_uuid())
        .bind(client_id.as_uuid())
        .fetch_one(e)
        .await
        .map_err(|e| map_sqlx_error("create_chat_if_not_exists", e))?;
        Ok(ChatId::from_uuid(id))
    }

    pub async fn get_client_id<'e, E: PgExecutor<'e>>(e: E, chat_id: ChatId) -> StoreResult<UserId> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT client_id FROM chats WHERE id = $1")
            .bind(chat_id.as_uuid())
            .fetch_optional(e)
            .await
            .map_err(|e| map_sqlx_error("get_client_id", e))?;
        id.map(UserId::from_uuid).ok_or(StoreError::ChatNotFound)
    }

    pub async fn create_problem_if_not_exists<'e, E: PgExecutor<'e>>(
        e: E,
        chat_id: ChatId,
    ) -> StoreResult<ProblemId> {
        // Relies on the partial unique index over open problems.
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO problems (id, chat_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (chat_id) WHERE resolved_at IS NULL
            DO UPDATE SET chat_id = EXCLUDED.chat_id
            RETURNING id
            "#,
        )
        .bind(ProblemId::new().as_uuid())
        .bind(chat_id.as_uuid())
        .fetch_one(e)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                StoreError::ChatNotFound
            }
            _ => map_sqlx_error("create_problem_if_not_exists", err),
        })?;
        Ok(ProblemId::from_uuid(id))
    }

    pub async fn manager_open_problems_count<'e, E: PgExecutor<'e>>(
        e: E,
        manager_id: UserId,
    ) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM problems WHERE manager_id = $1 AND resolved_at IS NULL",
        )
        .bind(manager_id.as_uuid())
        .fetch_one(e)
        .await
        .map_err(|e| map_sqlx_error("manager_open_problems_count", e))?;
        Ok(count.max(0) as usize)
    }

    pub async fn problems_without_manager<'e, E: PgExecutor<'e>>(
        e: E,
    ) -> StoreResult<Vec<Problem>> {
        let rows = sqlx::query_as::<_, ProblemRow>(
            r#"
            SELECT p.id, p.chat_id, p.manager_id, p.resolved_at, p.resolve_request_id, p.created_at
            FROM problems p
            WHERE p.manager_id IS NULL
              AND p.resolved_at IS NULL
              AND EXISTS (
                  SELECT 1 FROM messages m
                  WHERE m.problem_id = p.id AND m.is_visible_for_manager
              )
            ORDER BY p.created_at ASC, p.id ASC
            "#,
        )
        .fetch_all(e)
        .await
        .map_err(|e| map_sqlx_error("problems_without_manager", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn assign_manager<'e, E: PgExecutor<'e>>(
        e: E,
        problem_id: ProblemId,
        manager_id: UserId,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE problems SET manager_id = $2 WHERE id = $1")
            .bind(problem_id.as_uuid())
            .bind(manager_id.as_uuid())
            .execute(e)
            .await
            .map_err(|e| map_sqlx_error("assign_manager", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProblemNotFound);
        }
        Ok(())
    }

    pub async fn problem_request_id<'e, E: PgExecutor<'e>>(
        e: E,
        problem_id: ProblemId,
    ) -> StoreResult<RequestId> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT initial_request_id FROM messages
            WHERE problem_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(problem_id.as_uuid())
        .fetch_optional(e)
        .await
        .map_err(|e| map_sqlx_error("problem_request_id", e))?;
        id.map(RequestId::from_uuid).ok_or(StoreError::ProblemNotFound)
    }

    pub async fn active_manager<'e, E: PgExecutor<'e>>(
        e: E,
        chat_id: ChatId,
    ) -> StoreResult<Option<UserId>> {
        let manager: Option<Option<Uuid>> = sqlx::query_scalar(
            "SELECT manager_id FROM problems WHERE chat_id = $1 AND resolved_at IS NULL LIMIT 1",
        )
        .bind(chat_id.as_uuid())
        .fetch_optional(e)
        .await
        .map_err(|e| map_sqlx_error("active_manager", e))?;
        Ok(manager.flatten().map(UserId::from_uuid))
    }

    pub async fn assigned_problem_id<'e, E: PgExecutor<'e>>(
        e: E,
        manager_id: UserId,
        chat_id: ChatId,
    ) -> StoreResult<ProblemId> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM problems
            WHERE chat_id = $1 AND manager_id = $2 AND resolved_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(chat_id.as_uuid())
        .bind(manager_id.as_uuid())
        .fetch_optional(e)
        .await
        .map_err(|e| map_sqlx_error("assigned_problem_id", e))?;
        id.map(ProblemId::from_uuid).ok_or(StoreError::ProblemNotFound)
    }

    pub async fn resolve_problem<'e, E: PgExecutor<'e>>(
        e: E,
        chat_id: ChatId,
        manager_id: UserId,
        request_id: RequestId,
    ) -> StoreResult<ProblemId> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE problems
            SET resolved_at = now(), resolve_request_id = $3
            WHERE chat_id = $1 AND manager_id = $2 AND resolved_at IS NULL
            RETURNING id
            "#,
        )
        .bind(chat_id.as_uuid())
        .bind(manager_id.as_uuid())
        .bind(request_id.as_uuid())
        .fetch_optional(e)
        .await
        .map_err(|e| map_sqlx_error("resolve_problem", e))?;
        id.map(ProblemId::from_uuid).ok_or(StoreError::ProblemNotFound)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository impls
// ─────────────────────────────────────────────────────────────────────────────

// `$conn` yields an executor: the pool for `PgStore`, the locked connection
// for `PgTx`.
macro_rules! impl_pg_repositories {
    ($t:ty, |$this:ident, $guard:ident| $lock:expr, $conn:expr) => {
        #[async_trait]
        impl JobRepository for $t {
            #[instrument(skip(self), err)]
            async fn create_job(
                &self,
                name: &str,
                payload: &str,
                available_at: DateTime<Utc>,
            ) -> StoreResult<JobId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::create_job($conn, name, payload, available_at).await
            }

            #[instrument(skip(self), err)]
            async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> StoreResult<Option<Job>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::find_and_reserve_job($conn, until).await
            }

            #[instrument(skip(self), err)]
            async fn create_failed_job(
                &self,
                name: &str,
                payload: &str,
                reason: FailReason,
            ) -> StoreResult<FailedJobId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::create_failed_job($conn, name, payload, reason).await
            }

            #[instrument(skip(self), fields(job_id = %id), err)]
            async fn delete_job(&self, id: JobId) -> StoreResult<()> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::delete_job($conn, id).await
            }

            async fn list_failed_jobs(&self, limit: usize) -> StoreResult<Vec<FailedJob>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::list_failed_jobs($conn, limit).await
            }
        }

        #[async_trait]
        impl MessageRepository for $t {
            async fn get_message_by_id(&self, id: MessageId) -> StoreResult<Message> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::get_message_by_id($conn, id).await
            }

            async fn get_message_by_request_id(
                &self,
                request_id: RequestId,
            ) -> StoreResult<Message> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::get_message_by_request_id($conn, request_id).await
            }

            #[instrument(skip(self, message), fields(chat_id = %message.chat_id), err)]
            async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::create_message($conn, message).await
            }

            async fn mark_as_visible_for_manager(&self, id: MessageId) -> StoreResult<()> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::set_message_flag($conn, "mark_as_visible_for_manager", "is_visible_for_manager", id)
                    .await
            }

            async fn block_message(&self, id: MessageId) -> StoreResult<()> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::set_message_flag($conn, "block_message", "is_blocked", id).await
            }

            #[instrument(skip(self, from), err)]
            async fn client_chat_messages(
                &self,
                client_id: UserId,
                from: Option<HistoryPosition>,
                limit: usize,
            ) -> StoreResult<Vec<Message>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::client_chat_messages($conn, client_id, from, limit).await
            }

            #[instrument(skip(self, from), err)]
            async fn manager_chat_messages(
                &self,
                manager_id: UserId,
                chat_id: ChatId,
                from: Option<HistoryPosition>,
                limit: usize,
            ) -> StoreResult<Vec<Message>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::manager_chat_messages($conn, manager_id, chat_id, from, limit).await
            }
        }

        #[async_trait]
        impl ChatRepository for $t {
            async fn create_chat_if_not_exists(&self, client_id: UserId) -> StoreResult<ChatId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::create_chat_if_not_exists($conn, client_id).await
            }

            async fn get_client_id(&self, chat_id: ChatId) -> StoreResult<UserId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::get_client_id($conn, chat_id).await
            }

            async fn chats_of_manager(&self, manager_id: UserId) -> StoreResult<Vec<Chat>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::chats_of_manager($conn, manager_id).await
            }
        }

        #[async_trait]
        impl ProblemRepository for $t {
            async fn create_problem_if_not_exists(&self, chat_id: ChatId) -> StoreResult<ProblemId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::create_problem_if_not_exists($conn, chat_id).await
            }

            async fn manager_open_problems_count(&self, manager_id: UserId) -> StoreResult<usize> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::manager_open_problems_count($conn, manager_id).await
            }

            #[instrument(skip(self), err)]
            async fn problems_without_manager(&self) -> StoreResult<Vec<Problem>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::problems_without_manager($conn).await
            }

            #[instrument(skip(self), fields(problem_id = %problem_id, manager_id = %manager_id), err)]
            async fn assign_manager(
                &self,
                problem_id: ProblemId,
                manager_id: UserId,
            ) -> StoreResult<()> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::assign_manager($conn, problem_id, manager_id).await
            }

            async fn problem_request_id(&self, problem_id: ProblemId) -> StoreResult<RequestId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::problem_request_id($conn, problem_id).await
            }

            async fn active_manager(&self, chat_id: ChatId) -> StoreResult<Option<UserId>> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::active_manager($conn, chat_id).await
            }

            async fn assigned_problem_id(
                &self,
                manager_id: UserId,
                chat_id: ChatId,
            ) -> StoreResult<ProblemId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::assigned_problem_id($conn, manager_id, chat_id).await
            }

            #[instrument(skip(self), fields(chat_id = %chat_id, manager_id = %manager_id), err)]
            async fn resolve_problem(
                &self,
                chat_id: ChatId,
                manager_id: UserId,
                request_id: RequestId,
            ) -> StoreResult<ProblemId> {
                let $this = self;
                #[allow(unused_mut)]
                let mut $guard = $lock;
                sql::resolve_problem($conn, chat_id, manager_id, request_id).await
            }
        }
    };
}

impl_pg_repositories!(PgStore, |this, pool| &this.pool, pool);
impl_pg_repositories!(PgTx, |this, guard| this.tx.lock().await, &mut **guard);
