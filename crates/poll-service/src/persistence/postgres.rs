//! PostgreSQL poll store.
//!
//! All queries use parameterized statements. Poll creation writes the poll
//! row and its options in one transaction.

use super::PersistenceGateway;
use crate::errors::PollError;
use crate::models::{NewPoll, Poll, PollOption};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{Namespace, PollId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// Poll store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and apply pending migrations.
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self, PollError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PollError::Database(format!("migration failed: {e}")))?;

        info!(target: "poll.persistence", "Database migrations applied");
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgPollStore {
    #[instrument(skip_all, name = "poll.repo.create_poll", fields(namespace = %poll.namespace))]
    async fn create_poll(&self, poll: &NewPoll) -> Result<PollId, PollError> {
        let mut tx = self.pool.begin().await?;

        let timer_seconds = i32::try_from(poll.timer_seconds)
            .map_err(|_| PollError::InvalidPollSpec("timer out of range".to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO polls (presenter_username, question_text, timer_seconds, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING poll_id
            "#,
        )
        .bind(poll.namespace.as_str()) // $1
        .bind(&poll.question_text) // $2
        .bind(timer_seconds) // $3
        .bind(poll.created_at) // $4
        .fetch_one(&mut *tx)
        .await?;

        let poll_id: Uuid = row.try_get("poll_id")?;

        for (position, option) in poll.options.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| PollError::InvalidPollSpec("too many options".to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO poll_options (poll_id, position, text, is_correct_answer)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(poll_id)
            .bind(position)
            .bind(&option.text)
            .bind(option.is_correct_answer)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(PollId(poll_id))
    }

    #[instrument(skip_all, name = "poll.repo.increment_vote", fields(poll_id = %poll_id))]
    async fn increment_vote(&self, poll_id: PollId, option_text: &str) -> Result<(), PollError> {
        let result = sqlx::query(
            r#"
            UPDATE poll_options
            SET vote_count = vote_count + 1
            WHERE poll_id = $1 AND text = $2
            "#,
        )
        .bind(poll_id.0)
        .bind(option_text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PollError::NotFound("Poll option".to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "poll.repo.list_polls", fields(namespace = %namespace))]
    async fn list_polls(&self, namespace: &Namespace) -> Result<Vec<Poll>, PollError> {
        let poll_rows = sqlx::query(
            r#"
            SELECT poll_id, question_text, timer_seconds, created_at
            FROM polls
            WHERE presenter_username = $1
            ORDER BY created_at ASC, poll_id ASC
            "#,
        )
        .bind(namespace.as_str())
        .fetch_all(&self.pool)
        .await?;

        if poll_rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = poll_rows
            .iter()
            .map(|row| row.try_get("poll_id"))
            .collect::<Result<_, _>>()?;

        let option_rows = sqlx::query(
            r#"
            SELECT poll_id, text, is_correct_answer, vote_count
            FROM poll_options
            WHERE poll_id = ANY($1)
            ORDER BY poll_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_poll: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
        for row in option_rows {
            let poll_id: Uuid = row.try_get("poll_id")?;
            let vote_count: i64 = row.try_get("vote_count")?;
            options_by_poll.entry(poll_id).or_default().push(PollOption {
                text: row.try_get("text")?,
                is_correct_answer: row.try_get("is_correct_answer")?,
                vote_count: u64::try_from(vote_count).unwrap_or(0),
            });
        }

        poll_rows
            .into_iter()
            .map(|row| {
                let poll_id: Uuid = row.try_get("poll_id")?;
                let timer_seconds: i32 = row.try_get("timer_seconds")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(Poll {
                    id: PollId(poll_id),
                    presenter_namespace: namespace.clone(),
                    question_text: row.try_get("question_text")?,
                    options: options_by_poll.remove(&poll_id).unwrap_or_default(),
                    timer_seconds: u32::try_from(timer_seconds).unwrap_or_default(),
                    created_at,
                })
            })
            .collect()
    }

    #[instrument(skip_all, name = "poll.repo.register_presenter")]
    async fn register_presenter(&self, username: &str) -> Result<(), PollError> {
        let result = sqlx::query("INSERT INTO presenters (username) VALUES ($1)")
            .bind(username)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(PollError::Conflict("Presenter username taken".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> Result<(), PollError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
