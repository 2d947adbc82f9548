//! PostgreSQL implementation of the job store contract
//!
//! Lease acquisition uses `FOR UPDATE SKIP LOCKED` so concurrent workers
//! never block each other; every mutation takes its version token from
//! `job_version_seq` and is guarded by the version the caller observed.
//! All calls run through the resilient execution layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::store::{ConnectionTarget, PgStoreProvider, RetryService, StoreError};
use crate::{Error, Result};

use super::models::{failure_payload, JobInfo, JobStatus, QueueType};
use super::traits::{CompleteOutcome, HeartbeatOutcome, JobQueue, MAX_DEQUEUE_COUNT};

const JOB_COLUMNS: &str = "id, queue_type, status, group_id, definition, result, version, \
                           priority, create_date, start_date, end_date, heartbeat_date, \
                           cancel_requested, dequeue_count, worker_id";

pub struct PostgresJobQueue {
    provider: Arc<PgStoreProvider>,
    retry: Arc<RetryService>,
}

impl PostgresJobQueue {
    pub fn new(provider: Arc<PgStoreProvider>, retry: Arc<RetryService>) -> Self {
        Self { provider, retry }
    }

    /// Apply the embedded schema migrations against the primary.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(self.provider.pool(ConnectionTarget::Primary))
            .await
            .map_err(|e| Error::Store(StoreError::Database(e.into())))?;
        Ok(())
    }

    /// Move terminal jobs whose end date is older than `retention` into the
    /// archived state. Returns the number of jobs archived.
    pub async fn archive_completed(&self, retention: ChronoDuration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let provider = &self.provider;
        let archived = self
            .retry
            .execute(|target| {
                let pool = provider.pool(target).clone();
                async move {
                    sqlx::query(
                        "UPDATE jobs SET status = 5, version = nextval('job_version_seq') \
                         WHERE status IN (2, 3, 4) AND end_date < $1",
                    )
                    .bind(cutoff)
                    .execute(&pool)
                    .await
                    .map_err(StoreError::from)
                }
            })
            .await
            .map_err(Error::Store)?;
        Ok(archived.rows_affected())
    }

    async fn cancel_group_jobs(
        &self,
        queue_type: QueueType,
        group_id: i64,
        exclude: Option<i64>,
    ) -> Result<()> {
        let now = Utc::now();
        let provider = &self.provider;
        self.retry
            .execute(|target| {
                let pool = provider.pool(target).clone();
                async move {
                    // Out-of-band flag: the lease holder learns of it through
                    // its next heartbeat, so the version token stays untouched.
                    sqlx::query(
                        "UPDATE jobs SET cancel_requested = TRUE \
                         WHERE queue_type = $1 AND group_id = $2 AND status = 1 \
                           AND ($3::bigint IS NULL OR id <> $3)",
                    )
                    .bind(queue_type as i16)
                    .bind(group_id)
                    .bind(exclude)
                    .execute(&pool)
                    .await
                    .map_err(StoreError::from)?;
                    sqlx::query(
                        "UPDATE jobs SET status = 4, end_date = $4, \
                                version = nextval('job_version_seq') \
                         WHERE queue_type = $1 AND group_id = $2 AND status = 0 \
                           AND ($3::bigint IS NULL OR id <> $3)",
                    )
                    .bind(queue_type as i16)
                    .bind(group_id)
                    .bind(exclude)
                    .bind(now)
                    .execute(&pool)
                    .await
                    .map_err(StoreError::from)?;
                    Ok(())
                }
            })
            .await
            .map_err(Error::Store)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        queue_type: QueueType,
        definitions: &[String],
        group_id: Option<i64>,
        force_single_active_group: bool,
        already_completed: bool,
    ) -> Result<Vec<JobInfo>> {
        let provider = &self.provider;

        if force_single_active_group {
            let exclude = group_id.unwrap_or(-1);
            let active: Option<i64> = self
                .retry
                .execute(|target| {
                    let pool = provider.pool(target).clone();
                    async move {
                        sqlx::query_scalar(
                            "SELECT id FROM jobs \
                             WHERE queue_type = $1 AND status IN (0, 1) AND group_id <> $2 \
                             LIMIT 1",
                        )
                        .bind(queue_type as i16)
                        .bind(exclude)
                        .fetch_optional(&pool)
                        .await
                        .map_err(StoreError::from)
                    }
                })
                .await
                .map_err(Error::Store)?;
            if active.is_some() {
                return Err(Error::JobConflict(format!(
                    "another active job group exists for queue type {}",
                    queue_type.as_str()
                )));
            }
        }

        let group_id = match group_id {
            Some(group) => group,
            None => self
                .retry
                .execute(|target| {
                    let pool = provider.pool(target).clone();
                    async move {
                        sqlx::query_scalar("SELECT nextval('job_group_id_seq')")
                            .fetch_one(&pool)
                            .await
                            .map_err(StoreError::from)
                    }
                })
                .await
                .map_err(Error::Store)?,
        };

        let status = if already_completed {
            JobStatus::Completed
        } else {
            JobStatus::Created
        };
        let now = Utc::now();
        let end_date = already_completed.then_some(now);
        let insert_sql = format!(
            "INSERT INTO jobs (queue_type, group_id, definition, status, version, create_date, end_date) \
             VALUES ($1, $2, $3, $4, nextval('job_version_seq'), $5, $6) \
             ON CONFLICT (queue_type, group_id, definition_hash) WHERE status <> 5 DO NOTHING \
             RETURNING {JOB_COLUMNS}"
        );
        let select_sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE queue_type = $1 AND group_id = $2 AND definition_hash = md5($3) \
               AND status <> 5"
        );

        let mut enqueued = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let inserted: Option<JobInfo> = self
                .retry
                .execute(|target| {
                    let pool = provider.pool(target).clone();
                    let sql = insert_sql.clone();
                    let definition = definition.clone();
                    async move {
                        sqlx::query_as::<_, JobInfo>(&sql)
                            .bind(queue_type as i16)
                            .bind(group_id)
                            .bind(definition)
                            .bind(status as i16)
                            .bind(now)
                            .bind(end_date)
                            .fetch_optional(&pool)
                            .await
                            .map_err(StoreError::from)
                    }
                })
                .await
                .map_err(Error::Store)?;
            match inserted {
                Some(job) => enqueued.push(job),
                None => {
                    // Definition already present in the group: hand back the
                    // existing job.
                    let existing: Option<JobInfo> = self
                        .retry
                        .execute(|target| {
                            let pool = provider.pool(target).clone();
                            let sql = select_sql.clone();
                            let definition = definition.clone();
                            async move {
                                sqlx::query_as::<_, JobInfo>(&sql)
                                    .bind(queue_type as i16)
                                    .bind(group_id)
                                    .bind(definition)
                                    .fetch_optional(&pool)
                                    .await
                                    .map_err(StoreError::from)
                            }
                        })
                        .await
                        .map_err(Error::Store)?;
                    match existing {
                        Some(job) => enqueued.push(job),
                        None => {
                            return Err(Error::Internal(
                                "enqueued job vanished between insert and read-back".to_string(),
                            ))
                        }
                    }
                }
            }
        }
        Ok(enqueued)
    }

    async fn dequeue(
        &self,
        queue_type: QueueType,
        worker_id: &str,
        heartbeat_timeout_seconds: i64,
        job_id: Option<i64>,
    ) -> Result<Option<JobInfo>> {
        let provider = &self.provider;
        let sql = format!(
            "UPDATE jobs SET status = 1, start_date = COALESCE(start_date, $1), \
                    heartbeat_date = $1, dequeue_count = dequeue_count + 1, \
                    version = nextval('job_version_seq'), worker_id = $2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE queue_type = $3 \
                   AND (status = 0 OR (status = 1 AND \
                        (heartbeat_date IS NULL OR heartbeat_date < $4))) \
                   AND ($5::bigint IS NULL OR id = $5) \
                 ORDER BY priority DESC, create_date ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        loop {
            let now = Utc::now();
            let cutoff = now - ChronoDuration::seconds(heartbeat_timeout_seconds);
            let leased: Option<JobInfo> = self
                .retry
                .execute(|target| {
                    let pool = provider.pool(target).clone();
                    let sql = sql.clone();
                    let worker_id = worker_id.to_string();
                    async move {
                        sqlx::query_as::<_, JobInfo>(&sql)
                            .bind(now)
                            .bind(worker_id)
                            .bind(queue_type as i16)
                            .bind(cutoff)
                            .bind(job_id)
                            .fetch_optional(&pool)
                            .await
                            .map_err(StoreError::from)
                    }
                })
                .await
                .map_err(Error::Store)?;
            match leased {
                Some(mut job) if job.dequeue_count > MAX_DEQUEUE_COUNT => {
                    tracing::warn!(
                        job_id = job.id,
                        dequeue_count = job.dequeue_count,
                        "job exceeded its dequeue budget, failing it"
                    );
                    job.status = JobStatus::Failed;
                    job.result = Some(
                        failure_payload("job exceeded the maximum number of dequeue attempts", "")
                            .to_string(),
                    );
                    self.complete(&job, true).await?;
                    continue;
                }
                other => return Ok(other),
            }
        }
    }

    async fn heartbeat(&self, job: &JobInfo) -> Result<HeartbeatOutcome> {
        let now = Utc::now();
        let provider = &self.provider;
        let renewed: Option<(i64, bool)> = self
            .retry
            .execute(|target| {
                let pool = provider.pool(target).clone();
                let progress = job.result.clone();
                async move {
                    sqlx::query_as::<_, (i64, bool)>(
                        "UPDATE jobs SET heartbeat_date = $1, result = COALESCE($2, result), \
                                version = nextval('job_version_seq') \
                         WHERE id = $3 AND version = $4 \
                         RETURNING version, cancel_requested",
                    )
                    .bind(now)
                    .bind(progress)
                    .bind(job.id)
                    .bind(job.version)
                    .fetch_optional(&pool)
                    .await
                    .map_err(StoreError::from)
                }
            })
            .await
            .map_err(Error::Store)?;
        Ok(match renewed {
            Some((version, cancel_requested)) => HeartbeatOutcome::Renewed {
                version,
                cancel_requested,
            },
            None => HeartbeatOutcome::Lost,
        })
    }

    async fn complete(
        &self,
        job: &JobInfo,
        cascade_cancel_on_failure: bool,
    ) -> Result<CompleteOutcome> {
        let now = Utc::now();
        let provider = &self.provider;
        let updated: Option<i64> = self
            .retry
            .execute(|target| {
                let pool = provider.pool(target).clone();
                let result = job.result.clone();
                async move {
                    sqlx::query_scalar(
                        "UPDATE jobs SET status = $1, result = $2, end_date = $3, \
                                version = nextval('job_version_seq') \
                         WHERE id = $4 AND version = $5 \
                         RETURNING id",
                    )
                    .bind(job.status as i16)
                    .bind(result)
                    .bind(now)
                    .bind(job.id)
                    .bind(job.version)
                    .fetch_optional(&pool)
                    .await
                    .map_err(StoreError::from)
                }
            })
            .await
            .map_err(Error::Store)?;
        if updated.is_none() {
            return Ok(CompleteOutcome::Conflict);
        }
        if cascade_cancel_on_failure && job.status == JobStatus::Failed {
            self.cancel_group_jobs(job.queue_type, job.group_id, Some(job.id))
                .await?;
        }
        Ok(CompleteOutcome::Completed)
    }

    async fn get_by_id(&self, queue_type: QueueType, id: i64) -> Result<Option<JobInfo>> {
        let provider = &self.provider;
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE queue_type = $1 AND id = $2");
        self.retry
            .execute_read(|target| {
                let pool = provider.pool(target).clone();
                let sql = sql.clone();
                async move {
                    sqlx::query_as::<_, JobInfo>(&sql)
                        .bind(queue_type as i16)
                        .bind(id)
                        .fetch_optional(&pool)
                        .await
                        .map_err(StoreError::from)
                }
            })
            .await
            .map_err(Error::Store)
    }

    async fn get_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<Vec<JobInfo>> {
        let provider = &self.provider;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE queue_type = $1 AND group_id = $2 ORDER BY id ASC"
        );
        self.retry
            .execute_read(|target| {
                let pool = provider.pool(target).clone();
                let sql = sql.clone();
                async move {
                    sqlx::query_as::<_, JobInfo>(&sql)
                        .bind(queue_type as i16)
                        .bind(group_id)
                        .fetch_all(&pool)
                        .await
                        .map_err(StoreError::from)
                }
            })
            .await
            .map_err(Error::Store)
    }

    async fn cancel_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<()> {
        self.cancel_group_jobs(queue_type, group_id, None).await
    }

    async fn cancel_by_id(&self, queue_type: QueueType, id: i64) -> Result<()> {
        let now = Utc::now();
        let provider = &self.provider;
        self.retry
            .execute(|target| {
                let pool = provider.pool(target).clone();
                async move {
                    // Out-of-band flag; see cancel_group_jobs.
                    sqlx::query(
                        "UPDATE jobs SET cancel_requested = TRUE \
                         WHERE queue_type = $1 AND id = $2 AND status = 1",
                    )
                    .bind(queue_type as i16)
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map_err(StoreError::from)?;
                    sqlx::query(
                        "UPDATE jobs SET status = 4, end_date = $3, \
                                version = nextval('job_version_seq') \
                         WHERE queue_type = $1 AND id = $2 AND status = 0",
                    )
                    .bind(queue_type as i16)
                    .bind(id)
                    .bind(now)
                    .execute(&pool)
                    .await
                    .map_err(StoreError::from)?;
                    Ok(())
                }
            })
            .await
            .map_err(Error::Store)
    }
}
