//! In-process job store.

use super::{JobStore, JobTicket, StoreError};
use crate::{new_job_id, ExecutionReport, Job, JobStatus, Language};
use chrono::{DateTime, Duration, Utc};
use commons::prelude_errors::*;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Entropy of an access token, before hex encoding.
const TOKEN_BYTES: usize = 32;

struct StoredJob {
    job: Job,
    expires_at: DateTime<Utc>,
}

struct TokenEntry {
    job_id: String,
    expires_at: DateTime<Utc>,
}

struct Inner {
    jobs: HashMap<String, StoredJob>,
    tokens: HashMap<String, TokenEntry>,
}

/// In-process store with lazy TTL expiry.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    job_ttl: Duration,
    token_ttl: Duration,
}

impl MemoryStore {
    /// Store with the given record and token lifetimes. The token lifetime
    /// is clamped to the job lifetime.
    pub fn new(job_ttl: std::time::Duration, token_ttl: std::time::Duration) -> Fallible<Self> {
        let job_ttl = Duration::from_std(job_ttl).context("job TTL out of range")?;
        let token_ttl = Duration::from_std(token_ttl).context("token TTL out of range")?;
        Ok(Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                tokens: HashMap::new(),
            }),
            job_ttl,
            token_ttl: token_ttl.min(job_ttl),
        })
    }

    /// Number of live (unexpired) job records.
    pub fn live_jobs(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, Utc::now());
        inner.jobs.len()
    }

    fn purge_expired(inner: &mut Inner, now: DateTime<Utc>) {
        inner.jobs.retain(|_, stored| stored.expires_at > now);
        let jobs = &inner.jobs;
        inner
            .tokens
            .retain(|_, entry| entry.expires_at > now && jobs.contains_key(&entry.job_id));
    }

    fn new_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn update_status<F>(&self, job_id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, Utc::now());
        let stored = inner.jobs.get_mut(job_id).ok_or(StoreError::NotFound)?;
        apply(&mut stored.job)
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn create(
        &self,
        source: String,
        language: Language,
        filename: String,
    ) -> Fallible<JobTicket> {
        let now = Utc::now();
        let job = Job {
            id: new_job_id(),
            source,
            language,
            filename,
            status: JobStatus::Queued,
            created_at: now,
            completed_at: None,
            report: None,
            error: None,
        };
        let token = Self::new_token();
        let token_expires_at = now + self.token_ttl;

        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, now);
        inner.tokens.insert(
            token.clone(),
            TokenEntry {
                job_id: job.id.clone(),
                expires_at: token_expires_at,
            },
        );
        let job_id = job.id.clone();
        inner.jobs.insert(
            job_id.clone(),
            StoredJob {
                job,
                expires_at: now + self.job_ttl,
            },
        );

        Ok(JobTicket {
            job_id,
            token,
            token_expires_at,
        })
    }

    async fn get(&self, job_id: &str) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, Utc::now());
        inner
            .jobs
            .get(job_id)
            .map(|stored| stored.job.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), StoreError> {
        self.update_status(job_id, |job| match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Processing;
                Ok(())
            }
            other => Err(StoreError::IllegalTransition(other)),
        })
    }

    async fn mark_completed(
        &self,
        job_id: &str,
        report: ExecutionReport,
    ) -> Result<(), StoreError> {
        self.update_status(job_id, |job| match job.status {
            JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.report = Some(report);
                Ok(())
            }
            other => Err(StoreError::IllegalTransition(other)),
        })
    }

    async fn mark_failed(
        &self,
        job_id: &str,
        error: String,
        partial: Option<ExecutionReport>,
    ) -> Result<(), StoreError> {
        self.update_status(job_id, |job| match job.status {
            JobStatus::Queued | JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error = Some(error);
                job.report = partial;
                Ok(())
            }
            other => Err(StoreError::IllegalTransition(other)),
        })
    }

    async fn consume_token(&self, token: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, Utc::now());

        // Constant-time scan over the stored keys; the secret never takes a
        // data-dependent early exit.
        let mut matched: Option<String> = None;
        for stored in inner.tokens.keys() {
            if stored.as_bytes().ct_eq(token.as_bytes()).into() {
                matched = Some(stored.clone());
            }
        }

        let key = matched.ok_or(StoreError::InvalidToken)?;
        let entry = inner.tokens.remove(&key).ok_or(StoreError::InvalidToken)?;
        Ok(entry.job_id)
    }
}
