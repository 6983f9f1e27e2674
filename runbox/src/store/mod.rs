//! Job store: short-TTL records of job metadata, status, and result, plus
//! the one-time access tokens that gate socket attachment.
//!
//! The store is an adapter. The in-process [`MemoryStore`] backs tests and
//! single-node deployments; production deployments substitute an external
//! short-TTL key-value service behind the same trait. Implementations must
//! preserve the monotone status transitions and the single-shot token
//! semantics.

mod memory;

pub use self::memory::MemoryStore;

use crate::{ExecutionReport, Job, JobStatus, Language};
use commons::prelude_errors::*;

/// Handle returned by job creation: the identifier plus the single-use
/// credential a client needs to attach a socket.
#[derive(Clone, Debug, PartialEq)]
pub struct JobTicket {
    /// Identifier of the created job.
    pub job_id: String,
    /// Single-use access token bound to the job.
    pub token: String,
    /// Expiry of the token, strictly sooner than the job record itself.
    pub token_expires_at: chrono::DateTime<chrono::Utc>,
}

/// Typed failures of store operations.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    /// No live record under the given identifier.
    #[error("job not found")]
    NotFound,
    /// A status update that would move backwards or out of a terminal
    /// state. Carries the status the record is actually in.
    #[error("illegal status transition from '{0}'")]
    IllegalTransition(JobStatus),
    /// Unknown, expired, or already-consumed token.
    #[error("invalid token")]
    InvalidToken,
}

/// Short-TTL job store with token issuance.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `Queued` job from validated fields and issue its
    /// access token. The token lifetime never exceeds the job TTL.
    async fn create(
        &self,
        source: String,
        language: Language,
        filename: String,
    ) -> Fallible<JobTicket>;

    /// Fetch the latest state of a job.
    async fn get(&self, job_id: &str) -> Result<Job, StoreError>;

    /// `Queued` → `Processing`.
    async fn mark_processing(&self, job_id: &str) -> Result<(), StoreError>;

    /// `Processing` → `Completed`, storing the report.
    async fn mark_completed(
        &self,
        job_id: &str,
        report: ExecutionReport,
    ) -> Result<(), StoreError>;

    /// `Queued | Processing` → `Failed`, storing the error and any partial
    /// report gathered before the failure.
    async fn mark_failed(
        &self,
        job_id: &str,
        error: String,
        partial: Option<ExecutionReport>,
    ) -> Result<(), StoreError>;

    /// Redeem a token for its job identifier. Single-shot: a second call
    /// with the same token fails with [`StoreError::InvalidToken`].
    async fn consume_token(&self, token: &str) -> Result<String, StoreError>;
}
