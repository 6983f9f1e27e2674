//! Message bus: the publish/subscribe fabric that decouples the pty worker
//! from the socket-facing session driver.
//!
//! Every job owns two topics, one for output chunks and one for the
//! terminal event. A subscriber joins both before the executor starts and
//! sees messages in publish order per publisher. Delivery is best-effort
//! at-most-once; a dropped subscription simply ends the stream.

mod memory;

pub use self::memory::MemoryBus;

use commons::prelude_errors::*;
use tokio::sync::broadcast;

/// Stream label attached to output chunks.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    /// Merged terminal output of the running program.
    Stdout,
    /// Out-of-band diagnostics, e.g. sanitized build logs.
    Stderr,
}

/// A single bus message.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// One chunk of terminal output, byte boundaries preserved as read.
    Output {
        /// Owning job.
        job_id: String,
        /// Which logical stream the bytes belong to.
        stream: StreamKind,
        /// Raw bytes as they arrived from the pty master.
        data: Vec<u8>,
    },
    /// Terminal event on the success path; exactly one per job.
    Complete {
        /// Owning job.
        job_id: String,
        /// Final exit status.
        exit_code: i32,
        /// Wall-clock runtime in seconds.
        elapsed_secs: f64,
    },
    /// Terminal event for abnormal termination.
    Error {
        /// Owning job.
        job_id: String,
        /// Human-readable failure description.
        message: String,
    },
}

impl Event {
    /// Whether this event closes the job's topics.
    pub fn is_terminal(&self) -> bool {
        match self {
            Event::Output { .. } => false,
            Event::Complete { .. } | Event::Error { .. } => true,
        }
    }

    /// The job this event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            Event::Output { job_id, .. }
            | Event::Complete { job_id, .. }
            | Event::Error { job_id, .. } => job_id,
        }
    }
}

/// Name of the output topic for a job.
pub fn output_topic(job_id: &str) -> String {
    format!("job:{}:output", job_id)
}

/// Name of the terminal-event topic for a job.
pub fn complete_topic(job_id: &str) -> String {
    format!("job:{}:complete", job_id)
}

/// Receiving end of one topic subscription.
///
/// Backends feed their messages through a broadcast channel, which gives
/// subscribers the per-publisher FIFO ordering the bus guarantees.
pub struct Subscription {
    inner: broadcast::Receiver<Event>,
}

impl Subscription {
    pub(crate) fn new(inner: broadcast::Receiver<Event>) -> Self {
        Self { inner }
    }

    /// Wait for the next message; `None` once the topic is closed.
    ///
    /// A slow subscriber that overruns the channel capacity loses the
    /// overwritten messages (at-most-once delivery) and keeps reading from
    /// the oldest retained one.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("bus subscriber lagged, {} messages dropped", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain the next already-buffered message without waiting; `None`
    /// when the buffer is empty or the topic is closed.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("bus subscriber lagged, {} messages dropped", missed);
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Topic-based publish/subscribe fabric.
///
/// The bus is an adapter: the in-process [`MemoryBus`] backs tests and
/// single-node deployments, while multi-node deployments put a broker
/// behind the same interface. Implementations must not reorder messages
/// from the same publisher.
pub trait MessageBus: Send + Sync {
    /// Publish an event on a topic. Publishing to a topic nobody has
    /// joined is not an error; the message is dropped.
    fn publish(&self, topic: &str, event: Event) -> Fallible<()>;

    /// Join a topic, observing every message published after the join.
    fn subscribe(&self, topic: &str) -> Subscription;
}
