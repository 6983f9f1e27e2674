#[macro_use]
extern crate commons;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate smart_default;

pub mod config;
pub mod jobs;
pub mod metrics;
pub mod sessions;
pub mod status;

use commons::prelude_errors::*;
use runbox::bus::{MemoryBus, MessageBus};
use runbox::exec::{executor_for, Executor};
use runbox::store::{JobStore, MemoryStore};
use runbox::Language;
use std::sync::Arc;

/// Builds the executor for one accepted job.
///
/// Indirection point so tests can drive sessions with scripted executors
/// instead of real subprocesses.
pub type ExecutorFactory = Arc<dyn Fn(Language) -> Box<dyn Executor> + Send + Sync>;

/// Shared application state, one per process.
#[derive(Clone)]
pub struct AppState {
    /// Validated runtime settings.
    pub settings: Arc<config::AppSettings>,
    /// Job store handle.
    pub store: Arc<dyn JobStore>,
    /// Message bus handle.
    pub bus: Arc<dyn MessageBus>,
    /// Executor construction.
    pub executors: ExecutorFactory,
}

impl AppState {
    /// State backed by the in-process store and bus adapters.
    pub fn new(settings: config::AppSettings) -> Fallible<Self> {
        let store = MemoryStore::new(settings.job_ttl, settings.token_ttl)?;
        let policy = settings.exec_policy();
        Ok(Self {
            settings: Arc::new(settings),
            store: Arc::new(store),
            bus: Arc::new(MemoryBus::new()),
            executors: Arc::new(move |language| executor_for(language, policy.clone())),
        })
    }
}
