//! Gateway metrics.

use commons::prelude_errors::*;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Finished jobs, by language and outcome.
    pub static ref JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("jobs_total", "Total number of finished jobs"),
        &["language", "outcome"]
    )
    .expect("could not create jobs_total counter");

    /// Sessions refused before launching an executor, by reason.
    pub static ref SESSIONS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "sessions_rejected_total",
            "Total number of sessions refused before execution"
        ),
        &["reason"]
    )
    .expect("could not create sessions_rejected_total counter");

    /// Executions currently holding a worker.
    pub static ref RUNNING_EXECUTIONS: IntGauge = IntGauge::new(
        "running_executions",
        "Number of executions currently in flight"
    )
    .expect("could not create running_executions gauge");

    /// Wall-clock runtime of finished executions.
    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "execution_duration_seconds",
            "Wall-clock runtime of finished executions"
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 7.0, 10.0]),
        &["language"]
    )
    .expect("could not create execution_duration_seconds histogram");
}

/// Register all gateway metrics to a registry.
pub fn register_metrics(registry: &Registry) -> Fallible<()> {
    commons::register_metrics(registry)?;
    registry.register(Box::new(JOBS_TOTAL.clone()))?;
    registry.register(Box::new(SESSIONS_REJECTED_TOTAL.clone()))?;
    registry.register(Box::new(RUNNING_EXECUTIONS.clone()))?;
    registry.register(Box::new(EXECUTION_DURATION_SECONDS.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_metrics_is_complete() -> Fallible<()> {
        let registry = commons::metrics::new_registry(Some("test_execgw".to_string()))?;
        register_metrics(&registry)?;

        JOBS_TOTAL.with_label_values(&["python", "completed"]).inc();
        RUNNING_EXECUTIONS.set(1);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"test_execgw_jobs_total"));
        assert!(names.contains(&"test_execgw_running_executions"));
        Ok(())
    }
}
