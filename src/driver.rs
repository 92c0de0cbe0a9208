//! Load driver: fans sessions out to workers and gates the final shutdown.
//!
//! Each worker is a tokio task owning one session, its own connection and
//! its own random source. Worker `i` sends stream ids starting at
//! `i * id_stride`. The SHUTDOWN session only starts once every worker task
//! has finished, whether it succeeded, failed or panicked.

use crate::config::Config;
use crate::session::{
    Endpoint, LgSession, SessionError, SessionOptions, SessionSummary, StreamLimits, StreamPlan,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Driver failures that are not attributable to a single worker.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("shutdown session failed: {0}")]
    Shutdown(SessionError),
}

/// How one worker ended.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker: usize,
    pub id_prefix: u64,
    pub result: Result<SessionSummary, SessionError>,
}

/// Result of a full driver run.
#[derive(Debug, Default)]
pub struct DriverReport {
    /// Outcomes ordered by worker index.
    pub outcomes: Vec<WorkerOutcome>,
    /// Worker tasks that panicked or were cancelled.
    pub aborted: usize,
    pub shutdown_sent: bool,
}

impl DriverReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded() + self.aborted
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn total_streams(&self) -> usize {
        self.summaries().map(|s| s.streams).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.summaries().map(|s| s.bytes).sum()
    }

    fn summaries(&self) -> impl Iterator<Item = &SessionSummary> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

/// Runs the configured number of concurrent sessions, then the terminator.
pub struct LoadDriver {
    config: Config,
}

impl LoadDriver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<DriverReport, DriverError> {
        info!(
            endpoint = %self.config.endpoint,
            workers = self.config.workers,
            seed = ?self.config.seed,
            "Starting load run"
        );

        let mut report = self.run_workers().await;

        if self.config.shutdown {
            self.send_shutdown().await?;
            report.shutdown_sent = true;
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            streams = report.total_streams(),
            bytes = report.total_bytes(),
            shutdown_sent = report.shutdown_sent,
            "Load run finished"
        );
        Ok(report)
    }

    /// Spawn every worker and wait for all of them to finish.
    async fn run_workers(&self) -> DriverReport {
        let mut workers = JoinSet::new();
        let options = self.config.session_options();

        for worker in 0..self.config.workers {
            let id_prefix = self.config.id_prefix(worker);
            let endpoint = self.config.endpoint.clone();
            let limits = self.config.limits;
            let options = options.clone();
            let rng = self.rng_for(worker);

            debug!(worker, id_prefix, "Spawning worker");
            workers.spawn(async move {
                let result = run_worker(&endpoint, id_prefix, &limits, rng, &options).await;
                WorkerOutcome {
                    worker,
                    id_prefix,
                    result,
                }
            });
        }

        let mut report = DriverReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(summary) => info!(
                            worker = outcome.worker,
                            id_prefix = outcome.id_prefix,
                            streams = summary.streams,
                            bytes = summary.bytes,
                            local_addr = ?summary.local_addr,
                            "Worker finished"
                        ),
                        Err(e) => warn!(
                            worker = outcome.worker,
                            id_prefix = outcome.id_prefix,
                            error = %e,
                            "Worker failed"
                        ),
                    }
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Worker task aborted");
                    report.aborted += 1;
                }
            }
        }

        report.outcomes.sort_by_key(|o| o.worker);
        report
    }

    async fn send_shutdown(&self) -> Result<(), DriverError> {
        let rng = self.rng_for(self.config.workers);
        let session = LgSession::connect(
            &self.config.endpoint,
            0,
            StreamPlan::empty(),
            rng,
            &self.config.session_options(),
        )
        .await
        .map_err(DriverError::Shutdown)?;

        session.shutdown().await.map_err(DriverError::Shutdown)?;
        info!(endpoint = %self.config.endpoint, "Sent shutdown");
        Ok(())
    }

    /// Random source for worker `index`: `seed + index` when seeded.
    fn rng_for(&self, index: usize) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }
}

async fn run_worker(
    endpoint: &Endpoint,
    id_prefix: u64,
    limits: &StreamLimits,
    mut rng: StdRng,
    options: &SessionOptions,
) -> Result<SessionSummary, SessionError> {
    let plan = StreamPlan::random(&mut rng, limits);
    info!(
        id_prefix,
        streams = plan.len(),
        bytes = plan.total_bytes(),
        "Running client"
    );

    let session = LgSession::connect(endpoint, id_prefix, plan, rng, options).await?;
    session.run().await
}
