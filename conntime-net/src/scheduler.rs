use crate::plan::BurstPlan;
use crate::worker::ConnectionWorker;
use slog::{debug, info, o, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstSchedule {
    pub floor_threads: u64,
    pub ceiling_threads: u64,
    /// Time between two launches of the same term.
    pub period: Duration,
    /// How long each term keeps launching.
    pub budget: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSummary {
    pub threads: u64,
    pub launches: u64,
}

impl TermSummary {
    pub fn connections(&self) -> u64 {
        self.threads * self.launches
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub terms: Vec<TermSummary>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn launches(&self) -> u64 {
        self.terms.iter().map(|t| t.launches).sum()
    }

    pub fn connections(&self) -> u64 {
        self.terms.iter().map(TermSummary::connections).sum()
    }
}

/// Walks the burst plan, launching bursts of connection workers at a fixed
/// period for the duration budget of each term.
///
/// Stopping is cooperative: cancellation and budget expiry only prevent
/// further launches, workers already running are left to finish.
pub struct BurstScheduler {
    schedule: BurstSchedule,
    worker: Arc<ConnectionWorker>,
    tracker: TaskTracker,
    logger: slog::Logger,
}

/// Shortest launch period; a zero period is raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl BurstScheduler {
    pub fn new(mut schedule: BurstSchedule, worker: ConnectionWorker, logger: slog::Logger) -> BurstScheduler {
        if schedule.period < MIN_PERIOD {
            warn!(logger, "burst period too short, raising it"; "period" => ?schedule.period);
            schedule.period = MIN_PERIOD;
        }
        BurstScheduler {
            schedule,
            worker: Arc::new(worker),
            tracker: TaskTracker::new(),
            logger,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let plan = BurstPlan::new(self.schedule.floor_threads, self.schedule.ceiling_threads);
        for threads in plan {
            if cancel.is_cancelled() {
                break;
            }
            let term = self.run_term(threads, cancel).await;
            info!(self.logger, "burst term finished";
                "threads" => term.threads,
                "launches" => term.launches,
                "connections" => term.connections());
            summary.terms.push(term);
        }
        summary.cancelled = cancel.is_cancelled();
        summary
    }

    async fn run_term(&self, threads: u64, cancel: &CancellationToken) -> TermSummary {
        let logger = self.logger.new(o!("threads" => threads));
        let deadline = Instant::now() + self.schedule.budget;
        let mut ticker = time::interval(self.schedule.period);
        let mut launches = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(logger, "term cancelled");
                    break;
                }
                _ = time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    self.launch(threads);
                    launches += 1;
                    debug!(logger, "burst launched"; "launch" => launches);
                }
            }
        }
        TermSummary { threads, launches }
    }

    fn launch(&self, threads: u64) {
        for _ in 0..threads {
            let worker = self.worker.clone();
            self.tracker.spawn(async move { worker.run().await });
        }
    }

    /// Workers launched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for launched workers to finish, at most `timeout`. Returns whether
    /// all of them did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        match time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(self.logger, "workers still running after drain timeout";
                    "in_flight" => self.tracker.len());
                false
            }
        }
    }
}
