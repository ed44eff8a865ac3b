// Periodic authoritative reads and display ticks
//
// Features:
// - Polls every watched stream on a fixed interval
// - Drops reads that raced a mutation (generation tickets)
// - Marks estimators stale on read failure, never retries early
// - Cancellation via CancellationToken, abandoning an in-progress poll

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::estimator::{Estimate, EstimatorSet};
use crate::ledger::StreamLedger;
use crate::types::StreamId;

/// Outcome of one pass over the watched streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub refreshed: usize,
    /// Reads discarded because a mutation landed while they were in flight.
    pub discarded: usize,
    pub failed: usize,
}

enum PollOutcome {
    Refreshed,
    Discarded,
    Failed,
}

pub struct Poller<L> {
    ledger: Arc<L>,
    estimators: EstimatorSet,
    interval: Duration,
}

impl<L: StreamLedger> Poller<L> {
    pub fn new(ledger: Arc<L>, estimators: EstimatorSet, interval: Duration) -> Self {
        Self {
            ledger,
            estimators,
            interval,
        }
    }

    pub fn from_config(ledger: Arc<L>, estimators: EstimatorSet, config: &ClientConfig) -> Self {
        Self::new(ledger, estimators, config.poll_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Read every watched stream once.
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();
        for stream_id in self.estimators.watched() {
            match self.poll_stream(stream_id).await {
                PollOutcome::Refreshed => report.refreshed += 1,
                PollOutcome::Discarded => report.discarded += 1,
                PollOutcome::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn poll_stream(&self, stream_id: StreamId) -> PollOutcome {
        let ticket = self.estimators.ticket(stream_id);

        let snapshot = match self.ledger.get_stream(stream_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Poll of stream {} failed: {}", stream_id, e);
                self.estimators.mark_stale(stream_id);
                return PollOutcome::Failed;
            }
        };

        let reading = match self.ledger.get_claimable_amount(stream_id).await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Claimable read for stream {} failed: {}", stream_id, e);
                None
            }
        };

        if self.estimators.apply(Some(ticket), snapshot, reading) {
            PollOutcome::Refreshed
        } else {
            PollOutcome::Discarded
        }
    }

    /// Poll until `cancel` fires. The first pass runs immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting poller every {:?}", self.interval);
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Abandoning in-progress poll");
                    break;
                }
                report = self.poll_once() => {
                    if report.failed > 0 {
                        warn!(
                            "Poll finished with {} failed reads ({} refreshed)",
                            report.failed, report.refreshed
                        );
                    } else {
                        debug!("Poll finished: {:?}", report);
                    }
                }
            }
        }
        info!("Poller stopped");
    }
}

/// Emit estimates for every watched stream on each display tick until `cancel` fires.
///
/// `clock` supplies Unix seconds; pass [`crate::unix_now`] outside tests.
pub async fn run_display(
    estimators: EstimatorSet,
    every: Duration,
    clock: impl Fn() -> u64,
    mut on_tick: impl FnMut(Vec<Estimate>),
    cancel: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = tick.tick() => on_tick(estimators.tick_all(clock())),
        }
    }
}
