//! Local claimable estimates between authoritative ledger reads.
//!
//! An estimator holds the last snapshot of one stream and replays the accrual
//! formula on every tick. It never invents state: pause, resume and
//! termination only show up after a refresh carries them in.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use payroll_stream::accrual::Schedule;
use serde::Serialize;

use crate::types::{ClaimableReading, Snapshot, StreamId};

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// What the presentation layer shows for one stream at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub stream_id: StreamId,
    pub claimable: i128,
    /// The last read failed, or a mutation landed and no fresh read arrived yet.
    pub stale: bool,
    pub observed_at: u64,
    pub active: bool,
    pub paused: bool,
}

/// Estimate state for a single stream.
#[derive(Debug, Clone)]
pub struct StreamEstimator {
    schedule: Schedule,
    snapshot: Snapshot,
    /// How far the local formula ran ahead of the ledger at the last reconciliation.
    overstatement: i128,
    stale: bool,
    invalidated: bool,
    generation: u64,
}

impl StreamEstimator {
    pub fn new(schedule: Schedule, snapshot: Snapshot) -> Self {
        Self {
            schedule,
            snapshot,
            overstatement: 0,
            stale: false,
            invalidated: false,
            generation: 0,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.snapshot.stream.id
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.stale || self.invalidated
    }

    /// Claimable estimate at `now` (Unix seconds).
    ///
    /// Evaluated at `max(now, observed_at)` so a local clock behind the ledger
    /// never drags the figure below the last authoritative read. Non-decreasing
    /// in `now` until the next refresh.
    pub fn tick(&self, now: u64) -> Estimate {
        let stream = &self.snapshot.stream;
        let claimable = if self.invalidated {
            0
        } else {
            let as_of = now.max(self.snapshot.observed_at);
            let raw = self.schedule.claimable(&stream.accrual_state(), as_of);
            (raw - self.overstatement).max(0)
        };

        Estimate {
            stream_id: stream.id,
            claimable,
            stale: self.is_stale(),
            observed_at: self.snapshot.observed_at,
            active: stream.active,
            paused: stream.paused,
        }
    }

    /// Replace the snapshot unless `snapshot` is older than the current one.
    ///
    /// Equal observation times are accepted: a read taken right after a
    /// mutation in the same ledger second must win over the read before it.
    pub fn refresh(&mut self, snapshot: Snapshot) -> bool {
        if snapshot.stream.id != self.stream_id() {
            warn!(
                "Refusing snapshot of stream {} for estimator of stream {}",
                snapshot.stream.id,
                self.stream_id()
            );
            return false;
        }
        if snapshot.observed_at < self.snapshot.observed_at {
            debug!(
                "Discarding snapshot of stream {} observed at {} (have {})",
                snapshot.stream.id, snapshot.observed_at, self.snapshot.observed_at
            );
            return false;
        }

        self.snapshot = snapshot;
        self.overstatement = 0;
        self.stale = false;
        self.invalidated = false;
        true
    }

    /// Compare the local formula against the ledger's own claimable figure.
    ///
    /// Any amount the formula overstates is subtracted from later ticks; an
    /// understatement is left alone. Readings older than the snapshot are ignored.
    pub fn reconcile(&mut self, reading: ClaimableReading) -> i128 {
        if reading.stream_id != self.stream_id() || reading.as_of < self.snapshot.observed_at {
            return self.overstatement;
        }

        let local = self
            .schedule
            .claimable(&self.snapshot.stream.accrual_state(), reading.as_of);
        let drift = local - reading.amount;
        if drift != 0 {
            warn!(
                "Stream {} estimate drifted from ledger by {} units at {}",
                reading.stream_id, drift, reading.as_of
            );
        }
        self.overstatement = drift.max(0);
        self.overstatement
    }

    /// Keep serving the current snapshot, flagged as stale.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// A mutation landed: report zero until a post-mutation snapshot arrives.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }
}

/// Proof of which estimator generation a read was started against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket {
    pub stream_id: StreamId,
    generation: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    estimators: HashMap<StreamId, StreamEstimator>,
    next_generation: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Estimators keyed by stream id, shared by the display loop, the poller
/// and the controller. Snapshot replacement is an atomic swap per stream.
#[derive(Debug, Clone)]
pub struct EstimatorSet {
    schedule: Schedule,
    inner: Arc<RwLock<Inner>>,
}

impl Default for EstimatorSet {
    fn default() -> Self {
        Self::new(Schedule::ANNUAL)
    }
}

impl EstimatorSet {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Capture the current generation before issuing a read.
    pub fn ticket(&self, stream_id: StreamId) -> ReadTicket {
        let inner = self.inner.read();
        ReadTicket {
            stream_id,
            generation: inner.estimators.get(&stream_id).map(|e| e.generation),
        }
    }

    /// Apply a read: refresh, then reconcile, under one write lock.
    ///
    /// With a ticket, the read is dropped if the stream was invalidated,
    /// forgotten or replaced since the ticket was taken. Without one, an
    /// untracked stream starts being tracked.
    pub fn apply(
        &self,
        ticket: Option<ReadTicket>,
        snapshot: Snapshot,
        reading: Option<ClaimableReading>,
    ) -> bool {
        let stream_id = snapshot.stream.id;
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let current = inner.estimators.get(&stream_id).map(|e| e.generation);
        if let Some(ticket) = ticket {
            if ticket.stream_id != stream_id || ticket.generation != current {
                debug!(
                    "Dropping read of stream {}: estimator changed while it was in flight",
                    stream_id
                );
                return false;
            }
        }

        let applied = match inner.estimators.get_mut(&stream_id) {
            Some(estimator) => estimator.refresh(snapshot),
            None => {
                let generation = inner.bump();
                let mut estimator = StreamEstimator::new(self.schedule, snapshot);
                estimator.generation = generation;
                inner.estimators.insert(stream_id, estimator);
                true
            }
        };

        if applied {
            if let (Some(reading), Some(estimator)) =
                (reading, inner.estimators.get_mut(&stream_id))
            {
                estimator.reconcile(reading);
            }
        }
        applied
    }

    /// Unconditional refresh, used right after a successful mutation.
    pub fn refresh(&self, snapshot: Snapshot) -> bool {
        self.apply(None, snapshot, None)
    }

    pub fn tick(&self, stream_id: StreamId, now: u64) -> Option<Estimate> {
        self.inner
            .read()
            .estimators
            .get(&stream_id)
            .map(|e| e.tick(now))
    }

    /// Estimates for every tracked stream, ordered by id.
    pub fn tick_all(&self, now: u64) -> Vec<Estimate> {
        let inner = self.inner.read();
        let mut estimates: Vec<Estimate> = inner.estimators.values().map(|e| e.tick(now)).collect();
        estimates.sort_by_key(|e| e.stream_id);
        estimates
    }

    pub fn snapshot(&self, stream_id: StreamId) -> Option<Snapshot> {
        self.inner
            .read()
            .estimators
            .get(&stream_id)
            .map(|e| e.snapshot.clone())
    }

    pub fn mark_stale(&self, stream_id: StreamId) {
        if let Some(estimator) = self.inner.write().estimators.get_mut(&stream_id) {
            estimator.mark_stale();
        }
    }

    /// Zero the estimate and void in-flight reads for `stream_id`.
    pub fn invalidate(&self, stream_id: StreamId) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let generation = inner.bump();
        if let Some(estimator) = inner.estimators.get_mut(&stream_id) {
            estimator.invalidate();
            estimator.generation = generation;
        }
    }

    /// Stop tracking a stream; reads still in flight for it are discarded.
    pub fn forget(&self, stream_id: StreamId) -> bool {
        self.inner.write().estimators.remove(&stream_id).is_some()
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.inner.read().estimators.contains_key(&stream_id)
    }

    /// Tracked stream ids, ordered.
    pub fn watched(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.inner.read().estimators.keys().copied().collect();
        ids.sort();
        ids
    }
}
