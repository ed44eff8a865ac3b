// Stream controller - the only path that mutates the ledger
//
// The controller:
// - Validates parameters locally before any ledger call
// - Allows one outstanding mutation per stream
// - Submits each mutation exactly once (no retries)
// - Invalidates and then refreshes the stream's estimator after success

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{PayrollError, PayrollResult};
use crate::estimator::EstimatorSet;
use crate::ledger::StreamLedger;
use crate::types::{AccountId, ClaimableReading, CreateStream, Receipt, Snapshot, StreamId};

/// Marks a stream as having a mutation in flight until dropped.
struct InFlight<'a> {
    streams: &'a Mutex<HashSet<StreamId>>,
    stream_id: StreamId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.streams.lock().remove(&self.stream_id);
    }
}

pub struct StreamController<L> {
    ledger: Arc<L>,
    estimators: EstimatorSet,
    in_flight: Mutex<HashSet<StreamId>>,
}

impl<L: StreamLedger> StreamController<L> {
    pub fn new(ledger: Arc<L>, estimators: EstimatorSet) -> Self {
        Self {
            ledger,
            estimators,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn estimators(&self) -> &EstimatorSet {
        &self.estimators
    }

    /// Whether a mutation for `stream_id` is still awaiting the ledger.
    pub fn is_busy(&self, stream_id: StreamId) -> bool {
        self.in_flight.lock().contains(&stream_id)
    }

    /// Create a stream and start tracking it.
    pub async fn create(&self, request: CreateStream) -> PayrollResult<StreamId> {
        Self::validate_create(&request)?;

        let stream_id = self.ledger.create_stream(&request).await?;
        info!(
            "Created stream {} from {} to {}",
            stream_id, request.employer, request.employee
        );

        self.sync(stream_id).await;
        Ok(stream_id)
    }

    /// Claim everything vested on `stream_id`.
    ///
    /// Reads the authoritative state first and refuses inactive, paused or
    /// empty streams without submitting anything.
    pub async fn claim(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        let _guard = self.begin(stream_id)?;

        let snapshot = self.read(stream_id).await?;
        if !snapshot.stream.active {
            self.estimators.refresh(snapshot);
            return Err(PayrollError::StreamNotActive(stream_id));
        }
        if snapshot.stream.paused {
            self.estimators.refresh(snapshot);
            return Err(PayrollError::StreamPaused(stream_id));
        }

        let reading = match self.ledger.get_claimable_amount(stream_id).await {
            Ok(reading) => reading,
            Err(e) => {
                self.estimators.mark_stale(stream_id);
                return Err(e);
            }
        };
        if reading.amount <= 0 {
            self.estimators.apply(None, snapshot, Some(reading));
            return Err(PayrollError::NothingToClaim(stream_id));
        }

        let result = self.ledger.claim_salary(stream_id).await;
        self.settle(stream_id, "claim", result).await
    }

    /// Escrow `amount` more into `stream_id`.
    pub async fn deposit(&self, stream_id: StreamId, amount: i128) -> PayrollResult<Receipt> {
        if amount <= 0 {
            return Err(PayrollError::InvalidAmount(amount));
        }
        let _guard = self.begin(stream_id)?;
        self.require_not_terminated(stream_id)?;

        let result = self.ledger.deposit_to_stream(stream_id, amount).await;
        self.settle(stream_id, "deposit", result).await
    }

    /// Freeze accrual. Pausing a paused stream succeeds.
    pub async fn pause(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        let _guard = self.begin(stream_id)?;
        self.require_not_terminated(stream_id)?;

        let result = self.ledger.pause_stream(stream_id).await;
        self.settle(stream_id, "pause", result).await
    }

    /// Restart accrual from the resume instant.
    pub async fn resume(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        let _guard = self.begin(stream_id)?;
        self.require_not_terminated(stream_id)?;

        let result = self.ledger.resume_stream(stream_id).await;
        self.settle(stream_id, "resume", result).await
    }

    /// Terminate the stream; the receipt carries the employer refund.
    pub async fn cancel(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        let _guard = self.begin(stream_id)?;
        self.require_not_terminated(stream_id)?;

        let result = self.ledger.cancel_stream(stream_id).await;
        self.settle(stream_id, "cancel", result).await
    }

    /// Fetch a stream and start (or keep) tracking it.
    pub async fn load(&self, stream_id: StreamId) -> PayrollResult<Snapshot> {
        let snapshot = self.read(stream_id).await?;
        let reading = self.read_claimable(stream_id).await;
        self.estimators.apply(None, snapshot.clone(), reading);
        Ok(snapshot)
    }

    pub async fn employee_streams(&self, employee: &AccountId) -> PayrollResult<Vec<StreamId>> {
        let ids = self.ledger.get_employee_streams(employee).await?;
        debug!("Employee {} has {} streams", employee, ids.len());
        Ok(ids)
    }

    pub async fn employer_streams(&self, employer: &AccountId) -> PayrollResult<Vec<StreamId>> {
        let ids = self.ledger.get_employer_streams(employer).await?;
        debug!("Employer {} has {} streams", employer, ids.len());
        Ok(ids)
    }

    fn validate_create(request: &CreateStream) -> PayrollResult<()> {
        if request.salary <= 0 {
            return Err(PayrollError::InvalidParameters(format!(
                "salary must be positive, got {}",
                request.salary
            )));
        }
        if request.employer == request.employee {
            return Err(PayrollError::InvalidParameters(
                "employer and employee must differ".to_string(),
            ));
        }
        request.end_time()?;
        Ok(())
    }

    fn begin(&self, stream_id: StreamId) -> PayrollResult<InFlight<'_>> {
        let mut streams = self.in_flight.lock();
        if !streams.insert(stream_id) {
            warn!("Rejecting overlapping operation on stream {}", stream_id);
            return Err(PayrollError::OperationInFlight(stream_id));
        }
        Ok(InFlight {
            streams: &self.in_flight,
            stream_id,
        })
    }

    /// Termination is final, so a cached inactive snapshot is authoritative.
    fn require_not_terminated(&self, stream_id: StreamId) -> PayrollResult<()> {
        match self.estimators.snapshot(stream_id) {
            Some(snapshot) if !snapshot.stream.active => {
                Err(PayrollError::StreamNotActive(stream_id))
            }
            _ => Ok(()),
        }
    }

    async fn read(&self, stream_id: StreamId) -> PayrollResult<Snapshot> {
        match self.ledger.get_stream(stream_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.estimators.mark_stale(stream_id);
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        stream_id: StreamId,
        operation: &str,
        result: PayrollResult<Receipt>,
    ) -> PayrollResult<Receipt> {
        match result {
            Ok(receipt) => {
                info!(
                    "{} on stream {} accepted at {} (amount {})",
                    operation, stream_id, receipt.ledger_time, receipt.amount
                );
                self.estimators.invalidate(stream_id);
                self.sync(stream_id).await;
                Ok(receipt)
            }
            Err(e) => {
                warn!("{} on stream {} failed: {}", operation, stream_id, e);
                if e.is_unavailable() {
                    // The ledger may or may not have applied it.
                    self.estimators.invalidate(stream_id);
                    self.estimators.mark_stale(stream_id);
                } else {
                    self.sync(stream_id).await;
                }
                Err(e)
            }
        }
    }

    /// A missing reading only skips reconciliation.
    async fn read_claimable(&self, stream_id: StreamId) -> Option<ClaimableReading> {
        match self.ledger.get_claimable_amount(stream_id).await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Claimable read for stream {} failed: {}", stream_id, e);
                None
            }
        }
    }

    /// Best-effort authoritative refresh; failures leave the estimator stale.
    async fn sync(&self, stream_id: StreamId) {
        match self.ledger.get_stream(stream_id).await {
            Ok(snapshot) => {
                let reading = self.read_claimable(stream_id).await;
                self.estimators.apply(None, snapshot, reading);
            }
            Err(e) => {
                warn!(
                    "Refresh of stream {} failed, keeping stale estimate: {}",
                    stream_id, e
                );
                self.estimators.mark_stale(stream_id);
            }
        }
    }
}
