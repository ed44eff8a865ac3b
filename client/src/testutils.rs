//! In-memory [`StreamLedger`] with a manual clock, for tests and local demos.
//!
//! Accrual, pause, resume and cancel follow the same rules as the on-chain
//! contract, evaluated with the shared [`Schedule`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use payroll_stream::accrual::{effective_end, remaining, Schedule};
use tokio::sync::Notify;

use crate::error::{PayrollError, PayrollResult};
use crate::ledger::StreamLedger;
use crate::types::{
    AccountId, ClaimableReading, CreateStream, Receipt, Snapshot, Stream, StreamId,
};

#[derive(Default)]
struct State {
    now: u64,
    streams: Vec<Stream>,
    employee_index: HashMap<AccountId, Vec<StreamId>>,
    employer_index: HashMap<AccountId, Vec<StreamId>>,
    reads_fail: bool,
    writes_fail: bool,
    write_gate: Option<Arc<Notify>>,
    calls: Vec<&'static str>,
}

pub struct MemoryLedger {
    schedule: Schedule,
    state: Mutex<State>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Schedule::ANNUAL)
    }
}

impl MemoryLedger {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            state: Mutex::new(State::default()),
        }
    }

    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    pub fn set_time(&self, now: u64) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, seconds: u64) {
        self.state.lock().now += seconds;
    }

    /// Make reads (or writes) fail with `LedgerUnavailable` until reset.
    pub fn set_unavailable(&self, reads: bool, writes: bool) {
        let mut state = self.state.lock();
        state.reads_fail = reads;
        state.writes_fail = writes;
    }

    /// Hold the next mutation until the returned handle is notified.
    pub fn hold_next_write(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().write_gate = Some(gate.clone());
        gate
    }

    /// Names of every ledger call received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    /// Peek at a stream without recording a call.
    pub fn stream(&self, stream_id: StreamId) -> Option<Stream> {
        self.state.lock().streams.get(stream_id.0 as usize).cloned()
    }

    fn read<T>(
        &self,
        call: &'static str,
        f: impl FnOnce(&State) -> PayrollResult<T>,
    ) -> PayrollResult<T> {
        let state = {
            let mut state = self.state.lock();
            state.calls.push(call);
            if state.reads_fail {
                return Err(PayrollError::LedgerUnavailable(format!("{call}: read refused")));
            }
            state
        };
        f(&*state)
    }

    async fn write<T>(
        &self,
        call: &'static str,
        f: impl FnOnce(&mut State, &Schedule) -> PayrollResult<T>,
    ) -> PayrollResult<T> {
        let gate = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.write_gate.take()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if state.writes_fail {
            return Err(PayrollError::LedgerUnavailable(format!("{call}: write refused")));
        }
        f(&mut *state, &self.schedule)
    }
}

impl State {
    fn stream(&self, stream_id: StreamId) -> PayrollResult<&Stream> {
        self.streams
            .get(stream_id.0 as usize)
            .ok_or(PayrollError::StreamNotFound(stream_id))
    }

    fn active_stream(&mut self, stream_id: StreamId) -> PayrollResult<&mut Stream> {
        let stream = self
            .streams
            .get_mut(stream_id.0 as usize)
            .ok_or(PayrollError::StreamNotFound(stream_id))?;
        if !stream.active {
            return Err(PayrollError::StreamNotActive(stream_id));
        }
        Ok(stream)
    }

    fn receipt(&self, stream_id: StreamId, amount: i128) -> Receipt {
        Receipt {
            stream_id,
            amount,
            ledger_time: self.now,
        }
    }
}

fn settle(schedule: &Schedule, stream: &mut Stream, now: u64) -> i128 {
    let amount = schedule.claimable(&stream.accrual_state(), now);
    if amount == 0 {
        return 0;
    }
    stream.total_claimed += amount;
    stream.last_claim_time = stream.last_claim_time.max(effective_end(stream.end_time, now));
    if stream.end_time > 0 && stream.last_claim_time >= stream.end_time {
        stream.active = false;
    }
    amount
}

impl StreamLedger for MemoryLedger {
    async fn create_stream(&self, request: &CreateStream) -> PayrollResult<StreamId> {
        let request = request.clone();
        self.write("create_stream", move |state, _| {
            if request.salary <= 0 || request.employer == request.employee {
                return Err(PayrollError::InvalidParameters("rejected by ledger".to_string()));
            }
            let end_time = request.end_time()?;
            let id = StreamId(state.streams.len() as u64);
            state
                .employee_index
                .entry(request.employee.clone())
                .or_default()
                .push(id);
            state
                .employer_index
                .entry(request.employer.clone())
                .or_default()
                .push(id);
            state.streams.push(Stream {
                id,
                employer: request.employer,
                employee: request.employee,
                deposit_token: request.deposit_token,
                payment_token: request.payment_token,
                salary: request.salary,
                start_time: request.start_time,
                end_time,
                last_claim_time: request.start_time,
                deposited_amount: 0,
                total_claimed: 0,
                active: true,
                paused: false,
            });
            Ok(id)
        })
        .await
    }

    async fn get_stream(&self, stream_id: StreamId) -> PayrollResult<Snapshot> {
        self.read("get_stream", |state| {
            Ok(Snapshot {
                stream: state.stream(stream_id)?.clone(),
                observed_at: state.now,
            })
        })
    }

    async fn get_claimable_amount(&self, stream_id: StreamId) -> PayrollResult<ClaimableReading> {
        self.read("get_claimable_amount", |state| {
            let stream = state.stream(stream_id)?;
            Ok(ClaimableReading {
                stream_id,
                amount: self.schedule.claimable(&stream.accrual_state(), state.now),
                as_of: state.now,
            })
        })
    }

    async fn get_employee_streams(&self, employee: &AccountId) -> PayrollResult<Vec<StreamId>> {
        self.read("get_employee_streams", |state| {
            Ok(state.employee_index.get(employee).cloned().unwrap_or_default())
        })
    }

    async fn get_employer_streams(&self, employer: &AccountId) -> PayrollResult<Vec<StreamId>> {
        self.read("get_employer_streams", |state| {
            Ok(state.employer_index.get(employer).cloned().unwrap_or_default())
        })
    }

    async fn claim_salary(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        self.write("claim_salary", |state, schedule| {
            let now = state.now;
            let stream = state.active_stream(stream_id)?;
            if stream.paused {
                return Err(PayrollError::StreamPaused(stream_id));
            }
            let amount = settle(schedule, stream, now);
            if amount == 0 {
                return Err(PayrollError::NothingToClaim(stream_id));
            }
            Ok(state.receipt(stream_id, amount))
        })
        .await
    }

    async fn deposit_to_stream(&self, stream_id: StreamId, amount: i128) -> PayrollResult<Receipt> {
        self.write("deposit_to_stream", |state, _| {
            if amount <= 0 {
                return Err(PayrollError::InvalidAmount(amount));
            }
            let stream = state.active_stream(stream_id)?;
            stream.deposited_amount = stream
                .deposited_amount
                .checked_add(amount)
                .ok_or(PayrollError::InvalidAmount(amount))?;
            Ok(state.receipt(stream_id, amount))
        })
        .await
    }

    async fn pause_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        self.write("pause_stream", |state, _| {
            state.active_stream(stream_id)?.paused = true;
            Ok(state.receipt(stream_id, 0))
        })
        .await
    }

    async fn resume_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        self.write("resume_stream", |state, _| {
            let now = state.now;
            let stream = state.active_stream(stream_id)?;
            if stream.paused {
                stream.paused = false;
                stream.last_claim_time = stream
                    .last_claim_time
                    .max(effective_end(stream.end_time, now));
                if stream.end_time > 0 && stream.last_claim_time >= stream.end_time {
                    stream.active = false;
                }
            }
            Ok(state.receipt(stream_id, 0))
        })
        .await
    }

    async fn cancel_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt> {
        self.write("cancel_stream", |state, schedule| {
            let now = state.now;
            let stream = state.active_stream(stream_id)?;
            settle(schedule, stream, now);
            let refund = remaining(&stream.accrual_state());
            stream.active = false;
            Ok(state.receipt(stream_id, refund))
        })
        .await
    }
}
