#![no_std]

pub mod accrual;

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env, Vec,
};

use crate::accrual::{effective_end, AccrualState, Schedule};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    StreamNotFound = 1,
    InvalidParameters = 2,
    StreamNotActive = 3,
    StreamPaused = 4,
    NothingToClaim = 5,
    InvalidAmount = 6,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamEvent {
    Paused(u64),
    Resumed(u64),
    Cancelled(u64),
}

/// A salary stream from an employer to an employee.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub stream_id: u64,
    pub employer: Address,
    pub employee: Address,
    pub deposit_token: Address,
    pub payment_token: Address,
    /// Salary per year, in smallest units of `deposit_token`.
    pub salary: i128,
    pub start_time: u64,
    /// `0` for an open-ended stream.
    pub end_time: u64,
    pub last_claim_time: u64,
    pub deposited_amount: i128,
    pub total_claimed: i128,
    pub active: bool,
    pub paused: bool,
}

impl Stream {
    pub fn accrual_state(&self) -> AccrualState {
        AccrualState {
            salary: self.salary,
            end_time: self.end_time,
            last_claim_time: self.last_claim_time,
            deposited_amount: self.deposited_amount,
            total_claimed: self.total_claimed,
            active: self.active,
            paused: self.paused,
        }
    }
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    NextStreamId,              // Instance storage for the auto-incrementing ID counter.
    Stream(u64),               // Persistent storage for individual stream data (O(1) lookup).
    EmployeeStreams(Address),  // Persistent list of stream ids paying an employee.
    EmployerStreams(Address),  // Persistent list of stream ids funded by an employer.
}

const TTL_THRESHOLD: u32 = 17280;
const TTL_EXTEND_TO: u32 = 120960;

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn get_stream_count(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextStreamId)
        .unwrap_or(0u64)
}

fn set_stream_count(env: &Env, count: u64) {
    env.storage().instance().set(&DataKey::NextStreamId, &count);
    env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_stream(env: &Env, stream_id: u64) -> Result<Stream, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::Stream(stream_id))
        .ok_or(ContractError::StreamNotFound)
}

fn save_stream(env: &Env, stream: &Stream) {
    let key = DataKey::Stream(stream.stream_id);
    env.storage().persistent().set(&key, stream);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_index(env: &Env, key: &DataKey) -> Vec<u64> {
    env.storage()
        .persistent()
        .get(key)
        .unwrap_or_else(|| Vec::new(env))
}

fn append_index(env: &Env, key: DataKey, stream_id: u64) {
    let mut ids = load_index(env, &key);
    ids.push_back(stream_id);
    env.storage().persistent().set(&key, &ids);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl PayrollStream {
    fn schedule() -> Schedule {
        Schedule::ANNUAL
    }

    fn validate_stream_params(
        employer: &Address,
        employee: &Address,
        salary: i128,
        start_time: u64,
        duration: u64,
    ) -> Result<u64, ContractError> {
        if salary <= 0 || employer == employee {
            return Err(ContractError::InvalidParameters);
        }
        if duration == 0 {
            return Ok(0);
        }
        start_time
            .checked_add(duration)
            .ok_or(ContractError::InvalidParameters)
    }

    fn require_active(stream: &Stream) -> Result<(), ContractError> {
        if !stream.active {
            return Err(ContractError::StreamNotActive);
        }
        Ok(())
    }

    fn claimable_now(env: &Env, stream: &Stream) -> i128 {
        Self::schedule().claimable(&stream.accrual_state(), env.ledger().timestamp())
    }

    /// Pay out whatever is claimable and move the anchor to the claim instant.
    fn settle(env: &Env, stream: &mut Stream) -> i128 {
        let now = env.ledger().timestamp();
        let amount = Self::claimable_now(env, stream);
        if amount == 0 {
            return 0;
        }

        let anchor = effective_end(stream.end_time, now);
        stream.total_claimed += amount;
        if anchor > stream.last_claim_time {
            stream.last_claim_time = anchor;
        }
        if stream.end_time > 0 && stream.last_claim_time >= stream.end_time {
            stream.active = false;
        }
        amount
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct PayrollStream;

#[contractimpl]
impl PayrollStream {
    /// Create a new salary stream.
    ///
    /// Registers a stream from `employer` to `employee` that accrues `salary` per year
    /// from `start_time`. No funds move at creation: the stream starts unfunded and
    /// entitlement is capped by what the employer later deposits.
    ///
    /// # Parameters
    /// - `employer`: Address funding the stream (must authorize the transaction)
    /// - `employee`: Address receiving the salary
    /// - `salary`: Yearly salary in smallest units of `deposit_token` (must be > 0)
    /// - `deposit_token`: Token the employer escrows and claims are paid in
    /// - `payment_token`: Token the employee ultimately wants; recorded for conversion services
    /// - `start_time`: When accrual begins (ledger timestamp)
    /// - `duration`: Seconds of accrual; `0` means the stream never ends
    ///
    /// # Returns
    /// - `u64`: Sequential stream identifier, starting from 0
    ///
    /// # Errors
    /// - `InvalidParameters` if `salary <= 0`, `employer == employee`, or
    ///   `start_time + duration` overflows
    ///
    /// # State Changes
    /// - Stores the stream with `total_claimed = 0`, `last_claim_time = start_time`,
    ///   `active = true`, `paused = false`
    /// - Appends the id to the employee and employer indexes
    ///
    /// # Events
    /// - Publishes `created(stream_id, salary)` on success
    #[allow(clippy::too_many_arguments)]
    pub fn create_stream(
        env: Env,
        employer: Address,
        employee: Address,
        salary: i128,
        deposit_token: Address,
        payment_token: Address,
        start_time: u64,
        duration: u64,
    ) -> Result<u64, ContractError> {
        employer.require_auth();

        let end_time =
            Self::validate_stream_params(&employer, &employee, salary, start_time, duration)?;

        let stream_id = get_stream_count(&env);
        set_stream_count(&env, stream_id + 1);

        let stream = Stream {
            stream_id,
            employer: employer.clone(),
            employee: employee.clone(),
            deposit_token,
            payment_token,
            salary,
            start_time,
            end_time,
            last_claim_time: start_time,
            deposited_amount: 0,
            total_claimed: 0,
            active: true,
            paused: false,
        };
        save_stream(&env, &stream);
        append_index(&env, DataKey::EmployeeStreams(employee), stream_id);
        append_index(&env, DataKey::EmployerStreams(employer), stream_id);

        env.events()
            .publish((symbol_short!("created"), stream_id), salary);
        Ok(stream_id)
    }

    /// Escrow additional funds into a stream.
    ///
    /// # Authorization
    /// - Requires authorization from the stream's employer
    ///
    /// # Errors
    /// - `StreamNotFound` if `stream_id` is unknown
    /// - `InvalidAmount` if `amount <= 0`
    /// - `StreamNotActive` if the stream has ended or was cancelled
    ///
    /// # Usage Notes
    /// - Deposits are allowed while paused
    /// - Transfers `amount` of `deposit_token` from the employer to this contract
    pub fn deposit_to_stream(env: Env, stream_id: u64, amount: i128) -> Result<(), ContractError> {
        let mut stream = load_stream(&env, stream_id)?;
        stream.employer.require_auth();

        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }
        Self::require_active(&stream)?;

        stream.deposited_amount = stream
            .deposited_amount
            .checked_add(amount)
            .ok_or(ContractError::InvalidAmount)?;

        // The transfer panics on insufficient balance, which rolls back the whole call.
        let token_client = token::Client::new(&env, &stream.deposit_token);
        token_client.transfer(
            &stream.employer,
            &env.current_contract_address(),
            &amount,
        );
        save_stream(&env, &stream);

        env.events()
            .publish((symbol_short!("deposit"), stream_id), amount);
        Ok(())
    }

    /// Claim all salary vested since the last claim.
    ///
    /// # Returns
    /// - `i128`: The amount of `deposit_token` transferred to the employee
    ///
    /// # Authorization
    /// - Requires authorization from the stream's employee
    ///
    /// # Errors
    /// - `StreamNotActive` if the stream has ended or was cancelled
    /// - `StreamPaused` while the employer has paused the stream
    /// - `NothingToClaim` if nothing has vested or the escrow is empty
    ///
    /// # State Changes
    /// - `total_claimed` grows by the paid amount
    /// - `last_claim_time` moves to `min(now, end_time)`
    /// - Each claim truncates its own chunk, so the employee forgoes less than one
    ///   unit per claim relative to the exact pro-rata amount
    /// - Once `last_claim_time` reaches a non-zero `end_time` the stream becomes inactive
    ///
    /// # Events
    /// - Publishes `claimed(stream_id, payment_token)` with the paid amount
    ///
    /// # Examples
    /// - Salary `31_536_000 × 100` per year (100 units/s), 3000 deposited, claimed at t=0
    /// - At t=10: claim_salary() returns 1000
    /// - At t=10 (again): `NothingToClaim`
    /// - At t=50: claim_salary() returns 2000 (escrow exhausted, 2000 of 4000 vested)
    pub fn claim_salary(env: Env, stream_id: u64) -> Result<i128, ContractError> {
        let mut stream = load_stream(&env, stream_id)?;
        stream.employee.require_auth();

        Self::require_active(&stream)?;
        if stream.paused {
            return Err(ContractError::StreamPaused);
        }

        let amount = Self::settle(&env, &mut stream);
        if amount == 0 {
            return Err(ContractError::NothingToClaim);
        }

        // CEI: update state before external token transfer to reduce reentrancy risk.
        save_stream(&env, &stream);

        let token_client = token::Client::new(&env, &stream.deposit_token);
        token_client.transfer(
            &env.current_contract_address(),
            &stream.employee,
            &amount,
        );

        env.events().publish(
            (symbol_short!("claimed"), stream_id, stream.payment_token.clone()),
            amount,
        );
        Ok(amount)
    }

    /// Pause accrual on a stream.
    ///
    /// # Authorization
    /// - Requires authorization from the stream's employer
    ///
    /// # Errors
    /// - `StreamNotActive` if the stream has ended or was cancelled
    ///
    /// # Usage Notes
    /// - Idempotent: pausing a paused stream succeeds without an event
    /// - No salary vests while paused, and the paused interval is never back-paid
    /// - Salary vested but not claimed before the pause is not carried across it;
    ///   employees should claim before a pause takes effect
    pub fn pause_stream(env: Env, stream_id: u64) -> Result<(), ContractError> {
        let mut stream = load_stream(&env, stream_id)?;
        stream.employer.require_auth();
        Self::require_active(&stream)?;

        if stream.paused {
            return Ok(());
        }

        stream.paused = true;
        save_stream(&env, &stream);

        env.events().publish(
            (symbol_short!("paused"), stream_id),
            StreamEvent::Paused(stream_id),
        );
        Ok(())
    }

    /// Resume accrual on a paused stream.
    ///
    /// # Authorization
    /// - Requires authorization from the stream's employer
    ///
    /// # Errors
    /// - `StreamNotActive` if the stream has ended or was cancelled
    ///
    /// # State Changes
    /// - `paused` is cleared
    /// - `last_claim_time` is re-anchored to `min(now, end_time)` so the paused
    ///   interval contributes nothing; it never moves backwards
    /// - Resuming at or after a non-zero `end_time` leaves nothing to vest, so the
    ///   stream becomes inactive
    ///
    /// # Usage Notes
    /// - Resuming a stream that is not paused is a no-op
    ///
    /// # Examples
    /// - Anchor at t=6, paused at t=12, resumed at t=20
    /// - At t=21: claimable covers 1 second, not 15 or 9
    pub fn resume_stream(env: Env, stream_id: u64) -> Result<(), ContractError> {
        let mut stream = load_stream(&env, stream_id)?;
        stream.employer.require_auth();
        Self::require_active(&stream)?;

        if !stream.paused {
            return Ok(());
        }

        let anchor = effective_end(stream.end_time, env.ledger().timestamp());
        stream.paused = false;
        stream.last_claim_time = stream.last_claim_time.max(anchor);
        if stream.end_time > 0 && stream.last_claim_time >= stream.end_time {
            stream.active = false;
        }
        save_stream(&env, &stream);

        env.events().publish(
            (symbol_short!("resumed"), stream_id),
            StreamEvent::Resumed(stream_id),
        );
        Ok(())
    }

    /// Terminate a stream.
    ///
    /// Pays the employee whatever is claimable right now, refunds the rest of the
    /// escrow to the employer and marks the stream inactive. Terminal: no further
    /// claims, deposits, pauses or resumes succeed.
    ///
    /// # Returns
    /// - `i128`: The amount refunded to the employer
    ///
    /// # Authorization
    /// - Requires authorization from the stream's employer
    ///
    /// # Errors
    /// - `StreamNotActive` if the stream has already ended or was cancelled
    ///
    /// # Events
    /// - Publishes `Cancelled(stream_id)` on success
    ///
    /// # Examples
    /// - 1000 deposited, 300 vested at cancellation → employee gets 300, employer 700
    /// - Paused stream → employee gets 0, employer gets the whole unclaimed escrow
    pub fn cancel_stream(env: Env, stream_id: u64) -> Result<i128, ContractError> {
        let mut stream = load_stream(&env, stream_id)?;
        stream.employer.require_auth();
        Self::require_active(&stream)?;

        let payout = Self::settle(&env, &mut stream);
        let refund = stream.deposited_amount - stream.total_claimed;

        // CEI: update state before external token transfer to reduce reentrancy risk.
        stream.active = false;
        save_stream(&env, &stream);

        let token_client = token::Client::new(&env, &stream.deposit_token);
        if payout > 0 {
            token_client.transfer(
                &env.current_contract_address(),
                &stream.employee,
                &payout,
            );
        }
        if refund > 0 {
            token_client.transfer(
                &env.current_contract_address(),
                &stream.employer,
                &refund,
            );
        }

        env.events().publish(
            (symbol_short!("cancelled"), stream_id),
            StreamEvent::Cancelled(stream_id),
        );
        Ok(refund)
    }

    /// Retrieve the complete state of a salary stream.
    ///
    /// # Errors
    /// - `StreamNotFound` if `stream_id` is unknown
    ///
    /// # Usage Notes
    /// - This is a view function (read-only, no state changes)
    /// - No authorization required (public information)
    /// - Combine with `accrual::Schedule::claimable` to estimate between reads
    pub fn get_stream(env: Env, stream_id: u64) -> Result<Stream, ContractError> {
        load_stream(&env, stream_id)
    }

    /// Amount a claim would pay out at the current ledger timestamp.
    ///
    /// # Behaviour by state
    ///
    /// | State             | Return value                                             |
    /// |-------------------|----------------------------------------------------------|
    /// | Active, running   | `min(elapsed × salary / year, deposited − claimed)`      |
    /// | Paused            | `0`                                                      |
    /// | Inactive          | `0`                                                      |
    ///
    /// # Errors
    /// - `StreamNotFound` if `stream_id` is unknown
    pub fn get_claimable_amount(env: Env, stream_id: u64) -> Result<i128, ContractError> {
        let stream = load_stream(&env, stream_id)?;
        Ok(Self::claimable_now(&env, &stream))
    }

    /// Stream ids paying `employee`, in creation order.
    pub fn get_employee_streams(env: Env, employee: Address) -> Vec<u64> {
        load_index(&env, &DataKey::EmployeeStreams(employee))
    }

    /// Stream ids funded by `employer`, in creation order.
    pub fn get_employer_streams(env: Env, employer: Address) -> Vec<u64> {
        load_index(&env, &DataKey::EmployerStreams(employer))
    }
}
