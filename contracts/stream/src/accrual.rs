//! Pure salary accrual arithmetic shared by the ledger contract and off-chain clients.
//!
//! Every amount is an integer in the asset's smallest denomination. Every
//! division truncates, so the employee is never credited more than the ledger
//! can pay out of escrow.

/// Length of the nominal salary period: 365 days of 86 400 seconds.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Fixed-point scale of a per-second [`Rate`].
pub const RATE_SCALE: i128 = 1_000_000_000;

/// Per-second accrual rate, in smallest units scaled by [`RATE_SCALE`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Rate(i128);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    pub fn scaled(self) -> i128 {
        self.0
    }

    /// Amount accrued over `seconds`, truncated to whole units.
    ///
    /// Returns `None` when the intermediate product overflows `i128`.
    pub fn over(self, seconds: u64) -> Option<i128> {
        self.0
            .checked_mul(seconds as i128)
            .map(|scaled| scaled / RATE_SCALE)
    }
}

/// The accrual-relevant projection of a stream record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccrualState {
    pub salary: i128,
    /// `0` means the stream never ends.
    pub end_time: u64,
    pub last_claim_time: u64,
    pub deposited_amount: i128,
    pub total_claimed: i128,
    pub active: bool,
    pub paused: bool,
}

/// How a salary figure maps onto seconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Schedule {
    seconds_per_period: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::ANNUAL
    }
}

impl Schedule {
    pub const ANNUAL: Schedule = Schedule {
        seconds_per_period: SECONDS_PER_YEAR,
    };

    /// Build a schedule for a custom period length.
    ///
    /// The period must be at least one second and no longer than
    /// [`RATE_SCALE`] seconds; beyond that the scaled rate can no longer
    /// reproduce the salary to within one unit over a full period.
    pub fn new(seconds_per_period: u64) -> Option<Self> {
        if seconds_per_period == 0 || seconds_per_period as i128 > RATE_SCALE {
            return None;
        }
        Some(Schedule { seconds_per_period })
    }

    pub fn seconds_per_period(&self) -> u64 {
        self.seconds_per_period
    }

    /// `salary / seconds_per_period`, truncated in the scaled domain.
    ///
    /// Splitting `salary = q·p + r` keeps the intermediate product inside
    /// `i128` for any salary below roughly `1.7e29` units per period.
    pub fn per_second_rate(&self, salary: i128) -> Rate {
        if salary <= 0 {
            return Rate::ZERO;
        }
        let period = self.seconds_per_period as i128;
        let whole = (salary / period).saturating_mul(RATE_SCALE);
        let fraction = (salary % period) * RATE_SCALE / period;
        Rate(whole.saturating_add(fraction))
    }

    /// Amount vested since `last_claim_time` as of `as_of`, capped by escrow.
    ///
    /// # Behaviour
    ///
    /// | Condition                         | Result                               |
    /// |-----------------------------------|--------------------------------------|
    /// | `paused`                          | `0` (accrual is frozen)              |
    /// | `!active`                         | `0` (the ledger refuses claims)      |
    /// | `as_of <= last_claim_time`        | `0` (clock skew never goes negative) |
    /// | `end_time > 0`                    | elapsed time stops at `end_time`     |
    /// | vesting exceeds remaining escrow  | `deposited_amount - total_claimed`   |
    pub fn vested_since(&self, state: &AccrualState, as_of: u64) -> i128 {
        if state.paused || !state.active {
            return 0;
        }

        let funded = remaining(state);
        if funded == 0 {
            return 0;
        }

        let elapsed = effective_end(state.end_time, as_of).saturating_sub(state.last_claim_time);
        if elapsed == 0 {
            return 0;
        }

        match self.per_second_rate(state.salary).over(elapsed) {
            Some(vested) => vested.clamp(0, funded),
            // An overflowing product is far beyond any escrow balance.
            None => funded,
        }
    }

    /// What a claim submitted at `as_of` pays out.
    pub fn claimable(&self, state: &AccrualState, as_of: u64) -> i128 {
        self.vested_since(state, as_of)
    }
}

/// The instant accrual is evaluated at: `as_of`, stopped at a non-zero `end_time`.
pub fn effective_end(end_time: u64, as_of: u64) -> u64 {
    if end_time > 0 {
        as_of.min(end_time)
    } else {
        as_of
    }
}

/// Escrowed funds not yet paid out; never negative.
pub fn remaining(state: &AccrualState) -> i128 {
    state
        .deposited_amount
        .saturating_sub(state.total_claimed)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOY: Schedule = Schedule {
        seconds_per_period: 12,
    };

    fn toy_state() -> AccrualState {
        AccrualState {
            salary: 1200,
            end_time: 0,
            last_claim_time: 0,
            deposited_amount: 1200,
            total_claimed: 0,
            active: true,
            paused: false,
        }
    }

    #[test]
    fn rate_is_salary_over_period() {
        assert_eq!(TOY.per_second_rate(1200).over(1), Some(100));
        assert_eq!(TOY.per_second_rate(1201).scaled(), 100_083_333_333);
        assert_eq!(TOY.per_second_rate(0), Rate::ZERO);
        assert_eq!(TOY.per_second_rate(-5), Rate::ZERO);
    }

    #[test]
    fn rate_round_trip_loses_at_most_one_unit() {
        let salaries = [
            1_i128,
            7,
            999_999,
            31_536_001,
            1_200_000_000_000,
            987_654_321_987_654_321,
            i64::MAX as i128,
        ];
        for salary in salaries {
            let back = Schedule::ANNUAL
                .per_second_rate(salary)
                .over(SECONDS_PER_YEAR)
                .unwrap();
            assert!(back <= salary, "salary {salary} round-tripped to {back}");
            assert!(salary - back <= 1, "salary {salary} round-tripped to {back}");
        }
    }

    #[test]
    fn schedule_rejects_degenerate_periods() {
        assert!(Schedule::new(0).is_none());
        assert!(Schedule::new(RATE_SCALE as u64 + 1).is_none());
        assert_eq!(Schedule::new(12), Some(TOY));
        assert_eq!(Schedule::default(), Schedule::ANNUAL);
    }

    #[test]
    fn half_period_vests_half_salary() {
        assert_eq!(TOY.claimable(&toy_state(), 6), 600);
    }

    #[test]
    fn claim_then_second_half() {
        let mut state = toy_state();
        state.total_claimed = 600;
        state.last_claim_time = 6;

        assert_eq!(TOY.claimable(&state, 6), 0);
        assert_eq!(TOY.claimable(&state, 12), 600);
    }

    #[test]
    fn resume_reanchor_counts_only_post_resume_time() {
        let mut state = toy_state();
        state.total_claimed = 600;
        state.last_claim_time = 6;

        state.paused = true;
        assert_eq!(TOY.claimable(&state, 15), 0, "no accrual while paused");

        state.paused = false;
        state.last_claim_time = 20;
        assert_eq!(TOY.claimable(&state, 21), 100);
    }

    #[test]
    fn claimable_capped_by_funding() {
        let mut state = toy_state();
        state.salary = 1800;
        state.deposited_amount = 100;
        assert_eq!(TOY.per_second_rate(state.salary).over(1), Some(150));
        assert_eq!(TOY.claimable(&state, 1), 100);
    }

    #[test]
    fn unfunded_stream_never_vests() {
        let mut state = toy_state();
        state.deposited_amount = 0;
        assert_eq!(TOY.claimable(&state, 1_000), 0);
    }

    #[test]
    fn zero_salary_never_vests() {
        let mut state = toy_state();
        state.salary = 0;
        assert_eq!(TOY.claimable(&state, 1_000), 0);
    }

    #[test]
    fn clock_skew_before_anchor_is_zero() {
        let mut state = toy_state();
        state.last_claim_time = 50;
        assert_eq!(TOY.claimable(&state, 10), 0);
    }

    #[test]
    fn accrual_stops_at_end_time() {
        let mut state = toy_state();
        state.deposited_amount = 10_000;
        state.end_time = 4;
        assert_eq!(TOY.claimable(&state, 4), 400);
        assert_eq!(TOY.claimable(&state, 400), 400);
    }

    #[test]
    fn inactive_stream_is_not_claimable() {
        let mut state = toy_state();
        state.active = false;
        assert_eq!(TOY.claimable(&state, 6), 0);
    }

    #[test]
    fn claimable_is_monotonic_while_running() {
        let mut state = toy_state();
        state.salary = 1_000_003;
        state.deposited_amount = 50_000;
        let schedule = Schedule::new(97).unwrap();

        let mut previous = 0;
        for t in 0..200 {
            let now = schedule.claimable(&state, t);
            assert!(now >= previous, "claimable went backwards at t={t}");
            assert!(now <= remaining(&state));
            previous = now;
        }
    }

    #[test]
    fn overflowing_product_saturates_to_escrow() {
        let mut state = toy_state();
        state.salary = i128::MAX;
        state.deposited_amount = i128::MAX - 1;
        assert_eq!(TOY.claimable(&state, u64::MAX), i128::MAX - 1);
    }

    #[test]
    fn effective_end_respects_open_ended_streams() {
        assert_eq!(effective_end(0, 99), 99);
        assert_eq!(effective_end(50, 99), 50);
        assert_eq!(effective_end(150, 99), 99);
    }
}
