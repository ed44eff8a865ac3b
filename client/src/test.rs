use std::sync::Arc;
use std::time::Duration;

use payroll_stream::accrual::Schedule;
use tokio_util::sync::CancellationToken;

use crate::testutils::MemoryLedger;
use crate::{
    run_display, AccountId, AssetId, ClientConfig, CreateStream, Estimate, EstimatorSet,
    PayrollError, Poller, StatusLabel, StreamController, StreamId,
};

/// With a 12 second period, a salary of 1200 accrues 100 units per second.
const SALARY: i128 = 1_200;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct TestContext {
    ledger: Arc<MemoryLedger>,
    estimators: EstimatorSet,
    controller: StreamController<MemoryLedger>,
    employer: AccountId,
    employee: AccountId,
    asset: AssetId,
}

impl TestContext {
    fn setup() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let schedule = Schedule::new(12).unwrap();
        let ledger = Arc::new(MemoryLedger::new(schedule));
        let estimators = EstimatorSet::new(schedule);
        let controller = StreamController::new(ledger.clone(), estimators.clone());

        TestContext {
            ledger,
            estimators,
            controller,
            employer: AccountId::parse(format!("G{}EMP", "A".repeat(52))).unwrap(),
            employee: AccountId::parse(format!("G{}EEE", "B".repeat(52))).unwrap(),
            asset: AssetId::parse(format!("C{}USD", "A".repeat(52))).unwrap(),
        }
    }

    fn request(&self) -> CreateStream {
        CreateStream {
            employer: self.employer.clone(),
            employee: self.employee.clone(),
            salary: SALARY,
            deposit_token: self.asset.clone(),
            payment_token: self.asset.clone(),
            start_time: 0,
            duration: 0,
        }
    }

    /// Open-ended stream from t=0 with `deposit` escrowed.
    async fn funded_stream(&self, deposit: i128) -> StreamId {
        self.ledger.set_time(0);
        let id = self.controller.create(self.request()).await.unwrap();
        self.controller.deposit(id, deposit).await.unwrap();
        id
    }

    fn estimate(&self, id: StreamId, now: u64) -> Estimate {
        self.estimators.tick(id, now).unwrap()
    }

    fn poller(&self) -> Poller<MemoryLedger> {
        Poller::new(
            self.ledger.clone(),
            self.estimators.clone(),
            Duration::from_secs(5),
        )
    }

    fn count(&self, call: &str) -> usize {
        self.ledger.calls().iter().filter(|c| **c == call).count()
    }
}

// ---------------------------------------------------------------------------
// Create / validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_starts_tracking() {
    let ctx = TestContext::setup();
    let id = ctx.controller.create(ctx.request()).await.unwrap();

    assert_eq!(id, StreamId(0));
    assert!(ctx.estimators.contains(id));
    assert_eq!(ctx.estimate(id, 100).claimable, 0, "unfunded");
    assert_eq!(
        ctx.ledger.calls(),
        vec!["create_stream", "get_stream", "get_claimable_amount"]
    );
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_ledger() {
    let ctx = TestContext::setup();

    let mut zero_salary = ctx.request();
    zero_salary.salary = 0;
    let mut same_party = ctx.request();
    same_party.employee = ctx.employer.clone();
    let mut overflowing = ctx.request();
    overflowing.start_time = u64::MAX;
    overflowing.duration = 1;

    for request in [zero_salary, same_party, overflowing] {
        let err = ctx.controller.create(request).await.unwrap_err();
        assert!(matches!(err, PayrollError::InvalidParameters(_)));
    }
    assert_eq!(
        ctx.controller.deposit(StreamId(0), 0).await,
        Err(PayrollError::InvalidAmount(0))
    );
    assert!(ctx.ledger.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_claim_pause_resume_scenario() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;

    ctx.ledger.set_time(6);
    assert_eq!(ctx.estimate(id, 6).claimable, 600);

    let receipt = ctx.controller.claim(id).await.unwrap();
    assert_eq!(receipt.amount, 600);
    assert_eq!(receipt.ledger_time, 6);

    let after = ctx.estimate(id, 6);
    assert_eq!(after.claimable, 0);
    assert!(!after.stale);
    assert_eq!(ctx.estimate(id, 12).claimable, 600);

    ctx.ledger.set_time(12);
    ctx.controller.pause(id).await.unwrap();
    let paused = ctx.estimate(id, 15);
    assert!(paused.paused);
    assert_eq!(paused.claimable, 0);

    ctx.ledger.set_time(20);
    ctx.controller.resume(id).await.unwrap();
    assert_eq!(ctx.estimate(id, 21).claimable, 100);

    ctx.ledger.advance(1);
    assert_eq!(ctx.ledger.now(), 21);
    ctx.controller.load(id).await.unwrap();
    assert_eq!(ctx.estimate(id, 21).claimable, 100);
    assert_eq!(ctx.controller.claim(id).await.unwrap().amount, 100);
}

#[tokio::test]
async fn test_claim_with_nothing_vested_is_not_submitted() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;

    assert_eq!(
        ctx.controller.claim(id).await,
        Err(PayrollError::NothingToClaim(id))
    );
    assert_eq!(ctx.count("claim_salary"), 0);
}

#[tokio::test]
async fn test_claim_on_paused_stream_is_not_submitted() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    ctx.controller.pause(id).await.unwrap();

    ctx.ledger.set_time(5);
    assert_eq!(
        ctx.controller.claim(id).await,
        Err(PayrollError::StreamPaused(id))
    );
    assert_eq!(ctx.count("claim_salary"), 0);
}

#[tokio::test]
async fn test_claim_is_capped_by_escrow() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(250).await;

    ctx.ledger.set_time(10);
    assert_eq!(ctx.estimate(id, 10).claimable, 250);
    assert_eq!(ctx.controller.claim(id).await.unwrap().amount, 250);
    assert_eq!(ctx.estimate(id, 50).claimable, 0);
}

#[tokio::test]
async fn test_each_claim_truncates_less_than_one_unit() {
    let ctx = TestContext::setup();
    ctx.ledger.set_time(0);
    let mut frequent = ctx.request();
    // 100.91666.. units per second
    frequent.salary = 1_211;
    let once = frequent.clone();

    let frequent = ctx.controller.create(frequent).await.unwrap();
    let once = ctx.controller.create(once).await.unwrap();
    ctx.controller.deposit(frequent, 1_211).await.unwrap();
    ctx.controller.deposit(once, 1_211).await.unwrap();

    let mut total = 0;
    for t in 1..=12 {
        ctx.ledger.set_time(t);
        total += ctx.controller.claim(frequent).await.unwrap().amount;
    }
    assert_eq!(total, 1_200);
    assert!(1_211 - total < 12, "under one unit lost per claim");

    assert_eq!(ctx.controller.claim(once).await.unwrap().amount, 1_210);
}

// ---------------------------------------------------------------------------
// In-flight guard / failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_mutation_while_first_in_flight_is_rejected() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    ctx.ledger.set_time(6);

    let gate = ctx.ledger.hold_next_write();
    let first = ctx.controller.pause(id);
    let second = async {
        tokio::task::yield_now().await;
        assert!(ctx.controller.is_busy(id));
        let result = ctx.controller.claim(id).await;
        gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert_eq!(second, Err(PayrollError::OperationInFlight(id)));
    assert!(!ctx.controller.is_busy(id));
    assert_eq!(ctx.count("claim_salary"), 0);
}

#[tokio::test]
async fn test_failed_submission_is_not_retried() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    ctx.ledger.set_time(4);
    ctx.ledger.set_unavailable(false, true);

    let err = ctx.controller.pause(id).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(ctx.count("pause_stream"), 1);

    // Outcome unknown: nothing is shown until a fresh read arrives.
    let estimate = ctx.estimate(id, 4);
    assert!(estimate.stale);
    assert_eq!(estimate.claimable, 0);
}

#[tokio::test]
async fn test_refresh_failure_after_mutation_leaves_estimate_stale() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    ctx.ledger.set_time(3);
    ctx.ledger.set_unavailable(true, false);

    ctx.controller.pause(id).await.unwrap();
    let estimate = ctx.estimate(id, 3);
    assert!(estimate.stale);
    assert_eq!(estimate.claimable, 0);
    assert!(!estimate.paused, "pause not observed yet");

    ctx.ledger.set_unavailable(false, false);
    let poller = ctx.poller();
    assert_eq!(poller.poll_once().await.refreshed, 1);

    let estimate = ctx.estimate(id, 3);
    assert!(!estimate.stale);
    assert!(estimate.paused);
}

#[tokio::test]
async fn test_unknown_stream_reports_not_found() {
    let ctx = TestContext::setup();
    assert_eq!(
        ctx.controller.pause(StreamId(42)).await,
        Err(PayrollError::StreamNotFound(StreamId(42)))
    );
    assert!(!ctx.estimators.contains(StreamId(42)));
}

// ---------------------------------------------------------------------------
// Pause / resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resume_past_end_time_ends_stream() {
    let ctx = TestContext::setup();
    ctx.ledger.set_time(0);
    let mut request = ctx.request();
    request.duration = 50;
    let id = ctx.controller.create(request).await.unwrap();
    ctx.controller.deposit(id, 1_000).await.unwrap();

    ctx.ledger.set_time(10);
    ctx.controller.pause(id).await.unwrap();
    ctx.ledger.set_time(80);
    ctx.controller.resume(id).await.unwrap();

    let stream = ctx.ledger.stream(id).unwrap();
    assert!(!stream.active);
    assert_eq!(stream.last_claim_time, 50);

    let estimate = ctx.estimate(id, 90);
    assert!(!estimate.active);
    assert_eq!(estimate.claimable, 0);
    let snapshot = ctx.estimators.snapshot(id).unwrap();
    assert_eq!(StatusLabel::of(&snapshot.stream), StatusLabel::Ended);

    assert_eq!(
        ctx.controller.deposit(id, 500).await,
        Err(PayrollError::StreamNotActive(id))
    );
    assert_eq!(ctx.count("deposit_to_stream"), 1);
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_refunds_and_blocks_further_mutations() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    ctx.ledger.set_time(3);

    let receipt = ctx.controller.cancel(id).await.unwrap();
    assert_eq!(receipt.amount, 900);
    assert_eq!(ctx.ledger.stream(id).unwrap().total_claimed, 300);

    let estimate = ctx.estimate(id, 50);
    assert!(!estimate.active);
    assert_eq!(estimate.claimable, 0);

    let calls = ctx.ledger.calls().len();
    assert_eq!(
        ctx.controller.deposit(id, 10).await,
        Err(PayrollError::StreamNotActive(id))
    );
    assert_eq!(
        ctx.controller.resume(id).await,
        Err(PayrollError::StreamNotActive(id))
    );
    assert_eq!(ctx.ledger.calls().len(), calls);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_indexes_keep_creation_order() {
    let ctx = TestContext::setup();
    let first = ctx.controller.create(ctx.request()).await.unwrap();
    let second = ctx.controller.create(ctx.request()).await.unwrap();

    assert_eq!(
        ctx.controller.employee_streams(&ctx.employee).await.unwrap(),
        vec![first, second]
    );
    assert_eq!(
        ctx.controller.employer_streams(&ctx.employer).await.unwrap(),
        vec![first, second]
    );
    let as_employer = ctx.controller.employer_streams(&ctx.employee).await.unwrap();
    assert!(as_employer.is_empty());
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_poll_failure_marks_stale_and_recovers() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    let poller = ctx.poller();

    ctx.ledger.set_time(4);
    ctx.ledger.set_unavailable(true, false);
    let report = poller.poll_once().await;
    assert_eq!(report.failed, 1);

    let estimate = ctx.estimate(id, 4);
    assert!(estimate.stale);
    assert_eq!(estimate.claimable, 400, "last snapshot keeps estimating");

    ctx.ledger.set_unavailable(false, false);
    let report = poller.poll_once().await;
    assert_eq!(report.refreshed, 1);
    assert!(!ctx.estimate(id, 4).stale);
    assert_eq!(ctx.estimate(id, 4).observed_at, 4);
}

#[tokio::test(start_paused = true)]
async fn test_poller_runs_until_cancelled() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;
    let before = ctx.count("get_stream");

    let poller = Poller::from_config(
        ctx.ledger.clone(),
        ctx.estimators.clone(),
        &ClientConfig::default(),
    );
    assert_eq!(poller.interval(), Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let stopper = async {
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
    };
    tokio::join!(poller.run(cancel.clone()), stopper);

    // Passes at 0s, 10s and 20s.
    assert_eq!(ctx.count("get_stream") - before, 3);
    assert!(ctx.estimators.contains(id));
}

#[tokio::test(start_paused = true)]
async fn test_display_ticks_every_watched_stream() {
    let ctx = TestContext::setup();
    let id = ctx.funded_stream(1_200).await;

    let mut frames: Vec<Vec<Estimate>> = Vec::new();
    let cancel = CancellationToken::new();
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        cancel.cancel();
    };
    tokio::join!(
        run_display(
            ctx.estimators.clone(),
            Duration::from_secs(1),
            || 2,
            |estimates| frames.push(estimates),
            cancel.clone(),
        ),
        stopper
    );

    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].stream_id, id);
        assert_eq!(frame[0].claimable, 200);
    }
}
