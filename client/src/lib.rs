//! Off-chain side of the payroll streaming ledger.
//!
//! [`StreamEstimator`]s replay the shared accrual formula between authoritative
//! reads, a [`Poller`] keeps them fresh, and the [`StreamController`] is the only
//! path that submits mutations to a [`StreamLedger`].

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod estimator;
pub mod ledger;
pub mod poller;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

#[cfg(test)]
mod test;

pub use payroll_stream::accrual;

pub use config::ClientConfig;
pub use controller::StreamController;
pub use display::{
    duration_from_days, format_units, monthly_amount, parse_units, progress_percent, StatusLabel,
};
pub use error::{PayrollError, PayrollResult};
pub use estimator::{unix_now, Estimate, EstimatorSet, ReadTicket, StreamEstimator};
pub use ledger::StreamLedger;
pub use poller::{run_display, PollReport, Poller};
pub use types::{
    AccountId, AssetId, ClaimableReading, CreateStream, Receipt, Snapshot, Stream, StreamId,
};
