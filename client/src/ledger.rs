//! The typed boundary to the authoritative stream ledger.
//!
//! Implementations translate each call into whatever transport reaches the
//! ledger. They report ledger rejections with the matching [`PayrollError`]
//! variant and transport failures as [`PayrollError::LedgerUnavailable`].
//! Nothing behind this trait is retried by the client.
//!
//! [`PayrollError`]: crate::error::PayrollError
//! [`PayrollError::LedgerUnavailable`]: crate::error::PayrollError::LedgerUnavailable

use crate::error::PayrollResult;
use crate::types::{AccountId, ClaimableReading, CreateStream, Receipt, Snapshot, StreamId};

/// Calls exposed by the stream ledger.
///
/// Futures are not required to be `Send`: the client runs on a single
/// cooperative event loop.
#[allow(async_fn_in_trait)]
pub trait StreamLedger {
    /// Register a stream; the employer named in `request` authorizes it.
    async fn create_stream(&self, request: &CreateStream) -> PayrollResult<StreamId>;

    /// Full record, stamped with the ledger time of the read.
    async fn get_stream(&self, stream_id: StreamId) -> PayrollResult<Snapshot>;

    async fn get_claimable_amount(&self, stream_id: StreamId) -> PayrollResult<ClaimableReading>;

    /// Insertion order; best effort across chain reorganizations.
    async fn get_employee_streams(&self, employee: &AccountId) -> PayrollResult<Vec<StreamId>>;

    /// Insertion order; best effort across chain reorganizations.
    async fn get_employer_streams(&self, employer: &AccountId) -> PayrollResult<Vec<StreamId>>;

    async fn claim_salary(&self, stream_id: StreamId) -> PayrollResult<Receipt>;

    async fn deposit_to_stream(&self, stream_id: StreamId, amount: i128) -> PayrollResult<Receipt>;

    async fn pause_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt>;

    async fn resume_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt>;

    /// Terminate the stream; the receipt carries the employer refund.
    async fn cancel_stream(&self, stream_id: StreamId) -> PayrollResult<Receipt>;
}
