//! Progress events broadcast during a sync run.

use uuid::Uuid;

use crate::{
    run::{ProviderOutcome, RunStatus},
    state::Cursor,
    types::{LogVersion, ProviderId},
};

/// Events emitted by the orchestrator while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A run began.
    RunStarted {
        /// Run id.
        run_id: Uuid,
        /// Providers attempted, in report order.
        providers: Vec<ProviderId>,
    },
    /// A provider worker acquired its slot.
    ProviderStarted {
        /// Provider.
        provider: ProviderId,
        /// Cursor the pass resumes from.
        cursor: Cursor,
    },
    /// One fetch page arrived.
    PageFetched {
        /// Provider.
        provider: ProviderId,
        /// Records on the page.
        records: usize,
        /// Cursor after the page.
        cursor: Cursor,
    },
    /// An adapter call failed and will be retried.
    Retrying {
        /// Provider.
        provider: ProviderId,
        /// Attempt that failed (1-based).
        attempt: u32,
        /// Wait before the next attempt, in milliseconds.
        delay_ms: u64,
        /// Failure text.
        error: String,
    },
    /// A provider batch was merged and written to the local log.
    Committed {
        /// Provider.
        provider: ProviderId,
        /// Log version after the commit.
        version: LogVersion,
        /// Records written.
        changed: usize,
    },
    /// A provider's report was recorded.
    ProviderFinished {
        /// Provider.
        provider: ProviderId,
        /// Final outcome.
        outcome: ProviderOutcome,
    },
    /// The run was finalized.
    RunFinished {
        /// Run id.
        run_id: Uuid,
        /// Overall status.
        status: RunStatus,
    },
}
