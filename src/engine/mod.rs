//! Reconciliation engine: pure merge of provider batches into the local set.

/// Merge algorithm, transition policy, and dispute audit entries.
pub mod merge;

pub use merge::{Dispute, MergeCounts, MergeOutcome, merge, reconcile, transition};
