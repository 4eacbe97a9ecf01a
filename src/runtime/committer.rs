use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    engine::{Dispute, MergeCounts, reconcile},
    persist::PersistError,
    qso::ProviderRecord,
    run::{OutcomeReason, ProviderOutcome, ProviderReport, RecordCounts, Rejection, RunAccumulator},
    state::{Cursor, SyncWatermark, WatermarkStatus},
    types::{LogVersion, ProviderId},
};

use super::{blocking, events::SyncEvent, orchestrator::RunContext};

/// What a provider worker hands to the committer.
pub(crate) enum Delivery {
    /// Records to merge, and the pass result around them.
    Batch(Batch),
    /// The pass ended without anything to merge.
    Finished {
        report: ProviderReport,
        watermark: Option<SyncWatermark>,
    },
}

impl Delivery {
    pub(crate) fn finished(report: ProviderReport) -> Self {
        Delivery::Finished {
            report,
            watermark: None,
        }
    }
}

pub(crate) struct Batch {
    pub(crate) provider: ProviderId,
    /// Watermark the pass started from.
    pub(crate) base: SyncWatermark,
    pub(crate) records: Vec<ProviderRecord>,
    /// Cursor covering `records`.
    pub(crate) cursor: Cursor,
    /// False for push-only passes; the watermark is left alone.
    pub(crate) pulled: bool,
    pub(crate) stop: Option<OutcomeReason>,
    pub(crate) counts: RecordCounts,
    pub(crate) rejections: Vec<Rejection>,
}

struct Merged {
    version: LogVersion,
    changed: usize,
    counts: MergeCounts,
    disputes: Vec<Dispute>,
}

enum CommitFailure {
    /// Still conflicting after every retry.
    Conflict(PersistError),
    Fatal(PersistError),
}

/// Drains worker deliveries until every sender is gone.
///
/// This is the only writer to the local log during a run. After a fatal store
/// error `cancel` fires, later deliveries are dropped and end up reported as
/// aborted. `cancel` is scoped to the run, never the caller's token.
pub(crate) async fn run(
    ctx: &RunContext,
    acc: &mut RunAccumulator,
    mut rx: mpsc::Receiver<Delivery>,
    commit_retries: u32,
    cancel: &CancellationToken,
) {
    let run_id = acc.id();
    while let Some(delivery) = rx.recv().await {
        if acc.is_failed() {
            debug!(%run_id, "dropping delivery after fatal failure");
            continue;
        }
        let report = match delivery {
            Delivery::Finished { report, watermark } => {
                if let Some(wm) = watermark {
                    save_watermark_quietly(ctx, wm).await;
                }
                report
            }
            Delivery::Batch(batch) => apply(ctx, acc, batch, commit_retries, cancel).await,
        };

        match report.outcome {
            ProviderOutcome::Ok => info!(%run_id, provider = %report.provider, "provider finished"),
            _ => warn!(
                %run_id,
                provider = %report.provider,
                outcome = ?report.outcome,
                reason = ?report.reason,
                "provider degraded"
            ),
        }
        ctx.emit(SyncEvent::ProviderFinished {
            provider: report.provider,
            outcome: report.outcome,
        });
        acc.record(report);
    }
}

async fn apply(
    ctx: &RunContext,
    acc: &mut RunAccumulator,
    batch: Batch,
    commit_retries: u32,
    cancel: &CancellationToken,
) -> ProviderReport {
    let Batch {
        provider,
        base,
        records,
        cursor,
        pulled,
        stop,
        mut counts,
        rejections,
    } = batch;

    if !pulled {
        return completed(provider, stop, counts, rejections, base.cursor);
    }

    let merged = match commit_batch(ctx, provider, records, commit_retries).await {
        Ok(merged) => merged,
        Err(failure) => {
            let err = match failure {
                CommitFailure::Conflict(err) => {
                    warn!(%provider, error = %err, "commit kept conflicting");
                    err
                }
                CommitFailure::Fatal(err) => {
                    error!(%provider, error = %err, "commit failed");
                    acc.fail(format!("committing {provider} batch failed: {err}"));
                    cancel.cancel();
                    err
                }
            };
            save_watermark_quietly(ctx, base.failed(Utc::now())).await;
            let reason = OutcomeReason::Commit(err.to_string());
            let mut report = ProviderReport::error(provider, reason, base.cursor);
            report.counts = counts;
            report.rejections = rejections;
            return report;
        }
    };

    debug!(%provider, version = merged.version, changed = merged.changed, "batch committed");
    ctx.emit(SyncEvent::Committed {
        provider,
        version: merged.version,
        changed: merged.changed,
    });
    counts.absorb_merge(merged.counts);
    counts.disputed += merged.disputes.len();

    let status = if stop.is_some() {
        WatermarkStatus::Partial
    } else {
        WatermarkStatus::Clean
    };
    let advanced = base.advanced(cursor.clone(), status, Utc::now());
    let state = Arc::clone(&ctx.state);
    if let Err(err) = blocking(move || state.save_watermark(&advanced)).await {
        error!(%provider, error = %err, "saving watermark failed");
        acc.fail(format!("saving {provider} watermark failed: {err}"));
        cancel.cancel();
        let mut report = ProviderReport::error(
            provider,
            OutcomeReason::Commit(format!("saving watermark failed: {err}")),
            base.cursor,
        );
        report.counts = counts;
        return report;
    }

    if !merged.disputes.is_empty() {
        record_disputes(ctx, acc.id(), merged.disputes).await;
    }

    completed(provider, stop, counts, rejections, cursor)
}

/// Load, merge and commit in one exclusive step, retrying version conflicts.
async fn commit_batch(
    ctx: &RunContext,
    provider: ProviderId,
    records: Vec<ProviderRecord>,
    commit_retries: u32,
) -> Result<Merged, CommitFailure> {
    let records = Arc::new(records);
    let mut attempt = 0u32;
    loop {
        let log = Arc::clone(&ctx.log);
        let incoming = Arc::clone(&records);
        let result = blocking(move || {
            let snapshot = log.load_all()?;
            let outcome = reconcile(&snapshot.records, &incoming, provider);
            let changed = outcome.changed_records();
            let version = if changed.is_empty() {
                snapshot.version
            } else {
                log.commit(snapshot.version, &changed)?
            };
            Ok(Merged {
                version,
                changed: changed.len(),
                counts: outcome.counts,
                disputes: outcome.disputes,
            })
        })
        .await;

        match result {
            Ok(merged) => return Ok(merged),
            Err(err) if err.is_concurrent_modification() && attempt < commit_retries => {
                attempt += 1;
                debug!(%provider, attempt, error = %err, "log changed underneath, re-merging");
            }
            Err(err) if err.is_concurrent_modification() => {
                return Err(CommitFailure::Conflict(err));
            }
            Err(err) => return Err(CommitFailure::Fatal(err)),
        }
    }
}

async fn record_disputes(ctx: &RunContext, run_id: Uuid, disputes: Vec<Dispute>) {
    for d in &disputes {
        warn!(
            %run_id,
            provider = %d.provider,
            remote = %d.key.remote,
            start = %d.key.start,
            "slot moved to disputed"
        );
    }
    let state = Arc::clone(&ctx.state);
    if let Err(err) = blocking(move || state.record_disputes(run_id, &disputes)).await {
        warn!(%run_id, error = %err, "recording disputes failed");
    }
}

async fn save_watermark_quietly(ctx: &RunContext, watermark: SyncWatermark) {
    let provider = watermark.provider;
    let state = Arc::clone(&ctx.state);
    if let Err(err) = blocking(move || state.save_watermark(&watermark)).await {
        warn!(%provider, error = %err, "saving watermark failed");
    }
}

fn completed(
    provider: ProviderId,
    stop: Option<OutcomeReason>,
    counts: RecordCounts,
    rejections: Vec<Rejection>,
    cursor: Cursor,
) -> ProviderReport {
    ProviderReport {
        provider,
        outcome: if stop.is_some() {
            ProviderOutcome::Partial
        } else {
            ProviderOutcome::Ok
        },
        reason: stop,
        counts,
        rejections,
        cursor: Some(cursor),
    }
}
