use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hashbrown::HashSet;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::credentials::Credentials,
    persist::LogSnapshot,
    qso::{ProviderRecord, QsoKey, QsoRecord},
    run::{OutcomeReason, ProviderReport, RecordCounts, Rejection},
    spi::{
        AuthStatus, ProviderAdapter, ProviderError, PushOutcome, Session,
        retry::{CallError, Pacer, guarded_call},
    },
    state::{Cursor, SyncWatermark},
    types::{ConfirmationStatus, ProviderId, SyncMode},
};

use super::{
    blocking,
    committer::{Batch, Delivery},
    events::SyncEvent,
    orchestrator::{RunContext, SyncOptions},
};

/// Maps an adapter error onto the report reason.
pub(crate) fn reason_for(err: &ProviderError) -> OutcomeReason {
    match err {
        ProviderError::Auth(msg) => OutcomeReason::Auth(msg.clone()),
        ProviderError::RateLimited { message, .. } => OutcomeReason::RateLimited(message.clone()),
        ProviderError::Transient(msg) => OutcomeReason::Transient(msg.clone()),
        ProviderError::Permanent(msg) => OutcomeReason::Permanent(msg.clone()),
    }
}

/// One provider's pass through a run.
pub(crate) struct ProviderPass {
    pub(crate) ctx: Arc<RunContext>,
    pub(crate) provider: ProviderId,
    pub(crate) mode: SyncMode,
    pub(crate) options: SyncOptions,
    pub(crate) snapshot: Arc<LogSnapshot>,
    pub(crate) cancel: CancellationToken,
}

struct Pulled {
    records: Vec<ProviderRecord>,
    cursor: Cursor,
    stop: Option<OutcomeReason>,
}

impl ProviderPass {
    pub(crate) async fn run(self, permits: Arc<Semaphore>) -> Delivery {
        let provider = self.provider;

        let state = Arc::clone(&self.ctx.state);
        let base = match blocking(move || state.load_watermark(provider)).await {
            Ok(wm) => wm.unwrap_or_else(|| SyncWatermark::beginning(provider)),
            Err(err) => {
                warn!(%provider, error = %err, "loading watermark failed");
                return Delivery::finished(ProviderReport::unreported(
                    provider,
                    OutcomeReason::Aborted(format!("loading watermark failed: {err}")),
                ));
            }
        };

        let cancelled = |cursor: Cursor| {
            Delivery::finished(ProviderReport::error(provider, OutcomeReason::Cancelled, cursor))
        };
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return cancelled(base.cursor),
            permit = permits.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return cancelled(base.cursor),
            },
        };

        info!(%provider, cursor = ?base.cursor, "provider pass started");
        self.ctx.emit(SyncEvent::ProviderStarted {
            provider,
            cursor: base.cursor.clone(),
        });

        let Some(adapter) = self.ctx.registry.get(provider) else {
            return Delivery::finished(ProviderReport::error(
                provider,
                OutcomeReason::NotRegistered,
                base.cursor,
            ));
        };

        let credentials = match self.load_credentials().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                return Delivery::finished(ProviderReport::error(
                    provider,
                    OutcomeReason::NoCredentials,
                    base.cursor,
                ));
            }
            Err(msg) => {
                return Delivery::finished(ProviderReport::error(
                    provider,
                    OutcomeReason::Credentials(msg),
                    base.cursor,
                ));
            }
        };

        let persona = credentials
            .persona
            .as_deref()
            .and_then(|id| self.ctx.personas.get(id));
        if persona.is_some_and(|p| !p.is_enabled(provider)) {
            debug!(%provider, persona = ?credentials.persona, "provider disabled for persona");
            return Delivery::finished(ProviderReport::error(
                provider,
                OutcomeReason::Disabled,
                base.cursor,
            ));
        }

        let status = adapter.auth_check(&credentials);
        if status != AuthStatus::Ok {
            warn!(%provider, %status, "credentials failed local check");
            return Delivery::finished(ProviderReport::error(
                provider,
                OutcomeReason::Auth(format!("credentials {status}")),
                base.cursor,
            ));
        }

        let mut pacer = Pacer::new(adapter.rate_limit_info().as_ref());
        if !pacer.interval().is_zero() {
            debug!(%provider, interval_ms = pacer.interval().as_millis() as u64, "pacing calls");
        }

        let login = self.authenticate(adapter.as_ref(), &credentials, &mut pacer).await;
        let mut session = match login {
            Ok(session) => session,
            Err(CallError::Cancelled) => return cancelled(base.cursor),
            Err(CallError::Fatal(err) | CallError::Exhausted { last: err, .. }) => {
                warn!(%provider, error = %err, "authentication failed");
                let failed = base.failed(Utc::now());
                return Delivery::Finished {
                    report: ProviderReport::error(provider, reason_for(&err), base.cursor),
                    watermark: Some(failed),
                };
            }
        };
        session.persona = persona.cloned();

        let pulled = if self.mode.pulls() {
            match self.pull(adapter.as_ref(), &session, &base.cursor, &mut pacer).await {
                Ok(pulled) => Some(pulled),
                Err(err) => {
                    let failed = base.failed(Utc::now());
                    return Delivery::Finished {
                        report: ProviderReport::error(provider, reason_for(&err), base.cursor),
                        watermark: Some(failed),
                    };
                }
            }
        } else {
            None
        };

        let mut counts = RecordCounts::default();
        let mut rejections = Vec::new();
        let mut stop = pulled.as_ref().and_then(|p| p.stop.clone());

        if self.mode.pushes() {
            if stop.is_none() {
                let fetched: HashSet<&QsoKey> = pulled
                    .iter()
                    .flat_map(|p| p.records.iter().map(|r| &r.key))
                    .collect();
                let adapter = adapter.as_ref();
                stop = self
                    .push(adapter, &session, &fetched, &mut pacer, &mut counts, &mut rejections)
                    .await;
            } else {
                debug!(%provider, "skipping push after incomplete pull");
            }
        }

        let (records, cursor, pulled_any) = match pulled {
            Some(p) => (p.records, p.cursor, true),
            None => (Vec::new(), base.cursor.clone(), false),
        };

        Delivery::Batch(Batch {
            provider,
            base,
            records,
            cursor,
            pulled: pulled_any,
            stop,
            counts,
            rejections,
        })
    }

    fn on_retry(&self) -> impl FnMut(u32, Duration, &ProviderError) + '_ {
        move |attempt: u32, delay: Duration, err: &ProviderError| {
            let delay_ms = delay.as_millis() as u64;
            warn!(
                provider = %self.provider,
                attempt,
                delay_ms,
                error = %err,
                "retrying provider call"
            );
            self.ctx.emit(SyncEvent::Retrying {
                provider: self.provider,
                attempt,
                delay_ms,
                error: err.to_string(),
            });
        }
    }

    async fn load_credentials(&self) -> Result<Option<Credentials>, String> {
        let store = Arc::clone(&self.ctx.credentials);
        let provider = self.provider;
        match tokio::task::spawn_blocking(move || store.get(provider)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(err) => Err(format!("credential lookup failed: {err}")),
        }
    }

    async fn authenticate(
        &self,
        adapter: &dyn ProviderAdapter,
        credentials: &Credentials,
        pacer: &mut Pacer,
    ) -> Result<Session, CallError> {
        if !pacer.ready(&self.cancel).await {
            return Err(CallError::Cancelled);
        }
        guarded_call(
            &self.options.retry,
            self.options.call_timeout(),
            &self.cancel,
            self.on_retry(),
            move || adapter.authenticate(credentials),
        )
        .await
    }

    /// Fetches pages until the sequence ends or a call gives up.
    ///
    /// Returns `Err` only for a fatal error before any record was collected.
    async fn pull(
        &self,
        adapter: &dyn ProviderAdapter,
        session: &Session,
        from: &Cursor,
        pacer: &mut Pacer,
    ) -> Result<Pulled, ProviderError> {
        let provider = self.provider;
        let fetch = self.options.fetch_options();
        let fetch = &fetch;
        let mut cursor = from.clone();
        let mut records = Vec::new();

        let stop = loop {
            if !pacer.ready(&self.cancel).await {
                break Some(OutcomeReason::Cancelled);
            }
            let current = &cursor;
            let result = guarded_call(
                &self.options.retry,
                self.options.call_timeout(),
                &self.cancel,
                self.on_retry(),
                move || adapter.fetch_confirmations(session, current, fetch),
            )
            .await;

            match result {
                Ok(page) => {
                    let stalled =
                        page.has_more && page.records.is_empty() && page.next_cursor == cursor;
                    debug!(
                        %provider,
                        records = page.records.len(),
                        more = page.has_more,
                        "page fetched"
                    );
                    self.ctx.emit(SyncEvent::PageFetched {
                        provider,
                        records: page.records.len(),
                        cursor: page.next_cursor.clone(),
                    });
                    records.extend(page.records);
                    cursor = page.next_cursor;
                    if stalled {
                        warn!(%provider, "provider reported more pages without progress");
                        break None;
                    }
                    if !page.has_more {
                        break None;
                    }
                }
                Err(CallError::Cancelled) => break Some(OutcomeReason::Cancelled),
                Err(CallError::Exhausted { attempts, last }) => {
                    warn!(%provider, attempts, error = %last, "fetch retries exhausted");
                    break Some(reason_for(&last));
                }
                Err(CallError::Fatal(err)) => {
                    if records.is_empty() {
                        return Err(err);
                    }
                    warn!(%provider, error = %err, records = records.len(), "fetch stopped early");
                    break Some(reason_for(&err));
                }
            }
        };

        Ok(Pulled {
            records,
            cursor,
            stop,
        })
    }

    /// Pushes local records the provider has not confirmed and did not report.
    ///
    /// Returns the reason pushing stopped early, if it did.
    async fn push(
        &self,
        adapter: &dyn ProviderAdapter,
        session: &Session,
        fetched: &HashSet<&QsoKey>,
        pacer: &mut Pacer,
        counts: &mut RecordCounts,
        rejections: &mut Vec<Rejection>,
    ) -> Option<OutcomeReason> {
        let provider = self.provider;
        let candidates: Vec<QsoRecord> = self
            .snapshot
            .records
            .values()
            .filter(|r| {
                r.status(provider) != ConfirmationStatus::Confirmed && !fetched.contains(&r.key)
            })
            .cloned()
            .collect();
        debug!(%provider, records = candidates.len(), "pushing local records");

        for chunk in candidates.chunks(self.options.push_batch_size.max(1)) {
            if !pacer.ready(&self.cancel).await {
                return Some(OutcomeReason::Cancelled);
            }
            let result = guarded_call(
                &self.options.retry,
                self.options.call_timeout(),
                &self.cancel,
                self.on_retry(),
                move || adapter.push_records(session, chunk),
            )
            .await;

            match result {
                Ok(outcomes) => {
                    for (key, outcome) in outcomes {
                        match outcome {
                            PushOutcome::Accepted => counts.accepted += 1,
                            PushOutcome::Duplicate => counts.unchanged += 1,
                            PushOutcome::Rejected(reason) => {
                                counts.rejected += 1;
                                rejections.push(Rejection { key, reason });
                            }
                        }
                    }
                }
                Err(CallError::Cancelled) => return Some(OutcomeReason::Cancelled),
                Err(CallError::Fatal(err) | CallError::Exhausted { last: err, .. }) => {
                    warn!(%provider, error = %err, "push stopped early");
                    return Some(reason_for(&err));
                }
            }
        }
        None
    }
}
