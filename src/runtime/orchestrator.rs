use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Semaphore, broadcast, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    core::{credentials::CredentialStore, persona::PersonaConfig},
    persist::{LogStore, StateStore},
    providers::ProviderRegistry,
    run::{OutcomeReason, ProviderReport, RunAccumulator, SyncRun},
    spi::{AuthStatus, FetchOptions, Health, retry::RetryPolicy},
    types::{ProviderId, SyncMode},
};

use super::{
    blocking,
    committer::{self, Delivery},
    events::SyncEvent,
    worker::ProviderPass,
};

/// Tuning for one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Provider workers allowed to run at once.
    pub max_concurrency: usize,
    /// Deadline for a single adapter call.
    pub call_timeout_ms: u64,
    /// Backoff applied to retryable adapter errors.
    pub retry: RetryPolicy,
    /// Extra commit attempts after a concurrent modification.
    pub commit_retries: u32,
    /// Records requested per fetch page.
    pub page_size: usize,
    /// Records per push call.
    pub push_batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            call_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            commit_retries: 3,
            page_size: FetchOptions::default().page_size,
            push_batch_size: 100,
        }
    }
}

impl SyncOptions {
    /// Per-call timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Fetch knobs handed to adapters.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.page_size.max(1),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RunContext {
    pub(crate) registry: ProviderRegistry,
    pub(crate) log: Arc<dyn LogStore>,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) personas: PersonaConfig,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl RunContext {
    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Drives provider adapters against the local log.
///
/// Each call to [`Orchestrator::run_sync`] is one pass: providers run as
/// bounded concurrent workers, a single committer merges their batches into
/// the [`LogStore`], and the finished [`SyncRun`] is appended to the
/// [`StateStore`].
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<RunContext>,
}

impl Orchestrator {
    /// Orchestrator over the given adapters and stores.
    pub fn new(
        registry: ProviderRegistry,
        log: Arc<dyn LogStore>,
        state: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            ctx: Arc::new(RunContext {
                registry,
                log,
                state,
                credentials,
                personas: PersonaConfig::default(),
                events_tx,
            }),
        }
    }

    /// Uses `personas` to resolve the persona named by each provider's credentials.
    ///
    /// A persona can switch a provider off and supplies the operator callsign
    /// for rows that carry none, picked by QSO date.
    pub fn with_personas(self, personas: PersonaConfig) -> Self {
        let mut ctx = RunContext::clone(&self.ctx);
        ctx.personas = personas;
        Self { ctx: Arc::new(ctx) }
    }

    /// Subscribes to progress events of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events_tx.subscribe()
    }

    /// Checks the stored credentials for `provider` without any network I/O.
    pub async fn auth_check(&self, provider: ProviderId) -> AuthStatus {
        let Some(adapter) = self.ctx.registry.get(provider) else {
            warn!(%provider, "no adapter registered");
            return AuthStatus::Error;
        };
        let store = Arc::clone(&self.ctx.credentials);
        match tokio::task::spawn_blocking(move || store.get(provider)).await {
            Ok(Ok(Some(credentials))) => adapter.auth_check(&credentials),
            Ok(Ok(None)) => AuthStatus::Missing,
            Ok(Err(err)) => {
                warn!(%provider, error = %err, "reading credentials failed");
                AuthStatus::Error
            }
            Err(err) => {
                warn!(%provider, error = %err, "credential lookup did not finish");
                AuthStatus::Error
            }
        }
    }

    /// Checks whether `provider` answers within `timeout`.
    pub async fn ping(&self, provider: ProviderId, timeout: Duration) -> Health {
        let Some(adapter) = self.ctx.registry.get(provider) else {
            return Health::down("no adapter registered");
        };
        match tokio::time::timeout(timeout, adapter.ping()).await {
            Ok(health) => health,
            Err(_) => Health::down(format!("no answer within {} ms", timeout.as_millis())),
        }
    }

    /// Runs one sync pass over `providers`.
    pub async fn run_sync(
        &self,
        providers: &[ProviderId],
        mode: SyncMode,
        options: &SyncOptions,
    ) -> SyncRun {
        self.run_sync_with_cancel(providers, mode, options, CancellationToken::new())
            .await
    }

    /// Runs one sync pass, stopping new adapter calls once `cancel` fires.
    ///
    /// Always returns a finalized run: providers that never reported are
    /// recorded as cancelled, or aborted when a fatal store error ended the run.
    /// A fatal store error stops this run only; `cancel` itself is never fired.
    pub async fn run_sync_with_cancel(
        &self,
        providers: &[ProviderId],
        mode: SyncMode,
        options: &SyncOptions,
        cancel: CancellationToken,
    ) -> SyncRun {
        let mut attempted: Vec<ProviderId> = Vec::with_capacity(providers.len());
        for p in providers {
            if !attempted.contains(p) {
                attempted.push(*p);
            }
        }

        let mut acc = RunAccumulator::start(mode, attempted.clone());
        let run_id = acc.id();
        info!(%run_id, ?mode, providers = attempted.len(), "sync run started");
        self.ctx.emit(SyncEvent::RunStarted {
            run_id,
            providers: attempted.clone(),
        });

        let run_cancel = cancel.child_token();

        let log = Arc::clone(&self.ctx.log);
        let snapshot = match blocking(move || log.load_all()).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(err) => {
                error!(%run_id, error = %err, "loading local log failed");
                acc.fail(format!("loading local log failed: {err}"));
                return self.finalize(acc).await;
            }
        };

        let (tx, rx) = mpsc::channel::<Delivery>(attempted.len().max(1));
        let permits = Arc::new(Semaphore::new(
            options.max_concurrency.min(attempted.len()).max(1),
        ));

        let mut workers = JoinSet::new();
        for provider in attempted {
            let pass = ProviderPass {
                ctx: Arc::clone(&self.ctx),
                provider,
                mode,
                options: options.clone(),
                snapshot: Arc::clone(&snapshot),
                cancel: run_cancel.clone(),
            };
            let permits = Arc::clone(&permits);
            let tx = tx.clone();
            workers.spawn(async move {
                let delivery = match tokio::spawn(pass.run(permits)).await {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(%run_id, %provider, error = %err, "provider worker crashed");
                        let reason = OutcomeReason::Crashed(err.to_string());
                        Delivery::finished(ProviderReport::unreported(provider, reason))
                    }
                };
                let _ = tx.send(delivery).await;
            });
        }
        drop(tx);

        committer::run(&self.ctx, &mut acc, rx, options.commit_retries, &run_cancel).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(%run_id, error = %err, "provider worker did not finish");
            }
        }

        self.finalize(acc).await
    }

    async fn finalize(&self, acc: RunAccumulator) -> SyncRun {
        let run = acc.finish();
        let state = Arc::clone(&self.ctx.state);
        let stored = run.clone();
        if let Err(err) = blocking(move || state.append_run(&stored)).await {
            warn!(run_id = %run.id, error = %err, "appending run to audit trail failed");
        }
        info!(run_id = %run.id, status = ?run.status, "sync run finished");
        self.ctx.emit(SyncEvent::RunFinished {
            run_id: run.id,
            status: run.status,
        });
        run
    }
}
