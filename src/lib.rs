//! Incremental QSL confirmation sync between a local ADIF log and eQSL, LoTW,
//! Club Log and QRZ.
//!
//! # Examples
//!
//! Merging a provider batch with [`engine::reconcile`]:
//! ```
//! use chrono::{TimeZone, Utc};
//! use qsosync::{
//!     engine::reconcile,
//!     qso::{ProviderRecord, QsoKey, QsoSet},
//!     types::{Band, ConfirmationStatus, Mode, ProviderId},
//! };
//!
//! let key = QsoKey::new(
//!     "ki7mt",
//!     "k1abc",
//!     Utc.with_ymd_and_hms(2024, 3, 1, 12, 34, 0).unwrap(),
//!     Band::B20m,
//!     Mode::new("ft8"),
//! );
//! let incoming = vec![ProviderRecord {
//!     key: key.clone(),
//!     freq_hz: Some(14_074_000),
//!     provider: ProviderId::Lotw,
//!     status: ConfirmationStatus::Confirmed,
//!     meta: Default::default(),
//! }];
//!
//! let outcome = reconcile(&QsoSet::new(), &incoming, ProviderId::Lotw);
//! assert_eq!(outcome.counts.added, 1);
//! assert_eq!(outcome.set[&key].status(ProviderId::Lotw), ConfirmationStatus::Confirmed);
//! ```
//!
//! Running a sync pass against SQLite:
//! ```no_run
//! use std::sync::Arc;
//! use qsosync::{
//!     core::credentials::FileCredentialStore,
//!     persist::sqlite::SqliteStore,
//!     providers::{ProviderRegistry, Transport},
//!     runtime::orchestrator::{Orchestrator, SyncOptions},
//!     types::{ProviderId, SyncMode},
//! };
//!
//! # async fn demo(transport: Arc<dyn Transport>) {
//! let store = Arc::new(SqliteStore::open("qsosync.db").expect("open sqlite"));
//! let providers = [ProviderId::Eqsl, ProviderId::Lotw];
//! let orchestrator = Orchestrator::new(
//!     ProviderRegistry::from_config(&providers, transport),
//!     store.clone(),
//!     store,
//!     Arc::new(FileCredentialStore::open("credentials.json")),
//! );
//! let run = orchestrator
//!     .run_sync(&providers, SyncMode::Both, &SyncOptions::default())
//!     .await;
//! println!("{:?}", run.status);
//! # }
//! ```
#![warn(missing_docs)]

/// YAML configuration.
pub mod config;
/// In-memory log store, credential stores and personas.
pub mod core;
/// Pure reconciliation of provider batches into the local set.
pub mod engine;
/// Storage traits and their in-memory and SQLite implementations.
pub mod persist;
/// Remote provider adapters.
pub mod providers;
/// QSO identity and record types.
pub mod qso;
/// Sync run audit model.
pub mod run;
/// Orchestrator, workers and event stream.
pub mod runtime;
/// Provider adapter contract and call harness.
pub mod spi;
/// Per-provider sync progress.
pub mod state;
/// Shared primitive types and enums.
pub mod types;
