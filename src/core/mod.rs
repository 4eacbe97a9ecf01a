//! In-memory authoritative log, credential storage and operator personas.

/// Per-provider credential records and stores.
pub mod credentials;
/// Operator personas and their callsign history.
pub mod persona;
/// Authoritative in-memory QSO log with optimistic versioning.
pub mod store;
