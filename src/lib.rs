//! np-cloud-scheduler — control plane for scheduled instance triggers.
//!
//! Split into a library (this crate) and a thin `main.rs` binary so the
//! integration suite under `tests/` can drive the real router, store, and
//! queue wiring the same way `main` does, the way `hack-ink-jwks-cache`
//! separates `src/lib.rs` from its `tests/integration/` suite.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod maintenance;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod time_util;
