//! Reputation relay trigger gateway.
//!
//! Exposes one HTTP endpoint that starts a workflow run and returns without
//! waiting for it. At most one run is active per gateway: a trigger that
//! arrives while a run is in flight is rejected, not queued.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SingleFlight`] | Owned busy flag; hands out at most one [`FlightPermit`] |
//! | [`TriggerGateway`] | Acquires the permit, spawns the run, keeps its handle |
//! | [`WorkflowLauncher`] | Starts one run; subprocess or in-process |
//! | [`server`] | axum router, `POST /trigger-reputation-update` |
//!
//! ## State Machine
//!
//! ```text
//! Idle --trigger--> Running --run settles (ok, error, panic)--> Idle
//! Running --trigger--> Running (rejected, no side effects)
//! ```
//!
//! The gateway has no run timeout. A run that never settles keeps the gateway
//! `Running` until the process restarts.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP framing and process spawning live here. The
//! workflow itself is reached only through [`WorkflowLauncher`].

mod gateway;
mod launcher;
pub mod server;
mod single_flight;

pub use gateway::{LaunchError, RejectReason, TriggerGateway, TriggerResult, WorkflowLauncher};
pub use launcher::{SubprocessLauncher, RUN_ID_ENV};
pub use single_flight::{FlightPermit, SingleFlight};
