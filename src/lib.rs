//! # script-host
//!
//! Execution host for a visual-programming script runtime. It runs exactly one top-level
//! job at a time, lets that job spawn nested and parallel sub-jobs, aggregates progress,
//! brokers user-input requests, and records **execution groups** in a ledger so a paused
//! run can be resumed, skipping every group that already finished.
//!
//! ## Architecture
//!
//! - [ledger::Ledger] records and replays the group tree of one script invocation.
//! - [progress::ProgressAggregator] keeps the latest progress sample per nesting depth.
//! - [input_broker::InputBroker] holds at most one outstanding input request per job.
//! - [ExecutionSite] is what a running [Script] sees: groups, nested runs, input, progress.
//! - [JobController] owns the single active-job slot and publishes [JobEvent]s.
//!
//! Scripts are resolved through a [ScriptCatalog]; the interpreter that walks a script's
//! blocks lives outside this crate and drives the site.

pub mod checkpoint_io;
pub mod config;
mod controller;
pub mod error;
pub mod input_broker;
pub mod ledger;
pub mod notify;
#[cfg(test)]
mod notify_test;
mod parallel;
#[cfg(test)]
mod parallel_test;
pub mod plan;
#[cfg(test)]
mod plan_test;
pub mod progress;
#[cfg(test)]
mod progress_test;
pub mod script;
mod site;
pub mod types;

pub use config::EngineConfig;
pub use controller::JobController;
pub use error::JobError;
pub use ledger::{GroupStart, Ledger, SharedLedger};
pub use notify::EventBus;
pub use plan::{Plan, PlanScript, PlanStep};
pub use script::{InMemoryCatalog, Script, ScriptCatalog, ScriptFn, ServiceContext, script_fn};
pub use site::ExecutionSite;
pub use types::*;
