//! Reconflow Orchestrator
//!
//! Turns workflow definitions into runs and drives them to completion:
//!
//! - [`RunBuilder`] creates a run and its QUEUED steps with policy snapshots
//! - [`InputComposer`] assembles each step's typed, capped inputs
//! - [`Coordinator`] is the run state machine: preflight, admission, stage
//!   gating, dispatch, step execution and completion
//! - [`WorkerPool`] executes dispatched steps from a [`WorkQueue`]
//! - [`Reconciler`] reaps stalled runs and prunes expired ones
//!
//! State transitions are published as [`RunEvent`]s through an
//! [`EventPublisher`].

mod admission;
mod builder;
mod composer;
mod coordinator;
mod error;
mod events;
mod executor;
mod maintenance;
mod queue;
mod reconciler;
mod step;
mod worker;

pub use admission::AdmissionController;
pub use builder::RunBuilder;
pub use composer::InputComposer;
pub use coordinator::{Coordinator, Limits};
pub use error::OrchestratorError;
pub use events::{BroadcastPublisher, EventPublisher, NoopPublisher, RunEvent, RunEventType, run_channel};
pub use maintenance::{spawn_promoter, spawn_reconciler};
pub use queue::{ChannelQueue, WorkQueue, WorkUnit};
pub use reconciler::{ReconcileReport, Reconciler};
pub use step::{StepInput, StepOutput};
pub use worker::WorkerPool;
