//! Pipeline runs for folio.
//!
//! A run takes one trigger through the build stage and, when the trigger is
//! allowed to publish, the deploy stage. Publishing runs share a named
//! concurrency group: entering it supersedes any older run that has not yet
//! started deploying.

pub mod cancel;
pub mod error;
pub mod group;
pub mod marker;
pub mod run;
pub mod state;
pub mod trigger;

pub use cancel::CancelToken;
pub use error::PipelineError;
pub use group::{ConcurrencyGroups, DeployPermit, GroupLease};
pub use marker::{GroupMarker, PublishLock};
pub use run::{Pipeline, PipelineConfig, RunReport};
pub use state::{Lifecycle, RunState};
pub use trigger::{RunPlan, Trigger};
