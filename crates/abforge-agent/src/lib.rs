//! abforge agent
//!
//! Everything that acts on the outside world for an experiment:
//!
//! - [`patcher`] instruments TypeScript/React source files
//! - [`git`] drives the working tree
//! - [`providers`] talks to the experiment, deployment and pull-request APIs
//! - [`preflight`] checks a contract is ready to ship
//! - [`orchestrator`] runs the full pipeline for one contract
//!
//! Nothing here reads process-wide state. Settings and clients are built by
//! the caller and handed in.

pub mod git;
pub mod orchestrator;
pub mod patcher;
pub mod preflight;
pub mod providers;

#[cfg(test)]
mod testing;

pub use git::{GitCli, GitOps, SyncState};
pub use orchestrator::{
    restore_code_changes, Orchestrator, PipelineAborted, PipelineOptions, PipelineReport, Stage,
    StageOutcome, StageReport,
};
pub use patcher::{PatchRequest, PatchStrategy, SourcePatcher};
pub use preflight::{CheckResult, LocalCommand, Preflight, PreflightReport};
pub use providers::{ClientMode, ClientSet};
