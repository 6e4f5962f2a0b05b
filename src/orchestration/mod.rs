//! Controller-side orchestration of module-set builds
//!
//! - `module_set`: the live module table and its reconciliation
//! - `build`: one module-set build, scheduled or aggregated
//! - `launcher`: worker command lines and Maven installations
//! - `args`: option tokenizing and variable expansion

pub mod args;
mod build;
mod launcher;
mod module_set;

pub use build::{
    BuildEnvironment, BuildSummary, ModuleBuild, ModuleOutcome, ModuleSetBuild, QueueScheduler,
    Scheduler,
};
pub use launcher::{effective_options, MavenInstallation, WorkerProcessLauncher, AGENT_MAIN_CLASS};
pub use module_set::{Module, ModuleSet, ModuleTable};
