//! Module identity and the module dependency graph
//!
//! - [`ModuleName`]: `(groupId, artifactId)` identity of a module
//! - [`ModuleDependency`]: versioned reference with `*`/`-` sentinels
//! - [`PomInfo`]: immutable per-parse snapshot of one module
//! - [`DependencyGraph`]: edges between the modules of one module set

pub mod dependency;
pub mod graph;
pub mod name;
pub mod pom_info;

pub use dependency::ModuleDependency;
pub use graph::DependencyGraph;
pub use name::ModuleName;
pub use pom_info::{cut_cycle, cut_cycles, Coordinates, PomInfo, ProjectModel};
