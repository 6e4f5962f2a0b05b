//! hudson-maven - out-of-process Maven builds for CI servers
//!
//! Parses Maven module sets into a dependency graph, runs their builds in
//! cached worker processes and bridges the build tool's goal callbacks back
//! to per-module build records on the controller.

pub mod bridge;
pub mod cache;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod listener;
pub mod module;
pub mod orchestration;
pub mod pom;
pub mod record;
pub mod result;
pub mod worker;

pub use error::{MavenError, MavenResult};
