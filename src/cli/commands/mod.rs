//! CLI command implementations

pub mod build;
pub mod config;
pub mod parse;
pub mod worker;

pub use build::execute as build;
pub use config::execute as config;
pub use parse::execute as parse;
pub use worker::execute as worker;
