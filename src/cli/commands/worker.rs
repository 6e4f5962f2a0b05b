//! Worker command - the process side of a controller channel
//!
//! Stdout carries protocol frames only, build output included. Diagnostics
//! go to stderr, which the controller copies into the build's log.

use crate::cli::args::WorkerArgs;
use crate::error::MavenResult;
use crate::worker::{self, ConsoleEngine};
use tracing::info;

/// Execute the worker command
pub async fn execute(args: WorkerArgs) -> MavenResult<()> {
    info!(
        "Worker {} serving Maven at {}",
        std::process::id(),
        args.maven_home.display()
    );
    let mut engine = ConsoleEngine::new(args.maven_home);
    worker::serve(tokio::io::stdin(), tokio::io::stdout(), &mut engine).await
}
