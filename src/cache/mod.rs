//! Worker process caching
//!
//! Idle worker processes are pooled per node and handed out again to builds
//! whose toolchain matches exactly.
//!
//! # Reuse rules
//!
//! | Condition on release            | Outcome                     |
//! |---------------------------------|-----------------------------|
//! | age reached `max_age`           | discarded                   |
//! | capacity is zero                | discarded                   |
//! | node disconnected               | discarded                   |
//! | pool full                       | oldest idle worker evicted  |
//! | otherwise                       | pooled, output muted        |

pub mod process;

pub use process::{ProcessCache, ProcessFactory, WorkerProcess, DEFAULT_CAPACITY, DEFAULT_MAX_AGE};
