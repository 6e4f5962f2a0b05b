//! Event bridge between the build tool and the controller
//!
//! Inside the worker the build engine raises flat goal callbacks. The
//! [`Adapter`] derives module boundaries from them, the [`ModuleSetBuilder`]
//! feeds reporters and build proxies, and the proxies forward everything to
//! the controller as ordered [`BuildEvent`]s.

pub mod adapter;
pub mod builder;
pub mod mojo;
pub mod proxy;
pub mod reporter;

pub use adapter::{Adapter, ExecutionListener, LifecycleListener};
pub use builder::{MavenBuilder, ModuleSetBuilder, ModuleSlot};
pub use mojo::{ExecutedMojo, MojoInfo, ProjectRef};
pub use proxy::{BuildEvent, BuildMessage, BuildProxy, EventProxy, ProxyDispatcher};
pub use reporter::{create_reporters, MavenReporter, ModuleContext, ReporterKind};
