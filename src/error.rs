//! Error types for hudson-maven
//!
//! All modules use `MavenResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hudson-maven operations
pub type MavenResult<T> = Result<T, MavenError>;

/// All errors that can occur while parsing, launching and driving Maven builds
#[derive(Error, Debug)]
pub enum MavenError {
    // Abort errors: the cause is already in the build log
    #[error("aborted (already reported)")]
    AlreadyReported,

    #[error("{0}")]
    Abort(String),

    #[error("{reporter} failed")]
    ReporterAborted { reporter: String },

    #[error("Execution aborted")]
    Interrupted,

    // Toolchain errors
    #[error("Maven version is not configured for this project. Can't determine which Maven to run")]
    MavenNotConfigured,

    #[error("No classworlds*.jar found in {home}. Is this a valid Maven installation?")]
    ClassWorldsNotFound { home: PathBuf },

    #[error("{project} is not configured with a JDK, but your PATH doesn't include Java")]
    JavaNotFound {
        project: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch Maven: {0}")]
    Launch(String),

    // Channel errors
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Unexpected reply from worker: expected {expected}")]
    UnexpectedReply { expected: &'static str },

    // POM errors
    #[error("No such file: {0}")]
    NoSuchFile(PathBuf),

    #[error("Failed to parse POM {path}: {reason}")]
    PomParse { path: PathBuf, reason: String },

    #[error("Failed to parse report {path}: {reason}")]
    ReportParse { path: PathBuf, reason: String },

    #[error("Module {0} is not part of this module set")]
    UnknownModule(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MavenError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a channel error
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel(reason.into())
    }

    /// Whether this error aborts a build with a message that needs no stack trace.
    ///
    /// Errors for which this returns `true` are converted into a FAILURE
    /// result by the orchestrator.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Self::AlreadyReported
                | Self::Abort(_)
                | Self::ReporterAborted { .. }
                | Self::MavenNotConfigured
                | Self::ClassWorldsNotFound { .. }
                | Self::NoSuchFile(_)
        )
    }

    /// Whether this error was caused by an interruption of the running build
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether this error represents a defect in the code rather than a build failure
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::UnexpectedReply { .. })
    }

    /// Message to write to the build log, if any
    ///
    /// `AlreadyReported` has nothing left to say.
    pub fn report_message(&self) -> Option<String> {
        match self {
            Self::AlreadyReported => None,
            other => Some(other.to_string()),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MavenNotConfigured => Some("Set [maven] home in config.toml or pass --maven-home"),
            Self::JavaNotFound { .. } => Some("Set [maven] jdk_home in config.toml or add java to PATH"),
            Self::ClassWorldsNotFound { .. } => Some("Point [maven] home at an unpacked Maven distribution"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MavenError::ReporterAborted {
            reporter: "SurefireArchiver".to_string(),
        };
        assert_eq!(err.to_string(), "SurefireArchiver failed");
    }

    #[test]
    fn already_reported_has_no_message() {
        assert!(MavenError::AlreadyReported.report_message().is_none());
        assert_eq!(
            MavenError::Abort("boom".to_string()).report_message().as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn abort_classification() {
        assert!(MavenError::AlreadyReported.is_abort());
        assert!(MavenError::NoSuchFile(PathBuf::from("pom.xml")).is_abort());
        assert!(!MavenError::Internal("bug".to_string()).is_abort());
        assert!(MavenError::Internal("bug".to_string()).is_defect());
        assert!(MavenError::Interrupted.is_interrupted());
    }

    #[test]
    fn error_hint() {
        assert!(MavenError::MavenNotConfigured.hint().is_some());
        assert!(MavenError::ChannelClosed.hint().is_none());
    }
}
