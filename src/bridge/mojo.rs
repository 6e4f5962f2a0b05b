//! Goal executions and their post-build records

use crate::error::{MavenError, MavenResult};
use crate::module::dependency::DEFAULT_PLUGIN_GROUP;
use crate::module::ModuleName;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A module as seen by the running build tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub name: ModuleName,
    pub version: String,
    /// Directory holding the module's POM
    pub base_dir: PathBuf,
}

impl ProjectRef {
    /// Create a project reference
    pub fn new(name: ModuleName, version: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name,
            version: version.into(),
            base_dir: base_dir.into(),
        }
    }
}

/// One goal about to run or just finished inside the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MojoInfo {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: String,
    pub goal: String,
    pub execution_id: Option<String>,
    /// Jar the plugin was loaded from, when it could be located
    pub plugin_jar: Option<PathBuf>,
}

impl MojoInfo {
    /// Whether this is `goal` of the plugin with the given artifactId.
    ///
    /// Plugins printed by prefix (`surefire` for `maven-surefire-plugin`)
    /// match as well.
    pub fn is(&self, artifact_id: &str, goal: &str) -> bool {
        if self.goal != goal {
            return false;
        }
        self.artifact_id == artifact_id
            || plugin_prefix(artifact_id).is_some_and(|p| p == self.artifact_id)
    }

    /// Where the plugin jar lives in a Maven repository rooted at `repo`.
    ///
    /// Prefix-only plugin names resolve to the standard `maven-<p>-plugin`
    /// artifact of the default plugin group.
    pub fn jar_in_repository(&self, repo: &Path) -> PathBuf {
        let (group, artifact) = match &self.group_id {
            Some(g) => (g.clone(), self.artifact_id.clone()),
            None if self.artifact_id.contains("-plugin") => {
                (DEFAULT_PLUGIN_GROUP.to_string(), self.artifact_id.clone())
            }
            None => (
                DEFAULT_PLUGIN_GROUP.to_string(),
                format!("maven-{}-plugin", self.artifact_id),
            ),
        };
        let mut path = repo.to_path_buf();
        for part in group.split('.') {
            path.push(part);
        }
        path.push(&artifact);
        path.push(&self.version);
        path.push(format!("{}-{}.jar", artifact, self.version));
        path
    }
}

impl fmt::Display for MojoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.artifact_id, self.version, self.goal)?;
        if let Some(id) = &self.execution_id {
            write!(f, " ({})", id)?;
        }
        Ok(())
    }
}

fn plugin_prefix(artifact_id: &str) -> Option<&str> {
    artifact_id
        .strip_prefix("maven-")
        .and_then(|s| s.strip_suffix("-plugin"))
        .or_else(|| artifact_id.strip_suffix("-maven-plugin"))
}

/// Record of one completed goal execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedMojo {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: String,
    pub goal: String,
    pub execution_id: Option<String>,
    pub duration_ms: u64,
    /// SHA-256 of the plugin jar; absent when the jar could not be found
    pub digest: Option<String>,
}

impl ExecutedMojo {
    /// Record `mojo` as finished after `duration_ms`
    pub fn new(mojo: &MojoInfo, duration_ms: u64) -> Self {
        let digest = mojo
            .plugin_jar
            .as_deref()
            .and_then(|jar| digest_file(jar).ok());
        Self {
            group_id: mojo.group_id.clone(),
            artifact_id: mojo.artifact_id.clone(),
            version: mojo.version.clone(),
            goal: mojo.goal.clone(),
            execution_id: mojo.execution_id.clone(),
            duration_ms,
            digest,
        }
    }

    /// Human readable duration, e.g. `1.2 sec`
    pub fn duration_string(&self) -> String {
        if self.duration_ms < 1000 {
            format!("{} ms", self.duration_ms)
        } else if self.duration_ms < 60_000 {
            format!("{:.1} sec", self.duration_ms as f64 / 1000.0)
        } else {
            format!("{:.1} min", self.duration_ms as f64 / 60_000.0)
        }
    }
}

impl fmt::Display for ExecutedMojo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.artifact_id, self.version, self.goal)?;
        if let Some(id) = &self.execution_id {
            write!(f, " ({})", id)?;
        }
        write!(f, " {}", self.duration_string())
    }
}

/// Hex SHA-256 of a file's contents
pub fn digest_file(path: &Path) -> MavenResult<String> {
    let contents = fs::read(path)
        .map_err(|e| MavenError::io(format!("reading {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mojo(artifact: &str, goal: &str) -> MojoInfo {
        MojoInfo {
            group_id: None,
            artifact_id: artifact.to_string(),
            version: "2.22.2".to_string(),
            goal: goal.to_string(),
            execution_id: Some("default-test".to_string()),
            plugin_jar: None,
        }
    }

    #[test]
    fn matches_by_artifact_or_prefix() {
        assert!(mojo("maven-surefire-plugin", "test").is("maven-surefire-plugin", "test"));
        assert!(mojo("surefire", "test").is("maven-surefire-plugin", "test"));
        assert!(!mojo("surefire", "report").is("maven-surefire-plugin", "test"));
        assert!(mojo("jetty", "run").is("jetty-maven-plugin", "run"));
    }

    #[test]
    fn jar_location_for_prefix_names() {
        let path = mojo("surefire", "test")
            .jar_in_repository(Path::new("/repo"));
        assert_eq!(
            path,
            PathBuf::from(
                "/repo/org/apache/maven/plugins/maven-surefire-plugin/2.22.2/maven-surefire-plugin-2.22.2.jar"
            )
        );
    }

    #[test]
    fn digest_present_only_when_jar_exists() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("plugin.jar");
        fs::write(&jar, b"jar bytes").unwrap();

        let mut info = mojo("surefire", "test");
        assert_eq!(ExecutedMojo::new(&info, 5).digest, None);

        info.plugin_jar = Some(jar.clone());
        let executed = ExecutedMojo::new(&info, 5);
        assert_eq!(executed.digest.as_deref().map(str::len), Some(64));
        assert_eq!(executed.digest, Some(digest_file(&jar).unwrap()));

        info.plugin_jar = Some(dir.path().join("missing.jar"));
        assert_eq!(ExecutedMojo::new(&info, 5).digest, None);
    }

    #[test]
    fn duration_formatting() {
        let mut executed = ExecutedMojo::new(&mojo("surefire", "test"), 250);
        assert_eq!(executed.duration_string(), "250 ms");
        executed.duration_ms = 1500;
        assert_eq!(executed.duration_string(), "1.5 sec");
        assert_eq!(executed.to_string(), "surefire:2.22.2:test (default-test) 1.5 sec");
    }
}
