//! Build record persistence
//!
//! Each project keeps its state under `<state_dir>/projects/<name>/`:
//!
//! ```text
//! modules.json              module table, reloaded by the next build
//! builds/<n>/build.json     result and executed goals of build n
//! builds/<n>/<module>.log   the module's slice of the build log
//! ```

use crate::bridge::mojo::ExecutedMojo;
use crate::error::{MavenError, MavenResult};
use crate::module::ModuleName;
use crate::orchestration::{BuildSummary, ModuleTable};
use crate::result::BuildResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// One module's part in a recorded build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: ModuleName,
    /// Build number of the module build
    pub number: u32,
    pub result: Option<BuildResult>,
    #[serde(default)]
    pub executed_mojos: Vec<ExecutedMojo>,
}

/// A finished module-set build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub project: String,
    pub number: u32,
    /// Combined result; unset when deferred to a scheduled build
    pub result: Option<BuildResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub modules: Vec<ModuleRecord>,
}

impl BuildRecord {
    /// Record of build `number` of `project` from its summary
    pub fn new(
        project: impl Into<String>,
        number: u32,
        summary: &BuildSummary,
        started_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        Self {
            project: project.into(),
            number,
            result: summary.result(),
            started_at,
            duration_ms,
            modules: summary
                .modules
                .iter()
                .map(|m| ModuleRecord {
                    name: m.name.clone(),
                    number: m.number,
                    result: m.result,
                    executed_mojos: m.mojos.clone(),
                })
                .collect(),
        }
    }
}

/// File-backed store of one project's builds
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    /// Store for `project` under `state_dir`
    pub fn new(state_dir: &Path, project: &str) -> Self {
        Self {
            root: state_dir.join("projects").join(project),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self) -> PathBuf {
        self.root.join("modules.json")
    }

    fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    fn build_dir(&self, number: u32) -> PathBuf {
        self.builds_dir().join(number.to_string())
    }

    /// Saved module table, if any
    pub async fn load_table(&self) -> MavenResult<Option<ModuleTable>> {
        read_json(&self.table_path()).await
    }

    pub async fn save_table(&self, table: &ModuleTable) -> MavenResult<()> {
        write_json(&self.table_path(), table).await
    }

    /// Number of every recorded build, ascending
    pub async fn build_numbers(&self) -> MavenResult<Vec<u32>> {
        let dir = self.builds_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| MavenError::io(format!("reading {}", dir.display()), e))?;
        let mut numbers = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MavenError::io(format!("reading {}", dir.display()), e))?
        {
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Number the next build gets
    pub async fn next_build_number(&self) -> MavenResult<u32> {
        Ok(self.build_numbers().await?.last().map_or(1, |n| n + 1))
    }

    /// Persist `record` along with the module logs in `summary`
    pub async fn save(&self, record: &BuildRecord, summary: &BuildSummary) -> MavenResult<()> {
        let dir = self.build_dir(record.number);
        write_json(&dir.join("build.json"), record).await?;
        for module in &summary.modules {
            if module.log.is_empty() {
                continue;
            }
            let path = dir.join(format!("{}.log", module.name.to_file_system_name()));
            fs::write(&path, &module.log)
                .await
                .map_err(|e| MavenError::io(format!("writing {}", path.display()), e))?;
        }
        debug!("Saved build #{} to {}", record.number, dir.display());
        Ok(())
    }

    pub async fn load(&self, number: u32) -> MavenResult<Option<BuildRecord>> {
        read_json(&self.build_dir(number).join("build.json")).await
    }

    /// Log of `module` in build `number`
    pub async fn module_log(&self, number: u32, module: &ModuleName) -> MavenResult<Option<String>> {
        let path = self
            .build_dir(number)
            .join(format!("{}.log", module.to_file_system_name()));
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .await
            .map(Some)
            .map_err(|e| MavenError::io(format!("reading {}", path.display()), e))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> MavenResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| MavenError::io(format!("reading {}", path.display()), e))?;
    Ok(Some(serde_json::from_str(&content)?))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> MavenResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| MavenError::io(format!("creating {}", parent.display()), e))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| MavenError::io(format!("writing {}", path.display()), e))
}
