//! Reporters: observers that record build facts while goals run
//!
//! Reporters are picked from a fixed registry ([`ReporterKind`]) instead of
//! being discovered at runtime. Each module gets its own reporter instances.

use crate::bridge::mojo::{digest_file, MojoInfo, ProjectRef};
use crate::bridge::proxy::BuildProxy;
use crate::error::{MavenError, MavenResult};
use crate::listener::LogStream;
use crate::result::BuildResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// What a reporter gets to see of the module being built
pub struct ModuleContext<'a> {
    pub proxy: &'a dyn BuildProxy,
    pub project: &'a ProjectRef,
    pub log: &'a LogStream,
}

/// Observer of one module's build.
///
/// Every callback returns whether the build may continue; `false` aborts the
/// build with "<name> failed".
#[async_trait]
pub trait MavenReporter: Send + Sync {
    /// Identity used in abort messages
    fn name(&self) -> &str;

    /// Before the build tool starts
    async fn pre_build(&mut self, _ctx: &ModuleContext<'_>) -> MavenResult<bool> {
        Ok(true)
    }

    /// The build tool moved into this module
    async fn enter_module(&mut self, _ctx: &ModuleContext<'_>) -> MavenResult<bool> {
        Ok(true)
    }

    /// The build tool moved out of this module
    async fn leave_module(&mut self, _ctx: &ModuleContext<'_>) -> MavenResult<bool> {
        Ok(true)
    }

    /// Before a goal of this module runs
    async fn pre_execute(&mut self, _ctx: &ModuleContext<'_>, _mojo: &MojoInfo) -> MavenResult<bool> {
        Ok(true)
    }

    /// After a goal of this module ran; `error` is set when it failed
    async fn post_execute(
        &mut self,
        _ctx: &ModuleContext<'_>,
        _mojo: &MojoInfo,
        _error: Option<&str>,
    ) -> MavenResult<bool> {
        Ok(true)
    }

    /// After the whole build finished
    async fn post_build(&mut self, _ctx: &ModuleContext<'_>) -> MavenResult<bool> {
        Ok(true)
    }

    /// Whether a failed tool run should still count as a success.
    ///
    /// Test failures make Maven exit non-zero even though the build is only
    /// unstable.
    fn marks_as_success(&self) -> bool {
        false
    }
}

/// Registry of the available reporters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// Records surefire/failsafe results; failures make the module UNSTABLE
    TestResults,
    /// Logs a digest of each module's main artifact
    Fingerprinter,
}

impl ReporterKind {
    pub const ALL: [ReporterKind; 2] = [ReporterKind::TestResults, ReporterKind::Fingerprinter];

    /// Fresh reporter instance of this kind
    pub fn create(self) -> Box<dyn MavenReporter> {
        match self {
            Self::TestResults => Box::new(TestResultsReporter::default()),
            Self::Fingerprinter => Box::new(FingerprintReporter),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestResults => "test_results",
            Self::Fingerprinter => "fingerprinter",
        }
    }
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReporterKind {
    type Err = MavenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MavenError::Abort(format!("Unknown reporter: {}", s)))
    }
}

/// Instantiate the reporters for one module, in registration order
pub fn create_reporters(kinds: &[ReporterKind]) -> Vec<Box<dyn MavenReporter>> {
    kinds.iter().map(|k| k.create()).collect()
}

/// Root element of a surefire XML report
#[derive(Debug, Deserialize)]
struct TestSuite {
    #[serde(rename = "@tests", default)]
    tests: u32,
    #[serde(rename = "@failures", default)]
    failures: u32,
    #[serde(rename = "@errors", default)]
    errors: u32,
    #[serde(rename = "@skipped", default)]
    skipped: u32,
}

/// Totals over all report files of one test goal
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TestTotals {
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestTotals {
    pub fn failed(&self) -> u32 {
        self.failures + self.errors
    }
}

/// Sum the `TEST-*.xml` reports in `dir`; `None` when there are none
pub async fn read_test_reports(dir: &Path) -> MavenResult<Option<TestTotals>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MavenError::io(format!("reading {}", dir.display()), e)),
    };

    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MavenError::io(format!("reading {}", dir.display()), e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("TEST-") && name.ends_with(".xml") {
            files.push(entry.path());
        }
    }
    if files.is_empty() {
        return Ok(None);
    }
    files.sort();

    let mut totals = TestTotals::default();
    for file in files {
        let xml = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| MavenError::io(format!("reading {}", file.display()), e))?;
        let suite: TestSuite = quick_xml::de::from_str(&xml).map_err(|e| MavenError::ReportParse {
            path: file.clone(),
            reason: e.to_string(),
        })?;
        totals.tests += suite.tests;
        totals.failures += suite.failures;
        totals.errors += suite.errors;
        totals.skipped += suite.skipped;
    }
    Ok(Some(totals))
}

/// Records test results after each test goal
#[derive(Debug, Default)]
pub struct TestResultsReporter {
    has_failures: bool,
}

impl TestResultsReporter {
    fn reports_dir(project: &ProjectRef, mojo: &MojoInfo) -> Option<PathBuf> {
        if mojo.is("maven-surefire-plugin", "test") {
            Some(project.base_dir.join("target").join("surefire-reports"))
        } else if mojo.is("maven-failsafe-plugin", "integration-test") {
            Some(project.base_dir.join("target").join("failsafe-reports"))
        } else {
            None
        }
    }
}

#[async_trait]
impl MavenReporter for TestResultsReporter {
    fn name(&self) -> &str {
        "TestResults"
    }

    async fn post_execute(
        &mut self,
        ctx: &ModuleContext<'_>,
        mojo: &MojoInfo,
        _error: Option<&str>,
    ) -> MavenResult<bool> {
        let Some(dir) = Self::reports_dir(ctx.project, mojo) else {
            return Ok(true);
        };
        ctx.log.println("[JENKINS] Recording test results");

        let totals = match read_test_reports(&dir).await {
            Ok(Some(totals)) => totals,
            Ok(None) => return Ok(true),
            Err(e) => {
                ctx.log.println(&format!("FATAL: Failed to read test reports: {}", e));
                ctx.proxy.set_result(BuildResult::Failure).await?;
                return Ok(true);
            }
        };
        debug!("{}: {:?}", ctx.project.name, totals);

        if totals.failed() > 0 {
            ctx.log.println(&format!(
                "[JENKINS] Tests run: {}, Failures: {}, Errors: {}, Skipped: {}",
                totals.tests, totals.failures, totals.errors, totals.skipped
            ));
            ctx.proxy.set_result(BuildResult::Unstable).await?;
            self.has_failures = true;
        }
        Ok(true)
    }

    fn marks_as_success(&self) -> bool {
        self.has_failures
    }
}

/// Logs the SHA-256 of the module's packaged artifact
#[derive(Debug, Default)]
pub struct FingerprintReporter;

#[async_trait]
impl MavenReporter for FingerprintReporter {
    fn name(&self) -> &str {
        "Fingerprinter"
    }

    async fn leave_module(&mut self, ctx: &ModuleContext<'_>) -> MavenResult<bool> {
        let project = ctx.project;
        let target = project.base_dir.join("target");
        for ext in ["jar", "war", "ear"] {
            let artifact = target.join(format!(
                "{}-{}.{}",
                project.name.artifact_id, project.version, ext
            ));
            if artifact.is_file() {
                let digest = digest_file(&artifact)?;
                ctx.log.println(&format!(
                    "[JENKINS] Fingerprinted {} {}",
                    artifact.display(),
                    digest
                ));
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::proxy::tests::RecordingProxy;
    use crate::listener::MemoryLog;
    use crate::module::ModuleName;
    use tempfile::TempDir;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="org.example.CoreTest" time="0.12" tests="4" errors="0" skipped="1" failures="1">
  <properties><property name="java.version" value="17"/></properties>
  <testcase name="works" classname="org.example.CoreTest" time="0.01"/>
  <testcase name="breaks" classname="org.example.CoreTest" time="0.02">
    <failure message="expected 1">trace</failure>
  </testcase>
</testsuite>"#;

    fn surefire() -> MojoInfo {
        MojoInfo {
            group_id: None,
            artifact_id: "surefire".to_string(),
            version: "3.2.5".to_string(),
            goal: "test".to_string(),
            execution_id: Some("default-test".to_string()),
            plugin_jar: None,
        }
    }

    #[test]
    fn registry_names_round_trip() {
        for kind in ReporterKind::ALL {
            assert_eq!(kind.as_str().parse::<ReporterKind>().unwrap(), kind);
            assert!(!kind.create().name().is_empty());
        }
        assert!("surefire".parse::<ReporterKind>().is_err());
        assert_eq!(create_reporters(&ReporterKind::ALL).len(), 2);
    }

    #[tokio::test]
    async fn test_failures_make_module_unstable() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("target/surefire-reports");
        std::fs::create_dir_all(&reports).unwrap();
        std::fs::write(reports.join("TEST-org.example.CoreTest.xml"), REPORT).unwrap();

        let project = ProjectRef::new(ModuleName::new("org.example", "core"), "1.0", dir.path());
        let proxy = RecordingProxy::default();
        let log = MemoryLog::default();
        let stream = log.stream();
        let ctx = ModuleContext {
            proxy: &proxy,
            project: &project,
            log: &stream,
        };

        let mut reporter = TestResultsReporter::default();
        assert!(reporter
            .post_execute(&ctx, &surefire(), Some("There are test failures"))
            .await
            .unwrap());

        assert!(reporter.marks_as_success());
        assert_eq!(*proxy.calls.lock().unwrap(), vec!["result UNSTABLE"]);
        assert!(log.contents().contains("Tests run: 4, Failures: 1, Errors: 0, Skipped: 1"));
    }

    #[tokio::test]
    async fn missing_reports_are_ignored() {
        let dir = TempDir::new().unwrap();
        let project = ProjectRef::new(ModuleName::new("g", "a"), "1.0", dir.path());
        let proxy = RecordingProxy::default();
        let stream = LogStream::null();
        let ctx = ModuleContext {
            proxy: &proxy,
            project: &project,
            log: &stream,
        };

        let mut reporter = TestResultsReporter::default();
        assert!(reporter.post_execute(&ctx, &surefire(), None).await.unwrap());
        assert!(!reporter.marks_as_success());
        assert!(proxy.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fingerprints_packaged_artifact() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/core-1.0.jar"), b"jar").unwrap();

        let project = ProjectRef::new(ModuleName::new("g", "core"), "1.0", dir.path());
        let proxy = RecordingProxy::default();
        let log = MemoryLog::default();
        let stream = log.stream();
        let ctx = ModuleContext {
            proxy: &proxy,
            project: &project,
            log: &stream,
        };

        assert!(FingerprintReporter.leave_module(&ctx).await.unwrap());
        assert!(log.contents().contains("core-1.0.jar"));
    }
}
