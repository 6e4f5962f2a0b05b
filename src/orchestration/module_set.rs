//! The live module table of a module-set project
//!
//! Every POM parse reconciles the table: known modules are updated in place
//! so their build history survives, new modules are added, and modules that
//! disappeared are disabled but kept so links to their old builds stay
//! valid. A module that shows up again is enabled again.

use crate::bridge::reporter::ReporterKind;
use crate::channel::ModuleSpec;
use crate::error::{MavenError, MavenResult};
use crate::listener::LogStream;
use crate::module::{ModuleDependency, ModuleName, PomInfo};
use crate::result::BuildResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One module as the controller tracks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: ModuleName,
    pub version: String,
    pub display_name: String,
    pub relative_path: String,
    pub default_goal: Option<String>,
    pub dependencies: BTreeSet<ModuleDependency>,
    /// Reporters attached to builds of this module
    pub reporters: Vec<ReporterKind>,
    /// No longer part of the module set; kept for its history
    #[serde(default)]
    pub disabled: bool,
    /// Number the next build of this module gets
    pub next_build_number: u32,
    /// Numbers and results of past builds, oldest first
    #[serde(default)]
    pub builds: Vec<(u32, Option<BuildResult>)>,
}

impl Module {
    /// New module discovered by the build numbered `build_number`
    pub fn new(pom: &PomInfo, reporters: &[ReporterKind], build_number: u32) -> Self {
        Self {
            name: pom.name.clone(),
            version: pom.version.clone(),
            display_name: pom.display_name.clone(),
            relative_path: pom.relative_path.clone(),
            default_goal: pom.default_goal.clone(),
            dependencies: pom.dependencies.clone(),
            reporters: reporters.to_vec(),
            disabled: false,
            next_build_number: build_number,
            builds: Vec::new(),
        }
    }

    /// Take over what `pom` says about this module; history and reporters stay
    pub fn reconfigure(&mut self, pom: &PomInfo) {
        self.version = pom.version.clone();
        self.display_name = pom.display_name.clone();
        self.relative_path = pom.relative_path.clone();
        self.default_goal = pom.default_goal.clone();
        self.dependencies = pom.dependencies.clone();
        self.disabled = false;
    }

    /// Make sure the next build is numbered at least `number`
    pub fn update_next_build_number(&mut self, number: u32) {
        self.next_build_number = self.next_build_number.max(number);
    }

    /// Result of the latest build, if any
    pub fn last_result(&self) -> Option<BuildResult> {
        self.builds.last().and_then(|(_, r)| *r)
    }

    /// What a worker needs to know about this module
    pub fn spec(&self) -> ModuleSpec {
        let dir = self
            .relative_path
            .strip_suffix(".xml")
            .and_then(|p| p.rsplit_once('/').map(|(dir, _)| dir))
            .unwrap_or(&self.relative_path);
        ModuleSpec {
            name: self.name.clone(),
            version: self.version.clone(),
            relative_path: dir.to_string(),
            reporters: self.reporters.clone(),
        }
    }
}

/// Persisted form of a [`ModuleSet`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTable {
    pub root: Option<ModuleName>,
    pub root_display_name: Option<String>,
    pub modules: BTreeMap<ModuleName, Module>,
    /// Active modules in parse order
    #[serde(default)]
    pub active: Vec<ModuleName>,
}

/// A Maven module-set project
pub struct ModuleSet {
    name: String,
    reporters: Vec<ReporterKind>,
    table: Mutex<ModuleTable>,
}

impl ModuleSet {
    /// Empty project named `name` whose new modules get `reporters`
    pub fn new(name: impl Into<String>, reporters: Vec<ReporterKind>) -> Self {
        Self::from_table(name, reporters, ModuleTable::default())
    }

    /// Project restored from a saved table
    pub fn from_table(name: impl Into<String>, reporters: Vec<ReporterKind>, table: ModuleTable) -> Self {
        Self {
            name: name.into(),
            reporters,
            table: Mutex::new(table),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ModuleTable> {
        match self.table.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Copy of the whole table
    pub fn table(&self) -> ModuleTable {
        self.lock().clone()
    }

    /// The root module, once a parse has happened
    pub fn root_module(&self) -> Option<ModuleName> {
        self.lock().root.clone()
    }

    pub fn module(&self, name: &ModuleName) -> Option<Module> {
        self.lock().modules.get(name).cloned()
    }

    /// Enabled modules in parse order
    pub fn active_modules(&self) -> Vec<Module> {
        let table = self.lock();
        table
            .active
            .iter()
            .filter_map(|n| table.modules.get(n))
            .filter(|m| !m.disabled)
            .cloned()
            .collect()
    }

    /// Replace the module table with the result of a parse.
    ///
    /// Runs under one lock from snapshot to reinsertion, so nobody sees a
    /// half-updated table. Returns the active modules in parse order.
    pub fn reconcile(
        &self,
        poms: &[PomInfo],
        build_number: u32,
        log: &LogStream,
        verbose: bool,
    ) -> MavenResult<Vec<ModuleName>> {
        let root = poms
            .first()
            .ok_or_else(|| MavenError::Internal("POM parse produced no modules".to_string()))?;

        let mut table = self.lock();
        let mut old = std::mem::take(&mut table.modules);

        if verbose {
            log.println(&format!("Root POM is {}", root.name));
        }
        table.root = Some(root.name.clone());
        table.root_display_name = Some(root.display_name.clone());

        let mut active = Vec::with_capacity(poms.len());
        for pom in poms {
            let module = match old.remove(&pom.name) {
                Some(mut existing) => {
                    debug!("Reconfiguring {}", pom.name);
                    if verbose {
                        log.println(&format!("Reconfiguring {}", pom.name));
                    }
                    existing.reconfigure(pom);
                    existing
                }
                None => {
                    log.println(&format!(
                        "Discovered a new module {} {}",
                        pom.name, pom.display_name
                    ));
                    Module::new(pom, &self.reporters, build_number)
                }
            };
            active.push(pom.name.clone());
            table.modules.insert(pom.name.clone(), module);
        }

        for (name, mut module) in old {
            debug!("Disabling {}", name);
            if verbose {
                log.println(&format!("Disabling {}", name));
            }
            module.disabled = true;
            table.modules.insert(name, module);
        }

        for module in table.modules.values_mut() {
            module.update_next_build_number(build_number);
        }
        table.active = active.clone();
        Ok(active)
    }

    /// Record the outcome of a module build and advance its build number
    pub fn record_build(&self, name: &ModuleName, number: u32, result: Option<BuildResult>) {
        let mut table = self.lock();
        if let Some(module) = table.modules.get_mut(name) {
            module.builds.push((number, result));
            module.update_next_build_number(number + 1);
        }
    }
}

impl std::fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSet")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::MemoryLog;
    use crate::module::ProjectModel;

    fn pom(artifact: &str, path: &str) -> PomInfo {
        let model = ProjectModel {
            group_id: "org.example".to_string(),
            artifact_id: artifact.to_string(),
            version: "1.0".to_string(),
            ..Default::default()
        };
        PomInfo::new(&model, None, path)
    }

    fn name(artifact: &str) -> ModuleName {
        ModuleName::new("org.example", artifact)
    }

    #[test]
    fn new_modules_are_discovered() {
        let set = ModuleSet::new("demo", ReporterKind::ALL.to_vec());
        let log = MemoryLog::default();

        let active = set
            .reconcile(&[pom("root", ""), pom("core", "core")], 1, &log.stream(), false)
            .unwrap();

        assert_eq!(active, vec![name("root"), name("core")]);
        assert_eq!(set.root_module(), Some(name("root")));
        assert!(log
            .contents()
            .contains("Discovered a new module org.example:core core"));
        assert_eq!(set.module(&name("core")).unwrap().reporters, ReporterKind::ALL.to_vec());
    }

    #[test]
    fn existing_modules_keep_their_history() {
        let set = ModuleSet::new("demo", vec![]);
        let log = LogStream::null();
        set.reconcile(&[pom("root", ""), pom("core", "core")], 1, &log, false)
            .unwrap();
        set.record_build(&name("core"), 1, Some(BuildResult::Success));

        let mut moved = pom("core", "modules/core");
        moved.display_name = "Core".to_string();
        set.reconcile(&[pom("root", ""), moved], 2, &log, false).unwrap();

        let core = set.module(&name("core")).unwrap();
        assert_eq!(core.relative_path, "modules/core");
        assert_eq!(core.display_name, "Core");
        assert_eq!(core.builds, vec![(1, Some(BuildResult::Success))]);
        assert_eq!(core.next_build_number, 2);
    }

    #[test]
    fn vanished_modules_are_disabled_not_removed() {
        let set = ModuleSet::new("demo", vec![]);
        let log = MemoryLog::default();
        set.reconcile(&[pom("root", ""), pom("old", "old")], 1, &log.stream(), false)
            .unwrap();

        let active = set
            .reconcile(&[pom("root", "")], 2, &log.stream(), true)
            .unwrap();

        assert_eq!(active, vec![name("root")]);
        let old = set.module(&name("old")).unwrap();
        assert!(old.disabled);
        assert_eq!(set.active_modules().len(), 1);
        assert!(log.contents().contains("Disabling org.example:old"));

        // coming back enables it again
        set.reconcile(&[pom("root", ""), pom("old", "old")], 3, &log.stream(), false)
            .unwrap();
        assert!(!set.module(&name("old")).unwrap().disabled);
        assert_eq!(set.active_modules().len(), 2);
    }

    #[test]
    fn next_build_numbers_advance() {
        let set = ModuleSet::new("demo", vec![]);
        let log = LogStream::null();
        set.reconcile(&[pom("root", "")], 1, &log, false).unwrap();
        set.reconcile(&[pom("root", "")], 7, &log, false).unwrap();
        assert_eq!(set.module(&name("root")).unwrap().next_build_number, 7);
    }

    #[test]
    fn empty_parse_is_a_defect() {
        let set = ModuleSet::new("demo", vec![]);
        let err = set.reconcile(&[], 1, &LogStream::null(), false).unwrap_err();
        assert!(err.is_defect());
    }

    #[test]
    fn spec_uses_module_directory() {
        let module = Module::new(&pom("plugin", "plugins/plugin/pom.xml"), &[], 1);
        assert_eq!(module.spec().relative_path, "plugins/plugin");
        let module = Module::new(&pom("core", "core"), &[], 1);
        assert_eq!(module.spec().relative_path, "core");
    }
}
