//! Build-relevant snapshot of one parsed POM

use crate::module::dependency::ModuleDependency;
use crate::module::name::ModuleName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Maven coordinates as declared in a POM; any part may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coordinates {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: Option<String>,
}

impl Coordinates {
    /// Coordinates with all three parts present
    pub fn new(group_id: &str, artifact_id: &str, version: &str) -> Self {
        Self {
            group_id: Some(group_id.to_string()),
            artifact_id: artifact_id.to_string(),
            version: Some(version.to_string()),
        }
    }
}

/// Effective project model produced by the POM parser.
///
/// This is the input to [`PomInfo::new`]; it carries everything the
/// dependency computation looks at, with inheritance already applied to the
/// project's own coordinates.
#[derive(Debug, Clone, Default)]
pub struct ProjectModel {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub name: Option<String>,
    pub default_goal: Option<String>,
    pub parent: Option<Coordinates>,
    pub dependencies: Vec<Coordinates>,
    pub plugins: Vec<Coordinates>,
    pub report_plugins: Vec<Coordinates>,
    pub extensions: Vec<Coordinates>,
    /// Module entries as written in `<modules>`
    pub modules: Vec<String>,
}

impl ProjectModel {
    /// Identity of this project
    pub fn module_name(&self) -> ModuleName {
        ModuleName::new(&self.group_id, &self.artifact_id)
    }
}

/// Serializable snapshot of one module's build-relevant metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PomInfo {
    pub name: ModuleName,
    pub version: String,
    /// Human readable name (`<name>`, or the artifactId)
    pub display_name: String,
    pub default_goal: Option<String>,
    /// Path of the module directory relative to the root of the tree; `""` for the root
    pub relative_path: String,
    /// Enclosing module in the parsed tree, used to cut cycles
    pub parent: Option<ModuleName>,
    /// Modules this one depends on
    pub dependencies: BTreeSet<ModuleDependency>,
}

impl PomInfo {
    /// Snapshot `project` found at `relative_path` below `parent`.
    ///
    /// The dependency set is the union of declared dependencies, the parent
    /// POM, build plugins, report plugins and build extensions, minus any
    /// reference to the module itself.
    pub fn new(project: &ProjectModel, parent: Option<&PomInfo>, relative_path: &str) -> Self {
        let name = project.module_name();
        let mut dependencies = BTreeSet::new();

        for dep in &project.dependencies {
            dependencies.insert(ModuleDependency::new(
                dep.group_id.as_deref().unwrap_or(&project.group_id),
                &dep.artifact_id,
                dep.version.as_deref(),
            ));
        }
        if let Some(p) = &project.parent {
            dependencies.insert(ModuleDependency::new(
                p.group_id.as_deref().unwrap_or(&project.group_id),
                &p.artifact_id,
                p.version.as_deref(),
            ));
        }
        for plugin in project.plugins.iter().chain(&project.report_plugins) {
            dependencies.insert(ModuleDependency::from_plugin(
                plugin.group_id.as_deref(),
                &plugin.artifact_id,
                plugin.version.as_deref(),
            ));
        }
        for ext in &project.extensions {
            dependencies.insert(ModuleDependency::new(
                ext.group_id.as_deref().unwrap_or(&project.group_id),
                &ext.artifact_id,
                ext.version.as_deref(),
            ));
        }

        // a parent POM that both uses and builds a plugin would otherwise
        // leave the plugin module depending on itself
        dependencies.retain(|d| !d.refers_to(&name));

        Self {
            display_name: project
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| project.artifact_id.clone()),
            name,
            version: project.version.clone(),
            default_goal: project.default_goal.clone(),
            relative_path: relative_path.to_string(),
            parent: parent.map(|p| p.name.clone()),
            dependencies,
        }
    }

    /// This module as a dependency at its own version
    pub fn as_dependency(&self) -> ModuleDependency {
        ModuleDependency::from_module(&self.name, &self.version)
    }

    /// Whether this module depends on `name` in any version
    pub fn depends_on(&self, name: &ModuleName) -> bool {
        self.dependencies.iter().any(|d| d.refers_to(name))
    }
}

/// Remove every dependency an ancestor of `poms[index]` has on it.
///
/// A parent POM may declare a plugin that is built by one of its child
/// modules; the child already depends on the parent, so the reverse edge
/// would form a cycle. Ancestors are found by following `parent` links
/// within `poms`.
pub fn cut_cycle(poms: &mut [PomInfo], index: usize) {
    let by_name: HashMap<ModuleName, usize> = poms
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.clone(), i))
        .collect();

    let me = poms[index].name.clone();
    let mut seen = HashSet::new();
    let mut cursor = poms[index].parent.clone();

    while let Some(parent) = cursor {
        if !seen.insert(parent.clone()) {
            break;
        }
        let Some(&i) = by_name.get(&parent) else {
            break;
        };
        poms[i].dependencies.retain(|d| !d.refers_to(&me));
        cursor = poms[i].parent.clone();
    }
}

/// Apply [`cut_cycle`] to every entry, leaves first
pub fn cut_cycles(poms: &mut [PomInfo]) {
    for index in (0..poms.len()).rev() {
        cut_cycle(poms, index);
    }
}
