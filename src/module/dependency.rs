//! Versioned dependency references between modules

use crate::module::name::ModuleName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default groupId Maven assumes for a plugin reference without one
pub const DEFAULT_PLUGIN_GROUP: &str = "org.apache.maven.plugins";

/// A reference from one module to `(groupId, artifactId, version)`.
///
/// Two sentinel versions exist: [`ModuleDependency::UNKNOWN`] matches any
/// version, [`ModuleDependency::NONE`] matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl ModuleDependency {
    /// Version that matches any concrete version
    pub const UNKNOWN: &'static str = "*";

    /// Version that matches no concrete version
    pub const NONE: &'static str = "-";

    /// Dependency from a raw `<dependency>`/`<extension>` declaration.
    ///
    /// A missing version becomes [`ModuleDependency::UNKNOWN`].
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: Option<&str>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.unwrap_or(Self::UNKNOWN).to_string(),
        }
    }

    /// Dependency on a build or report plugin.
    ///
    /// A plugin reference without a version becomes [`ModuleDependency::NONE`],
    /// so it cannot be satisfied by a same-named module that happens to be
    /// built in the same reactor.
    pub fn from_plugin(group_id: Option<&str>, artifact_id: &str, version: Option<&str>) -> Self {
        Self {
            group_id: group_id.unwrap_or(DEFAULT_PLUGIN_GROUP).to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.unwrap_or(Self::NONE).to_string(),
        }
    }

    /// Dependency that points at a module at a concrete version
    pub fn from_module(name: &ModuleName, version: &str) -> Self {
        Self::new(&name.group_id, &name.artifact_id, Some(version))
    }

    /// Module this dependency refers to
    pub fn name(&self) -> ModuleName {
        ModuleName::new(&self.group_id, &self.artifact_id)
    }

    /// Whether this dependency refers to the given module name
    pub fn refers_to(&self, name: &ModuleName) -> bool {
        self.group_id == name.group_id && self.artifact_id == name.artifact_id
    }

    /// Same reference with the version replaced by [`ModuleDependency::UNKNOWN`]
    pub fn with_unknown_version(&self) -> Self {
        Self {
            version: Self::UNKNOWN.to_string(),
            ..self.clone()
        }
    }

    /// Whether a module `name` at `version` satisfies this dependency
    pub fn is_satisfied_by(&self, name: &ModuleName, version: &str) -> bool {
        if !self.refers_to(name) || self.version == Self::NONE {
            return false;
        }
        self.version == Self::UNKNOWN || self.version == version
    }
}

impl fmt::Display for ModuleDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_version_on_declaration_is_unknown() {
        let dep = ModuleDependency::new("g", "a", None);
        assert_eq!(dep.version, ModuleDependency::UNKNOWN);
        assert!(dep.is_satisfied_by(&ModuleName::new("g", "a"), "1.0"));
        assert!(dep.is_satisfied_by(&ModuleName::new("g", "a"), "2.0-SNAPSHOT"));
    }

    #[test]
    fn missing_version_on_plugin_matches_nothing() {
        let plugin = ModuleDependency::from_plugin(Some("g"), "a", None);
        let unknown = ModuleDependency::new("g", "a", None);
        assert_ne!(plugin, unknown);
        for version in ["1.0", "*", "-", ""] {
            assert!(!plugin.is_satisfied_by(&ModuleName::new("g", "a"), version));
        }
        // building it again gives the same sentinel
        assert_eq!(plugin, ModuleDependency::from_plugin(Some("g"), "a", None));
    }

    #[test]
    fn plugin_group_defaults_to_maven_plugins() {
        let plugin = ModuleDependency::from_plugin(None, "maven-compiler-plugin", Some("3.1"));
        assert_eq!(plugin.group_id, DEFAULT_PLUGIN_GROUP);
    }

    #[test]
    fn concrete_version_must_match() {
        let dep = ModuleDependency::new("g", "a", Some("1.0"));
        assert!(dep.is_satisfied_by(&ModuleName::new("g", "a"), "1.0"));
        assert!(!dep.is_satisfied_by(&ModuleName::new("g", "a"), "1.1"));
        assert!(!dep.is_satisfied_by(&ModuleName::new("g", "b"), "1.0"));
        assert!(dep
            .with_unknown_version()
            .is_satisfied_by(&ModuleName::new("g", "a"), "1.1"));
    }
}
