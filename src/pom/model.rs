//! XML shape of a POM file
//!
//! Only the elements that matter for module discovery and dependency
//! computation are modeled; everything else in the file is ignored.

use crate::error::{MavenError, MavenResult};
use crate::module::{Coordinates, ProjectModel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PomXml {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    name: Option<String>,
    parent: Option<XmlCoordinates>,
    properties: BTreeMap<String, String>,
    dependencies: Option<Dependencies>,
    build: Option<Build>,
    reporting: Option<Reporting>,
    modules: Option<Modules>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct XmlCoordinates {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dependencies {
    dependency: Vec<XmlCoordinates>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Plugins {
    plugin: Vec<XmlCoordinates>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Extensions {
    extension: Vec<XmlCoordinates>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Build {
    default_goal: Option<String>,
    plugins: Option<Plugins>,
    extensions: Option<Extensions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reporting {
    plugins: Option<Plugins>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Modules {
    module: Vec<String>,
}

/// Read and deserialize the POM at `path`
pub(crate) fn read(path: &Path) -> MavenResult<PomXml> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MavenError::io(format!("reading {}", path.display()), e))?;
    quick_xml::de::from_str(&text).map_err(|e| MavenError::PomParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Replace `${name}` references with values from `props`.
///
/// Unknown references are kept as written.
pub(crate) fn interpolate(value: &str, props: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 2..start + 2 + len];
        match props.get(key) {
            Some(v) => out.push_str(v),
            None => out.push_str(&rest[start..start + len + 3]),
        }
        rest = &rest[start + len + 3..];
    }

    out.push_str(rest);
    out
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PomXml {
    /// Effective model of this POM.
    ///
    /// `inherited` holds the properties of the parent POM when it is part of
    /// the same tree. Returns the model and the properties children inherit.
    pub(crate) fn into_model(
        self,
        path: &Path,
        inherited: &BTreeMap<String, String>,
    ) -> MavenResult<(ProjectModel, BTreeMap<String, String>)> {
        let invalid = |reason: &str| MavenError::PomParse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let parent = self.parent.map(|p| (trimmed(p.group_id), trimmed(p.artifact_id), trimmed(p.version)));

        let artifact_id = trimmed(self.artifact_id).ok_or_else(|| invalid("missing artifactId"))?;
        let group_id = trimmed(self.group_id)
            .or_else(|| parent.as_ref().and_then(|p| p.0.clone()))
            .ok_or_else(|| invalid("missing groupId and no parent to inherit it from"))?;
        let version = trimmed(self.version)
            .or_else(|| parent.as_ref().and_then(|p| p.2.clone()))
            .ok_or_else(|| invalid("missing version and no parent to inherit it from"))?;

        let mut props = inherited.clone();
        props.extend(self.properties);
        for prefix in ["project.", "pom.", ""] {
            props.insert(format!("{}groupId", prefix), group_id.clone());
            props.insert(format!("{}artifactId", prefix), artifact_id.clone());
            props.insert(format!("{}version", prefix), version.clone());
        }
        if let Some((_, _, Some(v))) = &parent {
            props.insert("project.parent.version".to_string(), v.clone());
        }

        let group_id = interpolate(&group_id, &props);
        let version = interpolate(&version, &props);
        let coords = |c: XmlCoordinates| -> Option<Coordinates> {
            Some(Coordinates {
                group_id: trimmed(c.group_id).map(|g| interpolate(&g, &props)),
                artifact_id: interpolate(&trimmed(c.artifact_id)?, &props),
                version: trimmed(c.version).map(|v| interpolate(&v, &props)),
            })
        };

        let build = self.build.unwrap_or_default();
        let list = |plugins: Option<Plugins>| plugins.map(|p| p.plugin).unwrap_or_default();

        let model = ProjectModel {
            parent: parent.and_then(|(g, a, v)| {
                Some(Coordinates {
                    group_id: g,
                    artifact_id: a?,
                    version: v,
                })
            }),
            dependencies: self
                .dependencies
                .map(|d| d.dependency)
                .unwrap_or_default()
                .into_iter()
                .filter_map(coords)
                .collect(),
            plugins: list(build.plugins).into_iter().filter_map(coords).collect(),
            report_plugins: list(self.reporting.and_then(|r| r.plugins))
                .into_iter()
                .filter_map(coords)
                .collect(),
            extensions: build
                .extensions
                .map(|e| e.extension)
                .unwrap_or_default()
                .into_iter()
                .filter_map(coords)
                .collect(),
            modules: self
                .modules
                .map(|m| m.module)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| trimmed(Some(m)))
                .collect(),
            name: trimmed(self.name).map(|n| interpolate(&n, &props)),
            default_goal: trimmed(build.default_goal),
            group_id,
            artifact_id,
            version,
        };
        Ok((model, props))
    }
}
