//! POM tree parsing
//!
//! Reads the root POM of a workspace and every module it lists,
//! recursively, and flattens the tree into [`PomInfo`] snapshots with cycles
//! cut. Parsing is plain blocking file IO; async callers run it on the
//! blocking pool.

mod model;

use crate::error::{MavenError, MavenResult};
use crate::listener::BuildListener;
use crate::module::{cut_cycles, PomInfo, ProjectModel};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parses the module tree below a root POM
#[derive(Debug, Clone)]
pub struct PomParser {
    root_pom: String,
    verbose: bool,
}

impl PomParser {
    /// Parser for the root POM at `root_pom`, relative to the workspace
    pub fn new(root_pom: impl Into<String>) -> Self {
        Self {
            root_pom: root_pom.into(),
            verbose: false,
        }
    }

    /// Log every discovered module to the build log
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Directory part of the root POM path; `""` for `pom.xml`
    pub fn root_path(&self) -> &str {
        match self.root_pom.rfind(['/', '\\']) {
            Some(idx) => &self.root_pom[..idx],
            None => "",
        }
    }

    /// Locate the root POM.
    ///
    /// When the workspace is one of several checkouts the user may have
    /// meant the path relative to the workspace's parent, so that location
    /// is tried second.
    pub fn locate(&self, workspace: &Path) -> MavenResult<PathBuf> {
        let pom = workspace.join(&self.root_pom);
        if pom.exists() {
            return Ok(pom);
        }
        if let Some(parent) = workspace.parent() {
            let alternative = parent.join(&self.root_pom);
            if alternative.exists() {
                debug!("Using root POM from the workspace parent: {}", alternative.display());
                return Ok(alternative);
            }
        }
        Err(MavenError::NoSuchFile(pom))
    }

    /// Parse the whole module tree of `workspace`.
    ///
    /// The root comes first, followed by its modules depth-first in
    /// declaration order.
    pub fn parse(&self, workspace: &Path, listener: &dyn BuildListener) -> MavenResult<Vec<PomInfo>> {
        let pom = self.locate(workspace)?;
        if self.verbose {
            listener.logger().println(&format!("Parsing {}", pom.display()));
        }

        let mut walk = Walk {
            visited: HashSet::from([canonical(&pom)]),
            infos: Vec::new(),
        };
        self.collect(&pom, self.root_path(), None, &BTreeMap::new(), &mut walk, listener)?;
        let mut infos = walk.infos;
        cut_cycles(&mut infos);
        debug!("Parsed {} module(s) from {}", infos.len(), pom.display());
        Ok(infos)
    }

    fn collect(
        &self,
        pom: &Path,
        relative_path: &str,
        parent: Option<usize>,
        inherited: &BTreeMap<String, String>,
        walk: &mut Walk,
        listener: &dyn BuildListener,
    ) -> MavenResult<()> {
        let (project, props) = read_project(pom, inherited)?;
        let info = PomInfo::new(&project, parent.map(|i| &walk.infos[i]), relative_path);
        if self.verbose {
            listener.logger().println(&format!(
                "Discovered {}:{} at {}",
                info.name, info.version, relative_path
            ));
        }
        walk.infos.push(info);
        let me = walk.infos.len() - 1;

        let basedir = pom.parent().unwrap_or_else(|| Path::new("."));
        for module in &project.modules {
            let child = module_pom(basedir, module);
            if !child.exists() {
                return Err(MavenError::Abort(format!(
                    "{} is referenced from {} but it doesn't exist",
                    child.display(),
                    pom.display()
                )));
            }
            // a module pointing back into the tree would recurse forever
            if !walk.visited.insert(canonical(&child)) {
                return Err(MavenError::Abort(format!(
                    "{} is referenced from {} but is already part of the module tree",
                    child.display(),
                    pom.display()
                )));
            }
            let child_path = if relative_path.is_empty() {
                module.clone()
            } else {
                format!("{}/{}", relative_path, module)
            };
            self.collect(&child, &child_path, Some(me), &props, walk, listener)?;
        }
        Ok(())
    }
}

/// State of one tree walk
struct Walk {
    /// Canonical paths of every POM reached so far
    visited: HashSet<PathBuf>,
    infos: Vec<PomInfo>,
}

/// Identity of a POM file independent of how it was reached
fn canonical(pom: &Path) -> PathBuf {
    pom.canonicalize().unwrap_or_else(|_| pom.to_path_buf())
}

/// POM file for a `<module>` entry, which may name a directory or a file
fn module_pom(basedir: &Path, module: &str) -> PathBuf {
    let path = basedir.join(module);
    if path.is_dir() {
        path.join("pom.xml")
    } else {
        path
    }
}

/// Read one POM with the properties of its enclosing POM in scope
pub fn read_project(
    path: &Path,
    inherited: &BTreeMap<String, String>,
) -> MavenResult<(ProjectModel, BTreeMap<String, String>)> {
    model::read(path)?.into_model(path, inherited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{LogStream, MemoryLog, StreamBuildListener};
    use crate::module::{DependencyGraph, ModuleName};
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn child(artifact: &str, deps: &str) -> String {
        format!(
            r#"<project>
  <parent><groupId>org.example</groupId><artifactId>root</artifactId><version>1.0</version></parent>
  <artifactId>{}</artifactId>
  <dependencies>{}</dependencies>
</project>"#,
            artifact, deps
        )
    }

    fn dep(artifact: &str) -> String {
        format!(
            "<dependency><groupId>org.example</groupId><artifactId>{}</artifactId><version>${{project.version}}</version></dependency>",
            artifact
        )
    }

    fn sample_tree(ws: &Path) {
        write(
            ws,
            "pom.xml",
            r#"<project>
  <groupId>org.example</groupId>
  <artifactId>root</artifactId>
  <version>1.0</version>
  <modules><module>core</module><module>plugin/pom.xml</module></modules>
</project>"#,
        );
        write(ws, "core/pom.xml", &child("core", ""));
        write(
            ws,
            "plugin/pom.xml",
            &child("plugin", &format!("{}{}", dep("core"), dep("root"))),
        );
    }

    fn name(artifact: &str) -> ModuleName {
        ModuleName::new("org.example", artifact)
    }

    #[test]
    fn parses_module_tree() {
        let temp = TempDir::new().unwrap();
        sample_tree(temp.path());
        let log = MemoryLog::default();
        let listener = StreamBuildListener::new(log.stream());

        let infos = PomParser::new("pom.xml")
            .verbose(true)
            .parse(temp.path(), &listener)
            .unwrap();

        let names: Vec<_> = infos.iter().map(|i| i.name.artifact_id.as_str()).collect();
        assert_eq!(names, vec!["root", "core", "plugin"]);
        assert_eq!(infos[1].relative_path, "core");
        assert_eq!(infos[2].relative_path, "plugin/pom.xml");
        assert_eq!(infos[1].parent, Some(name("root")));
        assert!(log.contents().contains("Discovered org.example:core:1.0 at core"));

        let graph = DependencyGraph::build(&infos);
        assert!(graph.has_edge(&name("core"), &name("root")));
        assert!(graph.has_edge(&name("plugin"), &name("core")));
        assert!(graph.has_edge(&name("plugin"), &name("root")));
        assert_eq!(graph.edges().len(), 3);
    }

    #[test]
    fn nested_root_pom_paths() {
        let temp = TempDir::new().unwrap();
        sample_tree(&temp.path().join("trunk"));
        let parser = PomParser::new("trunk/pom.xml");
        assert_eq!(parser.root_path(), "trunk");

        let infos = parser
            .parse(temp.path(), &StreamBuildListener::new(LogStream::null()))
            .unwrap();
        assert_eq!(infos[0].relative_path, "trunk");
        assert_eq!(infos[1].relative_path, "trunk/core");
    }

    #[test]
    fn falls_back_to_workspace_parent() {
        let temp = TempDir::new().unwrap();
        sample_tree(temp.path());
        let ws = temp.path().join("checkout");
        std::fs::create_dir_all(&ws).unwrap();

        let found = PomParser::new("pom.xml").locate(&ws).unwrap();
        assert_eq!(found, temp.path().join("pom.xml"));
    }

    #[test]
    fn missing_root_pom() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();

        let err = PomParser::new("pom.xml")
            .parse(&ws, &StreamBuildListener::new(LogStream::null()))
            .unwrap_err();
        assert!(matches!(err, MavenError::NoSuchFile(ref p) if p == &ws.join("pom.xml")));
        assert!(err.is_abort());
    }

    #[test]
    fn missing_module_aborts() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "pom.xml",
            "<project><groupId>g</groupId><artifactId>r</artifactId><version>1</version><modules><module>gone</module></modules></project>",
        );

        let err = PomParser::new("pom.xml")
            .parse(temp.path(), &StreamBuildListener::new(LogStream::null()))
            .unwrap_err();
        assert!(err.to_string().contains("but it doesn't exist"));
    }

    #[test]
    fn malformed_pom_names_the_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "pom.xml", "<project><groupId>g</artifactId></project>");

        let err = PomParser::new("pom.xml")
            .parse(temp.path(), &StreamBuildListener::new(LogStream::null()))
            .unwrap_err();
        match err {
            MavenError::PomParse { path, .. } => assert!(path.ends_with("pom.xml")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn module_pointing_back_into_the_tree_aborts() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "pom.xml",
            "<project><groupId>g</groupId><artifactId>r</artifactId><version>1</version><modules><module>.</module></modules></project>",
        );

        let err = PomParser::new("pom.xml")
            .parse(temp.path(), &StreamBuildListener::new(LogStream::null()))
            .unwrap_err();
        assert!(err.is_abort());
        assert!(err.to_string().contains("already part of the module tree"));
    }

    #[test]
    fn modules_listing_each_other_abort() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "pom.xml",
            "<project><groupId>g</groupId><artifactId>r</artifactId><version>1</version><modules><module>a</module></modules></project>",
        );
        write(
            temp.path(),
            "a/pom.xml",
            "<project><groupId>g</groupId><artifactId>a</artifactId><version>1</version><modules><module>../b</module></modules></project>",
        );
        write(
            temp.path(),
            "b/pom.xml",
            "<project><groupId>g</groupId><artifactId>b</artifactId><version>1</version><modules><module>../a</module></modules></project>",
        );

        let err = PomParser::new("pom.xml")
            .parse(temp.path(), &StreamBuildListener::new(LogStream::null()))
            .unwrap_err();
        match err {
            MavenError::Abort(m) => {
                assert!(m.contains("already part of the module tree"));
                assert!(m.contains("b"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
