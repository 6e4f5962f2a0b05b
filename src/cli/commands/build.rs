//! Build command - run a module-set build on this machine

use crate::cache::ProcessCache;
use crate::channel::LocalLauncher;
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{MavenError, MavenResult};
use crate::listener::{BuildListener, LogStream, StreamBuildListener};
use crate::orchestration::{
    BuildEnvironment, BuildSummary, MavenInstallation, ModuleSet, ModuleSetBuild, QueueScheduler,
};
use crate::record::{BuildRecord, RecordStore};
use crate::result::BuildResult;
use chrono::Utc;
use console::style;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Execute the build command; returns the build's result
pub async fn execute(args: BuildArgs, config: &Config) -> MavenResult<Option<BuildResult>> {
    let workspace = match &args.workspace {
        Some(ws) => ws.clone(),
        None => std::env::current_dir()
            .map_err(|e| MavenError::io("getting current directory", e))?,
    };
    let project = args
        .project
        .clone()
        .unwrap_or_else(|| project_name(&workspace));
    let config = apply_overrides(config, args);

    let store = RecordStore::new(&ConfigManager::state_dir(&config), &project);
    let table = store.load_table().await?.unwrap_or_default();
    let set = ModuleSet::from_table(&project, config.maven.reporters.clone(), table);
    let number = store.next_build_number().await?;
    debug!("Project state in {}", store.root().display());

    let installation = config
        .maven
        .home
        .clone()
        .map(|home| Arc::new(MavenInstallation::new("default", home)));
    let cache = ProcessCache::new(config.cache.capacity, config.cache.max_age);
    let scheduler = QueueScheduler::new();
    let env = BuildEnvironment {
        config: &config,
        launcher: Arc::new(LocalLauncher::new()),
        cache: &cache,
        scheduler: &scheduler,
        installation,
        env: std::env::vars().collect::<BTreeMap<_, _>>(),
    };

    println!(
        "{} {} #{}",
        style("Building").bold().cyan(),
        style(&project).bold(),
        number
    );
    let listener: Arc<dyn BuildListener> = Arc::new(StreamBuildListener::new(LogStream::stdout()));
    let started_at = Utc::now();
    let build = ModuleSetBuild::new(&set, number, &workspace);

    let summary = tokio::select! {
        summary = build.run(&env, Arc::clone(&listener)) => summary?,
        _ = tokio::signal::ctrl_c() => {
            listener.error("Aborted");
            return Err(MavenError::Interrupted);
        }
    };

    let record = BuildRecord::new(&project, number, &summary, started_at);
    store.save(&record, &summary).await?;
    store.save_table(&set.table()).await?;

    for (module, cause) in scheduler.queued() {
        println!("{} {} ({})", style("Scheduled").yellow(), module, cause);
    }
    print_summary(&summary);
    Ok(summary.result())
}

/// Project name derived from the workspace directory
fn project_name(workspace: &Path) -> String {
    workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string())
}

fn apply_overrides(config: &Config, args: BuildArgs) -> Config {
    let mut config = config.clone();
    if let Some(root_pom) = args.root_pom {
        config.maven.root_pom = root_pom;
    }
    if let Some(home) = args.maven_home {
        config.maven.home = Some(home);
    }
    if let Some(goals) = args.goals {
        config.maven.goals = goals;
    }
    if args.no_aggregator {
        config.maven.aggregator = false;
    }
    config.maven.system_properties.extend(args.properties);
    config
}

fn styled_result(result: Option<BuildResult>) -> String {
    match result {
        Some(BuildResult::Success) => style("SUCCESS").green().to_string(),
        Some(BuildResult::Unstable) => style("UNSTABLE").yellow().to_string(),
        Some(r @ (BuildResult::Failure | BuildResult::Aborted)) => style(r).red().to_string(),
        Some(r) => style(r).dim().to_string(),
        None => style("PENDING").dim().to_string(),
    }
}

fn print_summary(summary: &BuildSummary) {
    if !summary.modules.is_empty() {
        println!();
        for module in &summary.modules {
            let goals = module.mojos.len();
            println!(
                "  {:<40} {:<10} {} goal(s)",
                module.name.to_string(),
                styled_result(module.result),
                goals
            );
        }
    }
    println!();
    println!("Finished: {}", styled_result(summary.result()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> BuildArgs {
        BuildArgs {
            workspace: None,
            project: None,
            root_pom: Some("trunk/pom.xml".to_string()),
            maven_home: Some(PathBuf::from("/opt/maven")),
            goals: None,
            properties: vec![("skipTests".to_string(), "true".to_string())],
            no_aggregator: true,
        }
    }

    #[test]
    fn overrides_replace_configured_values() {
        let mut config = Config::default();
        config
            .maven
            .system_properties
            .insert("a".to_string(), "1".to_string());

        let config = apply_overrides(&config, args());
        assert_eq!(config.maven.root_pom, "trunk/pom.xml");
        assert_eq!(config.maven.home, Some(PathBuf::from("/opt/maven")));
        assert_eq!(config.maven.goals, "install");
        assert!(!config.maven.aggregator);
        assert_eq!(config.maven.system_properties.len(), 2);
    }

    #[test]
    fn project_name_from_workspace() {
        assert_eq!(project_name(Path::new("/no/such/dir/my-app")), "my-app");
    }
}
