//! Parse command - show the modules and dependency graph of a workspace

use crate::cli::args::{OutputFormat, ParseArgs};
use crate::config::Config;
use crate::error::{MavenError, MavenResult};
use crate::listener::{LogStream, StreamBuildListener};
use crate::module::{DependencyGraph, PomInfo};
use crate::pom::PomParser;
use console::style;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct ParseOutput<'a> {
    modules: &'a [PomInfo],
    graph: &'a DependencyGraph,
}

/// Execute the parse command
pub async fn execute(args: ParseArgs, config: &Config) -> MavenResult<()> {
    let workspace = match args.workspace {
        Some(ws) => ws,
        None => std::env::current_dir()
            .map_err(|e| MavenError::io("getting current directory", e))?,
    };
    let root_pom = args
        .root_pom
        .unwrap_or_else(|| config.maven.root_pom.clone());
    let verbose = config.general.verbose;

    let infos = tokio::task::spawn_blocking(move || -> MavenResult<Vec<PomInfo>> {
        let listener = StreamBuildListener::new(LogStream::new(std::io::stderr()));
        PomParser::new(root_pom).verbose(verbose).parse(&workspace, &listener)
    })
    .await
    .map_err(|e| MavenError::Internal(format!("POM parser panicked: {}", e)))??;

    let graph = DependencyGraph::build(&infos);

    match args.format {
        OutputFormat::Json => {
            let output = ParseOutput {
                modules: &infos,
                graph: &graph,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_table(&infos, &graph),
    }
    Ok(())
}

fn print_table(infos: &[PomInfo], graph: &DependencyGraph) {
    println!(
        "{:<40} {:<12} {}",
        style("MODULE").bold(),
        style("VERSION").bold(),
        style("PATH").bold()
    );
    for info in infos {
        let path = if info.relative_path.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&info.relative_path)
        };
        println!(
            "{:<40} {:<12} {}",
            info.name.to_string(),
            info.version,
            style(path.display()).dim()
        );
    }

    println!();
    println!("{}", style("Build order:").bold());
    for (i, name) in graph.build_order().iter().enumerate() {
        let upstream: Vec<String> = graph.upstream_of(name).iter().map(|n| n.to_string()).collect();
        if upstream.is_empty() {
            println!("  {}. {}", i + 1, style(name).cyan());
        } else {
            println!(
                "  {}. {} {} {}",
                i + 1,
                style(name).cyan(),
                style("<-").dim(),
                upstream.join(", ")
            );
        }
    }
}
