//! Plan command - print the initialization levels of a manifest

use super::load_manifest;
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::config::Config;
use crate::error::ComposeResult;
use crate::graph::DependencyGraph;
use crate::ui::{self, UiContext};
use console::style;
use serde_json::json;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> ComposeResult<()> {
    let (container, engine) = load_manifest(&args.manifest, config, false).await?;
    let graph = engine.plan(&container)?;

    match args.format {
        OutputFormat::Table => print_table(container.name(), &graph),
        OutputFormat::Json => print_json(container.name(), &graph)?,
        OutputFormat::Plain => print_plain(&graph),
    }

    Ok(())
}

fn print_table(name: &str, graph: &DependencyGraph) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Plan for '{}'", name));

    println!("{:<8} {}", style("LEVEL").bold(), style("KINDS").bold());
    println!("{}", "-".repeat(48));
    for (n, level) in graph.levels().iter().enumerate() {
        println!("{:<8} {}", n, level.join(", "));
    }

    println!();
    println!(
        "{} kind(s) in {} level(s), graph {}",
        graph.kind_count(),
        graph.levels().len(),
        graph.key().fingerprint()
    );
}

fn print_json(name: &str, graph: &DependencyGraph) -> ComposeResult<()> {
    let value = json!({
        "container": name,
        "fingerprint": graph.key().fingerprint(),
        "levels": graph.levels(),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_plain(graph: &DependencyGraph) {
    for level in graph.levels() {
        println!("{}", level.join(" "));
    }
}
