use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tekton_notify::{
    Dispatcher, LocalCluster, NotifierManifest, PipelineRunEvent, ANNOTATION_LAST_STATUS,
};

#[derive(Parser)]
#[command(name = "tekton-notify")]
#[command(about = "Dispatch pipeline-run status notifications to configured providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one dispatch round for a pipeline-run snapshot
    Dispatch {
        /// Path to the run event JSON file
        #[arg(long)]
        run: PathBuf,

        /// Path to the notifier manifest (providers, bindings, secrets)
        #[arg(long, default_value = "notifiers.yml")]
        manifest: PathBuf,

        /// Write the recorded-status annotation back to the run file
        #[arg(long)]
        write_back: bool,
    },

    /// Show which bindings would be selected for a dispatch
    Bindings {
        /// Path to the notifier manifest
        #[arg(long, default_value = "notifiers.yml")]
        manifest: PathBuf,

        /// Namespace to select bindings in
        #[arg(long, default_value = "default")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("tekton_notify=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dispatch {
            run,
            manifest,
            write_back,
        } => run_dispatch(run, manifest, write_back).await?,
        Commands::Bindings {
            manifest,
            namespace,
        } => list_bindings(manifest, &namespace)?,
    }

    Ok(())
}

async fn run_dispatch(run_path: PathBuf, manifest_path: PathBuf, write_back: bool) -> Result<()> {
    let content = fs::read_to_string(&run_path)
        .with_context(|| format!("Failed to read run file: {}", run_path.display()))?;
    let mut run: PipelineRunEvent = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse run file: {}", run_path.display()))?;

    let manifest = NotifierManifest::load(&manifest_path)?;
    let dispatcher = Dispatcher::new(LocalCluster::from_manifest(manifest));

    let outcomes = dispatcher.dispatch(&run).await?;

    if outcomes.is_empty() {
        println!("Nothing dispatched.");
    }
    for outcome in &outcomes {
        match &outcome.error {
            None => println!(
                "ok    {} ({})",
                outcome.binding,
                outcome.provider.as_deref().unwrap_or("?")
            ),
            Some(err) => println!("fail  {} - {}", outcome.binding, err),
        }
    }

    if write_back {
        if let Some(recorded) = dispatcher.cluster().recorded_statuses().pop() {
            run.annotations
                .insert(ANNOTATION_LAST_STATUS.to_string(), recorded.status);
            let updated = serde_json::to_string_pretty(&run)?;
            fs::write(&run_path, updated)
                .with_context(|| format!("Failed to write run file: {}", run_path.display()))?;
            info!(path = %run_path.display(), "recorded status written back");
        }
    }

    Ok(())
}

fn list_bindings(manifest_path: PathBuf, namespace: &str) -> Result<()> {
    let manifest = NotifierManifest::load(&manifest_path)?;

    let in_namespace: Vec<_> = manifest
        .bindings
        .into_iter()
        .filter(|b| b.namespace == namespace)
        .collect();
    if in_namespace.is_empty() {
        println!("No bindings in namespace {}.", namespace);
        return Ok(());
    }

    let selected = tekton_notify::select_bindings(in_namespace.clone());
    let selected_names: Vec<_> = selected.iter().map(|b| b.name.as_str()).collect();
    for binding in &in_namespace {
        let state = if selected_names.contains(&binding.name.as_str()) {
            "selected"
        } else if binding.suspend {
            "suspended"
        } else {
            "not ready"
        };
        println!(
            "{:<10} {} -> provider {}",
            state, binding.name, binding.provider_ref.name
        );
    }

    Ok(())
}
