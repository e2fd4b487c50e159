//! Replay a recorded run against its static graph and print the render graph
//!
//! ```text
//! overlay-replay --fixture run.json --mode execute --hide-settled
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use run_overlay::types::RunId;
use run_overlay::{
    apply, compose_with, reconcile, RawExecutionEvent, ReconciliationState, RenderMode,
    RuntimeRetention, StaticGraph, TreeSnapshot,
};
use run_overlay_service::{HttpTreeSource, TreeSource, WatchConfig};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "overlay-replay", version, about)]
struct Args {
    /// Fixture file with the static graph, recorded events and an optional tree
    #[arg(long)]
    fixture: PathBuf,

    /// Render mode (build or execute)
    #[arg(long, default_value_t = RenderMode::Execute)]
    mode: RenderMode,

    /// Hide runtime nodes whose work and anchor have both settled
    #[arg(long)]
    hide_settled: bool,

    /// Directory containing overlay.json
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Reconcile against the live tree endpoint after replaying
    #[arg(long)]
    fetch_tree: bool,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(alias = "rootRunId")]
    root_run_id: RunId,
    graph: StaticGraph,
    #[serde(default)]
    events: Vec<RawExecutionEvent>,
    #[serde(default)]
    tree: Option<TreeSnapshot>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn run(args: Args) -> Result<(), BoxError> {
    let config = match &args.config_dir {
        Some(dir) => WatchConfig::load(dir).await?,
        None => WatchConfig::default(),
    };
    let mut options = config.render;
    if args.hide_settled {
        options.retention = RuntimeRetention::HideSettled;
    }

    let contents = tokio::fs::read_to_string(&args.fixture).await?;
    let fixture: Fixture = serde_json::from_str(&contents)?;
    log::info!(
        "Replaying {} events for run '{}' against {} nodes",
        fixture.events.len(),
        fixture.root_run_id,
        fixture.graph.nodes.len()
    );

    let mut state = apply(
        &ReconciliationState::new(fixture.root_run_id.clone()),
        &fixture.events,
        &fixture.graph,
    );

    if let Some(tree) = &fixture.tree {
        state = reconcile(&state, tree)?;
    }

    if args.fetch_tree {
        let source = HttpTreeSource::from_config(&config)
            .ok_or("--fetch-tree needs treeBaseUrl in overlay.json")??;
        let snapshot = source.fetch_tree(&fixture.root_run_id).await?;
        state = reconcile(&state, &snapshot)?;
    }

    let stats = state.stats();
    log::info!(
        "Applied {}, unknown {}, malformed {}, suppressed {}, reconciliations {}",
        stats.applied,
        stats.ignored_unknown,
        stats.dropped_malformed,
        stats.suppressed_by_authority,
        stats.reconciliations
    );

    let render = compose_with(
        args.mode,
        &fixture.graph.nodes,
        &fixture.graph.edges,
        &state,
        &options,
    );
    println!("{}", serde_json::to_string_pretty(&render)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
