use std::path::PathBuf;

use clap::Parser;
use xgraph_diff::config::Config;
use xgraph_diff::orchestrator::{self, CompiledArtifact};
use xgraph_diff::server;
use xgraph_diff::source::Source;

/// Bytecode CFG + symbolic-execution semantic graph diffing for contract revisions.
#[derive(Parser, Debug)]
#[command(name = "xgraph-diff")]
#[command(author = "xgraph-diff contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Structural change analysis for EVM contract revisions")]
struct Args {
    /// Compiled-artifact JSON for the before revision
    #[arg(long)]
    before: Option<PathBuf>,

    /// Solidity source the before revision was compiled from
    #[arg(long)]
    before_source: Option<PathBuf>,

    /// Compiled-artifact JSON for the after revision
    #[arg(long)]
    after: Option<PathBuf>,

    /// Solidity source the after revision was compiled from
    #[arg(long)]
    after_source: Option<PathBuf>,

    /// Unified diff between the before and after source
    #[arg(long)]
    diff: Option<PathBuf>,

    /// Run config (dest_path, timeout, which abstract indices to compute)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run as an HTTP server instead of a one-shot analysis
    #[arg(long)]
    server: bool,

    /// Port for HTTP server mode
    #[arg(short, long, default_value = "3000")]
    port: u16,
}

fn load_artifact(path: &PathBuf, source_path: &PathBuf) -> anyhow::Result<CompiledArtifact> {
    let raw = std::fs::read_to_string(path)?;
    let compiled: serde_json::Value = serde_json::from_str(&raw)?;
    let object = compiled["evm"]["deployedBytecode"]["object"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("{}: missing evm.deployedBytecode.object", path.display()))?
        .trim_start_matches("0x");
    let bytecode = hex::decode(object)?;
    let source_map = compiled["evm"]["deployedBytecode"]["sourceMap"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let ast = compiled.get("ast").cloned().unwrap_or(serde_json::Value::Null);
    let source_bytes = std::fs::read(source_path)?;

    Ok(CompiledArtifact {
        bytecode,
        source_map,
        ast,
        source: Source::new(source_path.display().to_string(), source_bytes),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.server {
        server::run_server(args.port).await?;
        return Ok(());
    }

    let (before, before_source, after, after_source, config_path) = match (
        &args.before,
        &args.before_source,
        &args.after,
        &args.after_source,
        &args.config,
    ) {
        (Some(b), Some(bs), Some(a), Some(as_), Some(c)) => (b, bs, a, as_, c),
        _ => {
            eprintln!(
                "usage: xgraph-diff --before <json> --before-source <sol> \\\n  --after <json> --after-source <sol> --config <json|yaml> [--diff <patch>]\n   or: xgraph-diff --server [--port 3000]"
            );
            return Ok(());
        }
    };

    let config = Config::load(config_path)?;
    let before_artifact = load_artifact(before, before_source)?;
    let after_artifact = load_artifact(after, after_source)?;
    let diff_text = args
        .diff
        .as_ref()
        .map(std::fs::read_to_string)
        .transpose()?;

    let request_id = format!(
        "{}-{}",
        before_source.display(),
        after_source.display()
    );
    let artifact = orchestrator::run(request_id, &before_artifact, &after_artifact, diff_text.as_deref(), &config)?;

    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}
