//! Ties together the full per-request pipeline: disassemble -> build CFG ->
//! annotate with the source map and diff -> symbolically execute -> compute
//! abstract indices -> aggregate before/after -> write the artifact.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::abstracts::{AstIndices, CfgIndices, IndexValue, SsgIndices};
use crate::bytecode::{opcode, sourcemap, Cfg};
use crate::config::{Config, RequestContext};
use crate::error::{AnalyzerError, Result};
use crate::interpreter::{ImpossiblePath, Interpreter, InterpreterConfig};
use crate::report::Artifact;
use crate::source::{Diff, Source};

/// One revision's compiled inputs: raw deployed bytecode, its Solidity source
/// map, the solc AST, and the source text it was compiled from.
pub struct CompiledArtifact {
    pub bytecode: Vec<u8>,
    pub source_map: String,
    pub ast: serde_json::Value,
    pub source: Source,
}

pub struct RevisionResult {
    pub cfg: Cfg,
    pub path_stats: std::collections::HashMap<&'static str, u64>,
    pub impossible_paths: Vec<ImpossiblePath>,
    pub indices: BTreeMap<String, IndexValue>,
    pub timed_out: bool,
}

fn analyze_revision(
    artifact: &CompiledArtifact,
    diff: Option<&Diff>,
    config: &Config,
    ctx: &mut RequestContext,
    side: &'static str,
) -> Result<RevisionResult> {
    let instructions = opcode::disassemble(&artifact.bytecode)?;
    let mut cfg = Cfg::build(&instructions);

    let instruction_order: Vec<usize> = instructions.iter().map(|i| i.pc).collect();
    let entries = sourcemap::parse(&artifact.source_map);
    sourcemap::annotate(&mut cfg, &instruction_order, &entries, &artifact.source, diff);

    let loop_timeout = Duration::from_millis(config.timeout.min(30_000));
    let mut interpreter_config = InterpreterConfig::default();
    interpreter_config.global_timeout = Duration::from_millis(config.timeout);

    // Scoped so the interpreter's mutable borrow of `cfg` ends before we need
    // to read `cfg` immutably again for the CFG-level indices below.
    let (ssg, path_stats, impossible_paths, timed_out) = {
        let mut interpreter = Interpreter::new(&mut cfg, interpreter_config);
        interpreter.run();
        if interpreter.timed_out {
            warn!(side, "symbolic execution hit the global timeout");
        }
        (
            interpreter.ssg,
            interpreter.stats,
            interpreter.impossible_paths,
            interpreter.timed_out,
        )
    };

    let skills = config.load_skills()?;
    let ast_indices = AstIndices {
        ast: &artifact.ast,
        source: &artifact.source,
        diff,
        skills: skills.as_ref(),
        language: config.language,
    };
    let cfg_indices = CfgIndices {
        cfg: &cfg,
        loop_timeout,
    };
    let ssg_indices = SsgIndices { ssg: &ssg };

    let mut indices = BTreeMap::new();
    for name in &config.ast_abstracts {
        match ast_indices.compute(name) {
            Ok(Some(v)) => {
                indices.insert(name.clone(), v);
            }
            Ok(None) => {}
            Err(e) => mark_errored(ctx, side, name, &e),
        }
    }
    for name in &config.cfg_abstracts {
        match cfg_indices.compute(name) {
            Ok(Some(v)) => {
                indices.insert(name.clone(), v);
            }
            Ok(None) => {}
            Err(e) => mark_errored(ctx, side, name, &e),
        }
    }
    for name in &config.ssg_abstracts {
        match ssg_indices.compute(name) {
            Ok(Some(v)) => {
                indices.insert(name.clone(), v);
            }
            Ok(None) => {}
            Err(e) => mark_errored(ctx, side, name, &e),
        }
    }

    info!(side, blocks = cfg.block_count(), "revision analyzed");

    if let Some(dir) = config.dest_path.parent() {
        crate::report::write_revision_artifacts(
            dir,
            side,
            &artifact.ast,
            &cfg,
            &ssg,
            &indices,
            &config.ast_abstracts,
            &config.cfg_abstracts,
            &config.ssg_abstracts,
        )?;
    }

    Ok(RevisionResult {
        cfg,
        path_stats,
        impossible_paths,
        indices,
        timed_out,
    })
}

fn mark_errored(ctx: &mut RequestContext, side: &'static str, name: &str, err: &AnalyzerError) {
    let kind = err.kind();
    if side == "before" {
        ctx.mark_errored_before(name, kind);
    } else {
        ctx.mark_errored_after(name, kind);
    }
}

/// Runs the full before/after pipeline and writes the resulting artifact to
/// `config.dest_path`.
#[instrument(skip_all, fields(request_id))]
pub fn run(
    request_id: impl Into<String>,
    before: &CompiledArtifact,
    after: &CompiledArtifact,
    diff_text: Option<&str>,
    config: &Config,
) -> Result<Artifact> {
    let request_id = request_id.into();
    let mut ctx = RequestContext::new(request_id.clone());

    let diff = diff_text.map(Diff::parse).transpose()?;

    let before_result = analyze_revision(before, diff.as_ref(), config, &mut ctx, "before")?;
    let after_result = analyze_revision(after, diff.as_ref(), config, &mut ctx, "after")?;

    let aggregated = crate::aggregator::aggregate(&before_result.indices, &after_result.indices, &ctx);

    let artifact = Artifact::new(
        request_id,
        &aggregated,
        &after_result.path_stats,
        &after_result.impossible_paths,
        before_result.timed_out || after_result.timed_out,
    );

    if let Some(parent) = config.dest_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AnalyzerError::Config(format!("{}: {}", parent.display(), e)))?;
    }
    artifact.write(&config.dest_path)?;

    Ok(artifact)
}
