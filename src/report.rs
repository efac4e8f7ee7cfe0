//! Serializes the final per-request artifact to JSON: aggregated abstract
//! indices, path-termination statistics, and the impossible-path log.
//!
//! Also writes the per-revision artifact set named by §6: a JSON dump and a
//! plain-text edge list for each of the AST, CFG, and SSG, plus an
//! un-diffed abstract summary per artifact kind. These sit alongside the
//! merged `*_abstract.json` this module has always produced.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use petgraph::visit::EdgeRef;
use serde::Serialize;
use serde_json::Value;

use crate::abstracts::IndexValue;
use crate::aggregator::AggregatedValue;
use crate::bytecode::Cfg;
use crate::error::{AnalyzerError, ReportError, Result};
use crate::interpreter::ImpossiblePath;
use crate::ssg::SemanticGraph;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexReport {
    Number { value: f64 },
    Tags { value: Vec<String> },
}

impl From<&AggregatedValue> for IndexReport {
    fn from(v: &AggregatedValue) -> Self {
        match v {
            AggregatedValue::Number(n) => IndexReport::Number { value: *n },
            AggregatedValue::Tags(t) => IndexReport::Tags { value: t.clone() },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImpossiblePathReport {
    pub from_pc: usize,
    pub target_pc: usize,
}

impl From<&ImpossiblePath> for ImpossiblePathReport {
    fn from(p: &ImpossiblePath) -> Self {
        Self {
            from_pc: p.from_pc,
            target_pc: p.target_pc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Artifact {
    pub request_id: String,
    pub indices: BTreeMap<String, IndexReport>,
    pub path_stats: BTreeMap<String, u64>,
    pub impossible_paths: Vec<ImpossiblePathReport>,
    pub timed_out: bool,
}

impl Artifact {
    pub fn new(
        request_id: impl Into<String>,
        indices: &BTreeMap<String, AggregatedValue>,
        path_stats: &std::collections::HashMap<&'static str, u64>,
        impossible_paths: &[ImpossiblePath],
        timed_out: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            indices: indices.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            path_stats: path_stats.iter().map(|(&k, &v)| (k.to_string(), v)).collect(),
            impossible_paths: impossible_paths.iter().map(Into::into).collect(),
            timed_out,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| AnalyzerError::Report(ReportError::Serialize(e)))?;
        std::fs::write(path, json).map_err(|e| {
            AnalyzerError::Report(ReportError::Io {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        Ok(())
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| AnalyzerError::Report(ReportError::Serialize(e)))?;
    write_bytes(path, &json)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| {
        AnalyzerError::Report(ReportError::Io {
            path: path.display().to_string(),
            source: e,
        })
    })
}

/// Flattens a solc AST tree into `(parent_id, child_id, field_name)` edges,
/// assigning each JSON object a sequential id in pre-order.
fn ast_edgelist_lines(ast: &Value) -> String {
    let mut lines = String::new();
    let mut next_id = 0u64;
    fn walk(value: &Value, parent: Option<(u64, &str)>, next_id: &mut u64, lines: &mut String) {
        if let Value::Object(map) = value {
            let id = *next_id;
            *next_id += 1;
            if let Some((parent_id, field)) = parent {
                lines.push_str(&format!("{parent_id}\t{id}\t{field}\n"));
            }
            for (key, child) in map {
                match child {
                    Value::Object(_) => walk(child, Some((id, key)), next_id, lines),
                    Value::Array(items) => {
                        for item in items {
                            walk(item, Some((id, key)), next_id, lines);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    walk(ast, None, &mut next_id, &mut lines);
    lines
}

fn cfg_json(cfg: &Cfg) -> Value {
    let blocks: Vec<Value> = cfg
        .graph
        .node_indices()
        .map(|idx| {
            let block = &cfg.graph[idx];
            serde_json::json!({
                "start_pc": block.start_pc,
                "end_pc": block.end_pc,
                "termination": format!("{:?}", block.termination),
                "source_lines": [block.source_lines.0, block.source_lines.1],
                "changed": block.changed,
            })
        })
        .collect();
    serde_json::json!({ "blocks": blocks, "function_entries": cfg.function_entries })
}

fn cfg_edgelist_lines(cfg: &Cfg) -> String {
    let mut lines = String::new();
    for edge in cfg.graph.edge_references() {
        let src = cfg.graph[edge.source()].start_pc;
        let dst = cfg.graph[edge.target()].start_pc;
        lines.push_str(&format!("{src}\t{dst}\t{:?}\n", edge.weight()));
    }
    lines
}

fn ssg_json(ssg: &SemanticGraph) -> Value {
    let functions: BTreeMap<String, Vec<Value>> = ssg
        .function_names()
        .map(|name| {
            let nodes = ssg.function_graph(name).map(|g| {
                g.node_indices()
                    .map(|idx| {
                        let node_id = g[idx];
                        serde_json::json!({
                            "id": node_id.0,
                            "label": format!("{:?}", ssg.arena.get(node_id)),
                        })
                    })
                    .collect()
            });
            (name.clone(), nodes.unwrap_or_default())
        })
        .collect();
    serde_json::json!({ "functions": functions })
}

fn ssg_edgelist_lines(ssg: &SemanticGraph) -> String {
    let mut lines = String::new();
    for name in ssg.function_names() {
        let Some(graph) = ssg.function_graph(name) else {
            continue;
        };
        for edge in graph.edge_references() {
            let src = graph[edge.source()].0;
            let dst = graph[edge.target()].0;
            lines.push_str(&format!(
                "{name}\t{src}\t{dst}\t{:?}\n",
                edge.weight().kind
            ));
        }
    }
    lines
}

fn abstract_json(indices: &BTreeMap<String, IndexValue>, names: &[String]) -> Value {
    let entries: BTreeMap<String, Value> = names
        .iter()
        .filter_map(|name| indices.get(name).map(|v| (name.clone(), index_value_json(v))))
        .collect();
    serde_json::json!(entries)
}

fn index_value_json(value: &IndexValue) -> Value {
    match value {
        IndexValue::Number(n) => serde_json::json!(n),
        IndexValue::Tags(tags) => serde_json::json!(tags),
    }
}

/// Writes the full per-revision artifact set named by §6 into `dir`, with
/// filenames prefixed `{side}_` (e.g. `before_cfg.json`).
pub fn write_revision_artifacts(
    dir: &Path,
    side: &str,
    ast: &Value,
    cfg: &Cfg,
    ssg: &SemanticGraph,
    indices: &BTreeMap<String, IndexValue>,
    ast_abstracts: &[String],
    cfg_abstracts: &[String],
    ssg_abstracts: &[String],
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AnalyzerError::Report(ReportError::Io { path: dir.display().to_string(), source: e }))?;

    let path = |name: &str| -> PathBuf { dir.join(format!("{side}_{name}")) };

    write_json(&path("ast.json"), ast)?;
    write_bytes(&path("ast_edgelist"), ast_edgelist_lines(ast).as_bytes())?;
    write_json(&path("ast_abstract.json"), &abstract_json(indices, ast_abstracts))?;

    write_json(&path("cfg.json"), &cfg_json(cfg))?;
    write_bytes(&path("cfg_edgelist"), cfg_edgelist_lines(cfg).as_bytes())?;
    write_json(&path("cfg_abstract.json"), &abstract_json(indices, cfg_abstracts))?;

    write_json(&path("ssg.json"), &ssg_json(ssg))?;
    write_bytes(&path("ssg_edgelist"), ssg_edgelist_lines(ssg).as_bytes())?;
    write_json(&path("ssg_abstract.json"), &abstract_json(indices, ssg_abstracts))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_report_roundtrips_as_tagged_json() {
        let value = AggregatedValue::Number(4.0);
        let report: IndexReport = (&value).into();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"number\""));
    }
}
