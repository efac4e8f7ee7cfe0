//! Run configuration and per-request context.
//!
//! Mirrors the external `Config` contract: destination/input paths, the global
//! symbolic-execution timeout, the set of abstract indices to compute per artifact
//! kind, and an optional skills catalog used by `tag_src`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::abstracts::Language;
use crate::error::ErrorKind;

fn default_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dest_path: PathBuf,
    pub input_path: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub ast_abstracts: Vec<String>,
    #[serde(default)]
    pub cfg_abstracts: Vec<String>,
    #[serde(default)]
    pub ssg_abstracts: Vec<String>,
    #[serde(default)]
    pub tags: Option<PathBuf>,
    /// Source language the `ast_path` tree was parsed from. Defaults to
    /// Solidity so existing configs without this field keep behaving the
    /// same way they always have.
    #[serde(default)]
    pub language: Language,
}

impl Config {
    /// Loads a `Config` from either JSON or YAML, inferred from the file extension.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AnalyzerError::Config(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| crate::error::AnalyzerError::Config(e.to_string())),
            _ => serde_json::from_str(&raw)
                .map_err(|e| crate::error::AnalyzerError::Config(e.to_string())),
        }
    }

    /// Loads the sibling `skills_tag.yaml` catalog next to this config, if `tags` is set.
    pub fn load_skills(&self) -> crate::error::Result<Option<crate::abstracts::tag::Skills>> {
        let Some(path) = &self.tags else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AnalyzerError::Config(format!("{}: {}", path.display(), e)))?;
        let skills: crate::abstracts::tag::Skills = serde_yaml::from_str(&raw)
            .map_err(|e| crate::error::AnalyzerError::Config(e.to_string()))?;
        Ok(Some(skills))
    }
}

/// Per-request state threaded through the pipeline: which indices errored on which
/// revision, and whether the global timeout fired. Combines the original tool's
/// `Context` struct and `ExecErrorType` enum into one typed structure.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub errored_before: HashMap<String, ErrorKind>,
    pub errored_after: HashMap<String, ErrorKind>,
    pub timed_out: bool,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn mark_errored_before(&mut self, index: &str, kind: ErrorKind) {
        self.errored_before.insert(index.to_string(), kind);
    }

    pub fn mark_errored_after(&mut self, index: &str, kind: ErrorKind) {
        self.errored_after.insert(index.to_string(), kind);
    }

    pub fn errored(&self, index: &str) -> bool {
        self.errored_before.contains_key(index) || self.errored_after.contains_key(index)
    }
}
