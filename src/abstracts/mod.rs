//! The pluggable abstract-index registry: each index is a `(name, compute)`
//! pair operating on one of the three artifacts available per revision (the
//! parsed source AST, the constructed CFG, or the built SSG). `Config`'s
//! `ast_abstracts`/`cfg_abstracts`/`ssg_abstracts` lists select, by name,
//! which of these actually run for a given request.

pub mod ast;
pub mod cfg_index;
pub mod language;
pub mod ssg_index;
pub mod tag;

use std::time::Duration;

use serde_json::Value;

use crate::bytecode::Cfg;
use crate::error::Result;
use crate::source::{Diff, Source};
use crate::ssg::SemanticGraph;

pub use language::Language;

/// The value an index produces: most are plain counts, but `tag_src` produces
/// a set of category labels that the aggregator treats differently (carried
/// from the after side rather than subtracted).
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Number(f64),
    Tags(Vec<String>),
}

pub struct AstIndices<'a> {
    pub ast: &'a Value,
    pub source: &'a Source,
    pub diff: Option<&'a Diff>,
    pub skills: Option<&'a tag::Skills>,
    pub language: Language,
}

impl<'a> AstIndices<'a> {
    pub fn compute(&self, name: &str) -> Result<Option<IndexValue>> {
        let value = match name {
            "sequence_src" => IndexValue::Number(ast::sequence_src(self.ast, self.language) as f64),
            "selection_src" => IndexValue::Number(ast::selection_src(self.ast, self.language) as f64),
            "loop_src" => IndexValue::Number(ast::loop_src(self.ast, self.language) as f64),
            // The skills catalog this tool ships with is Solidity-specific
            // (require/assert/reentrancy-guard style patterns), so tag_src
            // only fires for Solidity inputs.
            "tag_src" => match (self.language, self.skills, self.diff) {
                (Language::Solidity, Some(skills), Some(diff)) => {
                    IndexValue::Tags(tag::tag_src(self.ast, self.source, diff, skills))
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

pub struct CfgIndices<'a> {
    pub cfg: &'a Cfg,
    pub loop_timeout: Duration,
}

impl<'a> CfgIndices<'a> {
    pub fn compute(&self, name: &str) -> Result<Option<IndexValue>> {
        let value = match name {
            "sequence_bin" => IndexValue::Number(cfg_index::sequence_bin(self.cfg) as f64),
            "loop_bin" => {
                IndexValue::Number(cfg_index::loop_bin(self.cfg, self.loop_timeout)? as f64)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

pub struct SsgIndices<'a> {
    pub ssg: &'a SemanticGraph,
}

impl<'a> SsgIndices<'a> {
    pub fn compute(&self, name: &str) -> Result<Option<IndexValue>> {
        let value = match name {
            "data_flow" => IndexValue::Number(ssg_index::data_flow(self.ssg) as f64),
            "control_flow" => IndexValue::Number(ssg_index::control_flow(self.ssg) as f64),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}
