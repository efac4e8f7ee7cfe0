//! Which source language an AST came from, used to pick the right
//! node-type table for the AST-shaped indices (`sequence_src`, `selection_src`,
//! `loop_src`). Parsing itself stays delegated to whatever produced the
//! `serde_json::Value` tree in the first place; this only selects the table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Solidity,
    JavaScript,
    TypeScript,
    Rust,
    Move,
}

impl Default for Language {
    fn default() -> Self {
        Language::Solidity
    }
}
