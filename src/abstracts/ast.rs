//! AST-level abstract indices computed over an already-parsed source AST.
//!
//! No Solidity (or JS/TS/Rust/Move) parser is embedded (see the crate's
//! Non-goals): the tree is accepted as an already-parsed `serde_json::Value`
//! and walked generically by its node-kind field, the same field every
//! front-end's AST carries under one of a few conventional names. Only the
//! table of which node-kind strings count as a statement, a conditional, or a
//! loop varies per [`Language`] -- one walker serves all five.

use serde_json::Value;

use super::language::Language;

const SOLIDITY_SEQUENCE_NODE_TYPES: &[&str] = &[
    "ExpressionStatement",
    "VariableDeclarationStatement",
    "Return",
    "EmitStatement",
    "Assignment",
    "PlaceholderStatement",
    "RevertStatement",
];

const JS_SEQUENCE_NODE_TYPES: &[&str] = &[
    "expression_statement",
    "variable_declaration",
    "lexical_declaration",
    "return_statement",
];

const MOVE_SEQUENCE_NODE_TYPES: &[&str] = &["let_statement", "expression_statement"];

const SOLIDITY_LOOP_NODE_TYPES: &[&str] = &["ForStatement", "WhileStatement", "DoWhileStatement"];
const JS_LOOP_NODE_TYPES: &[&str] = &["for_statement", "for_in_statement", "while_statement", "do_statement"];
const RUST_LOOP_NODE_TYPES: &[&str] = &["for_expression", "while_expression", "loop_expression"];
const MOVE_LOOP_NODE_TYPES: &[&str] = &["while_expression", "loop_expression"];

const JS_SELECTION_NODE_TYPES: &[&str] = &["if_statement", "ternary_expression", "switch_statement"];
const RUST_SELECTION_NODE_TYPES: &[&str] = &["if_expression", "match_expression"];
const MOVE_SELECTION_NODE_TYPES: &[&str] = &["if_expression"];

/// A node's kind discriminant, tried under the field name each front-end
/// actually uses: solc's `nodeType`, a raw tree-sitter `type`, or the
/// `name` field the tree-sitter-backed walkers in this tool's sibling
/// front ends use.
fn node_kind(map: &serde_json::Map<String, Value>) -> Option<&str> {
    map.get("nodeType")
        .or_else(|| map.get("type"))
        .or_else(|| map.get("name"))
        .and_then(Value::as_str)
}

pub fn sequence_src(ast: &Value, language: Language) -> u64 {
    match language {
        Language::Solidity => count_node_types(ast, SOLIDITY_SEQUENCE_NODE_TYPES),
        Language::JavaScript | Language::TypeScript => count_node_types(ast, JS_SEQUENCE_NODE_TYPES),
        Language::Move => count_node_types(ast, MOVE_SEQUENCE_NODE_TYPES),
        // Rust's grammar spreads statement/declaration forms across many
        // specific node kinds; match by substring the way the original
        // tool's rust_sequence_src does, rather than enumerating each one.
        Language::Rust => count_matching(ast, |kind| kind.contains("statement") || kind.contains("declaration")),
    }
}

/// Counts `if`/conditional nodes. Solidity gets the richer rule: an
/// `if`/`else` with both branches present counts twice (once per branch) and
/// a `require(`/`assert(` call counts as a selection node too. The other
/// languages count their conditional-expression node kinds directly, since
/// their grammars represent an `if`/`else` as a single node.
pub fn selection_src(ast: &Value, language: Language) -> u64 {
    match language {
        Language::Solidity => {
            let mut count = 0;
            count_solidity_selections(ast, &mut count);
            count
        }
        Language::JavaScript | Language::TypeScript => count_node_types(ast, JS_SELECTION_NODE_TYPES),
        Language::Rust => count_node_types(ast, RUST_SELECTION_NODE_TYPES),
        Language::Move => count_node_types(ast, MOVE_SELECTION_NODE_TYPES),
    }
}

fn count_solidity_selections(value: &Value, count: &mut u64) {
    match value {
        Value::Object(map) => {
            match map.get("nodeType").and_then(Value::as_str) {
                Some("IfStatement") => {
                    *count += 1;
                    if map.get("falseBody").map(|v| !v.is_null()).unwrap_or(false) {
                        *count += 1;
                    }
                }
                Some("Conditional") | Some("TryStatement") => *count += 1,
                Some("FunctionCall") => {
                    let callee_name = map
                        .get("expression")
                        .and_then(|e| e.get("name"))
                        .and_then(Value::as_str);
                    if matches!(callee_name, Some("require") | Some("assert")) {
                        *count += 1;
                    }
                }
                _ => {}
            }
            for v in map.values() {
                count_solidity_selections(v, count);
            }
        }
        Value::Array(items) => {
            for v in items {
                count_solidity_selections(v, count);
            }
        }
        _ => {}
    }
}

pub fn loop_src(ast: &Value, language: Language) -> u64 {
    match language {
        Language::Solidity => count_node_types(ast, SOLIDITY_LOOP_NODE_TYPES),
        Language::JavaScript | Language::TypeScript => count_node_types(ast, JS_LOOP_NODE_TYPES),
        Language::Rust => count_node_types(ast, RUST_LOOP_NODE_TYPES),
        Language::Move => count_node_types(ast, MOVE_LOOP_NODE_TYPES),
    }
}

fn count_node_types(value: &Value, kinds: &[&str]) -> u64 {
    let mut count = 0;
    count_into(value, kinds, &mut count);
    count
}

fn count_into(value: &Value, kinds: &[&str], count: &mut u64) {
    match value {
        Value::Object(map) => {
            if let Some(kind) = node_kind(map) {
                if kinds.contains(&kind) {
                    *count += 1;
                }
            }
            for v in map.values() {
                count_into(v, kinds, count);
            }
        }
        Value::Array(items) => {
            for v in items {
                count_into(v, kinds, count);
            }
        }
        _ => {}
    }
}

fn count_matching(value: &Value, predicate: impl Fn(&str) -> bool + Copy) -> u64 {
    let mut count = 0;
    count_matching_into(value, predicate, &mut count);
    count
}

fn count_matching_into(value: &Value, predicate: impl Fn(&str) -> bool + Copy, count: &mut u64) {
    match value {
        Value::Object(map) => {
            if let Some(kind) = node_kind(map) {
                if predicate(kind) {
                    *count += 1;
                }
            }
            for v in map.values() {
                count_matching_into(v, predicate, count);
            }
        }
        Value::Array(items) => {
            for v in items {
                count_matching_into(v, predicate, count);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_nested_if_and_loop_nodes() {
        let ast = json!({
            "nodeType": "FunctionDefinition",
            "body": {
                "nodeType": "Block",
                "statements": [
                    {"nodeType": "ExpressionStatement"},
                    {"nodeType": "IfStatement", "trueBody": {"nodeType": "ForStatement"}},
                ]
            }
        });
        assert_eq!(sequence_src(&ast, Language::Solidity), 1);
        assert_eq!(selection_src(&ast, Language::Solidity), 1);
        assert_eq!(loop_src(&ast, Language::Solidity), 1);
    }

    #[test]
    fn selection_src_doubles_for_else_and_counts_require_and_assert() {
        let ast = json!({
            "nodeType": "Block",
            "statements": [
                {
                    "nodeType": "IfStatement",
                    "trueBody": {"nodeType": "Block"},
                    "falseBody": {"nodeType": "Block"}
                },
                {
                    "nodeType": "ExpressionStatement",
                    "expression": {
                        "nodeType": "FunctionCall",
                        "expression": {"nodeType": "Identifier", "name": "require"}
                    }
                },
                {
                    "nodeType": "ExpressionStatement",
                    "expression": {
                        "nodeType": "FunctionCall",
                        "expression": {"nodeType": "Identifier", "name": "assert"}
                    }
                }
            ]
        });
        assert_eq!(selection_src(&ast, Language::Solidity), 4);
    }

    #[test]
    fn javascript_tree_sitter_shaped_ast_is_not_silently_zero() {
        // for (var i=0;i<10;i++) { if (i) { x; } }
        let ast = json!({
            "type": "program",
            "children": [{
                "type": "for_statement",
                "children": [{
                    "type": "statement_block",
                    "children": [{
                        "type": "if_statement",
                        "children": [{"type": "expression_statement"}]
                    }]
                }]
            }]
        });
        assert_eq!(loop_src(&ast, Language::JavaScript), 1);
        assert_eq!(selection_src(&ast, Language::JavaScript), 1);
        assert_eq!(sequence_src(&ast, Language::JavaScript), 1);
    }

    #[test]
    fn rust_sequence_src_matches_by_statement_or_declaration_substring() {
        let ast = json!({
            "name": "block",
            "children": [
                {"name": "let_declaration"},
                {"name": "expression_statement"},
                {"name": "if_expression"}
            ]
        });
        assert_eq!(sequence_src(&ast, Language::Rust), 2);
        assert_eq!(selection_src(&ast, Language::Rust), 1);
    }

    #[test]
    fn move_if_expression_counts_as_one_selection_node() {
        let ast = json!({
            "name": "function_body",
            "children": [{"name": "if_expression"}]
        });
        assert_eq!(selection_src(&ast, Language::Move), 1);
        assert_eq!(loop_src(&ast, Language::Move), 0);
    }
}
