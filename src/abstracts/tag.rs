//! `tag_src`: matches a Solidity contract's call graph against an
//! operator-supplied skills catalog, emitting one tag string per catalog hit
//! whose source span falls inside the after-revision diff.
//!
//! Two relations make up the catalog: `api` (a tag fires when the contract
//! *calls* a cataloged external contract's function) and `interface` (a tag
//! fires when the contract itself *implements* a cataloged set of function
//! names). Both are keyed `tag -> {contract_name -> [function_name]}`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::{Diff, Source};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skills {
    #[serde(default)]
    pub api: HashMap<String, HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub interface: HashMap<String, HashMap<String, Vec<String>>>,
}

/// A `FunctionCall` found inside some function's body: the contract
/// qualifier for a member-access callee (`other.call(...)` -> `Some("other")`),
/// the callee name itself, and the source span of the call expression.
struct Callee {
    qualifier: Option<String>,
    name: String,
    start_line: usize,
    end_line: usize,
}

/// A function definition acting as a call-graph caller node.
struct FunctionNode {
    contract: String,
    start_line: usize,
    end_line: usize,
    callees: Vec<Callee>,
}

/// Parses a solc `src` attribute (`"start:length:fileIndex"`) into
/// `(start, length)`.
fn parse_src(src: &str) -> Option<(usize, usize)> {
    let mut fields = src.split(':');
    let start: usize = fields.next()?.parse().ok()?;
    let length: usize = fields.next()?.parse().ok()?;
    Some((start, length))
}

fn node_lines(node: &Value, source: &Source) -> Option<(usize, usize)> {
    let src = node.get("src")?.as_str()?;
    let (start, length) = parse_src(src)?;
    Some(source.lines_covering(start, length))
}

fn callee_from_call(call: &Value, source: &Source) -> Option<Callee> {
    let expression = call.get("expression")?;
    let (qualifier, name) = match expression.get("nodeType").and_then(Value::as_str) {
        Some("MemberAccess") => {
            let member = expression.get("memberName").and_then(Value::as_str)?;
            let base = expression
                .get("expression")
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (base, member.to_string())
        }
        Some("Identifier") => {
            let name = expression.get("name").and_then(Value::as_str)?;
            (None, name.to_string())
        }
        _ => return None,
    };
    let (start_line, end_line) = node_lines(call, source)?;
    Some(Callee {
        qualifier,
        name,
        start_line,
        end_line,
    })
}

fn collect_callees(value: &Value, source: &Source, out: &mut Vec<Callee>) {
    match value {
        Value::Object(map) => {
            if map.get("nodeType").and_then(Value::as_str) == Some("FunctionCall") {
                if let Some(callee) = callee_from_call(value, source) {
                    out.push(callee);
                }
            }
            for v in map.values() {
                collect_callees(v, source, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_callees(v, source, out);
            }
        }
        _ => {}
    }
}

/// Walks `ContractDefinition -> FunctionDefinition` nodes, building one
/// caller node per function with its callees collected from its body.
fn collect_functions(ast: &Value, source: &Source) -> Vec<FunctionNode> {
    let mut functions = Vec::new();
    let Some(nodes) = ast.get("nodes").and_then(Value::as_array) else {
        return functions;
    };
    for contract in nodes {
        if contract.get("nodeType").and_then(Value::as_str) != Some("ContractDefinition") {
            continue;
        }
        let Some(contract_name) = contract.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(members) = contract.get("nodes").and_then(Value::as_array) else {
            continue;
        };
        for member in members {
            if member.get("nodeType").and_then(Value::as_str) != Some("FunctionDefinition") {
                continue;
            }
            let Some((start_line, end_line)) = node_lines(member, source) else {
                continue;
            };
            let mut callees = Vec::new();
            if let Some(body) = member.get("body") {
                collect_callees(body, source, &mut callees);
            }
            functions.push(FunctionNode {
                contract: contract_name.to_string(),
                start_line,
                end_line,
                callees,
            });
        }
    }
    functions
}

/// `contract_name -> {defined function names}`, used to decide whether a
/// contract satisfies an interface catalog entry's required function set.
fn collect_contract_function_names(ast: &Value) -> HashMap<String, HashSet<String>> {
    let mut out: HashMap<String, HashSet<String>> = HashMap::new();
    let Some(nodes) = ast.get("nodes").and_then(Value::as_array) else {
        return out;
    };
    for contract in nodes {
        if contract.get("nodeType").and_then(Value::as_str) != Some("ContractDefinition") {
            continue;
        }
        let Some(contract_name) = contract.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(members) = contract.get("nodes").and_then(Value::as_array) else {
            continue;
        };
        let entry = out.entry(contract_name.to_string()).or_default();
        for member in members {
            if member.get("nodeType").and_then(Value::as_str) == Some("FunctionDefinition") {
                if let Some(name) = member.get("name").and_then(Value::as_str) {
                    entry.insert(name.to_string());
                }
            }
        }
    }
    out
}

pub fn tag_src(ast: &Value, source: &Source, diff: &Diff, skills: &Skills) -> Vec<String> {
    let functions = collect_functions(ast, source);
    let defined = collect_contract_function_names(ast);
    let file = &source.path;

    let mut tags = BTreeSet::new();

    // (i) API relation: a cataloged contract's function was called on a line
    // the after-diff touches.
    for function in &functions {
        for callee in &function.callees {
            let Some(qualifier) = &callee.qualifier else {
                continue;
            };
            if !diff.touches_after(callee.start_line, callee.end_line) {
                continue;
            }
            for (tag, contracts) in &skills.api {
                let Some(allowed_fns) = contracts.get(qualifier) else {
                    continue;
                };
                if allowed_fns.is_empty() || allowed_fns.iter().any(|f| f == &callee.name) {
                    tags.insert(format!(
                        "{tag}:{file}:call at:{}:{}",
                        callee.start_line, callee.end_line
                    ));
                }
            }
        }
    }

    // (ii) Interface relation: a contract defines every required function
    // name for a catalog entry, so every caller/callee touching the diff
    // inside that contract is tagged as implementing it.
    for (tag, contracts) in &skills.interface {
        for (contract_name, required) in contracts {
            let has_all = defined
                .get(contract_name)
                .map(|fns| required.iter().all(|r| fns.contains(r)))
                .unwrap_or(false);
            if !has_all {
                continue;
            }
            for function in functions.iter().filter(|f| &f.contract == contract_name) {
                if diff.touches_after(function.start_line, function.end_line) {
                    tags.insert(format!(
                        "{tag}:{file}:implement at:{}:{}",
                        function.start_line, function.end_line
                    ));
                }
                for callee in &function.callees {
                    if diff.touches_after(callee.start_line, callee.end_line) {
                        tags.insert(format!(
                            "{tag}:{file}:implement at:{}:{}",
                            callee.start_line, callee.end_line
                        ));
                    }
                }
            }
        }
    }

    tags.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source_with_lines(n: usize) -> Source {
        let text = (1..=n).map(|i| format!("line{i}\n")).collect::<String>();
        Source::new("Contract.sol", text.into_bytes())
    }

    #[test]
    fn api_tag_fires_for_cataloged_call_touching_the_diff() {
        // line 1: contract Foo { function f() public { other.call(x); } }
        let src = source_with_lines(3);
        let ast = json!({
            "nodeType": "SourceUnit",
            "nodes": [{
                "nodeType": "ContractDefinition",
                "name": "Foo",
                "nodes": [{
                    "nodeType": "FunctionDefinition",
                    "name": "f",
                    "src": "0:6:0",
                    "body": {
                        "nodeType": "Block",
                        "statements": [{
                            "nodeType": "ExpressionStatement",
                            "expression": {
                                "nodeType": "FunctionCall",
                                "src": "0:6:0",
                                "expression": {
                                    "nodeType": "MemberAccess",
                                    "memberName": "call",
                                    "expression": { "nodeType": "Identifier", "name": "other" }
                                }
                            }
                        }]
                    }
                }]
            }]
        });

        let mut api = HashMap::new();
        let mut contracts = HashMap::new();
        contracts.insert("other".to_string(), vec!["call".to_string()]);
        api.insert("external-call".to_string(), contracts);
        let skills = Skills { api, interface: HashMap::new() };

        let mut diff = Diff::default();
        diff.after_lines.insert(1);

        let tags = tag_src(&ast, &src, &diff, &skills);
        assert_eq!(tags, vec!["external-call:Contract.sol:call at:1:1".to_string()]);
    }

    #[test]
    fn interface_tag_fires_when_every_required_function_is_defined() {
        let src = source_with_lines(3);
        let ast = json!({
            "nodeType": "SourceUnit",
            "nodes": [{
                "nodeType": "ContractDefinition",
                "name": "Token",
                "nodes": [
                    {"nodeType": "FunctionDefinition", "name": "transfer", "src": "0:6:0", "body": {"nodeType": "Block", "statements": []}},
                    {"nodeType": "FunctionDefinition", "name": "balanceOf", "src": "7:6:0", "body": {"nodeType": "Block", "statements": []}}
                ]
            }]
        });

        let mut interface = HashMap::new();
        let mut contracts = HashMap::new();
        contracts.insert("Token".to_string(), vec!["transfer".to_string(), "balanceOf".to_string()]);
        interface.insert("erc20".to_string(), contracts);
        let skills = Skills { api: HashMap::new(), interface };

        let mut diff = Diff::default();
        diff.after_lines.insert(1);

        let tags = tag_src(&ast, &src, &diff, &skills);
        assert_eq!(tags, vec!["erc20:Contract.sol:implement at:1:1".to_string()]);
    }

    #[test]
    fn no_tags_when_the_call_falls_outside_the_diff() {
        let src = source_with_lines(3);
        let ast = json!({
            "nodeType": "SourceUnit",
            "nodes": [{
                "nodeType": "ContractDefinition",
                "name": "Foo",
                "nodes": [{
                    "nodeType": "FunctionDefinition",
                    "name": "f",
                    "src": "0:6:0",
                    "body": {
                        "nodeType": "Block",
                        "statements": [{
                            "nodeType": "ExpressionStatement",
                            "expression": {
                                "nodeType": "FunctionCall",
                                "src": "14:6:0",
                                "expression": {
                                    "nodeType": "MemberAccess",
                                    "memberName": "call",
                                    "expression": { "nodeType": "Identifier", "name": "other" }
                                }
                            }
                        }]
                    }
                }]
            }]
        });

        let mut api = HashMap::new();
        let mut contracts = HashMap::new();
        contracts.insert("other".to_string(), vec!["call".to_string()]);
        api.insert("external-call".to_string(), contracts);
        let skills = Skills { api, interface: HashMap::new() };

        let diff = Diff::default();
        assert!(tag_src(&ast, &src, &diff, &skills).is_empty());
    }
}
