//! The semantic/side-effect graph (SSG): per-function directed graphs of value
//! nodes connected by value-flow, control-flow, and constraint-flow edges.
//!
//! Construction is idempotent at the pc level (state-changing opcodes get one
//! node regardless of how many paths visit them) and structurally deduplicated
//! for pure algebraic values (`Expression`/`Address`), matching the design's
//! dedup rules. Edge accumulation records every path that traverses an edge as
//! a `(path_id, label)` pair rather than creating parallel edges.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::expr::Expr;
use crate::value::{Arena, NodeId, ValueNode};

pub const GLOBAL_FUNCTION: &str = "@global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    ValueFlow,
    ControlFlow,
    ConstraintFlow,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeData {
    pub kind: Option<EdgeKind>,
    /// `(path_id, label)` recorded on every traversal of this edge.
    pub traversals: Vec<(u64, String)>,
}

pub struct SemanticGraph {
    pub arena: Arena,
    functions: HashMap<String, DiGraph<NodeId, EdgeData>>,
    node_index: HashMap<(String, NodeId), NodeIndex>,
}

impl Default for SemanticGraph {
    fn default() -> Self {
        let mut functions = HashMap::new();
        functions.insert(GLOBAL_FUNCTION.to_string(), DiGraph::new());
        Self {
            arena: Arena::default(),
            functions,
            node_index: HashMap::new(),
        }
    }
}

impl SemanticGraph {
    pub fn function_graph(&self, name: &str) -> Option<&DiGraph<NodeId, EdgeData>> {
        self.functions.get(name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &String> {
        self.functions.keys()
    }

    fn ensure_function(&mut self, name: &str) {
        self.functions
            .entry(name.to_string())
            .or_insert_with(DiGraph::new);
    }

    fn graph_index(&mut self, function: &str, node: NodeId) -> NodeIndex {
        self.ensure_function(function);
        let key = (function.to_string(), node);
        if let Some(&idx) = self.node_index.get(&key) {
            return idx;
        }
        let graph = self.functions.get_mut(function).unwrap();
        let idx = graph.add_node(node);
        self.node_index.insert(key, idx);
        idx
    }

    /// Wires an edge of `kind` from `src` to `dst` within `function`'s graph,
    /// recording `(path_id, label)`. If an edge already exists between this
    /// ordered pair with a *different* kind, the mismatch is logged and no
    /// second edge is created (non-fatal, per the one-edge-per-pair contract).
    pub fn add_edge(
        &mut self,
        function: &str,
        kind: EdgeKind,
        src: NodeId,
        dst: NodeId,
        path_id: u64,
        label: impl Into<String>,
    ) {
        let src_idx = self.graph_index(function, src);
        let dst_idx = self.graph_index(function, dst);
        let graph = self.functions.get_mut(function).unwrap();

        if let Some(edge_idx) = graph.find_edge(src_idx, dst_idx) {
            let data = &mut graph[edge_idx];
            match data.kind {
                Some(existing) if existing != kind => {
                    tracing::error!(
                        function,
                        ?existing,
                        ?kind,
                        "edge kind mismatch between {:?} and {:?}",
                        src,
                        dst
                    );
                    return;
                }
                _ => {}
            }
            data.kind = Some(kind);
            data.traversals.push((path_id, label.into()));
        } else {
            graph.add_edge(
                src_idx,
                dst_idx,
                EdgeData {
                    kind: Some(kind),
                    traversals: vec![(path_id, label.into())],
                },
            );
        }
    }

    pub fn add_value_node(&mut self, node: ValueNode) -> NodeId {
        self.arena.alloc(node)
    }

    pub fn add_expression_node(&mut self, expr: Expr) -> NodeId {
        let id = self.arena.add_expression_node(expr.clone());
        for sym in expr.free_vars() {
            let var_id = self.arena.add_expression_node(Expr::Sym(sym));
            // A bare free variable is its own node already cached above; skip
            // self-loop wiring.
            if var_id != id {
                self.add_edge(GLOBAL_FUNCTION, EdgeKind::ValueFlow, var_id, id, 0, "operand");
            }
        }
        id
    }

    pub fn add_address_node(&mut self, expr: Expr) -> NodeId {
        self.arena.add_address_node(expr)
    }

    /// Idempotent per-pc constraint node; wires a `control_flow` edge from the
    /// previous constraint node on this path, labeled with the prior branch
    /// sign, and appends this path's branch expression.
    pub fn add_constraint_node(
        &mut self,
        function: &str,
        pc: usize,
        path_id: u64,
        branch_expr: Expr,
        prev: Option<(NodeId, bool)>,
    ) -> NodeId {
        let (id, _created) = self.arena.constraint_node(pc);
        if let ValueNode::Constraint { paths, .. } = self.arena.get_mut(id) {
            paths.push((branch_expr, path_id));
        }
        if let Some((prev_id, branch_sign)) = prev {
            self.add_edge(
                function,
                EdgeKind::ControlFlow,
                prev_id,
                id,
                path_id,
                if branch_sign { "true" } else { "false" },
            );
        }
        id
    }

    pub fn add_sstore_node(
        &mut self,
        function: &str,
        pc: usize,
        path_id: u64,
        address: NodeId,
        value: NodeId,
        constraint: Option<NodeId>,
    ) -> NodeId {
        let (id, _created) = self
            .arena
            .sstore_node(pc, |_| ValueNode::InstructionOp {
                name: "SSTORE",
                args: vec![("address", address), ("value", value)],
                pc,
            });
        self.add_edge(function, EdgeKind::ValueFlow, address, id, path_id, "address");
        self.add_edge(function, EdgeKind::ValueFlow, value, id, path_id, "value");
        if let Some(c) = constraint {
            self.add_edge(function, EdgeKind::ConstraintFlow, c, id, path_id, "guard");
        }
        id
    }

    /// `args` are `(slot_label, node)` pairs in call-argument order; wires one
    /// value-flow edge per argument plus a constraint-flow edge from the
    /// current branch guard.
    pub fn add_message_call_node(
        &mut self,
        function: &str,
        pc: usize,
        path_id: u64,
        name: &'static str,
        args: Vec<(&'static str, NodeId)>,
        constraint: Option<NodeId>,
    ) -> NodeId {
        let (id, _created) = self.arena.message_call_node(pc, |_| ValueNode::InstructionOp {
            name,
            args: args.clone(),
            pc,
        });
        for (label, node) in &args {
            self.add_edge(function, EdgeKind::ValueFlow, *node, id, path_id, *label);
        }
        if let Some(c) = constraint {
            self.add_edge(function, EdgeKind::ConstraintFlow, c, id, path_id, "guard");
        }
        id
    }

    pub fn add_terminal_node(
        &mut self,
        function: &str,
        pc: usize,
        path_id: u64,
        name: &'static str,
        args: Vec<(&'static str, NodeId)>,
    ) -> NodeId {
        let (id, _created) = self.arena.terminal_node(pc, |_| ValueNode::InstructionOp {
            name,
            args: args.clone(),
            pc,
        });
        for (label, node) in &args {
            self.add_edge(function, EdgeKind::ValueFlow, *node, id, path_id, *label);
        }
        id
    }

    pub fn value_flow_edge_count(&self, function: &str) -> usize {
        self.count_edges(function, EdgeKind::ValueFlow)
    }

    pub fn control_flow_edge_count(&self, function: &str) -> usize {
        self.count_edges(function, EdgeKind::ControlFlow)
    }

    fn count_edges(&self, function: &str, kind: EdgeKind) -> usize {
        self.functions
            .get(function)
            .map(|g| {
                g.edge_indices()
                    .filter(|&e| g[e].kind == Some(kind))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn repeated_edge_same_kind_accumulates_traversals() {
        let mut ssg = SemanticGraph::default();
        let a = ssg.arena.add_expression_node(Expr::Const(U256::from(1)));
        let b = ssg.arena.add_expression_node(Expr::Const(U256::from(2)));
        ssg.add_edge(GLOBAL_FUNCTION, EdgeKind::ValueFlow, a, b, 1, "x");
        ssg.add_edge(GLOBAL_FUNCTION, EdgeKind::ValueFlow, a, b, 2, "x");
        assert_eq!(ssg.value_flow_edge_count(GLOBAL_FUNCTION), 1);
        let graph = ssg.function_graph(GLOBAL_FUNCTION).unwrap();
        let edge = graph.edge_indices().next().unwrap();
        assert_eq!(graph[edge].traversals.len(), 2);
    }

    #[test]
    fn conflicting_edge_kind_is_logged_and_ignored() {
        let mut ssg = SemanticGraph::default();
        let a = ssg.arena.add_expression_node(Expr::Const(U256::from(1)));
        let b = ssg.arena.add_expression_node(Expr::Const(U256::from(2)));
        ssg.add_edge(GLOBAL_FUNCTION, EdgeKind::ValueFlow, a, b, 1, "x");
        ssg.add_edge(GLOBAL_FUNCTION, EdgeKind::ControlFlow, a, b, 1, "y");
        assert_eq!(ssg.value_flow_edge_count(GLOBAL_FUNCTION), 1);
        assert_eq!(ssg.control_flow_edge_count(GLOBAL_FUNCTION), 0);
    }
}
