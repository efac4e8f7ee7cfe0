//! Per-path interpreter state: everything that is exclusively owned while a
//! path is live and deep-cloned when `JUMPI` forks execution.

use std::collections::HashMap;

use crate::expr::Expr;
use crate::value::NodeId;

use super::memory::Memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Normal,
    Exception,
    LoopLimit,
    GasLimit,
}

/// Parallel arrays tracking the accumulated branch predicates guarding this
/// path. All three vectors must stay the same length (§8 invariant 6).
#[derive(Debug, Clone, Default)]
pub struct PathCondition {
    pub expr: Vec<Expr>,
    pub node: Vec<NodeId>,
    pub branch_sign: Vec<bool>,
}

impl PathCondition {
    pub fn push(&mut self, expr: Expr, node: NodeId, branch_sign: bool) {
        self.expr.push(expr);
        self.node.push(node);
        self.branch_sign.push(branch_sign);
    }

    pub fn last_constraint(&self) -> Option<(NodeId, bool)> {
        match (self.node.last(), self.branch_sign.last()) {
            (Some(&n), Some(&s)) => Some((n, s)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.expr.len(), self.node.len());
        debug_assert_eq!(self.node.len(), self.branch_sign.len());
        self.expr.len()
    }
}

#[derive(Debug, Clone)]
pub struct PathState {
    pub stack: Vec<Expr>,
    pub memory: Memory,
    /// Per-path storage slot values; structural node identity for the slot
    /// itself lives in the shared arena (see `Arena::find_storage_slot`).
    pub storage: Vec<(Expr, Expr)>,
    /// Per-path native-token balances, keyed by address expression.
    pub balances: Vec<(Expr, Expr)>,
    pub path_condition: PathCondition,
    /// Local per-path edge visit counts, keyed by `(from_block_pc, to_block_pc)`.
    pub visited: HashMap<(usize, usize), u32>,
    pub gas: u64,
    pub current_function: String,
    /// The condition popped by the most recently executed `JUMPI`, consumed
    /// by the interpreter's block-outcome dispatch once the block's last
    /// instruction has run.
    pub jumpi_condition: Option<Expr>,
    /// Set by an instruction that concludes the path outright mid-block (a
    /// concretely-zero `DIV`/`SDIV`/`MOD`/`SMOD` divisor): the remaining
    /// instructions in the block are skipped and the path finishes normally.
    pub halted: bool,
}

impl PathState {
    pub fn new(initial_function: impl Into<String>) -> Self {
        Self {
            stack: Vec::new(),
            memory: Memory::default(),
            storage: Vec::new(),
            balances: Vec::new(),
            path_condition: PathCondition::default(),
            visited: HashMap::new(),
            gas: 0,
            current_function: initial_function.into(),
            jumpi_condition: None,
            halted: false,
        }
    }

    pub fn push(&mut self, v: Expr) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> Option<Expr> {
        self.stack.pop()
    }

    pub fn find_balance(&self, addr: &Expr, eq_zero_diff: bool) -> Option<usize> {
        self.balances.iter().position(|(a, _)| {
            let diff_is_zero = a.semantically_eq(addr);
            if eq_zero_diff {
                diff_is_zero
            } else {
                !diff_is_zero
            }
        })
    }
}
