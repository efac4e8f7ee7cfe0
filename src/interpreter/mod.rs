//! The depth-first, bounded symbolic interpreter.
//!
//! Exploration is driven by an explicit work-stack of `(block_pc, predecessor_pc,
//! PathState)` frames rather than native recursion (§9's "explicit work-stack
//! conversion"), so a pathologically deep contract cannot exhaust the host
//! stack. Two intentional quirks from the original tool are preserved exactly
//! rather than fixed — see the `JUMPI` and `CALL`/`CALLCODE` handling below and
//! `DESIGN.md`.

pub mod memory;
pub mod path;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use primitive_types::U256;

use crate::bytecode::{Cfg, Opcode, Termination};
use crate::error::InterpreterError;
use crate::expr::{BinOp, Expr, UnOp};
use crate::ssg::{EdgeKind, SemanticGraph, GLOBAL_FUNCTION};
use crate::value::ValueNode;

pub use path::{PathCondition, PathKind, PathState};

#[derive(Debug, Clone, Copy)]
pub struct InterpreterConfig {
    pub gas_limit: u64,
    pub loop_limit: u32,
    pub edge_visit_cap: u32,
    pub global_timeout: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            // The original tool does not meter gas precisely either (it hands
            // out a fresh symbolic value per GAS opcode); this ceiling is a
            // path-exhaustion backstop, not a faithful gas schedule.
            gas_limit: 50_000,
            loop_limit: 3,
            edge_visit_cap: 10,
            global_timeout: Duration::from_secs(20_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImpossiblePath {
    pub from_pc: usize,
    pub target_pc: usize,
}

pub struct Interpreter<'a> {
    cfg: &'a mut Cfg,
    pub ssg: SemanticGraph,
    config: InterpreterConfig,
    global_visited: HashMap<(usize, usize), u32>,
    function_visited: HashMap<String, HashMap<(usize, usize), u32>>,
    path_counter: u64,
    pub stats: HashMap<&'static str, u64>,
    pub impossible_paths: Vec<ImpossiblePath>,
    start_time: Instant,
    pub timed_out: bool,
}

enum BlockOutcome {
    Terminal,
    FallsTo(usize),
    Unconditional(usize),
    Conditional {
        true_target: Option<usize>,
        false_target: Option<usize>,
        condition: Expr,
        constraint_pc: usize,
    },
    Exception,
}

impl<'a> Interpreter<'a> {
    pub fn new(cfg: &'a mut Cfg, config: InterpreterConfig) -> Self {
        Self {
            cfg,
            ssg: SemanticGraph::default(),
            config,
            global_visited: HashMap::new(),
            function_visited: HashMap::new(),
            path_counter: 0,
            stats: HashMap::new(),
            impossible_paths: Vec::new(),
            start_time: Instant::now(),
            timed_out: false,
        }
    }

    fn gen_path_id(&mut self) -> u64 {
        let id = self.path_counter;
        self.path_counter += 1;
        id
    }

    fn terminate(&mut self, kind: PathKind) {
        let key = match kind {
            PathKind::Normal => "normal",
            PathKind::Exception => "exception",
            PathKind::LoopLimit => "loopLimit",
            PathKind::GasLimit => "gasLimit",
        };
        *self.stats.entry(key).or_insert(0) += 1;
        self.gen_path_id();
    }

    /// Runs the bounded symbolic exploration starting at block 0.
    pub fn run(&mut self) {
        let Some(entry) = self.cfg.entry else {
            return;
        };
        let entry_pc = self.cfg.graph[entry].start_pc;

        let mut initial = PathState::new(GLOBAL_FUNCTION);
        self.seed_initial_state(&mut initial);

        let mut worklist: Vec<(usize, Option<usize>, PathState)> = vec![(entry_pc, None, initial)];

        while let Some((block_pc, pred_pc, mut state)) = worklist.pop() {
            if self.start_time.elapsed() > self.config.global_timeout {
                self.timed_out = true;
                break;
            }

            if let Some(pred) = pred_pc {
                let edge = (pred, block_pc);
                let pred_is_conditional = self
                    .cfg
                    .block_at(pred)
                    .map(|b| b.termination == Termination::Conditional)
                    .unwrap_or(false);

                let local_count = {
                    let c = state.visited.entry(edge).or_insert(0);
                    *c += 1;
                    *c
                };
                let global_count = {
                    let c = self.global_visited.entry(edge).or_insert(0);
                    *c += 1;
                    *c
                };
                let func_count = {
                    let fmap = self
                        .function_visited
                        .entry(state.current_function.clone())
                        .or_insert_with(HashMap::new);
                    let c = fmap.entry(edge).or_insert(0);
                    *c += 1;
                    *c
                };

                if pred_is_conditional && local_count > self.config.loop_limit {
                    self.terminate(PathKind::LoopLimit);
                    continue;
                }
                if global_count > self.config.edge_visit_cap || func_count > self.config.edge_visit_cap {
                    self.terminate(PathKind::LoopLimit);
                    continue;
                }
            }

            if state.gas > self.config.gas_limit {
                self.terminate(PathKind::GasLimit);
                continue;
            }

            if let Some(sig) = self.cfg.function_entries.get(&block_pc).cloned() {
                state.current_function = sig;
            }

            if self.cfg.block_at(block_pc).is_none() {
                self.terminate(PathKind::Exception);
                continue;
            }

            match self.exec_block(block_pc, &mut state) {
                BlockOutcome::Terminal => self.terminate(PathKind::Normal),
                BlockOutcome::Exception => self.terminate(PathKind::Exception),
                BlockOutcome::FallsTo(next) => worklist.push((next, Some(block_pc), state)),
                BlockOutcome::Unconditional(target) => {
                    worklist.push((target, Some(block_pc), state))
                }
                BlockOutcome::Conditional {
                    true_target,
                    false_target,
                    condition,
                    constraint_pc,
                } => {
                    self.fork_conditional(
                        block_pc,
                        true_target,
                        false_target,
                        condition,
                        constraint_pc,
                        state,
                        &mut worklist,
                    );
                }
            }
        }
    }

    /// §4.3.3: seed the initial deposit/balance invariant as path-condition
    /// entries. These never correspond to a real branch, so they are recorded
    /// without a constraint graph node.
    fn seed_initial_state(&mut self, state: &mut PathState) {
        let deposit = self.ssg.arena.fresh_sym();
        let sender_balance = self.ssg.arena.fresh_sym();
        let receiver_balance = self.ssg.arena.fresh_sym();
        let sender = self.ssg.arena.fresh_sym();
        let receiver = self.ssg.arena.fresh_sym();

        state.balances.push((sender.clone(), sender_balance.clone()));
        state.balances.push((receiver.clone(), receiver_balance.clone()));

        for invariant in [
            Expr::Bin(BinOp::Gt, Box::new(deposit.clone()), Box::new(Expr::Const(U256::zero()))),
            Expr::Bin(
                BinOp::Gt,
                Box::new(sender_balance.clone()),
                Box::new(deposit.clone()),
            ),
            Expr::Bin(
                BinOp::Gt,
                Box::new(receiver_balance.clone()),
                Box::new(Expr::Const(U256::zero())),
            ),
        ] {
            let node = self.ssg.add_expression_node(invariant.clone());
            state.path_condition.push(invariant, node, true);
        }
    }

    fn fork_conditional(
        &mut self,
        from_pc: usize,
        true_target: Option<usize>,
        false_target: Option<usize>,
        condition: Expr,
        constraint_pc: usize,
        mut state: PathState,
        worklist: &mut Vec<(usize, Option<usize>, PathState)>,
    ) {
        let is_true = condition.is_true();
        let is_false = condition.is_false();

        let prev = state.path_condition.last_constraint();

        if is_true {
            // Preserved quirk: the original tool logs the *left* (true-side)
            // branch target as impossible even though the condition being
            // always-true means the *false* side is the one actually pruned.
            // This is intentionally not corrected — see DESIGN.md.
            if let Some(target) = true_target {
                self.impossible_paths.push(ImpossiblePath {
                    from_pc,
                    target_pc: target,
                });
            }
            let path_id = self.path_counter;
            let node = self.ssg.add_constraint_node(
                &state.current_function,
                constraint_pc,
                path_id,
                condition.clone(),
                prev,
            );
            state.path_condition.push(condition, node, true);
            if let Some(target) = true_target {
                worklist.push((target, Some(from_pc), state));
            } else {
                self.terminate(PathKind::Exception);
            }
            return;
        }

        if is_false {
            // Unlike the true-side case above, this is not a quirk: the
            // always-false condition prunes the true branch, so the true-side
            // target is the one that never executes and belongs in the log.
            if let Some(target) = true_target {
                self.impossible_paths.push(ImpossiblePath {
                    from_pc,
                    target_pc: target,
                });
            }
            let path_id = self.path_counter;
            let negated = Expr::Un(UnOp::IsZero, Box::new(condition.clone()));
            let node = self.ssg.add_constraint_node(
                &state.current_function,
                constraint_pc,
                path_id,
                negated.clone(),
                prev,
            );
            state.path_condition.push(negated, node, false);
            if let Some(target) = false_target {
                worklist.push((target, Some(from_pc), state));
            } else {
                self.terminate(PathKind::Exception);
            }
            return;
        }

        // Both sides feasible: clone for the true branch, mutate in place for
        // the false branch (design note: pick one side to clone consistently).
        if let Some(target) = true_target {
            let mut true_state = state.clone();
            let path_id = self.path_counter;
            let node = self.ssg.add_constraint_node(
                &true_state.current_function,
                constraint_pc,
                path_id,
                condition.clone(),
                prev,
            );
            true_state.path_condition.push(condition.clone(), node, true);
            worklist.push((target, Some(from_pc), true_state));
        }

        if let Some(target) = false_target {
            let path_id = self.path_counter;
            let negated = Expr::Un(UnOp::IsZero, Box::new(condition));
            let node = self.ssg.add_constraint_node(
                &state.current_function,
                constraint_pc,
                path_id,
                negated.clone(),
                prev,
            );
            state.path_condition.push(negated, node, false);
            worklist.push((target, Some(from_pc), state));
        } else {
            self.terminate(PathKind::Exception);
        }
    }

    fn exec_block(&mut self, block_pc: usize, state: &mut PathState) -> BlockOutcome {
        let instructions = self.cfg.block_at(block_pc).unwrap().instructions.clone();
        let function = state.current_function.clone();

        for instr in &instructions {
            state.gas += 1;
            if let Err(_e) = self.exec_instruction(instr.pc, instr.opcode.clone(), instr, state, &function) {
                return BlockOutcome::Exception;
            }
            if state.halted {
                return BlockOutcome::Terminal;
            }
        }

        let block = self.cfg.block_at(block_pc).unwrap();
        match block.termination {
            Termination::Terminal => BlockOutcome::Terminal,
            Termination::FallsTo => match block.falls_to_pc {
                Some(next) => BlockOutcome::FallsTo(next),
                None => BlockOutcome::Exception,
            },
            Termination::Unconditional => {
                // target was pushed by the JUMP opcode handler onto the stack
                // of resolved targets; fall back to the statically-known one.
                match block.current_jump_target() {
                    Some(target) => BlockOutcome::Unconditional(target),
                    None => BlockOutcome::Exception,
                }
            }
            Termination::Conditional => {
                let true_target = block.current_jump_target();
                let false_target = block.falls_to_pc;
                let condition = state
                    .jumpi_condition
                    .clone()
                    .unwrap_or(Expr::Const(U256::zero()));
                BlockOutcome::Conditional {
                    true_target,
                    false_target,
                    condition,
                    constraint_pc: block.end_pc,
                }
            }
        }
    }

    fn exec_instruction(
        &mut self,
        pc: usize,
        opcode: Opcode,
        instr: &crate::bytecode::Instruction,
        state: &mut PathState,
        function: &str,
    ) -> Result<(), InterpreterError> {
        macro_rules! pop {
            () => {
                state.pop().ok_or(InterpreterError::StackUnderflow {
                    op: "pop",
                    pc,
                    needed: 1,
                    available: state.stack.len(),
                })?
            };
        }
        macro_rules! binop {
            ($op:expr) => {{
                let a = pop!();
                let b = pop!();
                let expr = Expr::Bin($op, Box::new(a), Box::new(b)).simplify();
                state.push(expr);
            }};
        }
        macro_rules! unop {
            ($op:expr) => {{
                let a = pop!();
                let expr = Expr::Un($op, Box::new(a)).simplify();
                state.push(expr);
            }};
        }

        match opcode {
            Opcode::Stop => {}
            Opcode::Add => binop!(BinOp::Add),
            Opcode::Mul => binop!(BinOp::Mul),
            Opcode::Sub => binop!(BinOp::Sub),
            Opcode::Div | Opcode::SDiv | Opcode::Mod | Opcode::SMod => {
                let op = match opcode {
                    Opcode::Div => BinOp::Div,
                    Opcode::SDiv => BinOp::SDiv,
                    Opcode::Mod => BinOp::Mod,
                    Opcode::SMod => BinOp::SMod,
                    _ => unreachable!(),
                };
                let a = pop!();
                let b = pop!();
                match b.as_const() {
                    // A concretely-zero divisor yields the EVM's defined zero
                    // result, but the path ends here: nothing downstream of a
                    // division by a known zero is reachable, so the block's
                    // remaining instructions are skipped rather than
                    // executed against a result nobody could have produced.
                    Some(divisor) if divisor.is_zero() => {
                        state.push(Expr::Const(U256::zero()));
                        state.halted = true;
                    }
                    Some(_) => {
                        let expr = Expr::Bin(op, Box::new(a), Box::new(b)).simplify();
                        state.push(expr);
                    }
                    // A symbolic divisor can't be shown zero or nonzero, so
                    // the path carries `divisor != 0` forward as a plain
                    // path-condition entry; it never corresponds to a branch
                    // so no constraint node is added to the graph.
                    None => {
                        // `IsZero(IsZero(b))` reads as "b is truthy", the same
                        // convention `fork_conditional` uses for a satisfied
                        // branch predicate, here recording "divisor != 0".
                        let nonzero = Expr::Un(
                            UnOp::IsZero,
                            Box::new(Expr::Un(UnOp::IsZero, Box::new(b.clone()))),
                        )
                        .simplify();
                        let node = self.ssg.add_expression_node(nonzero.clone());
                        state.path_condition.push(nonzero, node, true);
                        let expr = Expr::Bin(op, Box::new(a), Box::new(b)).simplify();
                        state.push(expr);
                    }
                }
            }
            Opcode::AddMod => {
                let a = pop!();
                let b = pop!();
                let n = pop!();
                let sum = Expr::Bin(BinOp::Add, Box::new(a), Box::new(b));
                state.push(Expr::Bin(BinOp::Mod, Box::new(sum), Box::new(n)).simplify());
            }
            Opcode::MulMod => {
                let a = pop!();
                let b = pop!();
                let n = pop!();
                let prod = Expr::Bin(BinOp::Mul, Box::new(a), Box::new(b));
                state.push(Expr::Bin(BinOp::Mod, Box::new(prod), Box::new(n)).simplify());
            }
            Opcode::Exp => {
                let base = pop!();
                let exp = pop!();
                state.push(Expr::Bin(BinOp::Exp, Box::new(base), Box::new(exp)).simplify());
            }
            Opcode::SignExtend => {
                let _b = pop!();
                let x = pop!();
                state.push(x);
            }
            Opcode::Lt => binop!(BinOp::Lt),
            Opcode::Gt => binop!(BinOp::Gt),
            Opcode::SLt => binop!(BinOp::SLt),
            Opcode::SGt => binop!(BinOp::SGt),
            Opcode::Eq => binop!(BinOp::Eq),
            Opcode::IsZero => unop!(UnOp::IsZero),
            Opcode::And => binop!(BinOp::And),
            Opcode::Or => binop!(BinOp::Or),
            Opcode::Xor => binop!(BinOp::Xor),
            Opcode::Not => unop!(UnOp::Not),
            Opcode::Byte => binop!(BinOp::Byte),
            Opcode::Shl => {
                let shift = pop!();
                let value = pop!();
                state.push(Expr::Bin(BinOp::Shl, Box::new(value), Box::new(shift)).simplify());
            }
            Opcode::Shr => {
                let shift = pop!();
                let value = pop!();
                state.push(Expr::Bin(BinOp::Shr, Box::new(value), Box::new(shift)).simplify());
            }
            Opcode::Sar => {
                let shift = pop!();
                let value = pop!();
                state.push(Expr::Bin(BinOp::Sar, Box::new(value), Box::new(shift)).simplify());
            }
            Opcode::Sha3 => {
                let offset = pop!();
                let length = pop!();
                let param = match (offset.as_const(), length.as_const()) {
                    (Some(o), Some(l)) if l.bits() <= 32 => {
                        Some(state.memory.load(Expr::Const(o), l.as_u32() as usize))
                    }
                    _ => None,
                };
                let node = self.ssg.arena.alloc(ValueNode::Sha { pc, param });
                state.push(Expr::Sym(node.0));
            }
            Opcode::Address => state.push(self.env_singleton(state, "address")),
            Opcode::Balance => {
                let addr = pop!();
                let balance = self.lookup_or_alloc_balance(state, &addr, true);
                state.push(balance);
            }
            Opcode::Origin => state.push(self.env_singleton(state, "origin")),
            Opcode::Caller => state.push(self.env_singleton(state, "caller")),
            Opcode::CallValue => state.push(self.env_singleton(state, "callvalue")),
            Opcode::CallDataLoad => {
                let offset = pop!();
                let node = self.ssg.arena.alloc(ValueNode::InputData {
                    start: offset.clone(),
                    end: Expr::Bin(
                        BinOp::Add,
                        Box::new(offset),
                        Box::new(Expr::Const(U256::from(32))),
                    ),
                });
                state.push(Expr::Sym(node.0));
            }
            Opcode::CallDataSize => state.push(self.env_singleton(state, "calldatasize")),
            Opcode::CallDataCopy | Opcode::CodeCopy | Opcode::ExtCodeCopy | Opcode::ReturnDataCopy => {
                let nargs = if opcode == Opcode::ExtCodeCopy { 4 } else { 3 };
                for _ in 0..nargs {
                    pop!();
                }
            }
            Opcode::CodeSize => {
                let addr = self.env_singleton(state, "address");
                let addr_node = self.ssg.add_address_node(addr);
                let id = self.ssg.arena.alloc(ValueNode::Code { addr: addr_node });
                self.ssg
                    .add_edge(function, EdgeKind::ValueFlow, addr_node, id, 0, "address");
                state.push(Expr::Sym(id.0));
            }
            Opcode::GasPrice => state.push(self.env_singleton(state, "gasprice")),
            Opcode::ExtCodeSize => {
                let addr = pop!();
                let addr_node = self.ssg.add_address_node(addr);
                let id = self.ssg.arena.alloc(ValueNode::ExtcodeSize { addr: addr_node });
                self.ssg
                    .add_edge(function, EdgeKind::ValueFlow, addr_node, id, 0, "address");
                state.push(Expr::Sym(id.0));
            }
            Opcode::ExtCodeHash => {
                let addr = pop!();
                let addr_node = self.ssg.add_address_node(addr);
                let id = self.ssg.arena.alloc(ValueNode::ExtcodeHash { addr: addr_node });
                self.ssg
                    .add_edge(function, EdgeKind::ValueFlow, addr_node, id, 0, "address");
                state.push(Expr::Sym(id.0));
            }
            Opcode::ReturnDataSize => {
                let id = self.ssg.arena.alloc(ValueNode::ReturnDataSize { call_pc: pc });
                state.push(Expr::Sym(id.0));
            }
            Opcode::BlockHash => {
                let number = pop!();
                let number_node = self.ssg.add_expression_node(number);
                let id = self.ssg.arena.alloc(ValueNode::BlockHash { number: number_node });
                self.ssg
                    .add_edge(function, EdgeKind::ValueFlow, number_node, id, 0, "number");
                state.push(Expr::Sym(id.0));
            }
            Opcode::Coinbase => state.push(self.env_singleton(state, "coinbase")),
            Opcode::Timestamp => state.push(self.env_singleton(state, "timestamp")),
            Opcode::Number => state.push(self.env_singleton(state, "number")),
            Opcode::Difficulty => state.push(self.env_singleton(state, "difficulty")),
            Opcode::GasLimit => state.push(self.env_singleton(state, "gaslimit")),
            Opcode::ChainId => state.push(self.env_singleton(state, "chainid")),
            Opcode::SelfBalance => {
                let addr = self.env_singleton(state, "address");
                let balance = self.lookup_or_alloc_balance(state, &addr, true);
                state.push(balance);
            }
            Opcode::BaseFee => state.push(self.env_singleton(state, "basefee")),
            Opcode::Pop => {
                pop!();
            }
            Opcode::MLoad => {
                let offset = pop!();
                let value = state.memory.load(offset, 32);
                state.push(value);
            }
            Opcode::MStore => {
                let offset = pop!();
                let value = pop!();
                state.memory.store(offset, 32, value);
            }
            Opcode::MStore8 => {
                let offset = pop!();
                let value = pop!();
                state.memory.store(offset, 1, value);
            }
            Opcode::SLoad => {
                let slot = pop!();
                let value = self.sload(state, slot);
                state.push(value);
            }
            Opcode::SStore => {
                let slot = pop!();
                let value = pop!();
                self.sstore(function, pc, state, slot, value);
            }
            Opcode::Jump => {
                let target = pop!();
                self.resolve_jump(target, pc, false)?;
            }
            Opcode::JumpI => {
                let target = pop!();
                let cond = pop!();
                self.resolve_jump(target, pc, true)?;
                state.jumpi_condition = Some(cond);
            }
            Opcode::Pc => state.push(Expr::Const(U256::from(pc))),
            Opcode::MSize => state.push(Expr::Const(U256::from(state.memory.miu * 32))),
            Opcode::Gas => {
                // Not precisely metered (matches the original's approximation):
                // a fresh symbolic value is allocated per call site.
                let id = self.ssg.arena.alloc(ValueNode::Gas { pc });
                state.push(Expr::Sym(id.0));
            }
            Opcode::JumpDest => {}
            Opcode::Push(_) => {
                let value = instr
                    .arg_as_u256()
                    .map(Expr::Const)
                    .unwrap_or(Expr::Const(U256::zero()));
                let node = self.ssg.add_expression_node(value.clone());
                let _ = node;
                state.push(value);
            }
            Opcode::Dup(n) => {
                let idx = state.stack.len().checked_sub(n as usize).ok_or(
                    InterpreterError::StackUnderflow {
                        op: "dup",
                        pc,
                        needed: n as usize,
                        available: state.stack.len(),
                    },
                )?;
                let value = state.stack[idx].clone();
                state.push(value);
            }
            Opcode::Swap(n) => {
                let len = state.stack.len();
                let top = len.checked_sub(1).ok_or(InterpreterError::StackUnderflow {
                    op: "swap",
                    pc,
                    needed: n as usize + 1,
                    available: len,
                })?;
                let other = len.checked_sub(n as usize + 1).ok_or(InterpreterError::StackUnderflow {
                    op: "swap",
                    pc,
                    needed: n as usize + 1,
                    available: len,
                })?;
                state.stack.swap(top, other);
            }
            Opcode::Log(n) => {
                pop!();
                pop!();
                for _ in 0..n {
                    pop!();
                }
            }
            Opcode::Create => {
                pop!();
                pop!();
                pop!();
                let fresh = self.ssg.arena.fresh_sym();
                let id = self.ssg.arena.alloc(ValueNode::Address(fresh));
                state.push(Expr::Sym(id.0));
            }
            Opcode::Create2 => {
                pop!();
                pop!();
                pop!();
                pop!();
                let fresh = self.ssg.arena.fresh_sym();
                let id = self.ssg.arena.alloc(ValueNode::Address(fresh));
                state.push(Expr::Sym(id.0));
            }
            Opcode::Call | Opcode::CallCode => {
                self.exec_message_call(function, pc, state, opcode)?;
            }
            Opcode::DelegateCall | Opcode::StaticCall => {
                self.exec_message_call(function, pc, state, opcode)?;
            }
            Opcode::Return => {
                let offset = pop!();
                let length = pop!();
                let off_node = self.ssg.add_expression_node(offset);
                let len_node = self.ssg.add_expression_node(length);
                self.ssg.add_terminal_node(
                    function,
                    pc,
                    0,
                    "RETURN",
                    vec![("offset", off_node), ("length", len_node)],
                );
            }
            Opcode::Revert => {
                let offset = pop!();
                let length = pop!();
                let off_node = self.ssg.add_expression_node(offset);
                let len_node = self.ssg.add_expression_node(length);
                self.ssg.add_terminal_node(
                    function,
                    pc,
                    0,
                    "REVERT",
                    vec![("offset", off_node), ("length", len_node)],
                );
            }
            Opcode::Invalid => {
                self.ssg.add_terminal_node(function, pc, 0, "INVALID", vec![]);
            }
            Opcode::SelfDestruct => {
                let recipient = pop!();
                self.exec_selfdestruct(function, pc, state, recipient);
            }
            Opcode::Unknown(_) => {
                return Err(InterpreterError::StackUnderflow {
                    op: "unknown",
                    pc,
                    needed: 0,
                    available: 0,
                });
            }
        }
        Ok(())
    }

    fn env_singleton(&mut self, _state: &PathState, name: &'static str) -> Expr {
        let node = self.ssg.arena.singleton(name, || match name {
            "address" => ValueNode::Receiver,
            "origin" => ValueNode::Origin,
            "caller" => ValueNode::Sender,
            "callvalue" => ValueNode::DepositValue,
            "calldatasize" => ValueNode::InputDataSize,
            "gasprice" => ValueNode::GasPrice,
            "coinbase" => ValueNode::Coinbase,
            "timestamp" => ValueNode::TimeStamp,
            "number" => ValueNode::Number,
            "difficulty" => ValueNode::Difficulty,
            "gaslimit" => ValueNode::GasLimit,
            "chainid" => ValueNode::ChainId,
            "basefee" => ValueNode::BaseFee,
            _ => ValueNode::Var(Expr::Sym(0)),
        });
        Expr::Sym(node.0)
    }

    fn lookup_or_alloc_balance(&mut self, state: &mut PathState, addr: &Expr, eq_zero_diff: bool) -> Expr {
        if let Some(idx) = state.find_balance(addr, eq_zero_diff) {
            return state.balances[idx].1.clone();
        }
        let fresh = self.ssg.arena.fresh_sym();
        let addr_node = self.ssg.add_address_node(addr.clone());
        let balance_node = self.ssg.arena.alloc(ValueNode::Balance { addr: addr_node });
        self.ssg.add_edge(
            GLOBAL_FUNCTION,
            EdgeKind::ValueFlow,
            addr_node,
            balance_node,
            0,
            "address",
        );
        let _ = balance_node;
        state.balances.push((addr.clone(), fresh.clone()));
        fresh
    }

    fn sload(&mut self, state: &mut PathState, slot: Expr) -> Expr {
        for (existing_slot, value) in &state.storage {
            if existing_slot.semantically_eq(&slot) {
                return value.clone();
            }
        }
        let fresh = self.ssg.arena.fresh_sym();
        if self.ssg.arena.find_storage_slot(&slot).is_none() {
            self.ssg.arena.insert_storage_slot(slot.clone(), 0);
        }
        state.storage.push((slot, fresh.clone()));
        fresh
    }

    fn sstore(&mut self, function: &str, pc: usize, state: &mut PathState, slot: Expr, value: Expr) {
        if let Some(existing) = state
            .storage
            .iter_mut()
            .find(|(s, _)| s.semantically_eq(&slot))
        {
            existing.1 = value.clone();
        } else {
            state.storage.push((slot.clone(), value.clone()));
        }
        let slot_node = self
            .ssg
            .arena
            .find_storage_slot(&slot)
            .unwrap_or_else(|| self.ssg.arena.insert_storage_slot(slot.clone(), pc));
        let value_node = self.ssg.add_expression_node(value);
        let constraint = state.path_condition.last_constraint().map(|(n, _)| n);
        self.ssg
            .add_sstore_node(function, pc, 0, slot_node, value_node, constraint);
    }

    fn resolve_jump(&mut self, target: Expr, pc: usize, conditional: bool) -> Result<(), InterpreterError> {
        let Some(target_const) = target.as_const() else {
            return Err(InterpreterError::UnresolvedJumpTarget { pc });
        };
        if target_const.bits() > 64 {
            return Err(InterpreterError::UnresolvedJumpTarget { pc });
        }
        let target_pc = target_const.as_u64() as usize;
        if self.cfg.block_at(target_pc).is_none() {
            return Err(InterpreterError::InvalidJumpTarget { target: target_pc });
        }
        let block = self.current_block_mut(pc);
        if let Some(b) = block {
            b.push_jump_target(target_pc);
        }
        let _ = conditional;
        Ok(())
    }

    fn current_block_mut(&mut self, instruction_pc: usize) -> Option<&mut crate::bytecode::BasicBlock> {
        let pcs: Vec<usize> = self.cfg.blocks.keys().copied().collect();
        let mut containing = None;
        for start in pcs {
            if let Some(b) = self.cfg.block_at(start) {
                if b.start_pc <= instruction_pc && instruction_pc <= b.end_pc {
                    containing = Some(start);
                    break;
                }
            }
        }
        containing.and_then(move |start| self.cfg.block_at_mut(start))
    }

    fn exec_message_call(
        &mut self,
        function: &str,
        pc: usize,
        state: &mut PathState,
        opcode: Opcode,
    ) -> Result<(), InterpreterError> {
        macro_rules! pop {
            () => {
                state.pop().ok_or(InterpreterError::StackUnderflow {
                    op: "call",
                    pc,
                    needed: 1,
                    available: state.stack.len(),
                })?
            };
        }

        let has_value = matches!(opcode, Opcode::Call | Opcode::CallCode);
        let gas = pop!();
        let recipient = pop!();
        let value = if has_value { Some(pop!()) } else { None };
        let in_offset = pop!();
        let in_length = pop!();
        let out_offset = pop!();
        let out_length = pop!();

        if let (Opcode::Call, Some(v)) = (opcode, &value) {
            self.transfer_call_value(state, &recipient, v, true);
        } else if let (Opcode::CallCode, Some(v)) = (opcode, &value) {
            self.transfer_call_value(state, &recipient, v, false);
        }

        let gas_node = self.ssg.add_expression_node(gas);
        let recipient_node = self.ssg.add_address_node(recipient);
        let in_off_node = self.ssg.add_expression_node(in_offset);
        let in_len_node = self.ssg.add_expression_node(in_length);
        let out_off_node = self.ssg.add_expression_node(out_offset);
        let out_len_node = self.ssg.add_expression_node(out_length);

        let mut args = vec![
            ("gas", gas_node),
            ("recipient", recipient_node),
            ("in_offset", in_off_node),
            ("in_length", in_len_node),
            ("out_offset", out_off_node),
            ("out_length", out_len_node),
        ];
        if let Some(v) = value {
            let value_node = self.ssg.add_expression_node(v);
            args.insert(2, ("value", value_node));
        }

        let name: &'static str = match opcode {
            Opcode::Call => "CALL",
            Opcode::CallCode => "CALLCODE",
            Opcode::DelegateCall => "DELEGATECALL",
            Opcode::StaticCall => "STATICCALL",
            _ => unreachable!(),
        };
        let constraint = state.path_condition.last_constraint().map(|(n, _)| n);
        let id = self
            .ssg
            .add_message_call_node(function, pc, 0, name, args, constraint);
        let status_node = self.ssg.arena.alloc(ValueNode::ReturnStatus { call_pc: pc });
        self.ssg
            .add_edge(function, EdgeKind::ValueFlow, id, status_node, 0, "status");
        state.push(Expr::Sym(status_node.0));
        Ok(())
    }

    /// `CALL` matches an existing balance entry via `simplify(key-recipient)==0`;
    /// `CALLCODE` instead matches on a *nonzero* difference. This asymmetry is
    /// present in the original tool and preserved verbatim rather than
    /// unified — see DESIGN.md.
    fn transfer_call_value(&mut self, state: &mut PathState, recipient: &Expr, amount: &Expr, call_matches_zero_diff: bool) {
        let recipient_idx = state.find_balance(recipient, call_matches_zero_diff);
        let recipient_balance = match recipient_idx {
            Some(idx) => state.balances[idx].1.clone(),
            None => self.lookup_or_alloc_balance(state, recipient, call_matches_zero_diff),
        };
        let new_balance = Expr::Bin(
            BinOp::Add,
            Box::new(recipient_balance),
            Box::new(amount.clone()),
        )
        .simplify();
        match recipient_idx {
            Some(idx) => state.balances[idx].1 = new_balance,
            None => state.balances.push((recipient.clone(), new_balance)),
        }
    }

    /// SELFDESTRUCT zeroes the contract's own balance (matched with `==0`
    /// difference, like `CALL`) and credits the recipient (matched with plain
    /// equality on the recipient key itself, a third, narrower variant of the
    /// balance-lookup asymmetry present in the original).
    fn exec_selfdestruct(&mut self, function: &str, pc: usize, state: &mut PathState, recipient: Expr) {
        let own_address = self.env_singleton(state, "address");
        let own_balance = state
            .find_balance(&own_address, true)
            .map(|i| state.balances[i].1.clone())
            .unwrap_or(Expr::Const(U256::zero()));
        if let Some(idx) = state.find_balance(&own_address, true) {
            state.balances[idx].1 = Expr::Const(U256::zero());
        }
        let recipient_idx = state
            .balances
            .iter()
            .position(|(a, _)| a.semantically_eq(&recipient));
        match recipient_idx {
            Some(idx) => {
                state.balances[idx].1 =
                    Expr::Bin(BinOp::Add, Box::new(state.balances[idx].1.clone()), Box::new(own_balance))
                        .simplify();
            }
            None => {
                state.balances.push((recipient.clone(), own_balance));
            }
        }
        let recipient_node = self.ssg.add_address_node(recipient);
        self.ssg
            .add_terminal_node(function, pc, 0, "SELFDESTRUCT", vec![("recipient", recipient_node)]);
    }
}
