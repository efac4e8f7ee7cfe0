//! Basic-block partitioning and static control-flow edge resolution.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};

use super::opcode::{Instruction, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Terminal,
    Unconditional,
    Conditional,
    FallsTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    FallsTo,
    JumpTrue,
    JumpFalse,
    Unconditional,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub start_pc: usize,
    pub end_pc: usize,
    pub instructions: Vec<Instruction>,
    pub termination: Termination,
    pub falls_to_pc: Option<usize>,
    /// Statically or symbolically resolved jump targets; the interpreter appends
    /// to this during symbolic execution, most-recent first (mirrors the original
    /// tool's `get_jump_target` returning the top of a stack, not a set).
    pub jump_targets: Vec<usize>,
    pub source_lines: (usize, usize),
    pub changed: bool,
}

impl BasicBlock {
    /// Top of the jump-target list, i.e. the most recently resolved target.
    pub fn current_jump_target(&self) -> Option<usize> {
        self.jump_targets.last().copied()
    }

    pub fn push_jump_target(&mut self, pc: usize) {
        self.jump_targets.retain(|&x| x != pc);
        self.jump_targets.push(pc);
    }
}

pub struct Cfg {
    pub graph: DiGraph<BasicBlock, EdgeKind>,
    pub entry: Option<NodeIndex>,
    pub blocks: HashMap<usize, NodeIndex>,
    /// `target_pc -> 4-byte function selector`, recognized from the standard
    /// dispatcher pattern `PUSH4 sig; (DUPn)?; EQ; PUSHk target`.
    pub function_entries: HashMap<usize, String>,
}

impl Cfg {
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn block_at(&self, pc: usize) -> Option<&BasicBlock> {
        self.blocks.get(&pc).map(|&idx| &self.graph[idx])
    }

    pub fn block_at_mut(&mut self, pc: usize) -> Option<&mut BasicBlock> {
        self.blocks.get(&pc).map(|&idx| &mut self.graph[idx])
    }

    pub fn build(instructions: &[Instruction]) -> Self {
        let mut cfg = Cfg {
            graph: DiGraph::new(),
            entry: None,
            blocks: HashMap::new(),
            function_entries: HashMap::new(),
        };
        if instructions.is_empty() {
            return cfg;
        }

        let leaders = compute_leaders(instructions);
        let idx_by_pc: HashMap<usize, usize> = instructions
            .iter()
            .enumerate()
            .map(|(i, instr)| (instr.pc, i))
            .collect();
        let sorted_leaders: Vec<usize> = leaders.into_iter().collect();

        let mut start_to_node: HashMap<usize, NodeIndex> = HashMap::new();

        for (li, &leader_pc) in sorted_leaders.iter().enumerate() {
            let start_idx = idx_by_pc[&leader_pc];
            let end_idx = if li + 1 < sorted_leaders.len() {
                idx_by_pc[&sorted_leaders[li + 1]]
            } else {
                instructions.len()
            };
            let block_instrs: Vec<Instruction> = instructions[start_idx..end_idx].to_vec();
            let last_opcode = block_instrs.last().map(|i| i.opcode);
            let end_pc = block_instrs.last().map(|i| i.pc).unwrap_or(leader_pc);

            let termination = match last_opcode {
                Some(op) if op.is_terminal() => Termination::Terminal,
                Some(Opcode::Jump) => Termination::Unconditional,
                Some(Opcode::JumpI) => Termination::Conditional,
                _ => Termination::FallsTo,
            };

            let block = BasicBlock {
                start_pc: leader_pc,
                end_pc,
                instructions: block_instrs,
                termination,
                falls_to_pc: None,
                jump_targets: Vec::new(),
                source_lines: (0, 0),
                changed: false,
            };

            let node = cfg.graph.add_node(block);
            cfg.blocks.insert(leader_pc, node);
            start_to_node.insert(leader_pc, node);
            if li == 0 {
                cfg.entry = Some(node);
            }
        }

        // Static edges: falls-to to the next block; static PUSH-then-JUMP/JUMPI targets.
        for (li, &leader_pc) in sorted_leaders.iter().enumerate() {
            let node = start_to_node[&leader_pc];
            let next_leader = sorted_leaders.get(li + 1).copied();
            let (termination, static_target) = {
                let block = &cfg.graph[node];
                (block.termination, static_jump_target(&block.instructions))
            };

            match termination {
                Termination::FallsTo => {
                    if let Some(next_pc) = next_leader {
                        if let Some(&next_node) = start_to_node.get(&next_pc) {
                            cfg.graph.add_edge(node, next_node, EdgeKind::FallsTo);
                            cfg.graph[node].falls_to_pc = Some(next_pc);
                        }
                    }
                }
                Termination::Conditional => {
                    if let Some(next_pc) = next_leader {
                        if let Some(&next_node) = start_to_node.get(&next_pc) {
                            cfg.graph.add_edge(node, next_node, EdgeKind::JumpFalse);
                            cfg.graph[node].falls_to_pc = Some(next_pc);
                        }
                    }
                    if let Some(target) = static_target {
                        if let Some(&target_node) = start_to_node.get(&target) {
                            cfg.graph.add_edge(node, target_node, EdgeKind::JumpTrue);
                            cfg.graph[node].push_jump_target(target);
                        }
                    }
                }
                Termination::Unconditional => {
                    if let Some(target) = static_target {
                        if let Some(&target_node) = start_to_node.get(&target) {
                            cfg.graph
                                .add_edge(node, target_node, EdgeKind::Unconditional);
                            cfg.graph[node].push_jump_target(target);
                        }
                    }
                }
                Termination::Terminal => {}
            }
        }

        cfg.function_entries = recognize_function_entries(instructions);
        cfg
    }
}

fn compute_leaders(instructions: &[Instruction]) -> BTreeSet<usize> {
    let mut leaders = BTreeSet::new();
    leaders.insert(instructions[0].pc);
    for (idx, instr) in instructions.iter().enumerate() {
        match instr.opcode {
            Opcode::JumpDest => {
                leaders.insert(instr.pc);
            }
            op if op.is_control_flow() => {
                if let Some(next) = instructions.get(idx + 1) {
                    leaders.insert(next.pc);
                }
            }
            _ => {}
        }
    }
    leaders
}

/// If the last two instructions of a block are `PUSH_k imm; JUMP|JUMPI`, the
/// jump target is statically known.
fn static_jump_target(instructions: &[Instruction]) -> Option<usize> {
    if instructions.len() < 2 {
        return None;
    }
    let last = &instructions[instructions.len() - 1];
    if !matches!(last.opcode, Opcode::Jump | Opcode::JumpI) {
        return None;
    }
    let penultimate = &instructions[instructions.len() - 2];
    if let Opcode::Push(_) = penultimate.opcode {
        penultimate.arg_as_u32().map(|v| v as usize)
    } else {
        None
    }
}

/// Recognizes the standard dispatcher pattern: `PUSH4 sig; (DUPn)?; EQ; PUSHk
/// target [JUMPI]`, mapping `target -> "0x{sig:08x}"`.
fn recognize_function_entries(instructions: &[Instruction]) -> HashMap<usize, String> {
    let mut map = HashMap::new();
    let mut i = 0;
    while i < instructions.len() {
        if let Opcode::Push(4) = instructions[i].opcode {
            let Some(sig) = instructions[i].arg_as_selector() else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            if let Some(instr) = instructions.get(j) {
                if matches!(instr.opcode, Opcode::Dup(_)) {
                    j += 1;
                }
            }
            if let Some(instr) = instructions.get(j) {
                if instr.opcode == Opcode::Eq {
                    j += 1;
                    if let Some(push_instr) = instructions.get(j) {
                        if let Opcode::Push(_) = push_instr.opcode {
                            if let Some(target) = push_instr.arg_as_u32() {
                                map.insert(target as usize, sig);
                            }
                        }
                    }
                }
            }
        }
        i += 1;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::disassemble;

    #[test]
    fn single_terminal_block() {
        // PUSH1 0; PUSH1 0; RETURN
        let code = [0x60, 0x00, 0x60, 0x00, 0xF3];
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        assert_eq!(cfg.block_count(), 1);
        let block = cfg.block_at(0).unwrap();
        assert_eq!(block.termination, Termination::Terminal);
    }

    #[test]
    fn conditional_jump_splits_blocks_and_resolves_static_target() {
        // PUSH1 1; PUSH1 0x10; JUMPI; ... JUMPDEST(0x10); STOP
        let mut code = vec![0x60, 0x01, 0x60, 0x10, 0x57];
        code.extend(std::iter::repeat(0x00).take(0x10 - code.len()));
        code.push(0x5B); // JUMPDEST at 0x10
        code.push(0x00); // STOP
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        let entry = cfg.block_at(0).unwrap();
        assert_eq!(entry.termination, Termination::Conditional);
        assert_eq!(entry.current_jump_target(), Some(0x10));
    }

    #[test]
    fn recognizes_dispatcher_entry() {
        // PUSH4 deadbeef; DUP1; EQ; PUSH1 0x20; JUMPI
        let mut code = vec![0x63, 0xde, 0xad, 0xbe, 0xef, 0x80, 0x14, 0x60, 0x20, 0x57];
        code.extend(std::iter::repeat(0x00).take(0x20 - code.len()));
        code.push(0x5B);
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        assert_eq!(
            cfg.function_entries.get(&0x20).cloned(),
            Some("0xdeadbeef".to_string())
        );
    }
}
