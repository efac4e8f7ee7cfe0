//! Bytecode-level abstract indices computed over a constructed [`Cfg`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;

use crate::bytecode::{Cfg, EdgeKind};
use crate::error::{AnalyzerError, InterpreterError};

/// Count of non-conditional edges, the binary-level analogue of
/// `sequence_src`: `FallsTo`, `Unconditional`, and the `JumpFalse`
/// fallthrough-continuation side of a `JUMPI` all represent a sequential
/// continuation rather than a decided branch, so only the taken-side
/// `JumpTrue` edge of a conditional is excluded from the count.
pub fn sequence_bin(cfg: &Cfg) -> u64 {
    cfg.graph
        .edge_weights()
        .filter(|kind| !matches!(kind, EdgeKind::JumpTrue))
        .count() as u64
}

/// Total elementary (simple) circuits in the CFG, the binary-level analogue
/// of `loop_src`. Enumerated with Johnson's algorithm (the same approach
/// `nx.simple_cycles` uses), so two simple cycles sharing a node or an edge
/// are both counted rather than collapsed into one back edge. Aborts past
/// `timeout`, since enumeration is exponential in the worst case.
pub fn loop_bin(cfg: &Cfg, timeout: Duration) -> Result<u64, AnalyzerError> {
    let start_time = Instant::now();
    let all_nodes: Vec<NodeIndex> = cfg.graph.node_indices().collect();

    let mut scc_stack: Vec<Vec<NodeIndex>> = strongly_connected_components(&all_nodes, cfg)
        .into_iter()
        .filter(|scc| is_cyclic_scc(cfg, scc))
        .collect();

    let mut count = 0u64;

    while let Some(mut scc) = scc_stack.pop() {
        if start_time.elapsed() > timeout {
            return Err(AnalyzerError::Interpreter(InterpreterError::GlobalTimeout));
        }
        let Some(start_node) = scc.pop() else {
            continue;
        };
        let scc_set: HashSet<NodeIndex> = scc.iter().copied().chain(std::iter::once(start_node)).collect();

        count += count_cycles_from(cfg, start_node, &scc_set, start_time, timeout)?;

        // `scc` (start_node removed) is the remainder subgraph; its own SCCs
        // may still contain cycles once start_node's edges are out of play.
        for next_scc in strongly_connected_components(&scc, cfg) {
            if is_cyclic_scc(cfg, &next_scc) {
                scc_stack.push(next_scc);
            }
        }
    }

    Ok(count)
}

/// Tarjan's algorithm restricted to the induced subgraph over `nodes`
/// (neighbors outside this set are treated as absent), iterative to avoid
/// recursion-depth limits on large CFGs.
fn strongly_connected_components(nodes: &[NodeIndex], cfg: &Cfg) -> Vec<Vec<NodeIndex>> {
    let allowed: HashSet<NodeIndex> = nodes.iter().copied().collect();
    let mut index_counter = 0usize;
    let mut indices: HashMap<NodeIndex, usize> = HashMap::new();
    let mut lowlink: HashMap<NodeIndex, usize> = HashMap::new();
    let mut on_stack: HashSet<NodeIndex> = HashSet::new();
    let mut stack: Vec<NodeIndex> = Vec::new();
    let mut result: Vec<Vec<NodeIndex>> = Vec::new();

    for &root in nodes {
        if indices.contains_key(&root) {
            continue;
        }
        indices.insert(root, index_counter);
        lowlink.insert(root, index_counter);
        index_counter += 1;
        stack.push(root);
        on_stack.insert(root);
        let mut call_stack: Vec<(NodeIndex, usize)> = vec![(root, 0)];

        while let Some(&(node, _)) = call_stack.last() {
            let neighbors: Vec<NodeIndex> = cfg
                .graph
                .neighbors(node)
                .filter(|m| allowed.contains(m))
                .collect();
            let i = call_stack.last().unwrap().1;

            if i < neighbors.len() {
                call_stack.last_mut().unwrap().1 += 1;
                let next = neighbors[i];
                if !indices.contains_key(&next) {
                    indices.insert(next, index_counter);
                    lowlink.insert(next, index_counter);
                    index_counter += 1;
                    stack.push(next);
                    on_stack.insert(next);
                    call_stack.push((next, 0));
                } else if on_stack.contains(&next) {
                    let next_index = indices[&next];
                    if next_index < lowlink[&node] {
                        lowlink.insert(node, next_index);
                    }
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    let node_low = lowlink[&node];
                    if node_low < lowlink[&parent] {
                        lowlink.insert(parent, node_low);
                    }
                }
                if lowlink[&node] == indices[&node] {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack.remove(&w);
                        component.push(w);
                        if w == node {
                            break;
                        }
                    }
                    result.push(component);
                }
            }
        }
    }

    result
}

fn is_cyclic_scc(cfg: &Cfg, scc: &[NodeIndex]) -> bool {
    if scc.len() > 1 {
        return true;
    }
    match scc.first() {
        Some(&node) => cfg.graph.neighbors(node).any(|m| m == node),
        None => false,
    }
}

/// Johnson's algorithm's inner pass: every elementary circuit through
/// `start_node` within the node set `allowed`, using the blocked/B
/// bookkeeping that keeps the search from revisiting a dead end once it's
/// known not to lead back to `start_node`.
fn count_cycles_from(
    cfg: &Cfg,
    start_node: NodeIndex,
    allowed: &HashSet<NodeIndex>,
    start_time: Instant,
    timeout: Duration,
) -> Result<u64, AnalyzerError> {
    let neighbors_of = |n: NodeIndex| -> Vec<NodeIndex> {
        cfg.graph.neighbors(n).filter(|m| allowed.contains(m)).collect()
    };

    let mut blocked: HashSet<NodeIndex> = HashSet::new();
    let mut closed: HashSet<NodeIndex> = HashSet::new();
    let mut b: HashMap<NodeIndex, HashSet<NodeIndex>> = HashMap::new();
    let mut path: Vec<NodeIndex> = vec![start_node];
    blocked.insert(start_node);
    let mut count = 0u64;

    let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
        vec![(start_node, neighbors_of(start_node), 0)];

    while let Some(last) = stack.last_mut() {
        if start_time.elapsed() > timeout {
            return Err(AnalyzerError::Interpreter(InterpreterError::GlobalTimeout));
        }
        if last.2 < last.1.len() {
            let next = last.1[last.2];
            last.2 += 1;
            if next == start_node {
                count += 1;
                closed.extend(path.iter().copied());
            } else if !blocked.contains(&next) {
                path.push(next);
                blocked.insert(next);
                closed.remove(&next);
                let nbrs = neighbors_of(next);
                stack.push((next, nbrs, 0));
            }
        } else {
            let this_node = last.0;
            stack.pop();
            path.pop();
            if closed.contains(&this_node) {
                unblock(this_node, &mut blocked, &mut b);
            } else {
                for neighbor in neighbors_of(this_node) {
                    b.entry(neighbor).or_default().insert(this_node);
                }
            }
        }
    }

    Ok(count)
}

fn unblock(node: NodeIndex, blocked: &mut HashSet<NodeIndex>, b: &mut HashMap<NodeIndex, HashSet<NodeIndex>>) {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if blocked.remove(&n) {
            if let Some(deps) = b.get_mut(&n) {
                stack.extend(deps.drain());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::disassemble;
    use crate::bytecode::Termination;

    fn synthetic_block(pc: usize) -> crate::bytecode::BasicBlock {
        crate::bytecode::BasicBlock {
            start_pc: pc,
            end_pc: pc,
            instructions: Vec::new(),
            termination: Termination::FallsTo,
            falls_to_pc: None,
            jump_targets: Vec::new(),
            source_lines: (0, 0),
            changed: false,
        }
    }

    fn synthetic_cfg(node_pcs: &[usize], edges: &[(usize, usize)]) -> Cfg {
        let mut graph = petgraph::graph::DiGraph::new();
        let mut nodes = HashMap::new();
        for &pc in node_pcs {
            nodes.insert(pc, graph.add_node(synthetic_block(pc)));
        }
        for &(from, to) in edges {
            graph.add_edge(nodes[&from], nodes[&to], EdgeKind::Unconditional);
        }
        Cfg {
            entry: node_pcs.first().map(|pc| nodes[pc]),
            graph,
            blocks: nodes,
            function_entries: HashMap::new(),
        }
    }

    #[test]
    fn loop_bin_counts_a_jumpi_self_loop_as_one_cycle() {
        // JUMPDEST(0); PUSH1 1; PUSH1 0; JUMPI; STOP
        let code = [0x5B, 0x60, 0x01, 0x60, 0x00, 0x57, 0x00];
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        let loops = loop_bin(&cfg, Duration::from_secs(5)).unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn loop_bin_counts_overlapping_cycles_sharing_a_node_separately() {
        // A -> B -> D -> A  and  A -> C -> D -> A: two elementary circuits
        // sharing both node D and the D -> A edge. A DFS back-edge tally
        // would see D -> A once and undercount to 1; enumeration must yield 2.
        let cfg = synthetic_cfg(
            &[0, 1, 2, 3],
            &[(0, 1), (1, 3), (3, 0), (0, 2), (2, 3)],
        );
        let loops = loop_bin(&cfg, Duration::from_secs(5)).unwrap();
        assert_eq!(loops, 2);
    }

    #[test]
    fn sequence_bin_is_zero_for_a_single_terminal_block() {
        let code = [0x60, 0x00, 0x60, 0x00, 0xF3];
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        assert_eq!(sequence_bin(&cfg), 0);
    }

    #[test]
    fn sequence_bin_counts_the_fallthrough_side_of_a_conditional() {
        // PUSH1 1; PUSH1 0x10; JUMPI; JUMPDEST(padding); JUMPDEST; STOP
        let mut code = vec![0x60, 0x01, 0x60, 0x10, 0x57];
        code.extend(std::iter::repeat(0x00).take(0x10 - code.len()));
        code.push(0x5B);
        code.push(0x00);
        let instrs = disassemble(&code).unwrap();
        let cfg = Cfg::build(&instrs);
        assert_eq!(sequence_bin(&cfg), 1);
    }
}
