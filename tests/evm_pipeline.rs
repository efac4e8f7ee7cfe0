//! End-to-end scenarios over the CFG builder and symbolic interpreter,
//! plus regression coverage for the two preserved quirks.

use xgraph_diff::bytecode::opcode::disassemble;
use xgraph_diff::bytecode::{Cfg, Termination};
use xgraph_diff::expr::Expr;
use xgraph_diff::interpreter::{Interpreter, InterpreterConfig};

fn run(code: &[u8]) -> (Cfg, Interpreter<'static>) {
    // Leak the CFG so the interpreter's `&'a mut Cfg` can outlive this helper;
    // acceptable in tests, never done in production code.
    let instructions = disassemble(code).unwrap();
    let cfg: &'static mut Cfg = Box::leak(Box::new(Cfg::build(&instructions)));
    let mut interpreter = Interpreter::new(cfg, InterpreterConfig::default());
    interpreter.run();
    (Cfg::build(&instructions), interpreter)
}

#[test]
fn s1_minimal_terminal_return() {
    // PUSH1 0; PUSH1 0; RETURN
    let code = [0x60, 0x00, 0x60, 0x00, 0xF3];
    let (cfg, interp) = run(&code);
    assert_eq!(cfg.block_count(), 1);
    assert_eq!(cfg.block_at(0).unwrap().termination, Termination::Terminal);
    assert_eq!(interp.stats.get("normal").copied().unwrap_or(0), 1);
    assert_eq!(interp.stats.get("exception").copied().unwrap_or(0), 0);
}

#[test]
fn s2_static_conditional_branch_explores_both_feasible_targets() {
    // PUSH1 1; PUSH1 0x10; JUMPI; JUMPDEST(padding to 0x10); JUMPDEST; STOP
    let mut code = vec![0x60, 0x01, 0x60, 0x10, 0x57];
    code.extend(std::iter::repeat(0x00).take(0x10 - code.len()));
    code.push(0x5B); // JUMPDEST at 0x10
    code.push(0x00); // STOP
    let (cfg, interp) = run(&code);
    let entry = cfg.block_at(0).unwrap();
    assert_eq!(entry.termination, Termination::Conditional);
    assert_eq!(entry.current_jump_target(), Some(0x10));
    // condition is a concrete `1` (always true): only the true branch runs,
    // and the false target is logged impossible (the preserved quirk logs the
    // *true* target here since the condition folds to `true`).
    assert!(interp.impossible_paths.iter().any(|p| p.from_pc == 0));
    assert_eq!(interp.stats.get("normal").copied().unwrap_or(0), 1);
}

#[test]
fn s6_division_by_zero_is_a_concrete_zero_not_an_exception() {
    // PUSH1 0; PUSH1 1; DIV
    let code = [0x60, 0x00, 0x60, 0x01, 0x04];
    let (_cfg, interp) = run(&code);
    assert_eq!(interp.stats.get("normal").copied().unwrap_or(0), 1);
    assert_eq!(interp.stats.get("exception").copied().unwrap_or(0), 0);
}

#[test]
fn jumpi_impossible_branch_quirk_always_logs_true_target() {
    // A condition that simplifies to concrete `true` (PUSH1 1) takes the true
    // branch; the preserved quirk logs the true-side target as impossible even
    // though the false side is what's actually unreachable.
    let mut code = vec![0x60, 0x01, 0x60, 0x10, 0x57];
    code.extend(std::iter::repeat(0x00).take(0x10 - code.len()));
    code.push(0x5B);
    code.push(0x00);
    let (_cfg, interp) = run(&code);
    assert_eq!(interp.impossible_paths.len(), 1);
    assert_eq!(interp.impossible_paths[0].target_pc, 0x10);
}

#[test]
fn jumpi_false_condition_logs_true_target_as_impossible() {
    // PUSH1 0; PUSH1 0x10; JUMPI; JUMPDEST; STOP -- condition is concrete
    // `false`, so only the fallthrough runs. Unlike the always-true case,
    // this is not a quirk: the jump-side target is genuinely unreachable and
    // is what gets logged as impossible.
    let mut code = vec![0x60, 0x00, 0x60, 0x10, 0x57];
    code.extend(std::iter::repeat(0x00).take(0x10 - code.len()));
    code.push(0x5B);
    code.push(0x00);
    let (cfg, interp) = run(&code);
    let true_target = cfg.block_at(0).unwrap().current_jump_target();
    assert_eq!(interp.impossible_paths.len(), 1);
    assert_eq!(interp.impossible_paths[0].target_pc, true_target.unwrap());
}

#[test]
fn expr_structural_dedup_via_simplify_zero_diff() {
    use xgraph_diff::expr::BinOp;
    use primitive_types::U256;

    let a = Expr::Const(U256::from(7));
    let b = Expr::Const(U256::from(7));
    let diff = Expr::Bin(BinOp::Sub, Box::new(a.clone()), Box::new(b.clone())).simplify();
    assert_eq!(diff, Expr::Const(U256::zero()));
    assert!(a.semantically_eq(&b));
}
