//! Semantic/side-effect-graph abstract indices: simple edge-kind counts,
//! summed across every function graph in the SSG.

use crate::ssg::SemanticGraph;

pub fn data_flow(ssg: &SemanticGraph) -> u64 {
    ssg.function_names()
        .map(|f| ssg.value_flow_edge_count(f) as u64)
        .sum()
}

pub fn control_flow(ssg: &SemanticGraph) -> u64 {
    ssg.function_names()
        .map(|f| ssg.control_flow_edge_count(f) as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::ssg::{EdgeKind, GLOBAL_FUNCTION};
    use primitive_types::U256;

    #[test]
    fn sums_value_flow_edges_across_functions() {
        let mut ssg = SemanticGraph::default();
        let a = ssg.arena.add_expression_node(Expr::Const(U256::from(1)));
        let b = ssg.arena.add_expression_node(Expr::Const(U256::from(2)));
        ssg.add_edge(GLOBAL_FUNCTION, EdgeKind::ValueFlow, a, b, 0, "x");
        assert_eq!(data_flow(&ssg), 1);
        assert_eq!(control_flow(&ssg), 0);
    }
}
