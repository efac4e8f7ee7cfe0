//! Diff-aware aggregation of per-revision abstract-index values into one
//! artifact.
//!
//! Numeric indices subtract (`after - before`), matching "how much did this
//! change move the index". Tag-valued indices instead carry the after-side
//! value verbatim — a tag describes what the contract *is*, not a quantity to
//! difference. An index that errored on either revision is suppressed to a
//! zero/empty value rather than failing the whole request (§7's non-fatal
//! compilation/symbolic-execution failure handling).

use std::collections::{BTreeMap, BTreeSet};

use crate::abstracts::IndexValue;
use crate::config::RequestContext;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedValue {
    Number(f64),
    Tags(Vec<String>),
}

pub fn aggregate(
    before: &BTreeMap<String, IndexValue>,
    after: &BTreeMap<String, IndexValue>,
    ctx: &RequestContext,
) -> BTreeMap<String, AggregatedValue> {
    let mut names: BTreeSet<&String> = before.keys().collect();
    names.extend(after.keys());

    let mut out = BTreeMap::new();
    for name in names {
        if ctx.errored(name) {
            out.insert(name.clone(), AggregatedValue::Number(0.0));
            continue;
        }
        let aggregated = match (before.get(name), after.get(name)) {
            (_, Some(IndexValue::Tags(tags))) => AggregatedValue::Tags(tags.clone()),
            (Some(IndexValue::Tags(_)), None) => AggregatedValue::Tags(Vec::new()),
            (b, a) => {
                let before_value = numeric(b);
                let after_value = numeric(a);
                AggregatedValue::Number(after_value - before_value)
            }
        };
        out.insert(name.clone(), aggregated);
    }
    out
}

fn numeric(v: Option<&IndexValue>) -> f64 {
    match v {
        Some(IndexValue::Number(n)) => *n,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_index_diffs_after_minus_before() {
        let mut before = BTreeMap::new();
        before.insert("sequence_src".to_string(), IndexValue::Number(3.0));
        let mut after = BTreeMap::new();
        after.insert("sequence_src".to_string(), IndexValue::Number(5.0));
        let ctx = RequestContext::new("r1");
        let out = aggregate(&before, &after, &ctx);
        assert_eq!(out["sequence_src"], AggregatedValue::Number(2.0));
    }

    #[test]
    fn tag_index_carries_after_side() {
        let before = BTreeMap::new();
        let mut after = BTreeMap::new();
        after.insert(
            "tag_src".to_string(),
            IndexValue::Tags(vec!["token-transfer".to_string()]),
        );
        let ctx = RequestContext::new("r1");
        let out = aggregate(&before, &after, &ctx);
        assert_eq!(
            out["tag_src"],
            AggregatedValue::Tags(vec!["token-transfer".to_string()])
        );
    }

    #[test]
    fn errored_index_is_suppressed_to_zero() {
        let mut before = BTreeMap::new();
        before.insert("loop_bin".to_string(), IndexValue::Number(4.0));
        let after = BTreeMap::new();
        let mut ctx = RequestContext::new("r1");
        ctx.mark_errored_after("loop_bin", crate::error::ErrorKind::SymbolicTimeout);
        let out = aggregate(&before, &after, &ctx);
        assert_eq!(out["loop_bin"], AggregatedValue::Number(0.0));
    }
}
