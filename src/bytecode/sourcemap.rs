//! Solidity-format source maps (`evm.deployedBytecode.sourceMap`): a `;`-separated
//! list of `s:l:f:j:m` entries, one per instruction in program order, where a blank
//! field inherits the previous entry's value.

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceMapEntry {
    pub start: usize,
    pub length: usize,
    pub file_index: isize,
}

pub fn parse(source_map: &str) -> Vec<SourceMapEntry> {
    let mut entries = Vec::new();
    let mut prev = SourceMapEntry::default();
    for raw in source_map.split(';') {
        if raw.is_empty() {
            entries.push(prev);
            continue;
        }
        let mut fields = raw.split(':');
        let start = fields
            .next()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(prev.start);
        let length = fields
            .next()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(prev.length);
        let file_index = fields
            .next()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(prev.file_index);
        let entry = SourceMapEntry {
            start,
            length,
            file_index,
        };
        entries.push(entry);
        prev = entry;
    }
    entries
}

/// Annotates each block in `cfg` with the source line span covering its
/// instructions and whether the span intersects the after-revision diff.
/// `entries` must be indexed in the same order as the instruction stream that
/// produced `cfg` (solc emits one source-map entry per instruction, in order).
pub fn annotate(
    cfg: &mut super::Cfg,
    instruction_order: &[usize],
    entries: &[SourceMapEntry],
    source: &crate::source::Source,
    diff: Option<&crate::source::Diff>,
) {
    let pc_to_entry: std::collections::HashMap<usize, SourceMapEntry> = instruction_order
        .iter()
        .zip(entries.iter())
        .map(|(&pc, &entry)| (pc, entry))
        .collect();

    let pcs: Vec<usize> = cfg.blocks.keys().copied().collect();
    for pc in pcs {
        let node = cfg.blocks[&pc];
        let block = &mut cfg.graph[node];
        let mut lo = usize::MAX;
        let mut hi = 0usize;
        for instr in &block.instructions {
            if let Some(entry) = pc_to_entry.get(&instr.pc) {
                if entry.length == 0 {
                    continue;
                }
                let (start_line, end_line) =
                    source.lines_covering(entry.start, entry.length);
                lo = lo.min(start_line);
                hi = hi.max(end_line);
            }
        }
        if lo <= hi {
            block.source_lines = (lo, hi);
            block.changed = diff.map(|d| d.touches_after(lo, hi)).unwrap_or(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherits_blank_fields_from_previous_entry() {
        let entries = parse("10:5:0:-;;20:3:0:i");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].start, 10);
        assert_eq!(entries[1].length, 5);
        assert_eq!(entries[2].start, 20);
        assert_eq!(entries[2].length, 3);
    }
}
