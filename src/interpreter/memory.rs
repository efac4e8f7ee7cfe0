//! Byte-addressable memory model bifurcated into a concrete byte store and a
//! single symbolic override, per the design's memory semantics note: touching
//! memory with a symbolic offset or size clears the concrete store entirely
//! and installs one symbolic entry that future concrete accesses cannot see
//! into.

use std::collections::BTreeMap;

use primitive_types::U256;

use crate::expr::{BinOp, Expr};

#[derive(Debug, Clone)]
struct MemCell {
    end: usize, // inclusive
    value: Expr,
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    concrete: BTreeMap<usize, MemCell>,
    symbolic_override: Option<(Expr, Expr, Expr)>, // (start, size, value)
    pub miu: usize,
}

impl Memory {
    /// `value` is the full 256-bit word being stored; only its low `size`
    /// bytes are written (mirrors MSTORE writing all 32 bytes of `value`,
    /// MSTORE8 writing just the low byte).
    pub fn store(&mut self, offset: Expr, size_bytes: usize, value: Expr) {
        let low_bytes = mask_low_bytes(&value, size_bytes);
        match offset.as_const() {
            Some(start) if start.bits() <= 64 => {
                let start = start.as_u64() as usize;
                self.store_concrete(start, size_bytes, low_bytes);
            }
            _ => {
                self.concrete.clear();
                let end = Expr::Bin(
                    BinOp::Sub,
                    Box::new(Expr::Bin(
                        BinOp::Add,
                        Box::new(offset.clone()),
                        Box::new(Expr::Const(U256::from(size_bytes))),
                    )),
                    Box::new(Expr::Const(U256::one())),
                );
                self.symbolic_override = Some((offset, end, low_bytes));
            }
        }
    }

    fn store_concrete(&mut self, start: usize, size: usize, value: Expr) {
        if size == 0 {
            return;
        }
        let end = start + size - 1;
        self.miu = self.miu.max(ceil_words(start, size));

        let overlapping: Vec<(usize, MemCell)> = self
            .concrete
            .range(..=end)
            .filter(|(&s, cell)| cell.end >= start && s <= end)
            .map(|(&s, cell)| (s, cell.clone()))
            .collect();

        for (old_start, old_cell) in overlapping {
            self.concrete.remove(&old_start);
            let old_width = old_cell.end - old_start + 1;
            // surviving prefix: bytes of the old cell before `start`
            if old_start < start {
                let prefix_end = start - 1;
                let prefix = extract_byte_range(
                    &old_cell.value,
                    old_start,
                    old_cell.end,
                    old_width,
                    old_start,
                    prefix_end,
                );
                self.concrete.insert(
                    old_start,
                    MemCell {
                        end: prefix_end,
                        value: prefix,
                    },
                );
            }
            // surviving suffix: bytes of the old cell after `end`
            if old_cell.end > end {
                let suffix_start = end + 1;
                let suffix = extract_byte_range(
                    &old_cell.value,
                    old_start,
                    old_cell.end,
                    old_width,
                    suffix_start,
                    old_cell.end,
                );
                self.concrete.insert(
                    suffix_start,
                    MemCell {
                        end: old_cell.end,
                        value: suffix,
                    },
                );
            }
        }

        self.concrete.insert(start, MemCell { end, value });
    }

    pub fn load(&mut self, offset: Expr, size_bytes: usize) -> Expr {
        match offset.as_const() {
            Some(start) if start.bits() <= 64 => {
                let start = start.as_u64() as usize;
                self.miu = self.miu.max(ceil_words(start, size_bytes));
                self.load_concrete(start, size_bytes)
            }
            _ => {
                if let Some((ov_start, ov_size, ov_value)) = &self.symbolic_override {
                    let size_expr = Expr::Const(U256::from(size_bytes));
                    if offset.semantically_eq(ov_start) && size_expr.semantically_eq(ov_size) {
                        return ov_value.clone();
                    }
                }
                Expr::Bin(
                    BinOp::Add,
                    Box::new(offset),
                    Box::new(Expr::Const(U256::zero())),
                )
            }
        }
    }

    fn load_concrete(&self, start: usize, size: usize) -> Expr {
        if size == 0 {
            return Expr::Const(U256::zero());
        }
        let end = start + size - 1;
        if let Some(cell) = self.concrete.get(&start) {
            if cell.end == end {
                return cell.value.clone();
            }
        }

        let mut result = Expr::Const(U256::zero());
        for (&cell_start, cell) in self.concrete.range(..=end) {
            if cell.end < start {
                continue;
            }
            let overlap_start = cell_start.max(start);
            let overlap_end = cell.end.min(end);
            if overlap_start > overlap_end {
                continue;
            }
            let width = cell.end - cell_start + 1;
            let contribution =
                extract_byte_range(&cell.value, cell_start, cell.end, width, overlap_start, overlap_end);
            let shift_bytes = end - overlap_end;
            let positioned = if shift_bytes == 0 {
                contribution
            } else {
                Expr::Bin(
                    BinOp::Shl,
                    Box::new(contribution),
                    Box::new(Expr::Const(U256::from(shift_bytes * 8))),
                )
            };
            result = Expr::Bin(BinOp::Or, Box::new(result), Box::new(positioned));
        }
        result.simplify()
    }
}

fn ceil_words(start: usize, size: usize) -> usize {
    (start + size + 31) / 32
}

fn mask_low_bytes(value: &Expr, bytes: usize) -> Expr {
    if bytes >= 32 {
        return value.clone();
    }
    let mask = (U256::one() << (bytes * 8)) - U256::one();
    Expr::Bin(
        BinOp::And,
        Box::new(value.clone()),
        Box::new(Expr::Const(mask)),
    )
    .simplify()
}

/// Extracts the bytes `[sub_start, sub_end]` (inclusive, absolute byte
/// addresses) out of `value`, which spans `[cell_start, cell_end]` at `width`
/// bytes, returning them right-aligned in a fresh expression.
fn extract_byte_range(
    value: &Expr,
    cell_start: usize,
    cell_end: usize,
    width: usize,
    sub_start: usize,
    sub_end: usize,
) -> Expr {
    debug_assert!(sub_start >= cell_start && sub_end <= cell_end);
    let bytes_after = cell_end - sub_end;
    let sub_width = sub_end - sub_start + 1;
    let shifted = if bytes_after == 0 {
        value.clone()
    } else {
        Expr::Bin(
            BinOp::Shr,
            Box::new(value.clone()),
            Box::new(Expr::Const(U256::from(bytes_after * 8))),
        )
    };
    let _ = width;
    let mask = (U256::one() << (sub_width * 8)) - U256::one();
    Expr::Bin(BinOp::And, Box::new(shifted), Box::new(Expr::Const(mask))).simplify()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_concrete_word() {
        let mut mem = Memory::default();
        let value = Expr::Const(U256::from(0xdead_beefu64));
        mem.store(Expr::Const(U256::from(0)), 32, value.clone());
        let loaded = mem.load(Expr::Const(U256::from(0)), 32);
        assert_eq!(loaded.as_const(), value.as_const());
    }

    #[test]
    fn overlapping_write_truncates_prior_entry() {
        let mut mem = Memory::default();
        mem.store(Expr::Const(U256::from(0)), 32, Expr::Const(U256::MAX));
        mem.store(Expr::Const(U256::from(16)), 1, Expr::Const(U256::zero()));
        // byte 16 should now read as part of the zero write, not the all-ones word
        let loaded = mem.load(Expr::Const(U256::from(16)), 1);
        assert_eq!(loaded.as_const(), Some(U256::zero()));
        // byte 0 should still read as 0xff from the original word
        let first_byte = mem.load(Expr::Const(U256::from(0)), 1);
        assert_eq!(first_byte.as_const(), Some(U256::from(0xffu64)));
    }

    #[test]
    fn symbolic_offset_clears_concrete_store() {
        let mut mem = Memory::default();
        mem.store(Expr::Const(U256::from(0)), 32, Expr::Const(U256::from(1)));
        mem.store(Expr::Sym(0), 32, Expr::Const(U256::from(2)));
        assert!(mem.concrete.is_empty());
    }
}
