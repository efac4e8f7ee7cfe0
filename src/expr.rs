//! Algebraic 256-bit expressions used for path conditions and structural
//! deduplication of symbolic value nodes.
//!
//! There is no SMT backend (see the crate's Non-goals): `simplify` only folds
//! literal constants and recognizes structurally identical subtrees. Two
//! expressions are considered equal, per the design's relaxed rule, when
//! `simplify(a - b)` folds to the constant zero, or when the simplified trees
//! are syntactically identical.

use std::fmt;

use primitive_types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    SDiv,
    Mod,
    SMod,
    Exp,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Byte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    IsZero,
}

/// A unique handle for a symbolic (unconstrained) input: a fresh environment
/// variable, calldata word, or other value the interpreter cannot compute.
pub type SymId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(U256),
    Sym(SymId),
    Un(UnOp, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn is_true(&self) -> bool {
        matches!(self.clone().simplify(), Expr::Const(v) if v == U256::one())
    }

    pub fn is_false(&self) -> bool {
        matches!(self.clone().simplify(), Expr::Const(v) if v.is_zero())
    }

    pub fn as_const(&self) -> Option<U256> {
        match self.clone().simplify() {
            Expr::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Collects the free `Sym` leaves of this expression, in first-seen order.
    pub fn free_vars(&self) -> Vec<SymId> {
        let mut out = Vec::new();
        self.collect_free_vars(&mut out);
        out
    }

    fn collect_free_vars(&self, out: &mut Vec<SymId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Sym(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            Expr::Un(_, a) => a.collect_free_vars(out),
            Expr::Bin(_, a, b) => {
                a.collect_free_vars(out);
                b.collect_free_vars(out);
            }
        }
    }

    /// Folds constant subtrees. Never fails; symbolic subtrees are left intact.
    pub fn simplify(self) -> Expr {
        match self {
            Expr::Const(_) | Expr::Sym(_) => self,
            Expr::Un(op, inner) => {
                let inner = inner.simplify();
                if let Expr::Const(v) = inner {
                    Expr::Const(apply_unop(op, v))
                } else {
                    Expr::Un(op, Box::new(inner))
                }
            }
            Expr::Bin(op, a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                if let (Expr::Const(av), Expr::Const(bv)) = (&a, &b) {
                    Expr::Const(apply_binop(op, *av, *bv))
                } else {
                    Expr::Bin(op, Box::new(a), Box::new(b))
                }
            }
        }
    }

    /// The design's relaxed structural-equality rule: `simplify(a - b) == 0`,
    /// falling back to syntactic identity of the simplified trees (covers
    /// symbolic-only expressions a numeric subtraction can't fold).
    pub fn semantically_eq(&self, other: &Expr) -> bool {
        let diff = Expr::Bin(
            BinOp::Sub,
            Box::new(self.clone()),
            Box::new(other.clone()),
        )
        .simplify();
        if let Expr::Const(v) = diff {
            if v.is_zero() {
                return true;
            }
        }
        self.clone().simplify() == other.clone().simplify()
    }
}

fn apply_unop(op: UnOp, v: U256) -> U256 {
    match op {
        UnOp::Not => !v,
        UnOp::IsZero => bool_to_word(v.is_zero()),
    }
}

fn bool_to_word(b: bool) -> U256 {
    if b {
        U256::one()
    } else {
        U256::zero()
    }
}

fn to_signed(v: U256) -> (bool, U256) {
    if v.bit(255) {
        (true, (!v).overflowing_add(U256::one()).0)
    } else {
        (false, v)
    }
}

fn from_signed(negative: bool, magnitude: U256) -> U256 {
    if negative {
        (!magnitude).overflowing_add(U256::one()).0
    } else {
        magnitude
    }
}

pub fn apply_binop(op: BinOp, a: U256, b: U256) -> U256 {
    match op {
        BinOp::Add => a.overflowing_add(b).0,
        BinOp::Sub => a.overflowing_sub(b).0,
        BinOp::Mul => a.overflowing_mul(b).0,
        BinOp::Div => {
            if b.is_zero() {
                U256::zero()
            } else {
                a / b
            }
        }
        BinOp::SDiv => {
            if b.is_zero() {
                return U256::zero();
            }
            let (a_neg, a_mag) = to_signed(a);
            let (b_neg, b_mag) = to_signed(b);
            let q = a_mag / b_mag;
            from_signed(a_neg != b_neg, q)
        }
        BinOp::Mod => {
            if b.is_zero() {
                U256::zero()
            } else {
                a % b
            }
        }
        BinOp::SMod => {
            if b.is_zero() {
                return U256::zero();
            }
            let (a_neg, a_mag) = to_signed(a);
            let (_, b_mag) = to_signed(b);
            let r = a_mag % b_mag;
            from_signed(a_neg, r)
        }
        BinOp::Exp => {
            let mut result = U256::one();
            let mut base = a;
            let mut exp = b;
            while !exp.is_zero() {
                if exp.bit(0) {
                    result = result.overflowing_mul(base).0;
                }
                base = base.overflowing_mul(base).0;
                exp >>= 1;
            }
            result
        }
        BinOp::Lt => bool_to_word(a < b),
        BinOp::Gt => bool_to_word(a > b),
        BinOp::SLt => {
            let (a_neg, a_mag) = to_signed(a);
            let (b_neg, b_mag) = to_signed(b);
            bool_to_word(match (a_neg, b_neg) {
                (true, false) => true,
                (false, true) => false,
                (true, true) => a_mag > b_mag,
                (false, false) => a_mag < b_mag,
            })
        }
        BinOp::SGt => {
            let (a_neg, a_mag) = to_signed(a);
            let (b_neg, b_mag) = to_signed(b);
            bool_to_word(match (a_neg, b_neg) {
                (true, false) => false,
                (false, true) => true,
                (true, true) => a_mag < b_mag,
                (false, false) => a_mag > b_mag,
            })
        }
        BinOp::Eq => bool_to_word(a == b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => {
            if b >= U256::from(256) {
                U256::zero()
            } else {
                a << b.as_u32()
            }
        }
        BinOp::Shr => {
            if b >= U256::from(256) {
                U256::zero()
            } else {
                a >> b.as_u32()
            }
        }
        BinOp::Sar => {
            if b >= U256::from(256) {
                if a.bit(255) {
                    U256::MAX
                } else {
                    U256::zero()
                }
            } else {
                let (neg, _) = to_signed(a);
                let shifted = a >> b.as_u32();
                if neg {
                    let mask = U256::MAX << (256 - b.as_u32().min(256));
                    shifted | mask
                } else {
                    shifted
                }
            }
        }
        BinOp::Byte => {
            let i = a;
            if i >= U256::from(32) {
                U256::zero()
            } else {
                let idx = i.as_u32();
                let shift = 248 - idx * 8;
                (b >> shift) & U256::from(0xffu64)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Sym(id) => write!(f, "sym_{id}"),
            Expr::Un(op, a) => write!(f, "{op:?}({a})"),
            Expr::Bin(op, a, b) => write!(f, "{op:?}({a}, {b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn const_fold_arithmetic() {
        let e = Expr::Bin(
            BinOp::Add,
            Box::new(Expr::Const(U256::from(2))),
            Box::new(Expr::Const(U256::from(3))),
        );
        assert_eq!(e.simplify(), Expr::Const(U256::from(5)));
    }

    #[test]
    fn division_by_zero_is_zero_not_panic() {
        let e = Expr::Bin(
            BinOp::Div,
            Box::new(Expr::Const(U256::from(10))),
            Box::new(Expr::Const(U256::zero())),
        );
        assert_eq!(e.simplify(), Expr::Const(U256::zero()));
    }

    #[test]
    fn identical_symbolic_subtraction_is_semantically_equal() {
        let a = Expr::Sym(1);
        let b = Expr::Sym(1);
        assert!(a.semantically_eq(&b));
        let c = Expr::Sym(2);
        assert!(!a.semantically_eq(&c));
    }

    proptest! {
        #[test]
        fn add_sub_mul_match_wrapping_u128(a in any::<u64>(), b in any::<u64>()) {
            let (av, bv) = (U256::from(a), U256::from(b));
            prop_assert_eq!(apply_binop(BinOp::Add, av, bv), av.overflowing_add(bv).0);
            prop_assert_eq!(apply_binop(BinOp::Sub, av, bv), av.overflowing_sub(bv).0);
            prop_assert_eq!(apply_binop(BinOp::Mul, av, bv), av.overflowing_mul(bv).0);
        }
    }
}
