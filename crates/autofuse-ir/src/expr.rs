//! Symbolic byte-size expressions.
//!
//! Tensor shapes may carry named dynamic dimensions, so memory sizes are
//! expressions over those symbols rather than plain integers. The solver
//! only needs a small algebra: construction from shape products, addition
//! when accumulating shared-buffer savings, constant folding, and a
//! structural comparison for ranking expressions that have no arithmetic
//! total order.

use std::fmt;

/// A symbolic byte-size expression.
///
/// The derived `Ord` is structural, not arithmetic; it exists so that
/// expressions can serve as deterministic tie-break keys (see
/// [`SizeExpr::statically_gt`]).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeExpr {
    /// A concrete byte count.
    Const(i64),
    /// A named dynamic dimension.
    Sym(String),
    /// Sum of sub-expressions.
    Sum(Vec<SizeExpr>),
    /// Product of sub-expressions.
    Prod(Vec<SizeExpr>),
}

impl SizeExpr {
    /// The zero size.
    pub fn zero() -> Self {
        SizeExpr::Const(0)
    }

    /// Returns `true` if this expression is the constant zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, SizeExpr::Const(0))
    }

    /// Resolves the expression to a constant, if it contains no symbols.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            SizeExpr::Const(c) => Some(*c),
            SizeExpr::Sym(_) => None,
            SizeExpr::Sum(terms) => {
                terms.iter().try_fold(0i64, |acc, t| Some(acc + t.as_const()?))
            }
            SizeExpr::Prod(factors) => factors
                .iter()
                .try_fold(1i64, |acc, f| Some(acc * f.as_const()?)),
        }
    }

    /// Adds two expressions, folding constants and short-circuiting zero
    /// so accumulation never builds a `x + 0` chain.
    pub fn add(self, other: SizeExpr) -> SizeExpr {
        if self.is_zero() {
            return other;
        }
        if other.is_zero() {
            return self;
        }
        match (self, other) {
            (SizeExpr::Const(a), SizeExpr::Const(b)) => SizeExpr::Const(a + b),
            (SizeExpr::Sum(mut terms), b) => {
                terms.push(b);
                SizeExpr::Sum(terms)
            }
            (a, b) => SizeExpr::Sum(vec![a, b]),
        }
    }

    /// Multiplies two expressions, folding constants.
    pub fn mul(self, other: SizeExpr) -> SizeExpr {
        match (self, other) {
            (SizeExpr::Const(0), _) | (_, SizeExpr::Const(0)) => SizeExpr::Const(0),
            (SizeExpr::Const(1), b) => b,
            (a, SizeExpr::Const(1)) => a,
            (SizeExpr::Const(a), SizeExpr::Const(b)) => SizeExpr::Const(a * b),
            (SizeExpr::Prod(mut factors), b) => {
                factors.push(b);
                SizeExpr::Prod(factors)
            }
            (a, b) => SizeExpr::Prod(vec![a, b]),
        }
    }

    /// Structural "greater than" for expressions without an arithmetic
    /// total order.
    ///
    /// Constants compare numerically. A symbolic expression is treated as
    /// dominating any constant (dynamic dimensions are unbounded). Two
    /// symbolic expressions fall back to the structural `Ord`, which is
    /// antisymmetric for distinct expressions and stable across runs.
    pub fn statically_gt(&self, other: &SizeExpr) -> bool {
        match (self.as_const(), other.as_const()) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => self > other,
        }
    }
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Const(c) => write!(f, "{c}"),
            SizeExpr::Sym(s) => f.write_str(s),
            SizeExpr::Sum(terms) => {
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{t}")?;
                }
                Ok(())
            }
            SizeExpr::Prod(factors) => {
                for (i, x) in factors.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    match x {
                        SizeExpr::Sum(_) => write!(f, "({x})")?,
                        _ => write!(f, "{x}")?,
                    }
                }
                Ok(())
            }
        }
    }
}
