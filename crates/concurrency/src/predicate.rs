//! Integer interval predicates
//!
//! A predicate records what a transaction learned about an integer without
//! pinning its exact value: "size >= 3" survives concurrent changes that
//! keep the size at or above 3, where an exact version check would not.
//!
//! Observations narrow a closed interval `[lo, hi]`. Two observations on the
//! same key combine into their intersection; an empty intersection means the
//! transaction saw contradictory facts and must abort.

use std::fmt;

use stoa_core::{AbortReason, TxnResult};

/// Relational operator of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Evaluate `lhs op rhs`
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }

    /// The operator that holds exactly when `self` does not
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        })
    }
}

/// Closed interval `[lo, hi]` of values consistent with what was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRange {
    lo: i64,
    hi: i64,
}

impl Default for IntRange {
    fn default() -> Self {
        Self::ANY
    }
}

impl IntRange {
    /// No constraint
    pub const ANY: IntRange = IntRange {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    /// `[lo, hi]`, or `PredicateConflict` when empty
    pub fn new(lo: i64, hi: i64) -> TxnResult<Self> {
        if lo > hi {
            return Err(AbortReason::PredicateConflict.into());
        }
        Ok(IntRange { lo, hi })
    }

    /// `[v, v]`
    pub fn exactly(v: i64) -> Self {
        IntRange { lo: v, hi: v }
    }

    /// Smallest admitted value
    pub fn lo(&self) -> i64 {
        self.lo
    }

    /// Largest admitted value
    pub fn hi(&self) -> i64 {
        self.hi
    }

    /// Whether nothing has been learned
    pub fn is_unconstrained(&self) -> bool {
        *self == Self::ANY
    }

    /// Whether exactly one value is admitted
    pub fn is_exact(&self) -> bool {
        self.lo == self.hi
    }

    /// Whether `value` is admitted
    pub fn contains(&self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Narrow by the fact `x op value`
    ///
    /// `!=` narrows only when `value` is an endpoint; an interior hole is not
    /// representable and is left unrecorded.
    pub fn observe(&mut self, op: CmpOp, value: i64) -> TxnResult<()> {
        let (lo, hi) = match op {
            CmpOp::Eq => (value, value),
            CmpOp::Lt => match value.checked_sub(1) {
                Some(v) => (i64::MIN, v),
                None => return Err(AbortReason::PredicateConflict.into()),
            },
            CmpOp::Le => (i64::MIN, value),
            CmpOp::Gt => match value.checked_add(1) {
                Some(v) => (v, i64::MAX),
                None => return Err(AbortReason::PredicateConflict.into()),
            },
            CmpOp::Ge => (value, i64::MAX),
            CmpOp::Ne => {
                if self.is_exact() && self.lo == value {
                    return Err(AbortReason::PredicateConflict.into());
                }
                if self.lo == value {
                    (value + 1, i64::MAX)
                } else if self.hi == value {
                    (i64::MIN, value - 1)
                } else {
                    return Ok(());
                }
            }
        };
        *self = self.intersect(&IntRange { lo, hi })?;
        Ok(())
    }

    /// Tightest interval implied by both
    pub fn intersect(&self, other: &IntRange) -> TxnResult<IntRange> {
        IntRange::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    /// Same interval shifted by `delta`, saturating at the integer bounds
    ///
    /// Used to move a constraint on `base + delta` onto `base`.
    pub fn shifted(&self, delta: i64) -> IntRange {
        let lo = if self.lo == i64::MIN {
            i64::MIN
        } else {
            self.lo.saturating_add(delta)
        };
        let hi = if self.hi == i64::MAX {
            i64::MAX
        } else {
            self.hi.saturating_add(delta)
        };
        IntRange { lo, hi }
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lo, self.hi) {
            (i64::MIN, i64::MAX) => f.write_str("any"),
            (lo, hi) if lo == hi => write!(f, "== {}", lo),
            (i64::MIN, hi) => write!(f, "<= {}", hi),
            (lo, i64::MAX) => write!(f, ">= {}", lo),
            (lo, hi) => write!(f, "[{}, {}]", lo, hi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn observed(facts: &[(CmpOp, i64)]) -> TxnResult<IntRange> {
        let mut r = IntRange::ANY;
        for &(op, v) in facts {
            r.observe(op, v)?;
        }
        Ok(r)
    }

    #[test]
    fn test_eq_then_ge_keeps_eq() {
        let r = observed(&[(CmpOp::Eq, 5), (CmpOp::Ge, 3)]).unwrap();
        assert_eq!(r, IntRange::exactly(5));
    }

    #[test]
    fn test_ge_then_eq_narrows_to_eq() {
        let r = observed(&[(CmpOp::Ge, 3), (CmpOp::Eq, 5)]).unwrap();
        assert_eq!(r, IntRange::exactly(5));
    }

    #[test]
    fn test_conflicting_eq_aborts() {
        let err = observed(&[(CmpOp::Eq, 5), (CmpOp::Eq, 7)]).unwrap_err();
        assert_eq!(err.reason, AbortReason::PredicateConflict);
    }

    #[test]
    fn test_contradictory_bounds_abort() {
        assert!(observed(&[(CmpOp::Ge, 5), (CmpOp::Lt, 5)]).is_err());
        assert!(observed(&[(CmpOp::Gt, 5), (CmpOp::Le, 5)]).is_err());
        assert!(observed(&[(CmpOp::Ge, 5), (CmpOp::Le, 5)]).is_ok());
    }

    #[test]
    fn test_two_lower_bounds_take_the_tighter() {
        let r = observed(&[(CmpOp::Ge, 3), (CmpOp::Gt, 7)]).unwrap();
        assert_eq!(r.lo(), 8);
        assert_eq!(r.hi(), i64::MAX);
    }

    #[test]
    fn test_ne_trims_endpoints_only() {
        let r = observed(&[(CmpOp::Ge, 3), (CmpOp::Le, 6), (CmpOp::Ne, 3)]).unwrap();
        assert_eq!((r.lo(), r.hi()), (4, 6));
        let r = observed(&[(CmpOp::Ge, 3), (CmpOp::Le, 6), (CmpOp::Ne, 5)]).unwrap();
        assert_eq!((r.lo(), r.hi()), (3, 6));
        assert!(observed(&[(CmpOp::Eq, 3), (CmpOp::Ne, 3)]).is_err());
    }

    #[test]
    fn test_extreme_bounds_abort_instead_of_overflowing() {
        assert!(observed(&[(CmpOp::Lt, i64::MIN)]).is_err());
        assert!(observed(&[(CmpOp::Gt, i64::MAX)]).is_err());
    }

    #[test]
    fn test_shifted_keeps_open_ends() {
        let r = IntRange::new(3, i64::MAX).unwrap().shifted(-2);
        assert_eq!((r.lo(), r.hi()), (1, i64::MAX));
        assert!(IntRange::ANY.shifted(10).is_unconstrained());
    }

    #[test]
    fn test_display() {
        assert_eq!(IntRange::ANY.to_string(), "any");
        assert_eq!(IntRange::exactly(5).to_string(), "== 5");
        assert_eq!(IntRange::new(3, 9).unwrap().to_string(), "[3, 9]");
    }

    proptest! {
        #[test]
        fn prop_observation_is_sound(
            facts in proptest::collection::vec((0usize..6, -20i64..20), 1..6),
            x in -25i64..25,
        ) {
            const OPS: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge];
            let facts: Vec<(CmpOp, i64)> = facts.into_iter().map(|(i, v)| (OPS[i], v)).collect();
            let all_hold = facts.iter().all(|&(op, v)| op.eval(x, v));
            match observed(&facts) {
                // every value satisfying all facts stays admitted
                Ok(r) => prop_assert!(!all_hold || r.contains(x)),
                // an abort means no value satisfies all the facts
                Err(_) => prop_assert!(!all_hold),
            }
        }

        #[test]
        fn prop_negate_is_complement(a in -10i64..10, b in -10i64..10, i in 0usize..6) {
            const OPS: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge];
            let op = OPS[i];
            prop_assert_ne!(op.eval(a, b), op.negate().eval(a, b));
        }
    }
}
