//! Arity ranges for properties, parameters and expressions.
//!
//! A [`Multiplicity`] is a pair `(lower, upper)` where `upper` may be
//! unbounded. The invariant `lower <= upper` is enforced at construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An arity range `[lower, upper]`; `upper == None` means unbounded (`*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Multiplicity {
    lower: u32,
    upper: Option<u32>,
}

impl Multiplicity {
    pub const ZERO: Multiplicity = Multiplicity { lower: 0, upper: Some(0) };
    pub const PURE_ONE: Multiplicity = Multiplicity { lower: 1, upper: Some(1) };
    pub const ZERO_ONE: Multiplicity = Multiplicity { lower: 0, upper: Some(1) };
    pub const ZERO_MANY: Multiplicity = Multiplicity { lower: 0, upper: None };
    pub const ONE_MANY: Multiplicity = Multiplicity { lower: 1, upper: None };

    /// Creates a multiplicity, rejecting `lower > upper`.
    pub fn new(lower: u32, upper: Option<u32>) -> Result<Self, CoreError> {
        if let Some(upper) = upper {
            if lower > upper {
                return Err(CoreError::InvalidMultiplicity { lower, upper });
            }
        }
        Ok(Multiplicity { lower, upper })
    }

    /// The exact multiplicity `[n]`.
    pub fn exactly(n: u32) -> Self {
        Multiplicity {
            lower: n,
            upper: Some(n),
        }
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> Option<u32> {
        self.upper
    }

    /// Whether `count` values satisfy this range.
    pub fn contains(&self, count: usize) -> bool {
        let count = count as u64;
        count >= self.lower as u64 && self.upper.map_or(true, |u| count <= u as u64)
    }

    /// Whether every count admitted by `other` is admitted by `self`.
    pub fn subsumes(&self, other: &Multiplicity) -> bool {
        if other.lower < self.lower {
            return false;
        }
        match (self.upper, other.upper) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => theirs <= mine,
        }
    }

    /// `[1]`.
    pub fn is_to_one(&self) -> bool {
        self.lower == 1 && self.upper == Some(1)
    }

    /// Upper bound of at most one.
    pub fn is_zero_or_one(&self) -> bool {
        matches!(self.upper, Some(u) if u <= 1)
    }

    /// Upper bound above one (including unbounded).
    pub fn is_many(&self) -> bool {
        self.upper.map_or(true, |u| u > 1)
    }

    /// Lower bound of zero.
    pub fn is_optional(&self) -> bool {
        self.lower == 0
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (0, None) => write!(f, "[*]"),
            (l, None) => write!(f, "[{}..*]", l),
            (l, Some(u)) if l == u => write!(f, "[{}]", l),
            (l, Some(u)) => write!(f, "[{}..{}]", l, u),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_bounds() {
        assert_eq!(
            Multiplicity::new(3, Some(1)),
            Err(CoreError::InvalidMultiplicity { lower: 3, upper: 1 })
        );
        assert!(Multiplicity::new(2, Some(2)).is_ok());
        assert!(Multiplicity::new(7, None).is_ok());
    }

    #[test]
    fn contains_respects_both_bounds() {
        let m = Multiplicity::new(1, Some(3)).unwrap();
        assert!(!m.contains(0));
        assert!(m.contains(1));
        assert!(m.contains(3));
        assert!(!m.contains(4));

        let two_three = Multiplicity::new(2, Some(3)).unwrap();
        assert!(!two_three.contains(1));
        assert!(Multiplicity::ZERO_MANY.contains(10_000));
    }

    #[test]
    fn subsumption() {
        assert!(Multiplicity::ZERO_MANY.subsumes(&Multiplicity::PURE_ONE));
        assert!(Multiplicity::ZERO_ONE.subsumes(&Multiplicity::PURE_ONE));
        assert!(!Multiplicity::PURE_ONE.subsumes(&Multiplicity::ZERO_ONE));
        assert!(!Multiplicity::PURE_ONE.subsumes(&Multiplicity::exactly(2)));
        assert!(!Multiplicity::ZERO_ONE.subsumes(&Multiplicity::ONE_MANY));
        assert!(Multiplicity::PURE_ONE.subsumes(&Multiplicity::PURE_ONE));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Multiplicity::PURE_ONE.to_string(), "[1]");
        assert_eq!(Multiplicity::ZERO_ONE.to_string(), "[0..1]");
        assert_eq!(Multiplicity::ZERO_MANY.to_string(), "[*]");
        assert_eq!(Multiplicity::ONE_MANY.to_string(), "[1..*]");
        assert_eq!(Multiplicity::new(2, Some(3)).unwrap().to_string(), "[2..3]");
    }

    #[test]
    fn shape_predicates() {
        assert!(Multiplicity::PURE_ONE.is_to_one());
        assert!(Multiplicity::ZERO_ONE.is_zero_or_one());
        assert!(Multiplicity::ZERO_ONE.is_optional());
        assert!(Multiplicity::ONE_MANY.is_many());
        assert!(!Multiplicity::PURE_ONE.is_many());
    }
}
