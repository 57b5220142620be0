//! Quadratic ballot arithmetic.
//!
//! Holding a weight of `w` costs `w^2 / 10^18` voice credits, so moving from
//! `previous` to `next` is charged the difference of the two descaled squares.
//! Charges never go negative (there are no refunds) and tally tokens only
//! move when the weight grows in magnitude.

use num_bigint::{BigInt, BigUint};
use num_traits::{Signed, Zero};
use std::fmt;
use thiserror::Error;

use crate::leaf::{ensure_leaf_range, max_u256, wad, LeafError};

/// Outcome pool a weight is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Positive weight.
    Yes,
    /// Negative weight.
    No,
}

impl Side {
    /// Side backed by `amount`; `None` for zero.
    pub fn of(amount: &BigInt) -> Option<Self> {
        if amount.is_positive() {
            Some(Self::Yes)
        } else if amount.is_negative() {
            Some(Self::No)
        } else {
            None
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("yes"),
            Self::No => f.write_str("no"),
        }
    }
}

/// Ballot transitions rejected before any settlement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    /// Previous and next weights back opposite sides.
    #[error("ballot flips from {from} to {to}; withdraw to zero first")]
    SignFlip {
        /// Side of the previous weight.
        from: Side,
        /// Side of the requested weight.
        to: Side,
    },
    /// Weight does not fit a leaf.
    #[error(transparent)]
    Leaf(#[from] LeafError),
    /// Charge or tally exceeds the 256-bit transfer range.
    #[error("{what} of {value} exceeds the 256-bit transfer range")]
    TransferOverflow {
        /// `charge` or `tally`.
        what: &'static str,
        /// Offending value.
        value: BigUint,
    },
}

/// Settlement implied by moving a leaf from `previous` to `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotPlan {
    /// Weight currently recorded in the leaf.
    pub previous: BigInt,
    /// Requested weight.
    pub next: BigInt,
    /// Voice credits pulled from the voter.
    pub charge: BigUint,
    /// Tally tokens released to the pool.
    pub tally: BigUint,
    /// Pool receiving the charge and tally; the side of `next`, else of `previous`.
    pub side: Option<Side>,
}

impl BallotPlan {
    /// `true` when nothing needs to be transferred.
    pub fn is_settlement_free(&self) -> bool {
        self.charge.is_zero() && self.tally.is_zero()
    }
}

/// Credits needed to hold `amount`: `amount^2 / 10^18`, truncated.
pub fn quadratic_cost(amount: &BigInt) -> BigUint {
    let squared = amount.magnitude() * amount.magnitude();
    squared / wad().magnitude()
}

/// Computes the charge, tally and pool for a ballot transition.
pub fn plan_ballot(previous: &BigInt, next: &BigInt) -> Result<BallotPlan, BallotError> {
    ensure_leaf_range(previous)?;
    ensure_leaf_range(next)?;
    let from = Side::of(previous);
    let to = Side::of(next);
    if let (Some(from), Some(to)) = (from, to) {
        if from != to {
            return Err(BallotError::SignFlip { from, to });
        }
    }

    let already_paid = quadratic_cost(previous);
    let required = quadratic_cost(next);
    let charge = if required > already_paid {
        required - already_paid
    } else {
        BigUint::zero()
    };
    let tally = if next.magnitude() > previous.magnitude() {
        next.magnitude() - previous.magnitude()
    } else {
        BigUint::zero()
    };

    let ceiling = max_u256();
    if charge > ceiling {
        return Err(BallotError::TransferOverflow {
            what: "charge",
            value: charge,
        });
    }
    if tally > ceiling {
        return Err(BallotError::TransferOverflow {
            what: "tally",
            value: tally,
        });
    }

    Ok(BallotPlan {
        previous: previous.clone(),
        next: next.clone(),
        charge,
        tally,
        side: to.or(from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{max_leaf_value, min_leaf_value, parse_units};

    fn units(text: &str) -> BigInt {
        parse_units(text).unwrap()
    }

    fn credits(text: &str) -> BigUint {
        units(text).magnitude().clone()
    }

    #[test]
    fn fresh_yes_ballot() {
        let plan = plan_ballot(&units("0"), &units("3")).unwrap();
        assert_eq!(plan.charge, credits("9"));
        assert_eq!(plan.tally, credits("3"));
        assert_eq!(plan.side, Some(Side::Yes));
    }

    #[test]
    fn raising_a_yes_ballot_pays_the_difference() {
        let plan = plan_ballot(&units("2"), &units("3")).unwrap();
        assert_eq!(plan.charge, credits("5"));
        assert_eq!(plan.tally, credits("1"));

        let plan = plan_ballot(&units("1"), &units("2")).unwrap();
        assert_eq!(plan.charge, credits("3"));
        assert_eq!(plan.tally, credits("1"));
        assert_eq!(plan.side, Some(Side::Yes));
    }

    #[test]
    fn fresh_no_ballot() {
        let plan = plan_ballot(&units("0"), &units("-1")).unwrap();
        assert_eq!(plan.charge, credits("1"));
        assert_eq!(plan.tally, credits("1"));
        assert_eq!(plan.side, Some(Side::No));
    }

    #[test]
    fn reductions_are_free_and_move_no_tally() {
        let plan = plan_ballot(&units("-3"), &units("-1")).unwrap();
        assert!(plan.is_settlement_free());
        assert_eq!(plan.side, Some(Side::No));

        let plan = plan_ballot(&units("2"), &units("0")).unwrap();
        assert!(plan.is_settlement_free());
        assert_eq!(plan.side, Some(Side::Yes));

        let plan = plan_ballot(&units("0"), &units("0")).unwrap();
        assert!(plan.is_settlement_free());
        assert_eq!(plan.side, None);
    }

    #[test]
    fn crossing_zero_in_one_ballot_is_rejected() {
        assert_eq!(
            plan_ballot(&units("2"), &units("-1")).unwrap_err(),
            BallotError::SignFlip {
                from: Side::Yes,
                to: Side::No
            }
        );
        assert!(matches!(
            plan_ballot(&units("-1"), &units("1")),
            Err(BallotError::SignFlip { .. })
        ));
    }

    #[test]
    fn fractional_weights_truncate_each_square() {
        // 0.5^2 = 0.25, 1.5^2 = 2.25
        let plan = plan_ballot(&units("0.5"), &units("1.5")).unwrap();
        assert_eq!(plan.charge, credits("2"));
        // 1 wei squared descales to zero
        assert!(quadratic_cost(&BigInt::from(1)).is_zero());
    }

    #[test]
    fn extreme_weights_overflow_the_charge() {
        let err = plan_ballot(&BigInt::zero(), &max_leaf_value()).unwrap_err();
        assert!(matches!(
            err,
            BallotError::TransferOverflow { what: "charge", .. }
        ));
        let err = plan_ballot(&BigInt::zero(), &(min_leaf_value() - 1)).unwrap_err();
        assert!(matches!(err, BallotError::Leaf(_)));
    }
}
