//! Timelock requirements of a signable policy
//!
//! A [`SpendConstraint`] fixes the input's nSequence and the transaction's
//! nLockTime, and tells the signing scenario how far the chain must advance
//! before the spend is final.

use bitcoin::{absolute, Sequence};
use std::fmt;

/// nSequence used when the policy has no relative timelock.
///
/// 0xFFFFFFFD: opts out of BIP68 but keeps nLockTime enforced. 0xFFFFFFFF
/// would disable nLockTime too, so `after()` branches could never be met.
pub const NO_RELATIVE_LOCK: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// Relative (blocks) and absolute (height) timelock requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpendConstraint {
    /// Blocks since the funding output confirmed (`older(n)`)
    pub relative: Option<u16>,
    /// Chain height (`after(n)`), always below the height/time threshold
    pub absolute: Option<u32>,
}

impl SpendConstraint {
    pub const NONE: SpendConstraint = SpendConstraint {
        relative: None,
        absolute: None,
    };

    pub fn relative(blocks: u16) -> Self {
        Self {
            relative: Some(blocks),
            absolute: None,
        }
    }

    pub fn absolute(height: u32) -> Self {
        Self {
            relative: None,
            absolute: Some(height),
        }
    }

    pub fn both(blocks: u16, height: u32) -> Self {
        Self {
            relative: Some(blocks),
            absolute: Some(height),
        }
    }

    /// nSequence for the spending input
    pub fn sequence(&self) -> Sequence {
        self.relative
            .map(Sequence::from_height)
            .unwrap_or(NO_RELATIVE_LOCK)
    }

    /// nLockTime for the spending transaction
    pub fn lock_time(&self) -> absolute::LockTime {
        self.absolute
            .map(absolute::LockTime::from_consensus)
            .unwrap_or(absolute::LockTime::ZERO)
    }

    /// Blocks to mine after signing to satisfy the relative requirement
    pub fn relative_blocks(&self) -> u32 {
        self.relative.map(u32::from).unwrap_or(0)
    }

    /// Blocks still missing before `height` reaches the absolute requirement
    pub fn absolute_shortfall(&self, height: u32) -> u32 {
        match self.absolute {
            Some(lock) if height < lock => lock - height,
            _ => 0,
        }
    }

    /// Whether a spend of an output with `confirmations` would be refused at `tip`.
    ///
    /// BIP68 admits a relative lock of `n` blocks once the output has `n`
    /// confirmations; nLockTime `h` is final once the tip reaches `h`.
    pub fn premature_at(&self, tip: u32, confirmations: u32) -> bool {
        self.relative
            .is_some_and(|n| u32::from(n) > confirmations)
            || self.absolute.is_some_and(|h| h > tip)
    }
}

impl fmt::Display for SpendConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.relative, self.absolute) {
            (None, None) => write!(f, "no timelock"),
            (Some(n), None) => write!(f, "older({})", n),
            (None, Some(h)) => write!(f, "after({})", h),
            (Some(n), Some(h)) => write!(f, "older({}) + after({})", n, h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconstrained_fields() {
        let c = SpendConstraint::NONE;
        assert_eq!(c.sequence().to_consensus_u32(), 0xFFFF_FFFD);
        assert_eq!(c.lock_time(), absolute::LockTime::ZERO);
        assert_eq!(c.relative_blocks(), 0);
        assert_eq!(c.absolute_shortfall(0), 0);
    }

    #[test]
    fn test_no_relative_lock_keeps_locktime_enforced() {
        assert!(NO_RELATIVE_LOCK != Sequence::MAX);
        assert!(NO_RELATIVE_LOCK.enables_absolute_lock_time());
        assert!(!NO_RELATIVE_LOCK.is_relative_lock_time());
    }

    #[test]
    fn test_relative_constraint_fields() {
        let c = SpendConstraint::relative(2);
        assert_eq!(c.sequence().to_consensus_u32(), 2);
        assert_eq!(c.lock_time().to_consensus_u32(), 0);
        assert_eq!(c.relative_blocks(), 2);
    }

    #[test]
    fn test_absolute_shortfall() {
        let c = SpendConstraint::both(4, 30);
        assert_eq!(c.sequence().to_consensus_u32(), 4);
        assert_eq!(c.lock_time().to_consensus_u32(), 30);
        assert_eq!(c.absolute_shortfall(25), 5);
        assert_eq!(c.absolute_shortfall(30), 0);
        assert_eq!(c.absolute_shortfall(130), 0);
    }

    #[test]
    fn test_premature_detection() {
        // One confirmation is enough for older(1), not for older(2)
        assert!(!SpendConstraint::relative(1).premature_at(200, 1));
        assert!(SpendConstraint::relative(2).premature_at(200, 1));
        assert!(!SpendConstraint::relative(2).premature_at(200, 2));

        assert!(SpendConstraint::absolute(20).premature_at(19, 1));
        assert!(!SpendConstraint::absolute(20).premature_at(20, 1));
        assert!(!SpendConstraint::NONE.premature_at(0, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(SpendConstraint::NONE.to_string(), "no timelock");
        assert_eq!(SpendConstraint::both(4, 30).to_string(), "older(4) + after(30)");
    }
}
