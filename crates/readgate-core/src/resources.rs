//! The two-dimensional currency traded by the semaphore.
//!
//! `count` is the number of concurrently active reads, `memory` the bytes their
//! buffers hold. Both are signed: a ledger may dip below zero while
//! oversubscribed through the non-blocking paths (`consume_resources`, memory
//! units). Arithmetic saturates instead of wrapping.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resources {
    pub count: i64,
    pub memory: i64,
}

impl Resources {
    pub const ZERO: Resources = Resources::new(0, 0);

    pub const fn new(count: i64, memory: i64) -> Self {
        Self { count, memory }
    }

    /// Resources of a single read that needs `memory` bytes.
    pub fn for_read(memory: usize) -> Self {
        Self::new(1, i64::try_from(memory).unwrap_or(i64::MAX))
    }

    /// Memory-only resources, as moved around by memory units.
    pub const fn memory(memory: i64) -> Self {
        Self::new(0, memory)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Both dimensions are `>= 0`.
    pub fn is_non_negative(&self) -> bool {
        self.count >= 0 && self.memory >= 0
    }

    /// Whether `have` covers `want` in both dimensions, i.e. granting `want`
    /// out of `have` leaves nothing negative.
    pub fn can_satisfy(have: &Resources, want: &Resources) -> bool {
        have.count >= want.count && have.memory >= want.memory
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Self) {
        self.count = self.count.saturating_add(rhs.count);
        self.memory = self.memory.saturating_add(rhs.memory);
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Self) {
        self.count = self.count.saturating_sub(rhs.count);
        self.memory = self.memory.saturating_sub(rhs.memory);
    }
}

impl Add for Resources {
    type Output = Resources;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl Sub for Resources {
    type Output = Resources;
    fn sub(mut self, rhs: Self) -> Self::Output {
        self -= rhs;
        self
    }
}

impl Neg for Resources {
    type Output = Resources;
    fn neg(self) -> Self::Output {
        Resources::new(self.count.saturating_neg(), self.memory.saturating_neg())
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{count: {}, memory: {}}}", self.count, self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_satisfy_needs_both_dimensions() {
        let have = Resources::new(5, 1000);
        assert!(Resources::can_satisfy(&have, &Resources::new(5, 1000)));
        assert!(Resources::can_satisfy(&have, &Resources::new(1, 10)));
        assert!(!Resources::can_satisfy(&have, &Resources::new(6, 10)));
        assert!(!Resources::can_satisfy(&have, &Resources::new(1, 1001)));
    }

    #[test]
    fn arithmetic_saturates() {
        let mut r = Resources::new(i64::MAX, 10);
        r += Resources::new(1, 5);
        assert_eq!(r, Resources::new(i64::MAX, 15));

        let mut r = Resources::new(i64::MIN, 0);
        r -= Resources::new(1, 1);
        assert_eq!(r, Resources::new(i64::MIN, -1));

        assert_eq!(-Resources::new(i64::MIN, 3), Resources::new(i64::MAX, -3));
    }

    #[test]
    fn add_sub_and_negation() {
        let a = Resources::new(2, 300);
        let b = Resources::new(1, 100);
        assert_eq!(a - b, Resources::new(1, 200));
        assert_eq!(a + -b, a - b);
        assert!(!(b - a).is_non_negative());
        assert!(Resources::default().is_zero());
    }

    #[test]
    fn for_read_clamps_huge_sizes() {
        assert_eq!(Resources::for_read(128), Resources::new(1, 128));
        assert_eq!(Resources::for_read(usize::MAX).memory, i64::MAX);
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_string(&Resources::new(1, 64)).unwrap();
        assert_eq!(json, r#"{"count":1,"memory":64}"#);
    }
}
