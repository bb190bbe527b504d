//! Coordinates and iteration spaces.
//!
//! An iteration space is a closed N-dimensional box used to describe halo
//! regions. Each halo carries two views of the same box: `local`,
//! relative to the owning buffer origin, and `global`, in
//! process-independent grid coordinates.

use std::fmt;
use std::ops::{Add, Index, Sub};

/// A point in D-dimensional index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord<const D: usize>(pub [i32; D]);

impl<const D: usize> Coord<D> {
    pub fn zero() -> Self {
        Self([0; D])
    }

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        let mut out = self.0;
        for (o, b) in out.iter_mut().zip(other.0) {
            *o = (*o).min(b);
        }
        Self(out)
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        let mut out = self.0;
        for (o, b) in out.iter_mut().zip(other.0) {
            *o = (*o).max(b);
        }
        Self(out)
    }

    /// True when every component is `<=` the other's.
    pub fn all_le(self, other: Self) -> bool {
        self.0.iter().zip(other.0).all(|(a, b)| *a <= b)
    }
}

impl<const D: usize> Add for Coord<D> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (o, b) in out.iter_mut().zip(rhs.0) {
            *o += b;
        }
        Self(out)
    }
}

impl<const D: usize> Sub for Coord<D> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (o, b) in out.iter_mut().zip(rhs.0) {
            *o -= b;
        }
        Self(out)
    }
}

impl<const D: usize> Index<usize> for Coord<D> {
    type Output = i32;

    fn index(&self, axis: usize) -> &i32 {
        &self.0[axis]
    }
}

impl<const D: usize> fmt::Display for Coord<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// Closed D-dimensional box `[first, last]`. Empty when `first > last` on
/// any axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterSpace<const D: usize> {
    pub first: Coord<D>,
    pub last: Coord<D>,
}

impl<const D: usize> IterSpace<D> {
    pub fn new(first: Coord<D>, last: Coord<D>) -> Self {
        Self { first, last }
    }

    pub fn is_empty(&self) -> bool {
        !self.first.all_le(self.last)
    }

    /// Number of points in the box; 0 when empty.
    pub fn size(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.first
            .0
            .iter()
            .zip(self.last.0)
            .map(|(f, l)| (l - f + 1) as usize)
            .product()
    }

    /// Component-wise max/min box; `None` when the boxes do not overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let r = Self { first: self.first.max(other.first), last: self.last.min(other.last) };
        (!r.is_empty()).then_some(r)
    }

    pub fn translate(&self, offset: Coord<D>) -> Self {
        Self { first: self.first + offset, last: self.last + offset }
    }

    /// Visit every coordinate of the box in row-major order (last axis
    /// fastest).
    pub fn for_each(&self, mut f: impl FnMut(Coord<D>)) {
        if self.is_empty() {
            return;
        }
        let mut x = self.first;
        'outer: loop {
            f(x);
            for axis in (0..D).rev() {
                if x.0[axis] < self.last.0[axis] {
                    x.0[axis] += 1;
                    continue 'outer;
                }
                x.0[axis] = self.first.0[axis];
            }
            break;
        }
    }
}

impl<const D: usize> fmt::Display for IterSpace<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// A halo box in both views: `local` relative to the owning buffer
/// origin, `global` in process-independent coordinates. The two describe
/// the same box translated by the domain origin (possibly wrapped on
/// periodic axes), so their shapes always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaloRegion<const D: usize> {
    pub local: IterSpace<D>,
    pub global: IterSpace<D>,
}

impl<const D: usize> HaloRegion<D> {
    pub fn size(&self) -> usize {
        self.local.size()
    }
}

impl<const D: usize> fmt::Display for HaloRegion<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (local: {})", self.global, self.local)
    }
}

/// Total element count over a list of halo regions.
pub fn total_elements<const D: usize>(regions: &[HaloRegion<D>]) -> usize {
    regions.iter().map(HaloRegion::size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_closed_bounds() {
        let s = IterSpace::new(Coord([0, 0]), Coord([2, 4]));
        assert_eq!(s.size(), 15);
        let line = IterSpace::new(Coord([3]), Coord([3]));
        assert_eq!(line.size(), 1);
    }

    #[test]
    fn empty_when_first_exceeds_last_on_any_axis() {
        let s = IterSpace::new(Coord([0, 5]), Coord([4, 4]));
        assert!(s.is_empty());
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn intersection_is_max_min_box() {
        let a = IterSpace::new(Coord([0, 0]), Coord([9, 9]));
        let b = IterSpace::new(Coord([5, -3]), Coord([14, 2]));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, IterSpace::new(Coord([5, 0]), Coord([9, 2])));

        let c = IterSpace::new(Coord([10, 0]), Coord([12, 9]));
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn for_each_walks_row_major() {
        let s = IterSpace::new(Coord([0, 0]), Coord([1, 1]));
        let mut seen = Vec::new();
        s.for_each(|c| seen.push(c.0));
        assert_eq!(seen, vec![[0, 0], [0, 1], [1, 0], [1, 1]]);
    }

    #[test]
    fn translate_shifts_both_bounds() {
        let s = IterSpace::new(Coord([1, 1]), Coord([2, 3]));
        let t = s.translate(Coord([-1, 10]));
        assert_eq!(t, IterSpace::new(Coord([0, 11]), Coord([1, 13])));
    }
}
