//! Domain descriptors and halo generation.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::coords::{Coord, HaloRegion, IterSpace};
use crate::error::Result;
use crate::transport::{Rank, Tag};
use crate::wire::Wire;

/// Identifier of a domain. Globally unique across all ranks.
pub trait DomainId: Copy + Ord + Eq + fmt::Debug + Wire + 'static {}

impl<T: Copy + Ord + Eq + fmt::Debug + Wire + 'static> DomainId for T {}

/// Contract for a locally owned box of the global grid.
pub trait DomainDescriptor<const D: usize> {
    type Id: DomainId;

    fn domain_id(&self) -> Self::Id;

    /// First owned coordinate, in global terms.
    fn first(&self) -> Coord<D>;

    /// Last owned coordinate, in global terms.
    fn last(&self) -> Coord<D>;
}

/// Domain id augmented with the owning rank, its transport address, and
/// the disambiguating tag assigned during pattern setup.
///
/// Ordering and equality consider `(id, tag)` only: a domain has one
/// owner, so rank and address are determined by the id.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedDomainId<Id> {
    pub id: Id,
    pub rank: Rank,
    pub address: Rank,
    pub tag: Tag,
}

impl<Id: DomainId> PartialEq for ExtendedDomainId<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tag == other.tag
    }
}

impl<Id: DomainId> Eq for ExtendedDomainId<Id> {}

impl<Id: DomainId> Ord for ExtendedDomainId<Id> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.tag).cmp(&(other.id, other.tag))
    }
}

impl<Id: DomainId> PartialOrd for ExtendedDomainId<Id> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Id: DomainId> fmt::Display for ExtendedDomainId<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{id={:?}, tag={}, rank={}}}", self.id, self.tag, self.rank)
    }
}

impl<Id: DomainId> Wire for ExtendedDomainId<Id> {
    fn write<B: BufMut>(&self, buf: &mut B) {
        self.id.write(buf);
        self.rank.write(buf);
        self.address.write(buf);
        self.tag.write(buf);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            id: Id::read(buf)?,
            rank: Rank::read(buf)?,
            address: Rank::read(buf)?,
            tag: Tag::read(buf)?,
        })
    }
}

/// A box-shaped domain of the global grid.
#[derive(Debug, Clone, Copy)]
pub struct CartesianDomain<Id, const D: usize> {
    id: Id,
    space: IterSpace<D>,
}

impl<Id: DomainId, const D: usize> CartesianDomain<Id, D> {
    pub fn new(id: Id, first: Coord<D>, last: Coord<D>) -> Self {
        Self { id, space: IterSpace::new(first, last) }
    }
}

impl<Id: DomainId, const D: usize> DomainDescriptor<D> for CartesianDomain<Id, D> {
    type Id = Id;

    fn domain_id(&self) -> Id {
        self.id
    }

    fn first(&self) -> Coord<D> {
        self.space.first
    }

    fn last(&self) -> Coord<D> {
        self.space.last
    }
}

/// Produces the receive halos a domain requires, as local/global box
/// pairs. Local boxes are relative to the domain's first owned
/// coordinate, so lower halos have negative coordinates.
pub trait HaloGenerator<Dom, const D: usize> {
    fn halos(&self, domain: &Dom) -> Vec<HaloRegion<D>>;
}

/// Structured-grid halo generator: per-axis halo widths around the domain
/// box, optionally periodic over a global extent.
///
/// One region is produced per non-zero offset combination, i.e. the
/// `3^D - 1` faces, edges and corners of the stencil. Axes with zero
/// width yield empty regions, which pattern setup discards. On periodic
/// axes the global view wraps into the global extent; on non-periodic
/// axes out-of-grid regions simply intersect no domain during setup.
#[derive(Debug, Clone, Copy)]
pub struct CartesianHaloGenerator<const D: usize> {
    global: IterSpace<D>,
    lower: [i32; D],
    upper: [i32; D],
    periodic: [bool; D],
}

impl<const D: usize> CartesianHaloGenerator<D> {
    pub fn new(
        global_first: Coord<D>,
        global_last: Coord<D>,
        lower: [i32; D],
        upper: [i32; D],
        periodic: [bool; D],
    ) -> Self {
        Self { global: IterSpace::new(global_first, global_last), lower, upper, periodic }
    }

    /// Same halo width on every side of every axis.
    pub fn uniform(
        global_first: Coord<D>,
        global_last: Coord<D>,
        width: i32,
        periodic: [bool; D],
    ) -> Self {
        Self::new(global_first, global_last, [width; D], [width; D], periodic)
    }
}

impl<Id: DomainId, const D: usize> HaloGenerator<CartesianDomain<Id, D>, D>
    for CartesianHaloGenerator<D>
{
    fn halos(&self, domain: &CartesianDomain<Id, D>) -> Vec<HaloRegion<D>> {
        let first = domain.first();
        let last = domain.last();
        let mut out = Vec::new();

        // Odometer over the 3^D offset combinations, skipping all-zero.
        for combo in 0..3usize.pow(D as u32) {
            let mut offsets = [0i32; D];
            let mut c = combo;
            for o in &mut offsets {
                *o = (c % 3) as i32 - 1;
                c /= 3;
            }
            if offsets.iter().all(|&o| o == 0) {
                continue;
            }

            let mut lo = Coord::zero();
            let mut hi = Coord::zero();
            for axis in 0..D {
                let (f, l) = match offsets[axis] {
                    -1 => (first[axis] - self.lower[axis], first[axis] - 1),
                    0 => (first[axis], last[axis]),
                    _ => (last[axis] + 1, last[axis] + self.upper[axis]),
                };
                lo.0[axis] = f;
                hi.0[axis] = l;
            }

            let local = IterSpace::new(lo - first, hi - first);

            // Wrap periodic axes into the global extent.
            let mut gf = lo;
            let mut gl = hi;
            for axis in 0..D {
                if !self.periodic[axis] {
                    continue;
                }
                let extent = self.global.last[axis] - self.global.first[axis] + 1;
                if gf.0[axis] < self.global.first[axis] {
                    gf.0[axis] += extent;
                    gl.0[axis] += extent;
                } else if gl.0[axis] > self.global.last[axis] {
                    gf.0[axis] -= extent;
                    gl.0[axis] -= extent;
                }
            }

            out.push(HaloRegion { local, global: IterSpace::new(gf, gl) });
        }
        out
    }
}
