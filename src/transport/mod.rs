//! Transport abstraction: non-blocking point-to-point messaging plus the
//! blocking collectives used while building patterns.
//!
//! Matching follows MPI semantics: a receive names a `(source, tag)`
//! pair and matches sends in posting order per pair. Backends with a
//! wider tag space fold the source rank into the wire tag (see
//! [`make_tag`]); backends with native source matching use the pair
//! directly.

pub mod mem;
#[cfg(feature = "distributed")]
pub mod mpi;

use crate::error::Result;

pub type Rank = i32;
pub type Tag = i32;

/// Number of low bits of the 64-bit wire tag carrying the source rank.
pub const RANK_BITS: u32 = 32;
/// Mask selecting the source half of a wire tag.
pub const SOURCE_MASK: u64 = 0xffff_ffff;
/// Mask selecting the user-tag half of a wire tag.
pub const TAG_MASK: u64 = !SOURCE_MASK;

/// Fold a user tag and the source rank into one 64-bit wire tag: high 32
/// bits tag, low 32 bits source. Receives match on both halves exactly.
pub fn make_tag(tag: Tag, src: Rank) -> u64 {
    ((tag as u32 as u64) << RANK_BITS) | (src as u32 as u64)
}

/// User tag half of a wire tag.
pub fn tag_of(wire: u64) -> Tag {
    (wire >> RANK_BITS) as u32 as Tag
}

/// Source half of a wire tag.
pub fn source_of(wire: u64) -> Rank {
    (wire & SOURCE_MASK) as u32 as Rank
}

/// Handle over one non-blocking transport operation.
pub trait Request {
    /// Non-blocking completion poll. `Ok(true)` once the operation has
    /// completed; completion is sticky across calls. A truncated receive
    /// completes with `Err(Truncation)`, also sticky.
    fn test(&mut self) -> Result<bool>;

    /// Block until the operation completes.
    fn wait(&mut self) -> Result<()>;

    /// Attempt to cancel: `Ok(true)` if the operation was canceled before
    /// completing, `Ok(false)` if it completed normally first. The
    /// request has settled either way on return.
    fn cancel(&mut self) -> Result<bool>;
}

/// Non-blocking byte transport between a fixed set of ranks.
pub trait Transport {
    type Request: Request;

    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Address peers reach this process by. Coincides with `rank()` for
    /// the shipped backends.
    fn address(&self) -> Rank;

    /// Start a non-blocking send of `len` bytes at `buf`. The returned
    /// request is ready once the buffer may be reused.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid and unmodified until the request settles.
    unsafe fn isend(&self, buf: *const u8, len: usize, dst: Rank, tag: Tag)
        -> Result<Self::Request>;

    /// Start a non-blocking receive into `len` bytes at `buf`. The
    /// returned request is ready once the buffer holds the payload.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid, and must not be read or written by the
    /// caller, until the request settles.
    unsafe fn irecv(&self, buf: *mut u8, len: usize, src: Rank, tag: Tag)
        -> Result<Self::Request>;

    /// Check for an incoming message that no settled receive has claimed,
    /// without receiving it. Returns `(source, tag, byte count)`. Callers
    /// should drain their registered operations first, or a message
    /// destined for a pending receive may be reported.
    fn probe(&self) -> Result<Option<(Rank, Tag, usize)>>;
}

/// Blocking collectives and point-to-point used only while building
/// patterns. Every rank must invoke the collectives in the same order.
pub trait SetupTransport {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    fn barrier(&self) -> Result<()>;

    /// Root's `bytes` are returned on every rank; non-roots pass `&[]`.
    fn broadcast(&self, bytes: &[u8], root: Rank) -> Result<Vec<u8>>;

    /// Gather every rank's `bytes`; the result is indexed by rank and
    /// carries each rank's (possibly differing) length.
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>>;

    fn send(&self, bytes: &[u8], dst: Rank, tag: Tag) -> Result<()>;

    fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>>;
}
