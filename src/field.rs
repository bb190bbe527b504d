//! Field descriptors: how the exchange engine reads and writes user
//! data.

use std::mem;
use std::ptr;
use std::slice;

use crate::buffer::Scalar;
use crate::coords::{Coord, HaloRegion};

/// Serialize and deserialize halo boxes of one field to contiguous
/// bytes.
///
/// `get` must write exactly `region.size() * data_type_size()` bytes and
/// `set` consumes the same; the exchange engine guarantees that pack and
/// unpack run in mirrored order on the two ends of an edge.
pub trait FieldDescriptor<const D: usize> {
    fn data_type_size(&self) -> usize;

    /// Pack the region (local view) into `out`.
    fn get(&self, region: &HaloRegion<D>, out: &mut [u8]);

    /// Unpack `input` into the region (local view).
    fn set(&mut self, region: &HaloRegion<D>, input: &[u8]);
}

/// Row-major N-dimensional field over a contiguous buffer, with halo
/// padding described by `offsets`.
///
/// Local coordinate 0 on an axis is the first owned cell; negative
/// coordinates address the lower halo. `offsets` is the buffer index of
/// local coordinate 0 per axis and must cover the widest halo, `extents`
/// the full buffer shape including padding.
pub struct SimpleField<T: Scalar, const D: usize> {
    data: Vec<T>,
    offsets: Coord<D>,
    extents: Coord<D>,
    strides: [usize; D],
}

impl<T: Scalar + Default, const D: usize> SimpleField<T, D> {
    pub fn new(offsets: Coord<D>, extents: Coord<D>) -> Self {
        let len = extents.0.iter().map(|&e| e as usize).product();
        let mut strides = [1usize; D];
        for axis in (0..D.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * extents.0[axis + 1] as usize;
        }
        Self { data: vec![T::default(); len], offsets, extents, strides }
    }
}

impl<T: Scalar, const D: usize> SimpleField<T, D> {
    fn index(&self, x: Coord<D>) -> usize {
        let mut idx = 0;
        for axis in 0..D {
            let c = x.0[axis] + self.offsets.0[axis];
            debug_assert!(
                c >= 0 && c < self.extents.0[axis],
                "coordinate {} outside buffer on axis {}",
                x,
                axis
            );
            idx += c as usize * self.strides[axis];
        }
        idx
    }

    pub fn get_at(&self, x: Coord<D>) -> T {
        self.data[self.index(x)]
    }

    pub fn set_at(&mut self, x: Coord<D>, value: T) {
        let idx = self.index(x);
        self.data[idx] = value;
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }
}

impl<T: Scalar, const D: usize> FieldDescriptor<D> for SimpleField<T, D> {
    fn data_type_size(&self) -> usize {
        mem::size_of::<T>()
    }

    fn get(&self, region: &HaloRegion<D>, out: &mut [u8]) {
        let elem = mem::size_of::<T>();
        debug_assert_eq!(out.len(), region.size() * elem);
        let mut pos = 0;
        region.local.for_each(|x| {
            let value = &self.data[self.index(x)];
            // SAFETY: T is a plain scalar of `elem` bytes.
            let bytes = unsafe { slice::from_raw_parts(value as *const T as *const u8, elem) };
            out[pos..pos + elem].copy_from_slice(bytes);
            pos += elem;
        });
    }

    fn set(&mut self, region: &HaloRegion<D>, input: &[u8]) {
        let elem = mem::size_of::<T>();
        debug_assert_eq!(input.len(), region.size() * elem);
        let mut pos = 0;
        region.local.for_each(|x| {
            let idx = self.index(x);
            let dst = &mut self.data[idx] as *mut T as *mut u8;
            // SAFETY: any bit pattern is a valid T, and `input` holds at
            // least `elem` bytes at `pos`.
            unsafe { ptr::copy_nonoverlapping(input[pos..].as_ptr(), dst, elem) };
            pos += elem;
        });
    }
}
