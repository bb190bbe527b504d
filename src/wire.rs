//! Byte encoding for pattern-setup metadata.
//!
//! Only the setup phase uses this: domain ids, extents and halo
//! breakdowns cross the wire as [`Wire`]-encoded values. Halo payloads
//! themselves are raw bytes in pack order, with no framing.

use bytes::{Buf, BufMut};

use crate::coords::{Coord, HaloRegion, IterSpace};
use crate::error::{HalogenError, Result};

/// Types that can cross the wire during pattern setup.
pub trait Wire: Sized {
    fn write<B: BufMut>(&self, buf: &mut B);

    fn read<B: Buf>(buf: &mut B) -> Result<Self>;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    /// Decode a value, requiring the buffer to be fully consumed.
    fn decode(mut bytes: &[u8]) -> Result<Self> {
        let value = Self::read(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(HalogenError::Decode(format!("{} trailing bytes", bytes.len())));
        }
        Ok(value)
    }
}

fn need<B: Buf>(buf: &B, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(HalogenError::Decode("unexpected end of buffer".to_string()));
    }
    Ok(())
}

impl Wire for i32 {
    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(*self);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        need(buf, 4)?;
        Ok(buf.get_i32_le())
    }
}

impl Wire for u64 {
    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(*self);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        need(buf, 8)?;
        Ok(buf.get_u64_le())
    }
}

impl Wire for usize {
    fn write<B: BufMut>(&self, buf: &mut B) {
        (*self as u64).write(buf);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        let v = u64::read(buf)?;
        usize::try_from(v).map_err(|_| HalogenError::Decode(format!("length {} overflows", v)))
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn write<B: BufMut>(&self, buf: &mut B) {
        self.len().write(buf);
        for item in self {
            item.write(buf);
        }
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        let len = usize::read(buf)?;
        let mut out = Vec::new();
        for _ in 0..len {
            out.push(T::read(buf)?);
        }
        Ok(out)
    }
}

impl<A: Wire, B: Wire> Wire for (A, B) {
    fn write<T: BufMut>(&self, buf: &mut T) {
        self.0.write(buf);
        self.1.write(buf);
    }

    fn read<T: Buf>(buf: &mut T) -> Result<Self> {
        Ok((A::read(buf)?, B::read(buf)?))
    }
}

impl<const D: usize> Wire for Coord<D> {
    fn write<B: BufMut>(&self, buf: &mut B) {
        for c in self.0 {
            c.write(buf);
        }
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        let mut out = [0i32; D];
        for c in &mut out {
            *c = i32::read(buf)?;
        }
        Ok(Coord(out))
    }
}

impl<const D: usize> Wire for IterSpace<D> {
    fn write<B: BufMut>(&self, buf: &mut B) {
        self.first.write(buf);
        self.last.write(buf);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(IterSpace { first: Coord::read(buf)?, last: Coord::read(buf)? })
    }
}

impl<const D: usize> Wire for HaloRegion<D> {
    fn write<B: BufMut>(&self, buf: &mut B) {
        self.local.write(buf);
        self.global.write(buf);
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(HaloRegion { local: IterSpace::read(buf)?, global: IterSpace::read(buf)? })
    }
}
