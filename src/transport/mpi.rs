//! MPI transport backend.
//!
//! Requires the `distributed` feature flag and an MPI installation. The
//! caller must initialize MPI before constructing the endpoints and keep
//! the universe alive for their duration:
//!
//! ```ignore
//! let _universe = mpi::initialize().expect("MPI init failed");
//! let transport = MpiTransport::world();
//! let setup = MpiSetup::world();
//! ```
//!
//! The non-blocking path goes through the raw bindings: a request
//! registry owning its buffers cannot be expressed with scoped safe
//! requests, and the unsafe surface is already confined to
//! [`Transport::isend`]/[`Transport::irecv`]. The blocking setup
//! collectives use the safe API. Note that MPI itself aborts on
//! truncation with the default error handler, so the truncation status
//! of [`Request::test`] is only observable on transports that deliver
//! short, like the in-process fabric.

use std::mem::MaybeUninit;
use std::os::raw::c_int;

use mpi::datatype::PartitionMut;
use mpi::ffi;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use super::{Rank, Request, SetupTransport, Tag, Transport};
use crate::error::{HalogenError, Result};

fn check(code: c_int, what: &str) -> Result<()> {
    if code as u32 != ffi::MPI_SUCCESS {
        return Err(HalogenError::Transport(format!("{} failed with code {}", what, code)));
    }
    Ok(())
}

fn empty_status() -> ffi::MPI_Status {
    // SAFETY: MPI_Status is a plain C struct; MPI writes it before we read.
    unsafe { MaybeUninit::zeroed().assume_init() }
}

/// Point-to-point endpoint over the world communicator.
#[derive(Clone)]
pub struct MpiTransport;

impl MpiTransport {
    /// Endpoint over `MPI_COMM_WORLD`. MPI must be initialized.
    pub fn world() -> Self {
        Self
    }

    fn comm(&self) -> SimpleCommunicator {
        SimpleCommunicator::world()
    }
}

enum MpiState {
    Pending,
    Done,
}

pub struct MpiRequest {
    req: ffi::MPI_Request,
    state: MpiState,
}

impl Request for MpiRequest {
    fn test(&mut self) -> Result<bool> {
        if matches!(self.state, MpiState::Done) {
            return Ok(true);
        }
        let mut flag: c_int = 0;
        let mut status = empty_status();
        let code = unsafe { ffi::MPI_Test(&mut self.req, &mut flag, &mut status) };
        check(code, "MPI_Test")?;
        if flag != 0 {
            self.state = MpiState::Done;
        }
        Ok(flag != 0)
    }

    fn wait(&mut self) -> Result<()> {
        if matches!(self.state, MpiState::Done) {
            return Ok(());
        }
        let mut status = empty_status();
        let code = unsafe { ffi::MPI_Wait(&mut self.req, &mut status) };
        check(code, "MPI_Wait")?;
        self.state = MpiState::Done;
        Ok(())
    }

    fn cancel(&mut self) -> Result<bool> {
        if matches!(self.state, MpiState::Done) {
            return Ok(false);
        }
        let mut status = empty_status();
        let mut flag: c_int = 0;
        unsafe {
            check(ffi::MPI_Cancel(&mut self.req), "MPI_Cancel")?;
            check(ffi::MPI_Wait(&mut self.req, &mut status), "MPI_Wait")?;
            check(ffi::MPI_Test_cancelled(&status, &mut flag), "MPI_Test_cancelled")?;
        }
        self.state = MpiState::Done;
        Ok(flag != 0)
    }
}

impl Drop for MpiRequest {
    fn drop(&mut self) {
        // A request abandoned while pending would leave MPI writing into
        // a buffer we no longer pin; settle it first.
        if matches!(self.state, MpiState::Pending) {
            let _ = self.cancel();
        }
    }
}

impl Transport for MpiTransport {
    type Request = MpiRequest;

    fn rank(&self) -> Rank {
        self.comm().rank()
    }

    fn size(&self) -> usize {
        self.comm().size() as usize
    }

    fn address(&self) -> Rank {
        self.rank()
    }

    unsafe fn isend(&self, buf: *const u8, len: usize, dst: Rank, tag: Tag) -> Result<MpiRequest> {
        let mut req = MaybeUninit::<ffi::MPI_Request>::uninit();
        let code = ffi::MPI_Isend(
            buf as *const _,
            len as c_int,
            ffi::RSMPI_UINT8_T,
            dst,
            tag,
            self.comm().as_raw(),
            req.as_mut_ptr(),
        );
        check(code, "MPI_Isend")?;
        Ok(MpiRequest { req: req.assume_init(), state: MpiState::Pending })
    }

    unsafe fn irecv(&self, buf: *mut u8, len: usize, src: Rank, tag: Tag) -> Result<MpiRequest> {
        let mut req = MaybeUninit::<ffi::MPI_Request>::uninit();
        let code = ffi::MPI_Irecv(
            buf as *mut _,
            len as c_int,
            ffi::RSMPI_UINT8_T,
            src,
            tag,
            self.comm().as_raw(),
            req.as_mut_ptr(),
        );
        check(code, "MPI_Irecv")?;
        Ok(MpiRequest { req: req.assume_init(), state: MpiState::Pending })
    }

    fn probe(&self) -> Result<Option<(Rank, Tag, usize)>> {
        let mut flag: c_int = 0;
        let mut status = empty_status();
        let code = unsafe {
            ffi::MPI_Iprobe(
                ffi::RSMPI_ANY_SOURCE,
                ffi::RSMPI_ANY_TAG,
                self.comm().as_raw(),
                &mut flag,
                &mut status,
            )
        };
        check(code, "MPI_Iprobe")?;
        if flag == 0 {
            return Ok(None);
        }
        let mut count: c_int = 0;
        let code = unsafe { ffi::MPI_Get_count(&status, ffi::RSMPI_UINT8_T, &mut count) };
        check(code, "MPI_Get_count")?;
        Ok(Some((status.MPI_SOURCE, status.MPI_TAG, count as usize)))
    }
}

/// Setup-phase collectives over the world communicator.
pub struct MpiSetup;

impl MpiSetup {
    pub fn world() -> Self {
        Self
    }

    fn comm(&self) -> SimpleCommunicator {
        SimpleCommunicator::world()
    }
}

impl SetupTransport for MpiSetup {
    fn rank(&self) -> Rank {
        self.comm().rank()
    }

    fn size(&self) -> usize {
        self.comm().size() as usize
    }

    fn barrier(&self) -> Result<()> {
        self.comm().barrier();
        Ok(())
    }

    fn broadcast(&self, bytes: &[u8], root: Rank) -> Result<Vec<u8>> {
        let comm = self.comm();
        let root_process = comm.process_at_rank(root);
        let mut len = bytes.len() as u64;
        root_process.broadcast_into(&mut len);
        let mut out = if comm.rank() == root { bytes.to_vec() } else { vec![0u8; len as usize] };
        if len > 0 {
            root_process.broadcast_into(&mut out[..]);
        }
        Ok(out)
    }

    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let comm = self.comm();
        let n = comm.size() as usize;

        let mut counts = vec![0 as Count; n];
        comm.all_gather_into(&(bytes.len() as Count), &mut counts[..]);

        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut flat = vec![0u8; total.max(1)];
        {
            let mut partition = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
            comm.all_gather_varcount_into(bytes, &mut partition);
        }

        let mut out = Vec::with_capacity(n);
        for r in 0..n {
            let start = displs[r] as usize;
            let end = start + counts[r] as usize;
            out.push(flat[start..end].to_vec());
        }
        Ok(out)
    }

    fn send(&self, bytes: &[u8], dst: Rank, tag: Tag) -> Result<()> {
        self.comm().process_at_rank(dst).send_with_tag(bytes, tag);
        Ok(())
    }

    fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>> {
        let (payload, _status) =
            self.comm().process_at_rank(src).receive_vec_with_tag::<u8>(tag);
        Ok(payload)
    }
}
