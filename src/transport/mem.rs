//! In-process transport: ranks are threads sharing a fabric of
//! mailboxes.
//!
//! Sends are buffered: the payload is copied into the destination
//! mailbox at post time and the send request completes immediately.
//! Receives match the oldest envelope with their `(source, tag)` pair,
//! which gives in-order delivery per pair. This is the default substrate
//! for the test suite; the `distributed` feature provides the real MPI
//! backend with the same observable semantics.

use std::collections::VecDeque;
use std::ptr;
use std::slice;
use std::sync::{Arc, Condvar, Mutex};

use super::{make_tag, source_of, tag_of, Rank, Request, SetupTransport, Tag, Transport};
use crate::error::{HalogenError, Result};

struct Envelope {
    key: u64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Mailbox {
    arrived: VecDeque<Envelope>,
}

struct Fabric {
    boxes: Vec<(Mutex<Mailbox>, Condvar)>,
}

impl Fabric {
    fn deposit(&self, dst: Rank, env: Envelope) -> Result<()> {
        let (lock, cv) = self
            .boxes
            .get(dst as usize)
            .ok_or_else(|| HalogenError::Transport(format!("no rank {} in fabric", dst)))?;
        lock.lock().unwrap().arrived.push_back(env);
        cv.notify_all();
        Ok(())
    }

    /// Remove and return the oldest envelope matching `key` in `rank`'s
    /// mailbox, blocking until one arrives.
    fn take_matching(&self, rank: Rank, key: u64) -> Vec<u8> {
        let (lock, cv) = &self.boxes[rank as usize];
        let mut mbox = lock.lock().unwrap();
        loop {
            if let Some(pos) = mbox.arrived.iter().position(|e| e.key == key) {
                return mbox.arrived.remove(pos).expect("position is in range").payload;
            }
            mbox = cv.wait(mbox).unwrap();
        }
    }
}

/// One rank's endpoint of an in-process fabric.
#[derive(Clone)]
pub struct MemTransport {
    fabric: Arc<Fabric>,
    rank: Rank,
}

impl MemTransport {
    /// Create a fabric of `n` ranks and return one endpoint per rank.
    pub fn fabric(n: usize) -> Vec<MemTransport> {
        let fabric = Arc::new(Fabric {
            boxes: (0..n).map(|_| (Mutex::new(Mailbox::default()), Condvar::new())).collect(),
        });
        (0..n).map(|r| MemTransport { fabric: fabric.clone(), rank: r as Rank }).collect()
    }
}

enum RecvState {
    Pending,
    Ready,
    Canceled,
    Truncated { capacity: usize, incoming: usize },
}

enum Kind {
    /// Buffered send; complete at post time.
    Send,
    Recv { buf: *mut u8, len: usize, key: u64, state: RecvState },
}

/// Request over the in-process fabric. Dropping a pending receive
/// abandons the operation; any matching envelope stays queued.
pub struct MemRequest {
    fabric: Arc<Fabric>,
    rank: Rank,
    kind: Kind,
}

impl MemRequest {
    /// Try to match and deliver a pending receive. Does not block.
    fn try_complete(&mut self) -> Result<bool> {
        let Kind::Recv { buf, len, key, state } = &mut self.kind else {
            return Ok(true);
        };
        match state {
            RecvState::Ready | RecvState::Canceled => return Ok(true),
            RecvState::Truncated { capacity, incoming } => {
                return Err(HalogenError::Truncation { capacity: *capacity, incoming: *incoming })
            }
            RecvState::Pending => {}
        }
        let (lock, _) = &self.fabric.boxes[self.rank as usize];
        let mut mbox = lock.lock().unwrap();
        let Some(pos) = mbox.arrived.iter().position(|e| e.key == *key) else {
            return Ok(false);
        };
        let env = mbox.arrived.remove(pos).expect("position is in range");
        drop(mbox);
        let incoming = env.payload.len();
        let delivered = incoming.min(*len);
        // SAFETY: the poster guarantees `buf` stays valid for `len` bytes
        // until the request settles.
        unsafe { ptr::copy_nonoverlapping(env.payload.as_ptr(), *buf, delivered) };
        if incoming > *len {
            *state = RecvState::Truncated { capacity: *len, incoming };
            return Err(HalogenError::Truncation { capacity: *len, incoming });
        }
        *state = RecvState::Ready;
        Ok(true)
    }
}

impl Request for MemRequest {
    fn test(&mut self) -> Result<bool> {
        self.try_complete()
    }

    fn wait(&mut self) -> Result<()> {
        let key = match &self.kind {
            Kind::Send => return Ok(()),
            Kind::Recv { key, .. } => *key,
        };
        loop {
            if self.try_complete()? {
                return Ok(());
            }
            let (lock, cv) = &self.fabric.boxes[self.rank as usize];
            let mbox = lock.lock().unwrap();
            // Re-check under the lock so an arrival between the poll and
            // this point cannot be slept through.
            if mbox.arrived.iter().any(|e| e.key == key) {
                continue;
            }
            drop(cv.wait(mbox).unwrap());
        }
    }

    fn cancel(&mut self) -> Result<bool> {
        let Kind::Recv { state, .. } = &mut self.kind else {
            // Buffered sends complete at post time; nothing left to cancel.
            return Ok(false);
        };
        if matches!(state, RecvState::Canceled) {
            return Ok(true);
        }
        // A matching envelope that already arrived wins the race: the
        // receive completes and the cancellation reports failure.
        match self.try_complete() {
            Ok(true) | Err(HalogenError::Truncation { .. }) => Ok(false),
            Ok(false) => {
                if let Kind::Recv { state, .. } = &mut self.kind {
                    *state = RecvState::Canceled;
                }
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

impl Transport for MemTransport {
    type Request = MemRequest;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.boxes.len()
    }

    fn address(&self) -> Rank {
        self.rank
    }

    unsafe fn isend(&self, buf: *const u8, len: usize, dst: Rank, tag: Tag) -> Result<MemRequest> {
        let payload = slice::from_raw_parts(buf, len).to_vec();
        self.fabric.deposit(dst, Envelope { key: make_tag(tag, self.rank), payload })?;
        Ok(MemRequest { fabric: self.fabric.clone(), rank: self.rank, kind: Kind::Send })
    }

    unsafe fn irecv(&self, buf: *mut u8, len: usize, src: Rank, tag: Tag) -> Result<MemRequest> {
        if src as usize >= self.fabric.boxes.len() || src < 0 {
            return Err(HalogenError::Transport(format!("no rank {} in fabric", src)));
        }
        Ok(MemRequest {
            fabric: self.fabric.clone(),
            rank: self.rank,
            kind: Kind::Recv { buf, len, key: make_tag(tag, src), state: RecvState::Pending },
        })
    }

    fn probe(&self) -> Result<Option<(Rank, Tag, usize)>> {
        let (lock, _) = &self.fabric.boxes[self.rank as usize];
        let mbox = lock.lock().unwrap();
        Ok(mbox
            .arrived
            .front()
            .map(|e| (source_of(e.key), tag_of(e.key), e.payload.len())))
    }
}

// Collective phases get their own tag namespace; a `MemSetup` fabric is
// separate from the exchange fabric, so these cannot collide with user
// traffic either way.
const BCAST_TAG: Tag = 0;
const GATHER_TAG: Tag = 1;
const P2P_BASE: Tag = 16;

/// Setup-phase collectives over a dedicated in-process fabric.
///
/// Create one per rank alongside the [`MemTransport`] endpoint.
pub struct MemSetup {
    comm: MemTransport,
}

impl MemSetup {
    /// Create a setup fabric of `n` ranks and return one endpoint per
    /// rank.
    pub fn fabric(n: usize) -> Vec<MemSetup> {
        MemTransport::fabric(n).into_iter().map(|comm| MemSetup { comm }).collect()
    }

    fn deposit(&self, dst: Rank, tag: Tag, bytes: &[u8]) -> Result<()> {
        self.comm
            .fabric
            .deposit(dst, Envelope { key: make_tag(tag, self.comm.rank), payload: bytes.to_vec() })
    }

    fn take(&self, src: Rank, tag: Tag) -> Vec<u8> {
        self.comm.fabric.take_matching(self.comm.rank, make_tag(tag, src))
    }
}

impl SetupTransport for MemSetup {
    fn rank(&self) -> Rank {
        self.comm.rank
    }

    fn size(&self) -> usize {
        self.comm.size()
    }

    fn barrier(&self) -> Result<()> {
        self.all_gather(&[]).map(|_| ())
    }

    fn broadcast(&self, bytes: &[u8], root: Rank) -> Result<Vec<u8>> {
        if self.comm.rank == root {
            for r in 0..self.size() as Rank {
                if r != root {
                    self.deposit(r, BCAST_TAG, bytes)?;
                }
            }
            Ok(bytes.to_vec())
        } else {
            Ok(self.take(root, BCAST_TAG))
        }
    }

    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let me = self.comm.rank;
        for r in 0..self.size() as Rank {
            if r != me {
                self.deposit(r, GATHER_TAG, bytes)?;
            }
        }
        let mut out = Vec::with_capacity(self.size());
        for r in 0..self.size() as Rank {
            if r == me {
                out.push(bytes.to_vec());
            } else {
                out.push(self.take(r, GATHER_TAG));
            }
        }
        Ok(out)
    }

    fn send(&self, bytes: &[u8], dst: Rank, tag: Tag) -> Result<()> {
        self.deposit(dst, P2P_BASE + tag, bytes)
    }

    fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>> {
        Ok(self.take(src, P2P_BASE + tag))
    }
}

// SAFETY: the raw buffer pointer is only dereferenced from request
// methods, which the owner of the posted buffer invokes.
unsafe impl Send for MemRequest {}
