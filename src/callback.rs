//! Callback-driven communicator that owns its in-flight messages.
//!
//! Every posted operation stores a clone of its [`SharedMessage`], so
//! the caller may drop its own handle right after posting; the payload
//! lives until the operation settles and the callback has run. Pending
//! operations sit in two deques (sends, receives) that `progress` walks
//! round-robin: each element is popped, polled, and either completed or
//! re-enqueued at the back, with at most one completion per deque per
//! call to bound callback re-entrancy.

use std::collections::VecDeque;

use crate::buffer::{BufferAllocator, SharedMessage, SystemAllocator};
use crate::error::{HalogenError, Result};
use crate::future::Future;
use crate::transport::{Rank, Tag, Transport};

/// Completion callback: invoked with the communicator (so new operations
/// can be posted from inside), the peer rank, the tag, and the owned
/// message.
pub type SharedCallback<T, A> =
    Box<dyn FnOnce(&mut CallbackCommunicator<T, A>, Rank, Tag, SharedMessage<A>)>;

struct Element<T: Transport, A: BufferAllocator> {
    cb: SharedCallback<T, A>,
    rank: Rank,
    tag: Tag,
    fut: Future<T::Request>,
    msg: SharedMessage<A>,
}

/// Callback layer over a [`Transport`] for shared-ownership messages.
///
/// Dropping the communicator with pending operations panics, for the
/// same reason [`crate::communicator::Communicator`] does.
pub struct CallbackCommunicator<T: Transport, A: BufferAllocator = SystemAllocator> {
    transport: T,
    alloc: A,
    sends: VecDeque<Element<T, A>>,
    recvs: VecDeque<Element<T, A>>,
}

impl<T: Transport> CallbackCommunicator<T, SystemAllocator> {
    pub fn new(transport: T) -> Self {
        Self::with_allocator(transport, SystemAllocator)
    }
}

impl<T: Transport, A: BufferAllocator> CallbackCommunicator<T, A> {
    /// Sized receives ([`recv_size`](Self::recv_size)) and unexpected
    /// messages draw their buffers from `alloc`.
    pub fn with_allocator(transport: T, alloc: A) -> Self {
        Self { transport, alloc, sends: VecDeque::new(), recvs: VecDeque::new() }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn pending_sends(&self) -> usize {
        self.sends.len()
    }

    pub fn pending_recvs(&self) -> usize {
        self.recvs.len()
    }

    /// Post a send. A clone of `msg` is kept until completion, so the
    /// caller may drop its handle right away. The buffer must not be
    /// resized through another handle while the operation is in flight.
    pub fn send(
        &mut self,
        msg: &SharedMessage<A>,
        dst: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) -> Result<()> {
        let (ptr, len) = msg.raw_parts();
        // SAFETY: the queued element clones `msg`, pinning the buffer
        // until the request settles.
        let req = unsafe { self.transport.isend(ptr, len, dst, tag) }?;
        self.sends.push_back(Element {
            cb: Box::new(cb),
            rank: dst,
            tag,
            fut: Future::new(req),
            msg: msg.clone(),
        });
        Ok(())
    }

    /// Post one shared payload to every rank in `dsts` with the same tag.
    pub fn send_multi(&mut self, msg: &SharedMessage<A>, dsts: &[Rank], tag: Tag) -> Result<()> {
        self.send_multi_cb(msg, dsts, tag, |_, _, _, _| {})
    }

    /// `send_multi` with a per-destination completion callback.
    pub fn send_multi_cb(
        &mut self,
        msg: &SharedMessage<A>,
        dsts: &[Rank],
        tag: Tag,
        cb: impl Fn(&mut Self, Rank, Tag, SharedMessage<A>) + Clone + 'static,
    ) -> Result<()> {
        for &dst in dsts {
            self.send(msg, dst, tag, cb.clone())?;
        }
        Ok(())
    }

    /// Post a receive into `msg` (sized by the caller).
    pub fn recv(
        &mut self,
        msg: &SharedMessage<A>,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) -> Result<()> {
        let (ptr, len) = msg.raw_parts_mut();
        // SAFETY: as in `send`.
        let req = unsafe { self.transport.irecv(ptr, len, src, tag) }?;
        self.recvs.push_back(Element {
            cb: Box::new(cb),
            rank: src,
            tag,
            fut: Future::new(req),
            msg: msg.clone(),
        });
        Ok(())
    }

    /// Post a receive of `size` bytes into a freshly allocated message.
    pub fn recv_size(
        &mut self,
        size: usize,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) -> Result<()>
    where
        A: Clone,
    {
        let msg = SharedMessage::with_size_in(size, self.alloc.clone())?;
        self.recv(&msg, src, tag, cb)
    }

    /// Poll the pending operations, invoking at most one send and one
    /// receive callback. Returns whether pending operations remain.
    pub fn progress(&mut self) -> Result<bool> {
        let sends_drained = self.run_sends()?;
        let recvs_drained = self.run_recvs()?;
        Ok(!(sends_drained && recvs_drained))
    }

    /// Like [`progress`](Self::progress), but once everything registered
    /// has drained, probe for an unmatched incoming message, receive it
    /// into a fresh buffer and hand it to `cb`.
    pub fn progress_unexpected(
        &mut self,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) -> Result<bool>
    where
        A: Clone,
    {
        let pending = self.progress()?;
        if pending {
            return Ok(true);
        }
        if let Some((src, tag, len)) = self.transport.probe()? {
            let msg = SharedMessage::with_size_in(len, self.alloc.clone())?;
            let (ptr, n) = msg.raw_parts_mut();
            // SAFETY: `msg` outlives the wait below.
            let req = unsafe { self.transport.irecv(ptr, n, src, tag) }?;
            Future::new(req).wait()?;
            cb(self, src, tag, msg);
        }
        Ok(false)
    }

    /// Deregister all pending operations, attempting to cancel each.
    /// Completed operations count as successes; callbacks never fire.
    pub fn cancel(&mut self) -> Result<bool> {
        let mut all = true;
        for el in self.sends.drain(..).chain(self.recvs.drain(..)).collect::<Vec<_>>() {
            let mut fut = el.fut;
            let done = match fut.test() {
                Ok(done) => done,
                Err(HalogenError::Truncation { .. }) => true,
                Err(e) => return Err(e),
            };
            if !done {
                all &= fut.cancel()?;
            }
        }
        Ok(all)
    }

    /// Deregister the oldest send matching `(dst, tag)`, returning its
    /// future and message; the callback is discarded.
    pub fn detach_send(
        &mut self,
        dst: Rank,
        tag: Tag,
    ) -> Option<(Future<T::Request>, SharedMessage<A>)> {
        detach(&mut self.sends, dst, tag)
    }

    /// Deregister the oldest receive matching `(src, tag)`.
    pub fn detach_recv(
        &mut self,
        src: Rank,
        tag: Tag,
    ) -> Option<(Future<T::Request>, SharedMessage<A>)> {
        detach(&mut self.recvs, src, tag)
    }

    /// Re-register a detached send with a new callback.
    pub fn attach_send(
        &mut self,
        fut: Future<T::Request>,
        msg: SharedMessage<A>,
        dst: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) {
        self.sends.push_back(Element { cb: Box::new(cb), rank: dst, tag, fut, msg });
    }

    /// Re-register a detached receive with a new callback.
    pub fn attach_recv(
        &mut self,
        fut: Future<T::Request>,
        msg: SharedMessage<A>,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, SharedMessage<A>) + 'static,
    ) {
        self.recvs.push_back(Element { cb: Box::new(cb), rank: src, tag, fut, msg });
    }

    fn run_sends(&mut self) -> Result<bool> {
        let n = self.sends.len();
        for _ in 0..n {
            let mut el = self.sends.pop_front().expect("length checked");
            if poll(&mut el)? {
                let Element { cb, rank, tag, msg, .. } = el;
                cb(self, rank, tag, msg);
                break;
            }
            self.sends.push_back(el);
        }
        Ok(self.sends.is_empty())
    }

    fn run_recvs(&mut self) -> Result<bool> {
        let n = self.recvs.len();
        for _ in 0..n {
            let mut el = self.recvs.pop_front().expect("length checked");
            if poll(&mut el)? {
                let Element { cb, rank, tag, msg, .. } = el;
                cb(self, rank, tag, msg);
                break;
            }
            self.recvs.push_back(el);
        }
        Ok(self.recvs.is_empty())
    }
}

/// One completion poll; truncated receives complete and are delivered.
fn poll<T: Transport, A: BufferAllocator>(el: &mut Element<T, A>) -> Result<bool> {
    match el.fut.test() {
        Ok(done) => Ok(done),
        Err(HalogenError::Truncation { incoming, capacity }) => {
            tracing::debug!(incoming, capacity, "delivering truncated receive");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn detach<T: Transport, A: BufferAllocator>(
    deque: &mut VecDeque<Element<T, A>>,
    rank: Rank,
    tag: Tag,
) -> Option<(Future<T::Request>, SharedMessage<A>)> {
    let pos = deque.iter().position(|e| e.rank == rank && e.tag == tag)?;
    let el = deque.remove(pos).expect("position is in range");
    Some((el.fut, el.msg))
}

impl<T: Transport, A: BufferAllocator> Drop for CallbackCommunicator<T, A> {
    fn drop(&mut self) {
        let pending = self.sends.len() + self.recvs.len();
        if pending > 0 && !std::thread::panicking() {
            panic!("callback communicator dropped with {} pending operations", pending);
        }
    }
}
