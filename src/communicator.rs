//! Point-to-point communicator with future- and callback-based
//! completion.
//!
//! The future path couples each operation with its buffer and hands both
//! back on `wait`. The callback path parks the buffer in a registry; the
//! callback receives it back during [`Communicator::progress`], which
//! handles at most one completion per call and erases the registration
//! *before* invoking the callback, so a callback may re-register
//! the same `(peer, tag)` from inside itself without colliding.

use std::collections::HashMap;

use crate::buffer::{BufferAllocator, Message, SystemAllocator};
use crate::error::{HalogenError, Result};
use crate::future::MessageFuture;
use crate::transport::{Rank, Request, Tag, Transport};

/// Completion callback: invoked with the communicator (so new operations
/// can be posted from inside), the peer rank, the tag, and the message
/// buffer handed back for reuse.
pub type Callback<T, A> = Box<dyn FnOnce(&mut Communicator<T, A>, Rank, Tag, Message<A>)>;

struct Entry<T: Transport, A: BufferAllocator> {
    req: T::Request,
    cb: Callback<T, A>,
    rank: Rank,
    tag: Tag,
    msg: Message<A>,
}

/// Non-blocking send/receive endpoint over a [`Transport`].
///
/// Dropping a communicator with callback registrations still pending is
/// a programming error and panics: the registered buffers and callbacks
/// would be freed while the transport may still touch them.
pub struct Communicator<T: Transport, A: BufferAllocator = SystemAllocator> {
    transport: T,
    registry: HashMap<u64, Entry<T, A>>,
    next_id: u64,
}

impl<T: Transport, A: BufferAllocator> Communicator<T, A> {
    pub fn new(transport: T) -> Self {
        Self { transport, registry: HashMap::new(), next_id: 0 }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn address(&self) -> Rank {
        self.transport.address()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of callback registrations outstanding.
    pub fn pending_callbacks(&self) -> usize {
        self.registry.len()
    }

    /// Non-blocking send. The future is ready when the buffer may be
    /// reused, and `wait` returns it.
    pub fn send<B: BufferAllocator>(
        &self,
        msg: Message<B>,
        dst: Rank,
        tag: Tag,
    ) -> Result<MessageFuture<T::Request, B>> {
        // SAFETY: the returned future owns `msg`, pinning the buffer
        // until the request settles.
        let req = unsafe { self.transport.isend(msg.as_ptr(), msg.size(), dst, tag) }?;
        Ok(MessageFuture::new(req, msg))
    }

    /// Non-blocking receive into `msg` (sized by the caller). The future
    /// is ready when the buffer holds the payload.
    pub fn recv<B: BufferAllocator>(
        &self,
        mut msg: Message<B>,
        src: Rank,
        tag: Tag,
    ) -> Result<MessageFuture<T::Request, B>> {
        // SAFETY: as in `send`.
        let req = unsafe { self.transport.irecv(msg.as_mut_ptr(), msg.size(), src, tag) }?;
        Ok(MessageFuture::new(req, msg))
    }

    /// Blocking send; returns the buffer once it may be reused.
    pub fn blocking_send<B: BufferAllocator>(
        &self,
        msg: Message<B>,
        dst: Rank,
        tag: Tag,
    ) -> Result<Message<B>> {
        self.send(msg, dst, tag)?.wait()
    }

    /// Send with completion callback; the callback fires during
    /// `progress` once the buffer may be reused.
    pub fn send_cb(
        &mut self,
        msg: Message<A>,
        dst: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, Message<A>) + 'static,
    ) -> Result<()> {
        // SAFETY: the registry entry owns `msg` until the request settles.
        let req = unsafe { self.transport.isend(msg.as_ptr(), msg.size(), dst, tag) }?;
        self.register(req, msg, dst, tag, Box::new(cb));
        Ok(())
    }

    /// Receive with completion callback; the callback fires during
    /// `progress` with the filled buffer.
    pub fn recv_cb(
        &mut self,
        mut msg: Message<A>,
        src: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, Message<A>) + 'static,
    ) -> Result<()> {
        // SAFETY: as in `send_cb`.
        let req = unsafe { self.transport.irecv(msg.as_mut_ptr(), msg.size(), src, tag) }?;
        self.register(req, msg, src, tag, Box::new(cb));
        Ok(())
    }

    fn register(&mut self, req: T::Request, msg: Message<A>, rank: Rank, tag: Tag, cb: Callback<T, A>) {
        let id = self.next_id;
        self.next_id += 1;
        self.registry.insert(id, Entry { req, cb, rank, tag, msg });
    }

    /// Poll the registered operations, invoking at most one callback.
    /// Returns whether registrations remain.
    ///
    /// A truncated receive still fires its callback: the buffer contents
    /// past its size are gone and the user detects the short delivery by
    /// size; see the error policy on [`crate::HalogenError::Truncation`].
    pub fn progress(&mut self) -> Result<bool> {
        let ids: Vec<u64> = self.registry.keys().copied().collect();
        for id in ids {
            let Some(entry) = self.registry.get_mut(&id) else {
                continue;
            };
            let done = match entry.req.test() {
                Ok(done) => done,
                Err(HalogenError::Truncation { incoming, capacity }) => {
                    tracing::debug!(incoming, capacity, "delivering truncated receive");
                    true
                }
                Err(e) => return Err(e),
            };
            if done {
                let Entry { cb, rank, tag, msg, .. } =
                    self.registry.remove(&id).expect("entry is present");
                cb(self, rank, tag, msg);
                break;
            }
        }
        Ok(!self.registry.is_empty())
    }

    /// Cancel every registered operation, dropping the callbacks.
    /// Returns the conjunction of the per-request cancellation results;
    /// an empty registry yields `true`.
    pub fn cancel_callbacks(&mut self) -> Result<bool> {
        let mut all = true;
        for (_, mut entry) in self.registry.drain() {
            all &= entry.req.cancel()?;
        }
        Ok(all)
    }

    /// Remove the pending registration matching `(rank, tag)` and return
    /// it as a future over its buffer.
    ///
    /// # Panics
    ///
    /// No registration matches; the caller's bookkeeping is wrong.
    pub fn detach(&mut self, rank: Rank, tag: Tag) -> MessageFuture<T::Request, A> {
        let id = self
            .registry
            .iter()
            .find(|(_, e)| e.rank == rank && e.tag == tag)
            .map(|(&id, _)| id)
            .unwrap_or_else(|| panic!("no registration for rank {}, tag {}", rank, tag));
        let Entry { req, msg, .. } = self.registry.remove(&id).expect("entry is present");
        MessageFuture::new(req, msg)
    }

    /// Convert a future back into a callback registration.
    ///
    /// # Panics
    ///
    /// A registration for `(rank, tag)` already exists.
    pub fn attach(
        &mut self,
        fut: MessageFuture<T::Request, A>,
        rank: Rank,
        tag: Tag,
        cb: impl FnOnce(&mut Self, Rank, Tag, Message<A>) + 'static,
    ) {
        assert!(
            !self.registry.values().any(|e| e.rank == rank && e.tag == tag),
            "a registration for rank {}, tag {} already exists",
            rank,
            tag
        );
        let (fut, msg) = fut.into_parts();
        self.register(fut.into_request(), msg, rank, tag, Box::new(cb));
    }
}

impl<T: Transport, A: BufferAllocator> Drop for Communicator<T, A> {
    fn drop(&mut self) {
        if !self.registry.is_empty() && !std::thread::panicking() {
            panic!(
                "communicator dropped with {} unresolved callback registrations",
                self.registry.len()
            );
        }
    }
}
