//! Futures over non-blocking transport operations.

use crate::buffer::{BufferAllocator, Message, SystemAllocator};
use crate::error::Result;
use crate::transport::Request;

/// Handle over an outstanding transport operation.
///
/// Terminal states are absorbing: `wait` and `cancel` consume the
/// future, so a settled operation cannot be re-observed.
pub struct Future<R: Request> {
    req: R,
}

impl<R: Request> Future<R> {
    pub(crate) fn new(req: R) -> Self {
        Self { req }
    }

    /// Non-blocking completion poll.
    pub fn test(&mut self) -> Result<bool> {
        self.req.test()
    }

    /// Block until the operation completes.
    pub fn wait(mut self) -> Result<()> {
        self.req.wait()
    }

    /// Attempt to cancel; `Ok(true)` when the cancellation won the race
    /// against normal completion.
    pub fn cancel(mut self) -> Result<bool> {
        self.req.cancel()
    }

    pub(crate) fn into_request(self) -> R {
        self.req
    }
}

/// A future coupled with the message buffer its operation uses.
///
/// Owning the buffer pins it for the transport: nothing can move, resize
/// or read it until the operation settles, at which point `wait` hands
/// the buffer back (filled for a receive, reusable for a send).
pub struct MessageFuture<R: Request, A: BufferAllocator = SystemAllocator> {
    fut: Future<R>,
    msg: Message<A>,
}

impl<R: Request, A: BufferAllocator> MessageFuture<R, A> {
    pub(crate) fn new(req: R, msg: Message<A>) -> Self {
        Self { fut: Future::new(req), msg }
    }

    pub fn test(&mut self) -> Result<bool> {
        self.fut.test()
    }

    /// Block until the operation completes and return the buffer. A
    /// truncated receive surfaces here as `Err(Truncation)`.
    pub fn wait(self) -> Result<Message<A>> {
        self.fut.wait()?;
        Ok(self.msg)
    }

    /// Attempt to cancel; the buffer comes back either way. On
    /// `Ok((false, msg))` the operation completed normally first.
    pub fn cancel(self) -> Result<(bool, Message<A>)> {
        let canceled = self.fut.cancel()?;
        Ok((canceled, self.msg))
    }

    pub(crate) fn into_parts(self) -> (Future<R>, Message<A>) {
        (self.fut, self.msg)
    }
}
