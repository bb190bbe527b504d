//! The exchange engine: packs, sends, receives and unpacks fields for
//! one pattern.
//!
//! Buffers are visited in ascending `{element count, extended id}`
//! order. Both ends of every edge derive the same count from identical
//! global boxes, so all ranks traverse the same schedule without any
//! coordination: small messages drain first and the tail is dominated by
//! the largest transfer.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::buffer::Message;
use crate::communicator::Communicator;
use crate::coords::{total_elements, HaloRegion};
use crate::domain::{DomainId, ExtendedDomainId};
use crate::error::Result;
use crate::field::FieldDescriptor;
use crate::future::MessageFuture;
use crate::pattern::Pattern;
use crate::transport::Transport;

/// Extended id with the halo's total element count; the key of the
/// buffer schedule.
#[derive(Debug, Clone, Copy)]
pub struct OrderedDomainId<Id> {
    pub size: usize,
    pub id: ExtendedDomainId<Id>,
}

impl<Id: DomainId> PartialEq for OrderedDomainId<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.id == other.id
    }
}

impl<Id: DomainId> Eq for OrderedDomainId<Id> {}

impl<Id: DomainId> Ord for OrderedDomainId<Id> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size.cmp(&other.size).then_with(|| self.id.cmp(&other.id))
    }
}

impl<Id: DomainId> PartialOrd for OrderedDomainId<Id> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exchange engine for one pattern.
///
/// Owns the send and receive buffer vectors and reuses them across
/// exchanges. Single-owner: concurrent `exchange` calls on one object
/// are not a thing; a second exchange starts only after the previous
/// handle has been waited on.
pub struct CommunicationObject<'p, T: Transport, Id: DomainId, const D: usize> {
    comm: Communicator<T>,
    ordered_sends: BTreeMap<OrderedDomainId<Id>, &'p [HaloRegion<D>]>,
    ordered_recvs: BTreeMap<OrderedDomainId<Id>, &'p [HaloRegion<D>]>,
    send_buffers: Vec<Message>,
    recv_buffers: Vec<Message>,
}

impl<'p, T: Transport, Id: DomainId, const D: usize> CommunicationObject<'p, T, Id, D> {
    pub fn new(pattern: &'p Pattern<Id, D>, transport: T) -> Self {
        let mut ordered_sends = BTreeMap::new();
        for (id, spaces) in pattern.send_halos() {
            let key = OrderedDomainId { size: total_elements(spaces), id: *id };
            ordered_sends.insert(key, spaces.as_slice());
        }
        let mut ordered_recvs = BTreeMap::new();
        for (id, spaces) in pattern.recv_halos() {
            let key = OrderedDomainId { size: total_elements(spaces), id: *id };
            ordered_recvs.insert(key, spaces.as_slice());
        }
        let send_buffers = (0..ordered_sends.len()).map(|_| Message::new()).collect();
        let recv_buffers = (0..ordered_recvs.len()).map(|_| Message::new()).collect();
        Self { comm: Communicator::new(transport), ordered_sends, ordered_recvs, send_buffers, recv_buffers }
    }

    /// Exchange the halos of `fields` (all sharing this object's
    /// pattern): post all receives in schedule order, pack and send in
    /// schedule order, wait for the sends, and return the handle that
    /// waits for and unpacks the receives.
    pub fn exchange<'f>(
        &mut self,
        fields: Vec<&'f mut dyn FieldDescriptor<D>>,
    ) -> Result<ExchangeHandle<'_, 'f, T, Id, D>> {
        let _span = tracing::debug_span!(
            "exchange",
            rank = self.comm.rank(),
            sends = self.ordered_sends.len(),
            recvs = self.ordered_recvs.len()
        )
        .entered();

        // Receives first, so every send posted below finds its match.
        let mut recvs = Vec::with_capacity(self.ordered_recvs.len());
        for (index, (oid, spaces)) in self.ordered_recvs.iter().enumerate() {
            let mut buf = std::mem::take(&mut self.recv_buffers[index]);
            buf.resize(buffer_size(spaces, &fields))?;
            let fut = self.comm.recv(buf, oid.id.address, oid.id.tag)?;
            recvs.push(PendingRecv { index, oid: *oid, spaces: *spaces, fut });
        }

        let mut send_futures = Vec::with_capacity(self.ordered_sends.len());
        for (index, (oid, spaces)) in self.ordered_sends.iter().enumerate() {
            let mut buf = std::mem::take(&mut self.send_buffers[index]);
            buf.resize(buffer_size(spaces, &fields))?;
            pack(&mut buf, spaces, &fields);
            send_futures.push(self.comm.send(buf, oid.id.address, oid.id.tag)?);
        }

        for (index, fut) in send_futures.into_iter().enumerate() {
            self.send_buffers[index] = fut.wait()?;
        }

        Ok(ExchangeHandle { recvs, recv_buffers: &mut self.recv_buffers, fields })
    }
}

struct PendingRecv<'p, T: Transport, Id, const D: usize> {
    index: usize,
    oid: OrderedDomainId<Id>,
    spaces: &'p [HaloRegion<D>],
    fut: MessageFuture<T::Request>,
}

/// Handle returned by [`CommunicationObject::exchange`]: waits for the
/// receives and unpacks them into the fields.
pub struct ExchangeHandle<'a, 'f, T: Transport, Id: DomainId, const D: usize> {
    recvs: Vec<PendingRecv<'a, T, Id, D>>,
    recv_buffers: &'a mut Vec<Message>,
    fields: Vec<&'f mut dyn FieldDescriptor<D>>,
}

impl<T: Transport, Id: DomainId, const D: usize> ExchangeHandle<'_, '_, T, Id, D> {
    /// Wait for each receive in schedule order and unpack it, mirroring
    /// the sender's pack order. Buffers return to the communication
    /// object for the next exchange.
    pub fn wait(self) -> Result<()> {
        let ExchangeHandle { recvs, recv_buffers, mut fields } = self;
        for PendingRecv { index, oid, spaces, fut } in recvs {
            let msg = fut.wait()?;
            tracing::trace!(peer = %oid.id, bytes = msg.size(), "receive complete");
            unpack(&msg, spaces, &mut fields);
            recv_buffers[index] = msg;
        }
        Ok(())
    }
}

/// Bytes one peer's buffer needs for these halos and fields.
fn buffer_size<const D: usize>(
    spaces: &[HaloRegion<D>],
    fields: &[&mut dyn FieldDescriptor<D>],
) -> usize {
    let mut size = 0;
    for space in spaces {
        for field in fields.iter() {
            size += space.size() * field.data_type_size();
        }
    }
    size
}

// Pack and unpack loop fields on the outside and iteration spaces on the
// inside, keeping bytes of one dtype contiguous; the receiving side must
// mirror this exactly, which `unpack` below does.
fn pack<const D: usize>(
    buf: &mut Message,
    spaces: &[HaloRegion<D>],
    fields: &[&mut dyn FieldDescriptor<D>],
) {
    let bytes = buf.as_mut_slice();
    let mut pos = 0;
    for field in fields.iter() {
        for space in spaces {
            let n = space.size() * field.data_type_size();
            field.get(space, &mut bytes[pos..pos + n]);
            pos += n;
        }
    }
}

fn unpack<const D: usize>(
    buf: &Message,
    spaces: &[HaloRegion<D>],
    fields: &mut [&mut dyn FieldDescriptor<D>],
) {
    let bytes = buf.as_slice();
    let mut pos = 0;
    for field in fields.iter_mut() {
        for space in spaces {
            let n = space.size() * field.data_type_size();
            field.set(space, &bytes[pos..pos + n]);
            pos += n;
        }
    }
}
