//! Halo patterns and the distributed setup algorithm.
//!
//! A [`Pattern`] is the per-domain directory of who sends what to whom:
//! two maps from extended domain id to iteration-space lists, one for
//! sends and one for receives. [`make_pattern`] builds them
//! collectively: every receive entry a rank computes locally is mirrored
//! onto the owning peer as a send entry with identical global boxes, so
//! at exchange time both sides agree without further negotiation.

use std::collections::BTreeMap;

use crate::coords::{HaloRegion, IterSpace};
use crate::domain::{DomainDescriptor, DomainId, ExtendedDomainId, HaloGenerator};
use crate::error::{HalogenError, Result};
use crate::transport::{Rank, SetupTransport, Tag, Transport};
use crate::wire::Wire;

/// Map from peer domain to the iteration spaces exchanged with it.
pub type HaloMap<Id, const D: usize> = BTreeMap<ExtendedDomainId<Id>, Vec<HaloRegion<D>>>;

/// Per-domain directory of send and receive halos. Immutable after
/// setup.
#[derive(Debug, Clone)]
pub struct Pattern<Id, const D: usize> {
    id: ExtendedDomainId<Id>,
    extent: HaloRegion<D>,
    send_halos: HaloMap<Id, D>,
    recv_halos: HaloMap<Id, D>,
}

impl<Id: DomainId, const D: usize> Pattern<Id, D> {
    pub fn domain_id(&self) -> Id {
        self.id.id
    }

    pub fn extended_domain_id(&self) -> ExtendedDomainId<Id> {
        self.id
    }

    /// The domain box: local view `[0, last - first]`, global view
    /// `[first, last]`.
    pub fn extent(&self) -> &HaloRegion<D> {
        &self.extent
    }

    pub fn send_halos(&self) -> &HaloMap<Id, D> {
        &self.send_halos
    }

    pub fn recv_halos(&self) -> &HaloMap<Id, D> {
        &self.recv_halos
    }
}

/// The send breakdown one rank ships to one peer: per receiving domain
/// of the peer, the sending domains and their iteration spaces.
type SendBreakdown<Id, const D: usize> =
    Vec<(Id, Vec<(ExtendedDomainId<Id>, Vec<HaloRegion<D>>)>)>;

/// Build the patterns for this rank's `domains`, one per domain.
///
/// Collective over all ranks: every rank must call with its own domain
/// list (possibly empty) and the same halo generator semantics. Any
/// transport failure aborts the setup; a partially built pattern is
/// never returned.
pub fn make_pattern<S, T, G, Dom, const D: usize>(
    setup: &S,
    transport: &T,
    halo_gen: &G,
    domains: &[Dom],
) -> Result<Vec<Pattern<Dom::Id, D>>>
where
    S: SetupTransport,
    T: Transport,
    G: HaloGenerator<Dom, D>,
    Dom: DomainDescriptor<D>,
{
    let my_rank = setup.rank();
    let _span = tracing::debug_span!("make_pattern", rank = my_rank, domains = domains.len())
        .entered();
    let my_address = transport.address();

    // Enumerate local domains: extended ids (tag 0 for now), extents in
    // both views, and the generated receive halos. Empty halos are
    // discarded here and never produce a wire message.
    let mut my_ids = Vec::with_capacity(domains.len());
    let mut my_extents = Vec::with_capacity(domains.len());
    let mut my_recv_halos = Vec::with_capacity(domains.len());
    for d in domains {
        my_ids.push(ExtendedDomainId { id: d.domain_id(), rank: my_rank, address: my_address, tag: 0 });
        my_extents.push(HaloRegion {
            local: IterSpace::new(d.first() - d.first(), d.last() - d.first()),
            global: IterSpace::new(d.first(), d.last()),
        });
        let halos: Vec<HaloRegion<D>> =
            halo_gen.halos(d).into_iter().filter(|h| !h.local.is_empty()).collect();
        my_recv_halos.push(halos);
    }

    // Publish domain ids and extents; afterwards every rank knows every
    // domain's owner, address and global box.
    let gathered_ids: Vec<Vec<ExtendedDomainId<Dom::Id>>> = setup
        .all_gather(&my_ids.encode())?
        .iter()
        .map(|bytes| Wire::decode(bytes))
        .collect::<Result<_>>()?;
    let gathered_extents: Vec<Vec<HaloRegion<D>>> = setup
        .all_gather(&my_extents.encode())?
        .iter()
        .map(|bytes| Wire::decode(bytes))
        .collect::<Result<_>>()?;
    let world_size = gathered_ids.len();
    tracing::debug!(
        total_domains = gathered_ids.iter().map(Vec::len).sum::<usize>(),
        world_size,
        "domains published"
    );

    let mut patterns: Vec<Pattern<Dom::Id, D>> = my_ids
        .iter()
        .zip(&my_extents)
        .map(|(&id, &extent)| Pattern {
            id,
            extent,
            send_halos: BTreeMap::new(),
            recv_halos: BTreeMap::new(),
        })
        .collect();

    // Resolve receive halos: intersect each halo's global box against
    // every known domain; a hit becomes a receive entry whose local part
    // is the intersection translated back into the halo's local frame.
    for (pattern, halos) in patterns.iter_mut().zip(&my_recv_halos) {
        for halo in halos {
            for r in 0..world_size {
                for (remote_id, remote_extent) in gathered_ids[r].iter().zip(&gathered_extents[r]) {
                    let Some(overlap) = halo.global.intersect(&remote_extent.global) else {
                        continue;
                    };
                    let local = IterSpace::new(
                        halo.local.first + (overlap.first - halo.global.first),
                        halo.local.first + (overlap.last - halo.global.first),
                    );
                    pattern
                        .recv_halos
                        .entry(*remote_id)
                        .or_default()
                        .push(HaloRegion { local, global: overlap });
                }
            }
        }
    }

    // Disambiguate receives from the same peer rank: one tag counter per
    // peer, spanning all local domains, walked in map order. Two receives
    // from the same rank into the same local domain can then never share
    // a tag.
    let mut tag_map: BTreeMap<Rank, Tag> = BTreeMap::new();
    for pattern in &mut patterns {
        let resolved = std::mem::take(&mut pattern.recv_halos);
        for (mut key, spaces) in resolved {
            let tag = tag_map
                .entry(key.rank)
                .and_modify(|t| *t += 1)
                .or_insert(0);
            key.tag = *tag;
            pattern.recv_halos.insert(key, spaces);
        }
    }

    // Invert the receive maps into the send breakdown each peer needs:
    // peer rank -> peer domain -> sending domain (with the tag the peer
    // must use) -> iteration spaces, local parts recast into the peer
    // domain's frame.
    let mut send_map: BTreeMap<Rank, BTreeMap<Dom::Id, HaloMap<Dom::Id, D>>> = BTreeMap::new();
    for pattern in &patterns {
        for (remote, spaces) in &pattern.recv_halos {
            let peer_ids = &gathered_ids[remote.rank as usize];
            let peer_extents = &gathered_extents[remote.rank as usize];
            let idx = peer_ids
                .iter()
                .position(|d| d.id == remote.id)
                .ok_or_else(|| {
                    HalogenError::Setup(format!("domain {:?} not published by rank {}", remote.id, remote.rank))
                })?;
            let peer_extent = &peer_extents[idx];

            let mut sender_id = pattern.id;
            sender_id.tag = remote.tag;
            let recast = spaces.iter().map(|s| HaloRegion {
                local: IterSpace::new(
                    peer_extent.local.first + (s.global.first - peer_extent.global.first),
                    peer_extent.local.first + (s.global.last - peer_extent.global.first),
                ),
                global: s.global,
            });
            send_map
                .entry(remote.rank)
                .or_default()
                .entry(remote.id)
                .or_default()
                .entry(sender_id)
                .or_default()
                .extend(recast);
        }
    }

    // Intra-rank edges never touch the network.
    if let Some(mine) = send_map.remove(&my_rank) {
        install_breakdown(
            &mut patterns,
            mine.into_iter()
                .map(|(dom, by_sender)| (dom, by_sender.into_iter().collect()))
                .collect(),
        )?;
    }

    // Rank-by-rank exchange: each rank announces whom it will notify,
    // then ships the per-peer breakdown point-to-point.
    for root in 0..world_size as Rank {
        if root == my_rank {
            let peers: Vec<Rank> = send_map.keys().copied().collect();
            setup.broadcast(&peers.encode(), root)?;
            for (&peer, breakdown) in &send_map {
                let wire: SendBreakdown<Dom::Id, D> = breakdown
                    .iter()
                    .map(|(dom, by_sender)| {
                        (*dom, by_sender.iter().map(|(s, v)| (*s, v.clone())).collect())
                    })
                    .collect();
                setup.send(&wire.encode(), peer, 0)?;
            }
        } else {
            let peers: Vec<Rank> = Wire::decode(&setup.broadcast(&[], root)?)?;
            if peers.contains(&my_rank) {
                let breakdown: SendBreakdown<Dom::Id, D> = Wire::decode(&setup.recv(root, 0)?)?;
                install_breakdown(&mut patterns, breakdown)?;
            }
        }
    }

    tracing::debug!(
        recv_peers = patterns.iter().map(|p| p.recv_halos.len()).sum::<usize>(),
        send_peers = patterns.iter().map(|p| p.send_halos.len()).sum::<usize>(),
        "pattern setup complete"
    );
    Ok(patterns)
}

/// Merge a received (or locally inverted) send breakdown into the
/// patterns it names.
fn install_breakdown<Id: DomainId, const D: usize>(
    patterns: &mut [Pattern<Id, D>],
    breakdown: SendBreakdown<Id, D>,
) -> Result<()> {
    for (dom, by_sender) in breakdown {
        let pattern = patterns
            .iter_mut()
            .find(|p| p.domain_id() == dom)
            .ok_or_else(|| HalogenError::Setup(format!("send breakdown names unknown domain {:?}", dom)))?;
        for (sender, spaces) in by_sender {
            pattern.send_halos.entry(sender).or_default().extend(spaces);
        }
    }
    Ok(())
}
