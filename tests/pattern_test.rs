//! Distributed pattern setup over the in-process fabric: neighbor
//! discovery, tag assignment and send/recv symmetry.

mod common;

use std::collections::BTreeSet;

use halogen::coords::Coord;
use halogen::domain::{CartesianDomain, CartesianHaloGenerator};
use halogen::pattern::{make_pattern, Pattern};
use halogen::transport::mem::{MemSetup, MemTransport};
use halogen::transport::Rank;

use common::run_world;

/// Ring of 4 ranks, 100 cells, halo width 1.
fn ring_pattern(rank: Rank, setup: &MemSetup, transport: &MemTransport) -> Pattern<i32, 1> {
    let gen = CartesianHaloGenerator::uniform(Coord([0]), Coord([99]), 1, [true]);
    let domains = [CartesianDomain::new(rank, Coord([rank * 25]), Coord([rank * 25 + 24]))];
    make_pattern(setup, transport, &gen, &domains).unwrap().remove(0)
}

#[test]
fn ring_of_four_has_two_neighbors_and_zero_tags() {
    common::init_tracing();
    let patterns = run_world(4, |rank, setup, transport| ring_pattern(rank, &setup, &transport));

    for (rank, pattern) in patterns.iter().enumerate() {
        let rank = rank as Rank;
        let left = (rank + 3) % 4;
        let right = (rank + 1) % 4;

        let recv_peers: BTreeSet<Rank> = pattern.recv_halos().keys().map(|id| id.rank).collect();
        assert_eq!(recv_peers, BTreeSet::from([left, right]), "rank {}", rank);
        let send_peers: BTreeSet<Rank> = pattern.send_halos().keys().map(|id| id.rank).collect();
        assert_eq!(send_peers, BTreeSet::from([left, right]), "rank {}", rank);

        // One domain per peer rank: every tag is 0.
        assert!(pattern.recv_halos().keys().all(|id| id.tag == 0));
        // Each edge carries exactly one cell.
        for spaces in pattern.recv_halos().values() {
            assert_eq!(spaces.iter().map(|s| s.size()).sum::<usize>(), 1);
        }
    }
}

#[test]
fn send_and_recv_maps_mirror_each_other() {
    let patterns = run_world(4, |rank, setup, transport| ring_pattern(rank, &setup, &transport));

    for pattern in &patterns {
        for (remote, spaces) in pattern.recv_halos() {
            let peer = &patterns[remote.rank as usize];
            assert_eq!(peer.domain_id(), remote.id);

            // The peer's send entry is keyed by this domain's id with the
            // tag this rank assigned.
            let mut key = pattern.extended_domain_id();
            key.tag = remote.tag;
            let mirrored = peer.send_halos().get(&key).expect("send counterpart exists");

            assert_eq!(mirrored.len(), spaces.len());
            for (send_side, recv_side) in mirrored.iter().zip(spaces) {
                assert_eq!(send_side.global, recv_side.global);
            }
        }
    }
}

#[test]
fn four_by_two_grid_matches_stencil_neighbor_counts() {
    let patterns = run_world(8, |rank, setup, transport| {
        let (gx, gy) = (rank % 4, rank / 4);
        let gen = CartesianHaloGenerator::uniform(Coord([0, 0]), Coord([39, 19]), 1, [false; 2]);
        let domains = [CartesianDomain::new(
            rank,
            Coord([gx * 10, gy * 10]),
            Coord([gx * 10 + 9, gy * 10 + 9]),
        )];
        make_pattern(&setup, &transport, &gen, &domains).unwrap().remove(0)
    });

    for (rank, pattern) in patterns.iter().enumerate() {
        let (gx, gy) = (rank as Rank % 4, rank as Rank / 4);
        let mut expected = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                if (dx, dy) == (0, 0) {
                    continue;
                }
                if (0..4).contains(&(gx + dx)) && (0..2).contains(&(gy + dy)) {
                    expected += 1;
                }
            }
        }
        assert_eq!(pattern.recv_halos().len(), expected, "rank {}", rank);
        assert_eq!(pattern.send_halos().len(), expected, "rank {}", rank);
        assert!(pattern.recv_halos().keys().all(|id| id.tag == 0));

        // The expected counts themselves: 4x2 has corners with 3
        // neighbors and edges with 5.
        let corner = (gx == 0 || gx == 3) && (gy == 0 || gy == 1);
        if corner {
            assert_eq!(expected, 3);
        } else {
            assert_eq!(expected, 5);
        }
    }
}

/// Two receives from the same peer rank but different peer domains must
/// get distinct tags.
#[test]
fn two_domains_on_one_peer_get_distinct_tags() {
    let patterns = run_world(2, |rank, setup, transport| {
        let gen = CartesianHaloGenerator::uniform(Coord([0]), Coord([19]), 1, [true]);
        let domains = if rank == 0 {
            vec![CartesianDomain::new(0, Coord([0]), Coord([9]))]
        } else {
            vec![
                CartesianDomain::new(1, Coord([10]), Coord([14])),
                CartesianDomain::new(2, Coord([15]), Coord([19])),
            ]
        };
        make_pattern(&setup, &transport, &gen, &domains).unwrap()
    });

    // Rank 0 receives from rank 1 twice, once per peer domain.
    let p0 = &patterns[0][0];
    let entries: Vec<(Rank, i32, i32)> =
        p0.recv_halos().keys().map(|id| (id.rank, id.id, id.tag)).collect();
    assert_eq!(entries, vec![(1, 1, 0), (1, 2, 1)]);

    // The corresponding send entries on rank 1 carry those same tags.
    let send_tags: BTreeSet<i32> = patterns[1]
        .iter()
        .flat_map(|p| p.send_halos().keys())
        .filter(|id| id.id == 0)
        .map(|id| id.tag)
        .collect();
    assert_eq!(send_tags, BTreeSet::from([0, 1]));
}

/// Ranks may legally own no domains at all; they still participate in
/// the collectives.
#[test]
fn a_rank_without_domains_participates_in_setup() {
    let patterns = run_world(2, |rank, setup, transport| {
        let gen = CartesianHaloGenerator::uniform(Coord([0]), Coord([9]), 1, [false]);
        let domains = if rank == 0 {
            vec![CartesianDomain::new(0, Coord([0]), Coord([9]))]
        } else {
            Vec::new()
        };
        make_pattern(&setup, &transport, &gen, &domains).unwrap()
    });
    assert_eq!(patterns[0].len(), 1);
    assert!(patterns[1].is_empty());
    assert!(patterns[0][0].recv_halos().is_empty());
}
