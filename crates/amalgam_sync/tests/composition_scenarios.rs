//! # Composition Scenarios
//!
//! End-to-end runs of the merge/split protocol over the loopback network:
//!
//! 1. **Merge**: two rank-2 units become one rank-3 unit on every peer
//! 2. **Split**: a rank-1 unit spawns a locked twin, both settle unlocked
//! 3. **Rejection**: invalid requests never create a group anywhere
//! 4. **Unreliable links**: duplicated and dropped messages
//!
//! Run with: cargo test --package amalgam_sync --test composition_scenarios

use amalgam_core::{AttributeRow, AttributeTable, PeerId, TransitionId, Unit, UnitId, Vec3};
use amalgam_sync::{
    Accepted, Authority, AuthorityTickReport, CommitOutcome, CompositionBroadcast,
    CompositionRequest, EngineConfig, EntityController, LedgerId, LinkConditions,
    LoopbackNetwork, MockEntityController, PeerBuilder, PeerTransport, Rejection, RequestHeader,
    Response, Selection, SelectionProvider, Session, TICK_DELTA_SECS,
};
use std::sync::Arc;

// ============================================================================
// FIXTURES
// ============================================================================

/// Default table with every transition lasting exactly one second.
fn one_second_table() -> AttributeTable {
    let mut table = AttributeTable::default();
    let len = table.health.len();
    table.merge_duration = vec![1.0; len];
    table.split_duration = vec![1.0; len];
    table
}

/// A session with a player (peer 1) and an observer (peer 2).
fn two_player_session(table: AttributeTable) -> (Session, PeerId, PeerId) {
    let mut session = Session::new(EngineConfig::default(), table).unwrap();
    let player = session.add_peer().unwrap();
    let observer = session.add_peer().unwrap();
    (session, player, observer)
}

fn select(session: &mut Session, peer: PeerId, units: &[UnitId]) {
    session
        .peer_mut(peer)
        .unwrap()
        .selection_mut()
        .set(units.iter().copied());
}

fn accepted(report: &AuthorityTickReport) -> Vec<Accepted> {
    report
        .responses
        .iter()
        .filter_map(|(_, r)| match r {
            Ok(Response::Started(a)) => Some(*a),
            _ => None,
        })
        .collect()
}

// ============================================================================
// SCENARIO 1: MERGE
// ============================================================================

#[test]
fn verify_merge_of_two_rank_two_units() {
    let table = one_second_table();
    let health_mult = table.row(3).unwrap().health;
    let (mut session, player, observer) = two_player_session(table);

    let a = session.spawn_unit(
        Unit::new(player).with_rank(2).with_health(90, 120),
        Vec3::new(0.0, 0.0, 0.0),
    );
    let b = session.spawn_unit(Unit::new(player).with_rank(2), Vec3::new(4.0, 0.0, 0.0));
    session.settle().unwrap();

    select(&mut session, player, &[a, b]);
    let pairs = session.peer_mut(player).unwrap().request_merges().unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!((pairs[0].owner, pairs[0].merging), (a, b));

    // Authority accepts and broadcasts
    let report = session.step().unwrap();
    let started = accepted(&report);
    assert_eq!(started.len(), 1);
    let transition = started[0].transition;
    assert!(session.authority().registry().get(a).unwrap().is_merging());

    // Every peer animates for 60 ticks of 1/60 s
    session.run(60).unwrap();
    for peer in [player, observer] {
        let peer = session.peer(peer).unwrap();
        let group = peer.ledger(LedgerId(player.0)).unwrap().get(transition).unwrap();
        assert!(group.progress().elapsed() >= 1.0);
        assert!(peer.registry().get(b).unwrap().is_merging());
        assert!(!peer.controller().entity(a).unwrap().collision);
    }

    // Next tick: completion, end request, commit
    let report = session.step().unwrap();
    assert!(report
        .responses
        .iter()
        .any(|(_, r)| *r == Ok(Response::Committed(CommitOutcome::Merged { rank: 3 }))));

    let owner = session.authority().registry().get(a).unwrap();
    assert_eq!(owner.rank, 3);
    assert_eq!(owner.max_health, AttributeRow::scale_floor(120, health_mult));
    assert_eq!(owner.current_health, AttributeRow::scale_floor(90, health_mult));
    assert!(!session.authority().registry().contains(b));

    // Replicas follow one tick later
    session.step().unwrap();
    for peer in [player, observer] {
        let peer = session.peer(peer).unwrap();
        let unit = peer.registry().get(a).unwrap();
        assert_eq!(unit.rank, 3);
        assert!(unit.lock.is_idle());
        assert!(!peer.registry().contains(b));
        assert!(!peer.controller().is_spawned(b));
        assert!(!peer.pool().contains(b));
        assert!(peer.controller().entity(a).unwrap().collision);
        // Last update ran one step short of the midpoint
        let position = peer.controller().position(a).unwrap();
        assert!(position.distance_squared(Vec3::new(2.0, 0.0, 0.0)) < 0.01);
    }
    assert!(session.is_quiet());
}

#[test]
fn verify_merge_preserves_health_ratio() {
    let (mut session, player, _) = two_player_session(one_second_table());
    let a = session.spawn_unit(Unit::new(player).with_health(37, 100), Vec3::ZERO);
    let b = session.spawn_unit(Unit::new(player), Vec3::ONE);
    session.settle().unwrap();

    select(&mut session, player, &[a, b]);
    session.peer_mut(player).unwrap().request_merges().unwrap();
    session.run_until_quiet(600).unwrap();

    let owner = session.authority().registry().get(a).unwrap();
    assert_eq!(owner.rank, 2);
    assert!((owner.health_ratio() - 0.37).abs() <= 1.0 / owner.max_health as f32);
}

// ============================================================================
// SCENARIO 2: SPLIT
// ============================================================================

#[test]
fn verify_split_under_capacity() {
    let (mut session, player, observer) = two_player_session(one_second_table());
    let origin = Vec3::new(5.0, 0.0, 5.0);
    let a = session.spawn_unit(Unit::new(player).with_health(80, 100), origin);
    session.settle().unwrap();

    select(&mut session, player, &[a]);
    let candidates = session.peer_mut(player).unwrap().request_splits().unwrap();
    assert_eq!(candidates, vec![a]);

    let report = session.step().unwrap();
    let twin = accepted(&report)[0].spawned.unwrap();
    let registry = session.authority().registry();
    assert!(registry.get(a).unwrap().is_splitting());
    assert!(registry.get(twin).unwrap().is_splitting());
    assert_eq!(registry.get(twin).unwrap().current_health, 80);

    // Peers see the twin appear locked and outside the live pool
    session.step().unwrap();
    for peer in [player, observer] {
        let peer = session.peer(peer).unwrap();
        assert!(peer.registry().get(twin).unwrap().is_splitting());
        assert!(!peer.pool().contains(twin));
        assert!(!peer.selection().selected().contains(&a));
    }

    session.run_until_quiet(600).unwrap();

    for peer in [player, observer] {
        let peer = session.peer(peer).unwrap();
        for unit in [a, twin] {
            assert!(!peer.registry().get(unit).unwrap().is_splitting());
            assert!(peer.pool().contains(unit));
            assert!(peer.controller().entity(unit).unwrap().moving);
        }

        // The two halves end up mirrored about the original position
        let pa = peer.controller().position(a).unwrap();
        let pb = peer.controller().position(twin).unwrap();
        let centre = pa.midpoint(pb);
        assert!(centre.distance_squared(origin) < 1e-6);
        assert!((pa.y - origin.y).abs() < f32::EPSILON);
        assert!(pa.distance_squared(origin) > 0.0);
    }
}

#[test]
fn verify_split_batch_respects_capacity() {
    let mut table = one_second_table();
    table.capacity = 3;
    let (mut session, player, _) = two_player_session(table);
    let a = session.spawn_unit(Unit::new(player), Vec3::ZERO);
    let b = session.spawn_unit(Unit::new(player), Vec3::ONE);
    session.settle().unwrap();

    select(&mut session, player, &[a, b]);
    let candidates = session.peer_mut(player).unwrap().request_splits().unwrap();
    assert_eq!(candidates, vec![a]);

    session.run_until_quiet(600).unwrap();
    assert_eq!(session.authority().registry().count_owned_by(player), 3);

    // Full: nothing more is proposed
    select(&mut session, player, &[a, b]);
    assert!(session.peer_mut(player).unwrap().request_splits().unwrap().is_empty());
}

// ============================================================================
// SCENARIO 3: REJECTION
// ============================================================================

#[test]
fn verify_rank_mismatch_never_creates_group() {
    let network = LoopbackNetwork::new();
    let table = Arc::new(one_second_table());
    let mut authority = Authority::new(
        EngineConfig::default(),
        Arc::clone(&table),
        MockEntityController::new(),
        network.authority_link(),
    );

    // Peer 1 is a raw link, peer 2 a full replica watching peer 1's ledger
    let player = network.connect_peer(PeerId(1));
    let mut observer = PeerBuilder::new(PeerId(2))
        .table(Arc::clone(&table))
        .selection(Selection::new())
        .controller(MockEntityController::new())
        .transport(network.connect_peer(PeerId(2)))
        .build()
        .unwrap();
    assert!(observer.mirror_ledger(LedgerId(1), PeerId(1)));

    let a = authority.spawn_unit(Unit::new(PeerId(1)), Vec3::ZERO, Vec3::ONE);
    let b = authority.spawn_unit(Unit::new(PeerId(1)).with_rank(2), Vec3::ONE, Vec3::ONE);
    authority.tick().unwrap();

    // The resolver would never pair these; send the request by hand
    player
        .send_to_authority(CompositionRequest::Merge {
            header: RequestHeader {
                ledger: LedgerId(1),
                authority: PeerId(1),
            },
            owner: a,
            merging: b,
        })
        .unwrap();

    let report = authority.tick().unwrap();
    assert_eq!(
        report.rejections().cloned().collect::<Vec<_>>(),
        vec![Rejection::RankMismatch {
            owner_rank: 1,
            merging_rank: 2
        }]
    );
    assert!(player
        .drain_broadcasts()
        .iter()
        .all(|b| matches!(b, CompositionBroadcast::UnitState(_))));

    for _ in 0..5 {
        observer.tick(TICK_DELTA_SECS).unwrap();
        authority.tick().unwrap();
    }
    assert_eq!(observer.active_transitions(), 0);
    assert_eq!(observer.registry().len(), 2);
    assert!(observer.registry().get(a).unwrap().lock.is_idle());
    assert!(authority.registry().get(a).unwrap().lock.is_idle());
    assert_eq!(authority.stats().accepted, 0);
}

#[test]
fn verify_competing_merges_for_one_unit() {
    let (mut session, player, observer) = two_player_session(one_second_table());
    let a = session.spawn_unit(Unit::new(player), Vec3::ZERO);
    let b = session.spawn_unit(Unit::new(player), Vec3::ONE);
    let c = session.spawn_unit(Unit::new(player), Vec3::splat(2.0));
    session.settle().unwrap();

    // Both requests leave before the authority has locked anything
    select(&mut session, player, &[a, b]);
    session.peer_mut(player).unwrap().request_merges().unwrap();
    select(&mut session, player, &[c, b]);
    session.peer_mut(player).unwrap().request_merges().unwrap();

    let report = session.step().unwrap();
    assert_eq!(accepted(&report).len(), 1);
    assert!(matches!(
        report.rejections().next(),
        Some(Rejection::Locked { unit, .. }) if *unit == b
    ));

    session.step().unwrap();
    assert_eq!(session.peer(observer).unwrap().active_transitions(), 1);

    session.run_until_quiet(600).unwrap();
    let registry = session.authority().registry();
    assert_eq!(registry.get(a).unwrap().rank, 2);
    assert_eq!(registry.get(c).unwrap().rank, 1);
    assert!(!registry.contains(b));
}

#[test]
fn verify_foreign_units_are_refused() {
    let (mut session, player, observer) = two_player_session(one_second_table());
    let mine = session.spawn_unit(Unit::new(player), Vec3::ZERO);
    let theirs = session.spawn_unit(Unit::new(observer), Vec3::ONE);
    session.settle().unwrap();

    // Selecting somebody else's unit proposes nothing
    select(&mut session, player, &[mine, theirs]);
    assert!(session.peer_mut(player).unwrap().request_merges().unwrap().is_empty());
    select(&mut session, player, &[theirs]);
    assert!(session.peer_mut(player).unwrap().request_splits().unwrap().is_empty());

    session.run(3).unwrap();
    assert!(session.is_quiet());
    assert_eq!(session.authority().stats().accepted, 0);
}

// ============================================================================
// SCENARIO 4: UNRELIABLE LINKS
// ============================================================================

#[test]
fn verify_duplicate_requests_commit_once() {
    let (mut session, player, _) = two_player_session(one_second_table());
    let a = session.spawn_unit(Unit::new(player).with_rank(2), Vec3::ZERO);
    let b = session.spawn_unit(Unit::new(player).with_rank(2), Vec3::ONE);
    session.settle().unwrap();

    assert!(session.set_link_conditions(
        player,
        LinkConditions {
            duplicate_requests: true,
            ..LinkConditions::reliable()
        }
    ));

    select(&mut session, player, &[a, b]);
    session.peer_mut(player).unwrap().request_merges().unwrap();
    session.run_until_quiet(600).unwrap();

    let stats = session.authority().stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.duplicate_commits, 1);
    // The duplicated start request lost the lock race against itself
    assert_eq!(stats.rejected, 1);

    assert_eq!(session.authority().registry().get(a).unwrap().rank, 3);
}

#[test]
fn verify_duplicate_broadcasts_are_harmless() {
    let (mut session, player, observer) = two_player_session(one_second_table());
    let owner = session.spawn_unit(Unit::new(player), Vec3::ZERO);
    session.settle().unwrap();

    session.set_link_conditions(
        observer,
        LinkConditions {
            duplicate_broadcasts: true,
            ..LinkConditions::reliable()
        },
    );

    select(&mut session, player, &[owner]);
    session.peer_mut(player).unwrap().request_splits().unwrap();
    session.run(2).unwrap();
    assert_eq!(session.peer(observer).unwrap().active_transitions(), 1);

    session.run_until_quiet(600).unwrap();
    let authority_units: Vec<_> = session.authority().registry().iter().map(|(id, _)| id).collect();
    let watcher = session.peer(observer).unwrap();
    assert_eq!(watcher.registry().len(), authority_units.len());
    assert_eq!(watcher.pool().len(), 2);
    for id in authority_units {
        assert!(watcher.registry().get(id).unwrap().lock.is_idle());
    }
}

#[test]
fn verify_dropped_start_broadcast_diverges_then_converges() {
    let (mut session, player, observer) = two_player_session(one_second_table());
    let a = session.spawn_unit(Unit::new(player).with_rank(2), Vec3::ZERO);
    let b = session.spawn_unit(Unit::new(player).with_rank(2), Vec3::ONE);
    session.settle().unwrap();

    select(&mut session, player, &[a, b]);
    session.peer_mut(player).unwrap().request_merges().unwrap();

    // The observer misses the start broadcast
    session.set_link_conditions(
        observer,
        LinkConditions {
            drop_broadcasts: true,
            ..LinkConditions::reliable()
        },
    );
    session.step().unwrap();
    session.set_link_conditions(observer, LinkConditions::reliable());
    session.step().unwrap();

    // Group membership has diverged
    assert_eq!(session.peer(player).unwrap().active_transitions(), 1);
    assert_eq!(session.peer(observer).unwrap().active_transitions(), 0);

    // The commit's end broadcast and replication still converge the replica
    session.run_until_quiet(600).unwrap();
    let watcher = session.peer(observer).unwrap();
    assert_eq!(watcher.registry().get(a).unwrap().rank, 3);
    assert!(!watcher.registry().contains(b));
    assert!(watcher.registry().get(a).unwrap().lock.is_idle());
}

#[test]
fn verify_end_request_for_unknown_transition() {
    let network = LoopbackNetwork::new();
    let mut authority = Authority::new(
        EngineConfig::default(),
        Arc::new(one_second_table()),
        MockEntityController::new(),
        network.authority_link(),
    );
    let a = authority.spawn_unit(Unit::new(PeerId(1)), Vec3::ZERO, Vec3::ONE);
    let b = authority.spawn_unit(Unit::new(PeerId(1)), Vec3::ZERO, Vec3::ONE);

    let result = authority.handle_request(
        PeerId(1),
        CompositionRequest::EndMerge {
            header: RequestHeader {
                ledger: LedgerId(1),
                authority: PeerId(1),
            },
            transition: TransitionId(99),
            owner: a,
            merging: b,
        },
    );
    assert_eq!(result, Err(Rejection::UnknownTransition(TransitionId(99))));
    assert_eq!(authority.registry().len(), 2);
}

// ============================================================================
// SCENARIO 5: QUIESCENCE
// ============================================================================

/// Every replica holds exactly the authority's units, unlocked, at the
/// authority's ranks, and every one of them is in the live pool.
fn assert_converged(session: &Session) {
    let truth = session.authority().registry();
    for peer in session.peers() {
        assert_eq!(peer.registry().len(), truth.len(), "{}", peer.id());
        assert_eq!(peer.pool().len(), truth.len(), "{}", peer.id());
        for (id, unit) in truth.iter() {
            let replica = peer.registry().get(id).unwrap();
            assert_eq!(replica.rank, unit.rank);
            assert!(!replica.is_locked());
            assert!(peer.pool().contains(id));
        }
    }
}

#[test]
fn verify_replicas_converged_when_session_goes_quiet() {
    let (mut session, player, _) = two_player_session(one_second_table());
    let units: Vec<_> = (0..4)
        .map(|i| session.spawn_unit(Unit::new(player), Vec3::new(i as f32 * 3.0, 0.0, 0.0)))
        .collect();
    session.settle().unwrap();

    // Split every unit, then merge the whole army back down
    select(&mut session, player, &units);
    assert_eq!(session.peer_mut(player).unwrap().request_splits().unwrap().len(), 4);
    session.run_until_quiet(600).unwrap();
    assert!(session.is_quiet());
    assert_converged(&session);

    for expected_rank in [2, 3, 4] {
        let pool: Vec<_> = session.peer(player).unwrap().pool().iter().collect();
        select(&mut session, player, &pool);
        assert!(!session.peer_mut(player).unwrap().request_merges().unwrap().is_empty());
        session.run_until_quiet(600).unwrap();
        assert_converged(&session);

        let truth = session.authority().registry();
        assert!(truth.iter().all(|(_, u)| u.rank == expected_rank));
    }

    assert_eq!(session.authority().registry().len(), 1);
    assert_eq!(session.authority().stats().rejected, 0);
}

// ============================================================================
// SHIPPED DATA
// ============================================================================

#[test]
fn verify_shipped_data_files_load() {
    let table = AttributeTable::from_toml_str(include_str!("../data/attributes.toml")).unwrap();
    assert_eq!(table, AttributeTable::default());

    let config = EngineConfig::from_toml_str(include_str!("../data/engine.toml")).unwrap();
    assert_eq!(config.rng_seed, 7);

    assert!(Session::new(config, table).is_ok());
}
