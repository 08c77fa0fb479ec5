//! Scenario: the client mispredicts, the server correction triggers a
//! reset-and-replay, and the replayed prediction converges on the
//! authoritative result.

use netsync_shared::{ControllerConfig, SyncEvent, VarValue};
use netsync_test::helpers::{TestPair, CLIENT_PEER};

fn hero_pair() -> (TestPair, netsync_test::helpers::StepQueue, netsync_test::helpers::StepQueue) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut pair = TestPair::new();
    let client_steps = pair
        .client_host
        .make_controller("hero", ControllerConfig::default());
    let server_steps = pair
        .server_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_net.set_authority("hero", CLIENT_PEER);
    pair.client_net.set_authority("hero", CLIENT_PEER);
    pair.register_mirrored("hero", &[("pos", VarValue::Int(0))]);
    (pair, client_steps, server_steps)
}

#[test]
fn prediction_matches_are_validated_without_writes() {
    let (mut pair, client_steps, _server_steps) = hero_pair();

    for _ in 0..12 {
        client_steps.borrow_mut().push_back(1);
        pair.round();
    }
    // Let the in-flight zero-step inputs drain so both sides settle.
    for _ in 0..4 {
        pair.round();
    }

    let events = pair.client.take_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::StateValidated { .. })),
        "matching predictions must still be validated"
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SyncEvent::RewindFrameBegin { .. })),
        "no rewind may happen while predictions match"
    );
    // Both sides ran the same inputs over the same state.
    assert_eq!(
        pair.client_host.get("hero", "pos"),
        pair.server_host.get("hero", "pos")
    );
}

#[test]
fn misprediction_rewinds_and_replays_to_the_authoritative_result() {
    let (mut pair, client_steps, _server_steps) = hero_pair();

    for _ in 0..6 {
        client_steps.borrow_mut().push_back(1);
        pair.round();
    }

    // Authoritative correction the client cannot predict: the server
    // teleports the hero.
    pair.server_host.set("hero", "pos", VarValue::Int(100));

    for _ in 0..8 {
        client_steps.borrow_mut().push_back(1);
        pair.round();
    }
    for _ in 0..4 {
        pair.round();
    }

    let events = pair.client.take_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::RewindFrameBegin { .. })),
        "the divergence must trigger a rewind"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::DesyncDetected { .. })),
        "the divergence must be reported"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::StateValidated { .. })),
        "recovery ends in a validated state"
    );

    // After the correction propagates, replaying the pending inputs over
    // the server state converges both sides.
    assert_eq!(
        pair.client_host.get("hero", "pos"),
        pair.server_host.get("hero", "pos")
    );
    let pos = match pair.client_host.get("hero", "pos") {
        Some(VarValue::Int(pos)) => pos,
        other => panic!("unexpected pos {other:?}"),
    };
    assert!(pos > 100, "the teleport must survive the replay, got {pos}");
}
