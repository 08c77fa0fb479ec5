//! Scenario: register an object, apply the initial full snapshot, then a
//! variable write travels to the client as a minimal delta.

use netsync_serde::{BitReader, Serde};
use netsync_shared::{ObjectNetId, VarValue, NONE_INPUT_ID};
use netsync_test::helpers::{Sent, TestPair};

#[test]
fn full_snapshot_then_minimal_delta() {
    let mut pair = TestPair::new();
    let (server_id, _client_id) = pair.register_mirrored("platform", &[("x", VarValue::Int(0))]);

    assert_eq!(
        pair.server.core().store().get(server_id).unwrap().net_id(),
        ObjectNetId(0)
    );

    // First round carries the full snapshot and binds net id 0.
    pair.round();
    assert_eq!(pair.client_host.get("platform", "x"), Some(VarValue::Int(0)));
    assert_eq!(
        pair.client.core().store().local_id_of_net(ObjectNetId(0)),
        pair.client.core().store().find_by_handle(1)
    );

    // The authoritative write.
    pair.server_host.set("platform", "x", VarValue::Int(7));
    pair.server_tick();

    let messages = pair.server_net.drain();
    let payload = messages
        .iter()
        .find_map(|m| match m {
            Sent::State { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .expect("a delta snapshot was sent");

    // Wire check: input id, no active list, no custom data, then exactly
    // one object record carrying only the changed variable.
    let mut reader = BitReader::new(&payload);
    assert_eq!(u32::de(&mut reader).unwrap(), NONE_INPUT_ID);
    assert!(!bool::de(&mut reader).unwrap(), "delta omits the active list");
    assert!(!bool::de(&mut reader).unwrap(), "no custom data");
    assert_eq!(ObjectNetId::de(&mut reader).unwrap(), ObjectNetId(0));
    assert!(!bool::de(&mut reader).unwrap(), "known object travels nameless");
    assert_eq!(u8::de(&mut reader).unwrap(), 1, "var_count");
    assert!(bool::de(&mut reader).unwrap(), "has_value for the changed var");
    assert_eq!(VarValue::de(&mut reader).unwrap(), VarValue::Int(7));
    assert_eq!(
        ObjectNetId::de(&mut reader).unwrap(),
        ObjectNetId::NONE,
        "terminator"
    );

    // Deliver it: the client lands on x = 7.
    pair.client
        .receive_snapshot(&mut pair.client_host, &mut pair.client_net, &payload);
    pair.client_tick();
    assert_eq!(pair.client_host.get("platform", "x"), Some(VarValue::Int(7)));
}

#[test]
fn unchanged_variables_are_not_resent() {
    let mut pair = TestPair::new();
    pair.register_mirrored("platform", &[("x", VarValue::Int(0)), ("y", VarValue::Int(9))]);
    pair.round();

    pair.server_host.set("platform", "x", VarValue::Int(1));
    pair.server_tick();

    let payload = pair
        .server_net
        .drain()
        .into_iter()
        .find_map(|m| match m {
            Sent::State { payload, .. } => Some(payload),
            _ => None,
        })
        .unwrap();

    let mut reader = BitReader::new(&payload);
    u32::de(&mut reader).unwrap();
    assert!(!bool::de(&mut reader).unwrap());
    assert!(!bool::de(&mut reader).unwrap());
    ObjectNetId::de(&mut reader).unwrap();
    bool::de(&mut reader).unwrap();
    assert_eq!(u8::de(&mut reader).unwrap(), 2, "both vars counted");
    assert!(bool::de(&mut reader).unwrap(), "x changed");
    VarValue::de(&mut reader).unwrap();
    assert!(!bool::de(&mut reader).unwrap(), "y unchanged, value omitted");
    assert_eq!(ObjectNetId::de(&mut reader).unwrap(), ObjectNetId::NONE);
}
