//! Integration tests for the fanout-core public API.
//!
//! These tests exercise addresses, payloads, the token codec and the domain
//! rules together, the way the hub engine uses them.

use fanout_core::{
    admit, least_loaded, Address, AddressError, Admission, Base64JsonCodec, Frame, HubConfig,
    Intent, Payload, Protocol, SequenceCounter, SessionCodec, SessionDescription, SessionKind,
};

#[test]
fn test_addresses_built_from_a_sequence_parse_back() {
    // Arrange – a shard numbering its connections
    let ids = SequenceCounter::starting_at(1);
    let hub_id = 1_718_000_000;

    // Act
    let rendered: Vec<String> = (0..3)
        .map(|_| Address::new(Protocol::Ws, hub_id, 4, ids.next()).to_string())
        .collect();

    // Assert
    assert_eq!(
        rendered,
        vec![
            "ws:1718000000:4:1".to_string(),
            "ws:1718000000:4:2".to_string(),
            "ws:1718000000:4:3".to_string(),
        ]
    );
    for raw in &rendered {
        let parsed = Address::parse(raw).expect("rendered address must parse");
        assert_eq!(parsed.hub_id, hub_id);
    }
}

#[test]
fn test_malformed_addresses_are_rejected() {
    let cases = [
        "ws:1:2",
        "ws:1:2:3:4",
        "ws:x:2:3",
        "bogus:1:2:3",
        "ws:1:2:",
        ":::",
    ];

    for raw in cases {
        assert!(Address::parse(raw).is_err(), "{raw} must not parse");
    }
    assert_eq!(Address::parse("a:b"), Err(AddressError::FieldCount(2)));
}

#[test]
fn test_hub_sizing_and_placement_work_together() {
    // Arrange – two shards sized for one connection each
    let config = HubConfig {
        max_connections: 2,
        shard_capacity: 1,
        min_shards: 1,
    };
    let mut loads = vec![0usize; config.shard_count()];

    // Act
    let first = least_loaded(loads.iter().copied()).expect("shards exist");
    loads[first] += 1;
    let second = least_loaded(loads.iter().copied()).expect("shards exist");

    // Assert
    assert_eq!(loads.len(), 2);
    assert_eq!(first, 0);
    assert_eq!(second, 1);
}

#[test]
fn test_offer_token_flows_into_admission() {
    // Arrange – a browser posts a stream offer
    let codec = Base64JsonCodec;
    let token = codec
        .encode(&SessionDescription::offer("v=0"))
        .expect("encode");

    // Act
    let offer = codec.decode_offer(&token).expect("decode");
    let first = admit(SessionKind::Stream, Intent::Open, false);
    let viewer = admit(SessionKind::Stream, Intent::Join, true);

    // Assert
    assert_eq!(offer.sdp, "v=0");
    assert_eq!(first, Admission::Create);
    assert_eq!(viewer, Admission::Forward);
}

#[test]
fn test_json_payload_becomes_connect_event_body() {
    let address = Address::new(Protocol::Sse, 7, 0, 1);

    let body = serde_json::json!({ "client_id": address.to_string() });
    let frame: Frame = Payload::from(body).into();

    assert_eq!(frame.as_text(), Some(r#"{"client_id":"sse:7:0:1"}"#));
}
