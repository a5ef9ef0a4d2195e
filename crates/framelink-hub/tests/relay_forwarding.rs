//! Integration tests for the relay against the in-memory transport.
//!
//! The mock endpoints stand in for the host on one side and consumers on the
//! other; each test injects into the receiving endpoints and inspects what
//! the relay sent on the opposite side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use framelink_core::protocol::Envelope;
use framelink_core::{decode_control, CommandName, Rotation, Transform, Vector3};
use framelink_session::session::SessionEvent;
use framelink_session::transport::mock::MockTransport;
use framelink_session::transport::{Endpoint, EndpointStatus};
use framelink_hub::application::relay::{PollReport, Relay, RelayError};
use framelink_hub::infrastructure::config::HubConfig;
use tokio_test::{assert_err, assert_ok};

fn start(config: &HubConfig) -> (Relay, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let relay = Relay::start(config, Arc::clone(&transport) as _).unwrap();
    (relay, transport)
}

#[tokio::test]
async fn test_frames_are_forwarded_with_their_topic() {
    // Arrange
    let (mut relay, transport) = start(&HubConfig::default());
    let upstream = transport.endpoint("upstream_frames").unwrap();
    upstream.inject(Envelope::new("cam0", b"frame-a".to_vec()));
    upstream.inject(Envelope::new("cam1", b"frame-b".to_vec()));
    upstream.inject(Envelope::new("cam0", b"frame-c".to_vec()));

    // Act
    let report = relay.poll(Instant::now());

    // Assert
    let sent = transport.endpoint("downstream_frames").unwrap().sent();
    assert_eq!(
        sent,
        vec![
            Envelope::new("cam0", b"frame-a".to_vec()),
            Envelope::new("cam1", b"frame-b".to_vec()),
            Envelope::new("cam0", b"frame-c".to_vec()),
        ]
    );
    assert_eq!(report.frames_forwarded, 3);
    assert_eq!(report.new_cameras, vec!["cam0", "cam1"]);
    assert_eq!(relay.known_cameras(), vec!["cam0", "cam1"]);
    assert_eq!(relay.stats().frames_forwarded, 3);
}

#[tokio::test]
async fn test_camera_filter_is_exact_and_subscribes_by_topic() {
    // Arrange
    let mut config = HubConfig::default();
    config.hub.camera_filter = vec!["cam1".to_string()];
    let (mut relay, transport) = start(&config);
    let upstream = transport.endpoint("upstream_frames").unwrap();
    upstream.inject(Envelope::new("cam1", b"wanted".to_vec()));
    upstream.inject(Envelope::new("cam10", b"prefix match".to_vec()));
    upstream.inject(Envelope::new("cam2", b"other".to_vec()));

    // Act
    relay.poll(Instant::now());

    // Assert
    let sent = transport.endpoint("downstream_frames").unwrap().sent();
    assert_eq!(sent, vec![Envelope::new("cam1", b"wanted".to_vec())]);
    assert_eq!(relay.known_cameras(), vec!["cam1"]);
    assert_eq!(relay.stats().frames_dropped, 0);
}

#[tokio::test]
async fn test_full_downstream_queue_drops_frames_without_stalling() {
    // Arrange
    let (mut relay, transport) = start(&HubConfig::default());
    let upstream = transport.endpoint("upstream_frames").unwrap();
    transport.endpoint("downstream_frames").unwrap().set_would_block(true);
    for i in 0..5u8 {
        upstream.inject(Envelope::new("cam0", vec![i]));
    }

    // Act
    let report = relay.poll(Instant::now());

    // Assert
    assert_eq!(report.frames_forwarded, 0);
    assert_eq!(relay.stats().frames_dropped, 5);
    assert!(matches!(upstream.try_receive(), Ok(None)));
}

#[tokio::test]
async fn test_poll_moves_at_most_the_configured_batch() {
    // Arrange
    let mut config = HubConfig::default();
    config.hub.max_messages_per_poll = 2;
    let (mut relay, transport) = start(&config);
    let upstream = transport.endpoint("upstream_frames").unwrap();
    for _ in 0..5 {
        upstream.inject(Envelope::new("cam0", b"f".to_vec()));
    }

    // Act
    let first = relay.poll(Instant::now());
    let second = relay.poll(Instant::now());
    let third = relay.poll(Instant::now());

    // Assert
    assert_eq!(
        (first.frames_forwarded, second.frames_forwarded, third.frames_forwarded),
        (2, 2, 1)
    );
}

#[tokio::test]
async fn test_commands_are_normalized_before_going_upstream() {
    // Arrange
    let (mut relay, transport) = start(&HubConfig::default());
    let downstream = transport.endpoint("downstream_control").unwrap();
    downstream.inject(Envelope::untagged(b"SET_FORMAT format=grayscale request_id=r1".to_vec()));
    downstream.inject(Envelope::untagged(b"ping".to_vec()));
    downstream.inject(Envelope::untagged(
        br#"{"type":"camera_transform","target_id":"cam0","location":{"x":5.0}}"#.to_vec(),
    ));

    // Act
    let report = relay.poll(Instant::now());

    // Assert
    assert_eq!(report.commands_forwarded, 3);
    let forwarded: Vec<_> = transport
        .endpoint("upstream_control")
        .unwrap()
        .sent()
        .iter()
        .map(|e| decode_control(&e.body).unwrap())
        .collect();
    assert_eq!(forwarded[0].command, CommandName::SetFormat);
    assert_eq!(forwarded[0].request_id.as_deref(), Some("r1"));
    assert_eq!(forwarded[1].command, CommandName::Ping);
    assert!(forwarded[1].request_id.is_some());
    assert_eq!(forwarded[2].command, CommandName::CameraTransform);
    assert_eq!(Transform::from_message(&forwarded[2]).unwrap().location.x, 5.0);
    assert_ne!(forwarded[1].request_id, forwarded[2].request_id);
}

#[tokio::test]
async fn test_invalid_commands_are_rejected_and_counted() {
    // Arrange
    let (mut relay, transport) = start(&HubConfig::default());
    let downstream = transport.endpoint("downstream_control").unwrap();
    for body in [
        &b"EXPLODE now=yes"[..],
        b"SET_RESOLUTION width=0 height=10",
        b"{not json",
        b"ERROR code=timeout",
        b"STATS",
    ] {
        downstream.inject(Envelope::untagged(body.to_vec()));
    }

    // Act
    let report = relay.poll(Instant::now());

    // Assert
    assert_eq!(report.commands_forwarded, 1);
    let stats = relay.stats();
    assert_eq!(stats.commands_rejected, 4);
    assert_eq!(stats.commands_forwarded, 1);
}

#[tokio::test]
async fn test_send_camera_command_issues_transform_with_fresh_id() {
    // Arrange
    let (relay, transport) = start(&HubConfig::default());
    let location = Vector3 { x: 100.0, y: 0.0, z: 50.0 };
    let rotation = Rotation { pitch: -15.0, yaw: 90.0, roll: 0.0 };

    // Act
    let first = assert_ok!(relay.send_camera_command(Some("cam0"), location, rotation));
    let second = assert_ok!(relay.send_camera_command(None, location, rotation));

    // Assert
    assert_ne!(first, second);
    let sent = transport.endpoint("upstream_control").unwrap().sent();
    let msg = decode_control(&sent[0].body).unwrap();
    assert_eq!(msg.command, CommandName::CameraTransform);
    assert_eq!(msg.request_id.as_deref(), Some(first.as_str()));
    let transform = Transform::from_message(&msg).unwrap();
    assert_eq!(transform.target.as_deref(), Some("cam0"));
    assert_eq!(transform.rotation, rotation);
    assert!(Transform::from_message(&decode_control(&sent[1].body).unwrap())
        .unwrap()
        .is_broadcast());
}

#[tokio::test]
async fn test_send_camera_command_reports_full_queue() {
    let (relay, transport) = start(&HubConfig::default());
    transport.endpoint("upstream_control").unwrap().set_would_block(true);

    let err = assert_err!(relay.send_camera_command(None, Vector3::default(), Rotation::default()));

    assert!(matches!(err, RelayError::Send(_)));
    assert_eq!(relay.stats().commands_forwarded, 0);
}

#[tokio::test]
async fn test_start_is_atomic_when_an_endpoint_fails() {
    // Arrange
    let transport = Arc::new(MockTransport::new());
    transport.fail_open("upstream_control");

    // Act
    let err = assert_err!(Relay::start(&HubConfig::default(), Arc::clone(&transport) as _));

    // Assert
    assert!(matches!(err, RelayError::Session(_)));
    for name in ["upstream_frames", "downstream_frames", "downstream_control"] {
        assert!(transport.endpoint(name).unwrap().is_closed(), "{name} left open");
    }
}

#[tokio::test]
async fn test_debug_names_the_relay_endpoints() {
    let (relay, _transport) = start(&HubConfig::default());

    let shown = format!("{relay:?}");

    assert!(shown.starts_with("Relay"));
    assert!(shown.contains("upstream_frames"));
    assert!(shown.contains("running: true"));
}

#[tokio::test]
async fn test_invalid_config_opens_nothing() {
    let transport = Arc::new(MockTransport::new());
    let mut config = HubConfig::default();
    config.hub.camera_filter = vec![String::new()];

    let err = assert_err!(Relay::start(&config, Arc::clone(&transport) as _));

    assert!(matches!(err, RelayError::Config(_)));
    assert_eq!(transport.open_attempts("upstream_frames"), 0);
}

#[tokio::test]
async fn test_broken_upstream_is_reopened_after_backoff() {
    // Arrange
    let mut config = HubConfig::default();
    config.reconnect.initial_delay_ms = 50;
    let (mut relay, transport) = start(&config);
    let t0 = Instant::now();
    transport
        .endpoint("upstream_frames")
        .unwrap()
        .set_status(EndpointStatus::Broken);

    // Act
    let broken = relay.poll(t0);
    let restored = relay.poll(t0 + Duration::from_millis(50));
    transport
        .endpoint("upstream_frames")
        .unwrap()
        .inject(Envelope::new("cam0", b"after".to_vec()));
    let forwarding = relay.poll(t0 + Duration::from_millis(51));

    // Assert
    assert_eq!(
        broken.session_events,
        vec![SessionEvent::EndpointBroken { name: "upstream_frames".into() }]
    );
    assert_eq!(
        restored.session_events,
        vec![SessionEvent::EndpointRestored { name: "upstream_frames".into(), attempts: 1 }]
    );
    assert_eq!(forwarding.frames_forwarded, 1);
}

#[tokio::test]
async fn test_stop_closes_all_endpoints_and_blocks_further_sends() {
    // Arrange
    let (mut relay, transport) = start(&HubConfig::default());
    transport.endpoint("downstream_frames").unwrap().set_unflushed(2);

    // Act
    let abandoned = relay.stop().await;
    let again = relay.stop().await;

    // Assert
    assert_eq!((abandoned, again), (2, 0));
    for name in ["upstream_frames", "downstream_frames", "downstream_control", "upstream_control"] {
        assert!(transport.endpoint(name).unwrap().is_closed(), "{name} left open");
    }
    let err = assert_err!(relay.send_camera_command(None, Vector3::default(), Rotation::default()));
    assert!(matches!(err, RelayError::Stopped));
    assert_eq!(relay.poll(Instant::now()), PollReport::default());
}

#[tokio::test]
async fn test_run_returns_once_the_flag_is_cleared() {
    let (mut relay, _transport) = start(&HubConfig::default());
    relay.running_flag().store(false, std::sync::atomic::Ordering::Release);

    let abandoned = tokio::time::timeout(Duration::from_secs(1), relay.run(Duration::from_millis(5)))
        .await
        .unwrap();

    assert_eq!(abandoned, 0);
    assert!(relay.session().is_stopped());
}
