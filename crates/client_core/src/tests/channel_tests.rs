use std::time::Duration;

use serde_json::json;
use shared::domain::PresenceStatus;

use super::*;
use crate::test_support::{peer, FakeConnector};

const ME: UserId = UserId(1);

fn bob() -> Peer {
    peer(2, "bob")
}

fn classify(raw: serde_json::Value) -> FrameDisposition {
    let frame = InboundFrame::decode(&raw.to_string()).expect("decodes");
    classify_frame(&frame, &bob(), ME)
}

#[test]
fn presence_of_current_peer_is_applied() {
    assert_eq!(
        classify(json!({"type": "presence", "user_id": 2, "status": "offline"})),
        FrameDisposition::Presence { online: false }
    );
    assert_eq!(
        classify(json!({"type": "presence", "user_id": 2, "status": "online"})),
        FrameDisposition::Presence { online: true }
    );
}

#[test]
fn presence_and_typing_of_other_users_are_dropped() {
    assert_eq!(
        classify(json!({"type": "presence", "user_id": 3, "status": "offline"})),
        FrameDisposition::Dropped
    );
    assert_eq!(
        classify(json!({"type": "typing", "sender_id": 3, "is_typing": true})),
        FrameDisposition::Dropped
    );
}

#[test]
fn typing_from_peer_sets_indicator() {
    assert_eq!(
        classify(json!({"type": "typing", "sender_id": 2, "is_typing": true})),
        FrameDisposition::Typing { is_typing: true }
    );
}

#[test]
fn chat_from_third_party_is_dropped() {
    assert_eq!(
        classify(json!({"sender_id": 3, "receiver_id": 1, "message": "psst"})),
        FrameDisposition::Dropped
    );
}

#[test]
fn chat_from_peer_appends_incoming() {
    let FrameDisposition::Append(message) =
        classify(json!({"sender_id": 2, "receiver_id": 1, "message": "hey"}))
    else {
        panic!("expected append");
    };
    assert_eq!(message.text, "hey");
    assert_eq!(message.direction, crate::transcript::Direction::Incoming);
}

#[test]
fn echo_of_own_message_to_peer_appends_outgoing() {
    let FrameDisposition::Append(message) =
        classify(json!({"sender_id": 1, "receiver_id": 2, "content": "mine"}))
    else {
        panic!("expected append");
    };
    assert_eq!(message.text, "mine");
    assert_eq!(message.direction, crate::transcript::Direction::Outgoing);
}

#[test]
fn unknown_presence_status_counts_as_offline() {
    let frame = InboundFrame::Presence {
        user_id: UserId(2),
        status: PresenceStatus::Unknown,
    };
    assert_eq!(
        classify_frame(&frame, &bob(), ME),
        FrameDisposition::Presence { online: false }
    );
}

async fn next(resource: &mut ChannelResource) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(2), resource.next_event())
        .await
        .expect("channel event in time")
}

#[tokio::test]
async fn open_connects_with_token_and_reaches_open() {
    let (connector, mut accepted) = FakeConnector::new();
    let mut resource = ChannelResource::open(connector.clone(), "tok-1", Duration::from_millis(50));
    assert_eq!(resource.status(), ChannelStatus::Connecting);

    let event = next(&mut resource).await;
    assert_eq!(resource.apply(event), Some(ChannelStatus::Open));
    let server = accepted.recv().await.expect("server end");
    assert_eq!(server.token, "tok-1");
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn handshake_failure_schedules_single_reconnect() {
    let (connector, mut accepted) = FakeConnector::new();
    connector.fail_next(1);
    let mut resource = ChannelResource::open(connector.clone(), "tok", Duration::from_millis(50));

    let event = next(&mut resource).await;
    assert_eq!(resource.apply(event), Some(ChannelStatus::ReconnectPending));
    assert!(resource.reconnect_deadline().is_some());
    assert!(matches!(
        resource.last_error(),
        Some(SessionError::ChannelHandshakeFailed(_))
    ));

    let event = next(&mut resource).await;
    assert!(matches!(event, ChannelEvent::ReconnectDue));
    assert_eq!(resource.apply(event), Some(ChannelStatus::Connecting));

    let event = next(&mut resource).await;
    assert_eq!(resource.apply(event), Some(ChannelStatus::Open));
    assert!(accepted.recv().await.is_some());
    assert_eq!(connector.attempts(), 2);
    assert_eq!(resource.attempts(), 2);
    assert!(resource.last_error().is_none());
}

#[tokio::test]
async fn server_close_moves_to_reconnect_pending() {
    let (connector, mut accepted) = FakeConnector::new();
    let mut resource = ChannelResource::open(connector, "tok", Duration::from_millis(50));
    let event = next(&mut resource).await;
    resource.apply(event);
    let server = accepted.recv().await.expect("server end");

    server.push_raw(r#"{"type":"typing","sender_id":2,"is_typing":true}"#);
    let event = next(&mut resource).await;
    assert!(matches!(event, ChannelEvent::Frame(_)));
    assert_eq!(resource.apply(event), None);

    server.close();
    let event = next(&mut resource).await;
    assert_eq!(resource.apply(event), Some(ChannelStatus::ReconnectPending));
    assert!(matches!(
        resource.last_error(),
        Some(SessionError::ChannelDropped(_))
    ));
}

#[tokio::test]
async fn send_requires_open_channel() {
    let (connector, _accepted) = FakeConnector::new();
    connector.delay_connect(Duration::from_secs(5));
    let mut resource = ChannelResource::open(connector, "tok", Duration::from_millis(50));

    let err = resource
        .send(&OutboundFrame::chat(UserId(2), "hi".to_string()))
        .await
        .expect_err("not open yet");
    assert_eq!(
        err,
        SessionError::SendRejected(SendRejection::ChannelNotOpen)
    );
}

#[tokio::test]
async fn send_writes_encoded_frame() {
    let (connector, mut accepted) = FakeConnector::new();
    let mut resource = ChannelResource::open(connector, "tok", Duration::from_millis(50));
    let event = next(&mut resource).await;
    resource.apply(event);
    let mut server = accepted.recv().await.expect("server end");

    resource
        .send(&OutboundFrame::typing(UserId(2), true))
        .await
        .expect("sent");
    assert_eq!(
        server.next_frame().await,
        Some(json!({"type": "typing", "receiver_id": 2, "is_typing": true}))
    );
}

#[tokio::test]
async fn terminate_during_pending_reconnect_never_reconnects() {
    let (connector, _accepted) = FakeConnector::new();
    connector.fail_next(1);
    let mut resource = ChannelResource::open(connector.clone(), "tok", Duration::from_millis(30));
    let event = next(&mut resource).await;
    resource.apply(event);
    assert_eq!(resource.status(), ChannelStatus::ReconnectPending);

    resource.terminate().await;
    assert_eq!(resource.status(), ChannelStatus::Terminated);
    assert!(resource.reconnect_deadline().is_none());

    let waited = tokio::time::timeout(Duration::from_millis(150), resource.next_event()).await;
    assert!(waited.is_err(), "terminated channel must stay silent");
    assert_eq!(resource.apply(ChannelEvent::ReconnectDue), None);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn terminate_closes_open_connection() {
    let (connector, mut accepted) = FakeConnector::new();
    let mut resource = ChannelResource::open(connector, "tok", Duration::from_millis(30));
    let event = next(&mut resource).await;
    resource.apply(event);
    let mut server = accepted.recv().await.expect("server end");

    resource.terminate().await;
    assert!(server.closed_by_client().await);
}
