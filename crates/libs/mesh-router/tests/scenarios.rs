//! The literal end-to-end routing scenarios: self-loop suppression, TTL
//! expiry, broadcast fan-out, store-and-forward, and SOS unconditional
//! propagation. Chunk reassembly on PairedRadio is covered in
//! `mesh-transport`'s own test suite, since it's purely a transport-layer
//! concern.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use mesh_protocol::{ContentKind, MeshId};
use mesh_router::{MessageStatus, Router, RouterConfig, StatusEvent};
use mesh_transport::{
    Dispatcher, NeighborDiscoveryTransport, PeerAnnouncer, Transport,
};

use mesh_router::persistence::in_memory::{
    InMemoryConversationStore, InMemoryMessageStore, InMemoryPeerStore,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Node {
    router: Arc<Router>,
    nd: Arc<NeighborDiscoveryTransport>,
}

async fn spawn_node(mesh_id: &str, display_name: &str) -> Node {
    let nd = Arc::new(NeighborDiscoveryTransport::new());
    let dispatcher = Arc::new(Dispatcher::new(vec![nd.clone()]));

    let router = Router::new(
        MeshId::new(mesh_id),
        display_name.to_string(),
        RouterConfig::default(),
        Arc::new(InMemoryMessageStore::default()),
        Arc::new(InMemoryPeerStore::default()),
        Arc::new(InMemoryConversationStore::default()),
        dispatcher.clone(),
    );
    dispatcher.set_announcer(router.clone() as Arc<dyn PeerAnnouncer>);

    let channels = dispatcher.start_all().await;
    router.spawn_ingestion(channels);

    Node { router, nd }
}

/// Wires two nodes' NeighborDiscovery transports together as a direct
/// session, simulating them being within radio range of one another.
async fn link(a: &Node, b: &Node, a_name: &str, b_name: &str) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(64);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(64);

    let a_inbound = a
        .nd
        .attach_session(mesh_transport::EndpointId::new(format!("{b_name}-session")), a_to_b_tx)
        .await;
    let b_inbound = b
        .nd
        .attach_session(mesh_transport::EndpointId::new(format!("{a_name}-session")), b_to_a_tx)
        .await;

    // Pump bytes written toward one side into the other's inbound channel.
    tokio::spawn(forward_channel(a_to_b_rx, b_inbound));
    tokio::spawn(forward_channel(b_to_a_rx, a_inbound));
}

async fn forward_channel(mut rx: mpsc::Receiver<Vec<u8>>, tx: mpsc::Sender<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if tx.send(bytes).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn self_loop_suppression() {
    // A -- B -- C, A sends a MESSAGE to C with default max_hops.
    let a = spawn_node("aaa", "Alice").await;
    let b = spawn_node("bbb", "Bob").await;
    let c = spawn_node("ccc", "Carol").await;
    link(&a, &b, "a", "b").await;
    link(&b, &c, "b", "c").await;

    let mut c_incoming = c.router.status_bus().subscribe_incoming_messages();
    let mut a_status = a.router.status_bus().subscribe_status_updates();

    a.router
        .send_message(MeshId::new("ccc"), b"hello carol".to_vec(), ContentKind::Text, None)
        .await
        .expect("send");

    let delivered = tokio::time::timeout(RECV_TIMEOUT, c_incoming.recv())
        .await
        .expect("C should deliver within timeout")
        .expect("channel open");
    assert_eq!(delivered.sender_id, MeshId::new("aaa"));
    assert_eq!(delivered.destination_id, MeshId::new("ccc"));

    // The ACK C sends back must reach A as a MessageDelivered event, and
    // A's own echoed forward of its message must never be redelivered (the
    // loop check on `carries` drops it because A is the origin).
    let mut saw_delivered = false;
    for _ in 0..8 {
        match tokio::time::timeout(RECV_TIMEOUT, a_status.recv()).await {
            Ok(Ok(StatusEvent::MessageDelivered(_))) => {
                saw_delivered = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_delivered, "A should observe exactly one MessageDelivered event");

    // No second delivery should show up at C.
    assert!(tokio::time::timeout(Duration::from_millis(200), c_incoming.recv()).await.is_err());
}

#[tokio::test]
async fn ttl_expiry_stops_forwarding_before_destination() {
    // A -- B -- C -- D, max_hops = 2. The packet arrives at D with
    // hop_count already at the ceiling and is dropped before delivery.
    let a = spawn_node("aaa", "A").await;
    let b = spawn_node("bbb", "B").await;
    let c = spawn_node("ccc", "C").await;
    let d = spawn_node("ddd", "D").await;
    link(&a, &b, "a", "b").await;
    link(&b, &c, "b", "c").await;
    link(&c, &d, "c", "d").await;

    let mut d_incoming = d.router.status_bus().subscribe_incoming_messages();

    // send_message always uses DEFAULT_MAX_HOPS; to exercise the max_hops=2
    // boundary directly we emit the packet through the router's outbound
    // path with a manually constructed low-TTL destination, using `ddd` as
    // target while capping propagation to 2 hops via a raw packet.
    let packet = mesh_protocol::MeshPacket {
        packet_id: mesh_protocol::PacketId::generate(),
        version: mesh_protocol::PROTOCOL_VERSION,
        kind: mesh_protocol::PacketKind::Message,
        sender_id: MeshId::new("aaa"),
        sender_name: "A".into(),
        destination_id: MeshId::new("ddd"),
        hop_count: 0,
        max_hops: 2,
        timestamp: 0,
        previous_hop: None,
        route_path: Vec::new(),
        content_kind: ContentKind::Text,
        content: b"too far".to_vec(),
        media_info: None,
        ack_for_packet_id: None,
    };
    a.nd.send_packet(&packet, None).await.expect("A can send to its only neighbor, B");

    assert!(
        tokio::time::timeout(Duration::from_millis(500), d_incoming.recv()).await.is_err(),
        "D must never see a packet whose TTL expired at C"
    );
}

#[tokio::test]
async fn broadcast_fan_out_delivers_once_to_each_neighbor() {
    let a = spawn_node("aaa", "A").await;
    let b = spawn_node("bbb", "B").await;
    let c = spawn_node("ccc", "C").await;
    link(&a, &b, "a", "b").await;
    link(&a, &c, "a", "c").await;

    let mut b_incoming = b.router.status_bus().subscribe_incoming_messages();
    let mut c_incoming = c.router.status_bus().subscribe_incoming_messages();

    a.router
        .send_message(MeshId::broadcast(), b"everyone".to_vec(), ContentKind::Text, None)
        .await
        .expect("send");

    let at_b = tokio::time::timeout(RECV_TIMEOUT, b_incoming.recv()).await.expect("B delivers").unwrap();
    let at_c = tokio::time::timeout(RECV_TIMEOUT, c_incoming.recv()).await.expect("C delivers").unwrap();
    assert_eq!(at_b.destination_id, MeshId::broadcast());
    assert_eq!(at_c.destination_id, MeshId::broadcast());

    // Each neighbor delivers exactly once despite both being one hop from A.
    assert!(tokio::time::timeout(Duration::from_millis(200), b_incoming.recv()).await.is_err());
    assert!(tokio::time::timeout(Duration::from_millis(200), c_incoming.recv()).await.is_err());
}

#[tokio::test]
async fn sos_is_delivered_and_forwarded_even_without_a_known_sentinel_match() {
    let a = spawn_node("aaa", "A").await;
    let b = spawn_node("bbb", "B").await;
    let c = spawn_node("ccc", "C").await;
    link(&a, &b, "a", "b").await;
    link(&b, &c, "b", "c").await;

    let mut b_status = b.router.status_bus().subscribe_status_updates();
    let mut c_status = c.router.status_bus().subscribe_status_updates();

    a.router.send_sos(b"need help".to_vec()).await.expect("send sos");

    for (name, rx) in [("B", &mut b_status), ("C", &mut c_status)] {
        let mut saw_sos = false;
        for _ in 0..8 {
            match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
                Ok(Ok(StatusEvent::SOSReceived { .. })) => {
                    saw_sos = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_sos, "{name} should observe an SOSReceived event");
    }
}

#[tokio::test]
async fn store_and_forward_replays_on_peer_announce() {
    let a = spawn_node("aaa", "A").await;

    // D is offline: send_message persists the message at SENT status with
    // no connected peer to target.
    let sent = a
        .router
        .send_message(MeshId::new("ddd"), b"catch up later".to_vec(), ContentKind::Text, None)
        .await
        .expect("send");
    assert_eq!(sent.status, MessageStatus::Sent);

    // D comes online and announces itself directly to A (hop 0).
    let d = spawn_node("ddd", "D").await;
    link(&a, &d, "a", "d").await;

    let mut d_incoming = d.router.status_bus().subscribe_incoming_messages();
    // D announces itself; A's NeighborDiscovery link upgrades D's session
    // identity on this first packet and fires the `on_peer_connected` hook,
    // which is what actually triggers store-and-forward on A's side.
    d.router.broadcast_peer_announcement(None, None).await;

    // D's announcement reaching A triggers store-and-forward; D should
    // then receive the previously undeliverable message.
    let mut saw_replay = false;
    for _ in 0..8 {
        match tokio::time::timeout(RECV_TIMEOUT, d_incoming.recv()).await {
            Ok(Ok(message)) if message.content == b"catch up later" => {
                saw_replay = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_replay, "D should eventually receive the store-and-forwarded message");
}
