use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use usdtg_p2p::transport::{dial, serve_incoming};
use usdtg_p2p::{MessageType, NetworkConfig, NetworkManager, NetworkMessage, PeerState};

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn loopback_peers_handshake_and_exchange_messages() {
    let server = NetworkManager::new(NetworkConfig::default());
    let client = NetworkManager::new(NetworkConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    assert!(server.start(addr.port()));
    assert!(client.start(0));

    let blocks = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&blocks);
    server.set_message_handler(move |_, msg| {
        if msg.kind == MessageType::Block {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    serve_incoming(&server, listener).expect("serve");
    let peer_id = dial(&client, addr).expect("dial");

    wait_until("both sides connected", || {
        server.connected_peer_count() == 1 && client.connected_peer_count() == 1
    });
    assert_eq!(
        client.peer(peer_id).expect("present").state,
        PeerState::Connected
    );

    assert!(client.broadcast(&NetworkMessage::new(MessageType::Block, vec![5; 64])));
    wait_until("block delivered", || blocks.load(Ordering::SeqCst) == 1);

    // Ping travels server -> client and the pong comes back.
    let server_side = server.peers()[0].peer_id;
    server
        .send_to(server_side, &NetworkMessage::ping(1))
        .expect("ping");
    wait_until("pong received", || {
        server
            .peer(server_side)
            .map(|p| p.messages_received >= 3)
            .unwrap_or(false)
    });

    client.stop();
    wait_until("server notices the hang-up", || server.peer_count() == 0);

    server.stop();
    assert_eq!(server.peer_count(), 0);
}

#[test]
fn dialing_a_closed_port_fails_the_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = NetworkManager::new(NetworkConfig::default());
    assert!(client.start(0));
    assert!(dial(&client, addr).is_err());
    assert_eq!(client.peer_count(), 0);
    client.stop();
}
