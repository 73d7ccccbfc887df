//! Several peers handshaking against one UDP server at once.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::ScriptedClient;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tsproto_handshake::config::NetworkConfig;
use tsproto_handshake::core::init::{Init3, INIT1_LEN};
use tsproto_handshake::core::packet::Unmarshal;
use tsproto_handshake::crypto::puzzle;
use tsproto_handshake::protocol::identity::ServerIdentity;
use tsproto_handshake::transport::udp::{CompletedHandshake, UdpServer};

const LEVEL: u32 = 64;

struct Harness {
    addr: SocketAddr,
    identity: Arc<ServerIdentity>,
    completed: mpsc::Receiver<CompletedHandshake>,
    shutdown: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<tsproto_handshake::error::Result<()>>,
}

async fn start(config: NetworkConfig) -> Harness {
    let identity = Arc::new(ServerIdentity::generate("Anonymous").unwrap());
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (completed_tx, completed) = mpsc::channel(64);
    let server = UdpServer::from_socket(socket, &config, Arc::clone(&identity))
        .with_completion_channel(completed_tx);
    let addr = server.local_addr().unwrap();
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(server.run_with_shutdown(shutdown_rx));
    Harness {
        addr,
        identity,
        completed,
        shutdown,
        handle,
    }
}

async fn exchange(sock: &UdpSocket, datagram: &[u8]) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 2048];
    sock.send(datagram).await.unwrap();
    let len = tokio::time::timeout(Duration::from_secs(5), sock.recv(&mut buf))
        .await
        .ok()?
        .unwrap();
    buf.truncate(len);
    Some(buf)
}

/// Run one full handshake from a fresh socket; returns the client's address.
async fn handshake(server: SocketAddr, identity: Arc<ServerIdentity>, nickname: String) -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.connect(server).await.unwrap();
    let mut client = ScriptedClient::new();

    let init1 = exchange(&sock, &client.init0()).await.expect("no Init1");
    let init3 = exchange(&sock, &client.init2(&init1)).await.expect("no Init3");
    let expand_raw = exchange(&sock, &client.init4(&init3)).await.expect("no initivexpand2");
    let expand = client.read_initivexpand2(&expand_raw);
    exchange(&sock, &client.clientek(&expand.beta)).await.expect("no Ack");

    let shared = client.shared_secret(identity.server_ek().secret(), &expand.beta);
    sock.send(&client.client_init(&shared, &nickname)).await.unwrap();
    sock.local_addr().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handshakes_complete_independently() {
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = LEVEL;
    let mut harness = start(config).await;

    let peers = 16;
    let mut tasks = JoinSet::new();
    for i in 0..peers {
        tasks.spawn(handshake(
            harness.addr,
            Arc::clone(&harness.identity),
            format!("peer{i}"),
        ));
    }

    let mut clients = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        clients.insert(res.unwrap());
    }

    let mut nicknames = HashSet::new();
    for _ in 0..peers {
        let done = tokio::time::timeout(Duration::from_secs(10), harness.completed.recv())
            .await
            .expect("handshake did not complete")
            .unwrap();
        assert!(clients.contains(&done.peer));
        nicknames.insert(done.command.params.get("client_nickname").unwrap().to_string());
    }
    assert_eq!(nicknames.len(), peers);

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn full_session_table_refuses_new_peers() {
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = LEVEL;
    config.server.max_sessions = 2;
    let harness = start(config).await;

    let mut sockets = Vec::new();
    for _ in 0..2 {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(harness.addr).await.unwrap();
        assert!(exchange(&sock, &ScriptedClient::new().init0()).await.is_some());
        sockets.push(sock);
    }

    let late = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    late.connect(harness.addr).await.unwrap();
    let mut buf = [0u8; 64];
    late.send(&ScriptedClient::new().init0()).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_millis(300), late.recv(&mut buf)).await;
    assert!(reply.is_err(), "a third peer was admitted");

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_sessions_make_room() {
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = LEVEL;
    config.server.max_sessions = 1;
    config.server.session_idle_timeout = Duration::from_millis(100);
    let harness = start(config).await;

    let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    first.connect(harness.addr).await.unwrap();
    assert!(exchange(&first, &ScriptedClient::new().init0()).await.is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    second.connect(harness.addr).await.unwrap();
    assert!(exchange(&second, &ScriptedClient::new().init0()).await.is_some());

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn retransmitting_into_a_stalled_handshake_times_out() {
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = LEVEL;
    config.server.session_idle_timeout = Duration::from_millis(200);
    let harness = start(config).await;

    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.connect(harness.addr).await.unwrap();
    let client = ScriptedClient::new();
    // the first Init1 is "lost"
    assert!(exchange(&sock, &client.init0()).await.is_some());

    let mut buf = [0u8; 64];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut answered = false;
    while tokio::time::Instant::now() < deadline {
        sock.send(&client.init0()).await.unwrap();
        if let Ok(Ok(len)) =
            tokio::time::timeout(Duration::from_millis(100), sock.recv(&mut buf)).await
        {
            assert_eq!(len, INIT1_LEN);
            answered = true;
            break;
        }
    }
    assert!(answered, "session stuck in LOW_P1 while the peer kept retrying");

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn finished_session_frees_its_slot() {
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = LEVEL;
    config.server.max_sessions = 1;
    let mut harness = start(config).await;

    handshake(harness.addr, Arc::clone(&harness.identity), "first".into()).await;
    let done = tokio::time::timeout(Duration::from_secs(5), harness.completed.recv())
        .await
        .expect("handshake did not complete")
        .unwrap();
    assert_eq!(done.command.params.get("client_nickname"), Some("first"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    second.connect(harness.addr).await.unwrap();
    assert!(
        exchange(&second, &ScriptedClient::new().init0()).await.is_some(),
        "completed session still holds the only slot"
    );

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn puzzle_check_does_not_stall_other_peers() {
    const HEAVY_LEVEL: u32 = 400_000;
    let mut config = NetworkConfig::default();
    config.handshake.puzzle_level = HEAVY_LEVEL;
    let harness = start(config).await;

    let slow = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    slow.connect(harness.addr).await.unwrap();
    let slow_client = ScriptedClient::new();
    let init1 = exchange(&slow, &slow_client.init0()).await.expect("no Init1");
    let init3 = exchange(&slow, &slow_client.init2(&init1)).await.expect("no Init3");

    let fast = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    fast.connect(harness.addr).await.unwrap();

    // a wrong answer still costs the server a full verification
    let started = std::time::Instant::now();
    slow.send(&slow_client.init4_with_answer(&init3, [0u8; 64]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(exchange(&fast, &ScriptedClient::new().init0()).await.is_some());
    let other_peer_latency = started.elapsed();

    harness.shutdown.send(()).await.unwrap();
    harness.handle.await.unwrap().unwrap();

    let parsed = Init3::unmarshal(&init3).unwrap();
    let verify_started = std::time::Instant::now();
    let _ = puzzle::verify(&parsed.x, &parsed.n, parsed.level, &[0u8; 64]);
    let verify_cost = verify_started.elapsed();

    assert!(
        other_peer_latency < verify_cost / 2,
        "Init0 took {other_peer_latency:?} while one verification costs {verify_cost:?}"
    );
}
