//! Integration tests for the async session layer.
//!
//! Each test runs a [`Listener`] and one or more [`Connection`]s over the
//! loopback interface, with a short tick so sessions make progress quickly.
//! Tests that move a lot of traffic use the multi-threaded runtime so the
//! inbound and outbound tasks of one session really run in parallel.

use std::net::SocketAddr;
use std::time::Duration;

use rudp::socket::Socket;
use rudp::{ConnError, Config, Connection, Error, Listener};
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(10);

fn fast_config() -> Config {
    Config {
        tick: Duration::from_millis(2),
        gap_debounce: Duration::from_millis(5),
        ..Config::default()
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Echo every message back until the peer goes away.
async fn echo(mut conn: Connection) {
    while let Ok(message) = conn.recv().await {
        if conn.send(message).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Test 1: message round trip
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_round_trip() {
    let mut listener = Listener::bind(loopback(), fast_config()).await.unwrap();
    let server_addr = listener.local_addr();

    let server = tokio::spawn(async move {
        let conn = listener.accept().await.expect("accept");
        echo(conn).await;
    });

    let mut client = Connection::connect(server_addr, fast_config()).await.unwrap();
    let messages: Vec<Vec<u8>> = vec![b"one".to_vec(), Vec::new(), vec![7; 3000], b"four".to_vec()];
    for m in &messages {
        client.send(m.clone()).await.unwrap();
    }
    for m in &messages {
        let reply = timeout(LIMIT, client.recv()).await.expect("echo in time").unwrap();
        assert_eq!(&reply, m);
    }
    client.close().await.unwrap();
    timeout(LIMIT, server).await.expect("server ends").unwrap();
}

// ---------------------------------------------------------------------------
// Test 2: write fragments, read reassembles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_write_and_read_stream() {
    let config = Config {
        max_payload: 8,
        ..fast_config()
    };
    let mut listener = Listener::bind(loopback(), config.clone()).await.unwrap();
    let server_addr = listener.local_addr();

    let data: Vec<u8> = (0..100u8).collect();
    let expected = data.clone();

    let server = tokio::spawn(async move {
        let mut conn = listener.accept().await.expect("accept");
        let mut collected = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = conn.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            assert!(n <= buf.len());
            collected.extend_from_slice(&buf[..n]);
        }
        collected
    });

    let client = Connection::connect(server_addr, config).await.unwrap();
    assert_eq!(client.write(&data).await.unwrap(), data.len());
    client.close().await.unwrap();

    let collected = timeout(LIMIT, server).await.expect("server ends").unwrap();
    assert_eq!(collected, expected);
}

// ---------------------------------------------------------------------------
// Test 3: oversized messages are rejected locally
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oversized_send_is_rejected() {
    let config = Config {
        max_payload: 16,
        ..fast_config()
    };
    let listener = Listener::bind(loopback(), config.clone()).await.unwrap();
    let client = Connection::connect(listener.local_addr(), config).await.unwrap();

    match client.send(vec![0; 17]).await {
        Err(ConnError::Engine(Error::PayloadTooLarge { len: 17, max: 16 })) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    client.send(vec![0; 16]).await.expect("session still usable");
}

// ---------------------------------------------------------------------------
// Test 4: close is seen by the peer and frees the listener slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_close_reaches_peer() {
    let mut listener = Listener::bind(loopback(), fast_config()).await.unwrap();
    let client = Connection::connect(listener.local_addr(), fast_config()).await.unwrap();

    let mut server_side = timeout(LIMIT, listener.accept()).await.unwrap().unwrap();
    // The client binds the wildcard address, so only the port is comparable.
    assert_eq!(server_side.peer_addr().port(), client.local_addr().port());
    assert_eq!(listener.session_count(), 1);

    client.close().await.unwrap();
    match timeout(LIMIT, server_side.recv()).await.unwrap() {
        Err(ConnError::Engine(Error::RemoteClose)) => {}
        other => panic!("expected remote close, got {other:?}"),
    }

    let deadline = tokio::time::Instant::now() + LIMIT;
    while listener.session_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session never deregistered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Test 5: independent sessions on one listener
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_clients() {
    let mut listener = Listener::bind(loopback(), fast_config()).await.unwrap();
    let server_addr = listener.local_addr();

    let server = tokio::spawn(async move {
        for _ in 0..3 {
            let conn = listener.accept().await.expect("accept");
            tokio::spawn(echo(conn));
        }
        listener
    });

    let mut clients = Vec::new();
    for id in 0..3u8 {
        clients.push(tokio::spawn(async move {
            let mut conn = Connection::connect(server_addr, fast_config()).await.unwrap();
            for i in 0..20u8 {
                conn.send(vec![id, i]).await.unwrap();
            }
            for i in 0..20u8 {
                let reply = timeout(LIMIT, conn.recv()).await.unwrap().unwrap();
                assert_eq!(reply, vec![id, i]);
            }
            conn.close().await.unwrap();
        }));
    }
    for client in clients {
        timeout(LIMIT, client).await.unwrap().unwrap();
    }
    timeout(LIMIT, server).await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Test 6: a silent peer times the session out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_silent_peer_times_out() {
    // Bound but never read, so nothing ever comes back.
    let silent = Socket::bind(loopback()).await.unwrap();
    let config = Config {
        corrupt_timeout: 10,
        ..fast_config()
    };
    let mut client = Connection::connect(silent.local_addr, config).await.unwrap();

    match timeout(LIMIT, client.recv()).await.unwrap() {
        Err(ConnError::Engine(Error::TimedOut)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
}

/// Poll until `listener` routes `count` sessions.
async fn wait_for_sessions(listener: &Listener, count: usize) {
    let deadline = tokio::time::Instant::now() + LIMIT;
    while listener.session_count() != count {
        assert!(tokio::time::Instant::now() < deadline, "expected {count} sessions");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ---------------------------------------------------------------------------
// Test 7: a reader that falls behind does not time the session out
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_reader_keeps_session_alive() {
    // 25 ticks of 2 ms: far shorter than the reader's nap.  Small queues so
    // the application channel fills after a handful of messages.
    let config = Config {
        corrupt_timeout: 25,
        queue_capacity: 4,
        ..fast_config()
    };
    let mut listener = Listener::bind(loopback(), config.clone()).await.unwrap();
    let mut client = Connection::connect(listener.local_addr(), config).await.unwrap();

    for i in 0..40u8 {
        client.send(vec![i]).await.unwrap();
    }
    let mut server_side = timeout(LIMIT, listener.accept()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    for i in 0..40u8 {
        let message = timeout(LIMIT, server_side.recv()).await.unwrap();
        assert_eq!(message.expect("session alive"), vec![i]);
    }

    // Both ends are still usable.
    server_side.send(b"done".to_vec()).await.unwrap();
    assert_eq!(timeout(LIMIT, client.recv()).await.unwrap().unwrap(), b"done");
    client.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 8: closing the listener closes every session
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listener_close_ends_sessions() {
    let mut listener = Listener::bind(loopback(), fast_config()).await.unwrap();
    let server_addr = listener.local_addr();

    let mut clients = Vec::new();
    for id in 0..2u8 {
        let client = Connection::connect(server_addr, fast_config()).await.unwrap();
        client.send(vec![id]).await.unwrap();
        clients.push(client);
    }
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let mut conn = timeout(LIMIT, listener.accept()).await.unwrap().unwrap();
        let first = timeout(LIMIT, conn.recv()).await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        sessions.push(conn);
    }
    wait_for_sessions(&listener, 2).await;

    listener.close();

    for client in &mut clients {
        match timeout(LIMIT, client.recv()).await.unwrap() {
            Err(ConnError::Engine(Error::RemoteClose)) => {}
            other => panic!("expected remote close, got {other:?}"),
        }
    }
    for conn in &mut sessions {
        match timeout(LIMIT, conn.recv()).await.unwrap() {
            Err(ConnError::Engine(Error::LocalClose)) => {}
            other => panic!("expected local close, got {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Test 9: a full accept backlog refuses new peers without stalling others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_backlog_refuses_new_peer() {
    let mut listener = Listener::bind_with_backlog(loopback(), fast_config(), 1)
        .await
        .unwrap();
    let server_addr = listener.local_addr();

    let mut first = Connection::connect(server_addr, fast_config()).await.unwrap();
    first.send(b"queued".to_vec()).await.unwrap();
    wait_for_sessions(&listener, 1).await;

    // Nobody has called accept, so the single slot is taken.
    let mut second = Connection::connect(server_addr, fast_config()).await.unwrap();
    match timeout(LIMIT, second.recv()).await.unwrap() {
        Err(ConnError::Engine(Error::Aborted)) => {}
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(listener.session_count(), 1);

    // The pending session was routed all along.
    let mut accepted = timeout(LIMIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(accepted.peer_addr().port(), first.local_addr().port());
    assert_eq!(timeout(LIMIT, accepted.recv()).await.unwrap().unwrap(), b"queued");
    accepted.send(b"welcome".to_vec()).await.unwrap();
    assert_eq!(timeout(LIMIT, first.recv()).await.unwrap().unwrap(), b"welcome");
    first.close().await.unwrap();
}
