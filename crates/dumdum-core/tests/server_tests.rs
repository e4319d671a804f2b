//! End-to-end tests: a real manager on a loopback listener, driven by
//! async clients and by raw sockets.

use dumdum_core::protocol::{Client, ClientEvent, ClientMessage, PROTOCOL_VERSION};
use dumdum_core::{AsyncClient, ClientOptions, Error, Manager, ManagerConfig, ServerState};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

async fn start_server(channels: &[&str]) -> (Manager, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let state = ServerState::with_channels(channels.iter().copied(), 100);
    let manager = Manager::new(state, None, ManagerConfig::default());
    tokio::spawn(manager.clone().serve(listener));
    (manager, addr)
}

async fn connect(addr: &str, nick: &str) -> AsyncClient {
    timeout(STEP, AsyncClient::connect(addr, nick, ClientOptions::default()))
        .await
        .expect("connect timed out")
        .expect("connect")
}

async fn next_event(client: &mut AsyncClient) -> ClientEvent {
    timeout(STEP, client.next_event())
        .await
        .expect("event timed out")
        .expect("event")
        .expect("connection open")
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Open a raw socket and complete only the hello exchange.
async fn half_open(addr: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let client = Client::new("dave");
    stream.write_all(&client.hello().expect("hello")).await.expect("write");

    let mut reply = [0u8; 2];
    timeout(STEP, stream.read_exact(&mut reply))
        .await
        .expect("hello timed out")
        .expect("server hello");
    assert_eq!(reply, [0, 0], "plaintext server hello");
    stream
}

#[tokio::test]
async fn test_broadcast_fan_out() {
    let (manager, addr) = start_server(&["general"]).await;

    let mut alice = connect(&addr, "alice").await;
    let mut bob = connect(&addr, "bob").await;
    let mut carol = connect(&addr, "carol").await;
    let mut dave = half_open(&addr).await;

    let m = manager.clone();
    eventually(|| {
        let m = m.clone();
        async move { m.connection_count().await == 4 }
    })
    .await;

    alice.send_message("general", "hello everyone").await.expect("post");

    for client in [&mut bob, &mut carol, &mut alice] {
        match next_event(client).await {
            ClientEvent::MessageReceived { message } => {
                assert_eq!(message.nick(), "alice");
                assert_eq!(message.channel_name(), "general");
                assert_eq!(message.content(), "hello everyone");
            }
            other => panic!("expected broadcast, got {:?}", other),
        }
    }

    // Exactly one copy each.
    for client in [&mut bob, &mut carol, &mut alice] {
        assert!(timeout(Duration::from_millis(300), client.next_event()).await.is_err());
    }

    // Still authenticating: nothing arrives and the connection survives.
    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(300), dave.read(&mut buf)).await.is_err());
    assert_eq!(manager.connection_count().await, 4);
}

#[tokio::test]
async fn test_nickname_uniqueness() {
    let (manager, addr) = start_server(&["general"]).await;

    let alice = connect(&addr, "alice").await;
    let second = timeout(STEP, AsyncClient::connect(&addr, "alice", ClientOptions::default()))
        .await
        .expect("connect timed out");
    assert!(matches!(second, Err(Error::AuthenticationFailed)));
    assert_eq!(manager.state().read().await.users(), ["alice"]);

    alice.close().await.expect("close");
    let m = manager.clone();
    eventually(|| {
        let m = m.clone();
        async move { m.state().read().await.users().is_empty() }
    })
    .await;

    // Released on disconnect, so it can be claimed again.
    let _again = connect(&addr, "alice").await;
}

#[tokio::test]
async fn test_pipelined_authenticate_releases_every_nick() {
    let (manager, addr) = start_server(&["general"]).await;
    let mut stream = half_open(&addr).await;

    let mut data = Vec::new();
    for nick in ["alice", "bob"] {
        let auth = ClientMessage::Authenticate {
            version: PROTOCOL_VERSION,
            nick: nick.into(),
        };
        data.extend(auth.to_bytes().expect("encode"));
    }
    stream.write_all(&data).await.expect("write");

    // The second Authenticate is out of order and ends the session.
    let mut rest = Vec::new();
    let _ = timeout(STEP, stream.read_to_end(&mut rest))
        .await
        .expect("close timed out");

    let m = manager.clone();
    eventually(|| {
        let m = m.clone();
        async move { m.connection_count().await == 0 }
    })
    .await;
    assert!(manager.state().read().await.users().is_empty());

    let _alice = connect(&addr, "alice").await;
    let _bob = connect(&addr, "bob").await;
}

#[tokio::test]
async fn test_serve_outlives_aborted_clients() {
    let (_manager, addr) = start_server(&["general"]).await;

    for _ in 0..5 {
        let stream = TcpStream::connect(&addr).await.expect("connect");
        stream.set_linger(Some(Duration::ZERO)).expect("linger");
        drop(stream);
    }

    let mut alice = connect(&addr, "alice").await;
    alice.list_channels().await.expect("list channels");
    assert!(matches!(
        next_event(&mut alice).await,
        ClientEvent::ChannelsListed { .. }
    ));
}

#[tokio::test]
async fn test_list_channels_and_history() {
    let (_manager, addr) = start_server(&["random", "general"]).await;
    let mut alice = connect(&addr, "alice").await;

    alice.list_channels().await.expect("list channels");
    match next_event(&mut alice).await {
        ClientEvent::ChannelsListed { channels } => {
            let names: Vec<_> = channels.iter().map(|c| c.name().to_owned()).collect();
            assert_eq!(names, ["general", "random"]);
        }
        other => panic!("expected channel list, got {:?}", other),
    }

    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        alice.send_message("general", text).await.expect("post");
        match next_event(&mut alice).await {
            ClientEvent::MessageReceived { message } => ids.push(message.id()),
            other => panic!("expected own broadcast, got {:?}", other),
        }
    }
    // Unknown channel: dropped without a reply or an error.
    alice.send_message("missing", "lost").await.expect("post");

    alice.list_messages("general", None, None).await.expect("history");
    match next_event(&mut alice).await {
        ClientEvent::MessagesListed { messages } => {
            let contents: Vec<_> = messages.iter().map(|m| m.content().to_owned()).collect();
            assert_eq!(contents, ["one", "two", "three"]);
        }
        other => panic!("expected history, got {:?}", other),
    }

    alice
        .list_messages("general", Some(ids[1]), Some(ids[1]))
        .await
        .expect("ranged history");
    match next_event(&mut alice).await {
        ClientEvent::MessagesListed { messages } => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].content(), "two");
        }
        other => panic!("expected history, got {:?}", other),
    }

    alice.list_messages("missing", None, None).await.expect("history");
    match next_event(&mut alice).await {
        ClientEvent::MessagesListed { messages } => assert!(messages.is_empty()),
        other => panic!("expected empty history, got {:?}", other),
    }
}

#[tokio::test]
async fn test_version_mismatch_closes_connection() {
    let (manager, addr) = start_server(&["general"]).await;

    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    stream
        .write_all(&[0, PROTOCOL_VERSION - 1])
        .await
        .expect("write");

    let mut reply = [0u8; 2];
    timeout(STEP, stream.read_exact(&mut reply))
        .await
        .expect("reply timed out")
        .expect("reply");
    assert_eq!(reply, [1, PROTOCOL_VERSION]);

    let mut rest = Vec::new();
    let read = timeout(STEP, stream.read_to_end(&mut rest))
        .await
        .expect("close timed out");
    assert!(read.map(|n| n == 0).unwrap_or(true));

    let m = manager.clone();
    eventually(|| {
        let m = m.clone();
        async move { m.connection_count().await == 0 }
    })
    .await;
}

#[tokio::test]
async fn test_async_client_reports_incompatible_version() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();

    // A server that refuses every hello.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut hello = [0u8; 2];
        stream.read_exact(&mut hello).await.expect("hello");
        stream.write_all(&[1, PROTOCOL_VERSION + 1]).await.expect("refuse");
    });

    let result = timeout(STEP, AsyncClient::connect(&addr, "alice", ClientOptions::default()))
        .await
        .expect("connect timed out");
    match result {
        Err(Error::IncompatibleVersion {
            server_version,
            client_version,
        }) => {
            assert_eq!(server_version, PROTOCOL_VERSION + 1);
            assert_eq!(client_version, PROTOCOL_VERSION);
        }
        Err(e) => panic!("expected incompatible version, got {}", e),
        Ok(_) => panic!("expected incompatible version, got a session"),
    }
}

#[tokio::test]
async fn test_tls_request_without_connector() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut hello = [0u8; 2];
        stream.read_exact(&mut hello).await.expect("hello");
        stream.write_all(&[0, 1]).await.expect("hello with tls");
    });

    let result = timeout(STEP, AsyncClient::connect(&addr, "alice", ClientOptions::default()))
        .await
        .expect("connect timed out");
    assert!(matches!(result, Err(Error::TlsRequired)));
}

#[tokio::test]
async fn test_malformed_input_only_drops_that_connection() {
    let (manager, addr) = start_server(&["general"]).await;
    let mut alice = connect(&addr, "alice").await;

    let mut rogue = TcpStream::connect(&addr).await.expect("connect");
    rogue.write_all(&[0xFF, 0x00]).await.expect("write");
    let mut rest = Vec::new();
    let read = timeout(STEP, rogue.read_to_end(&mut rest))
        .await
        .expect("close timed out");
    assert!(read.map(|n| n == 0).unwrap_or(true));

    alice.send_message("general", "still here").await.expect("post");
    match next_event(&mut alice).await {
        ClientEvent::MessageReceived { message } => assert_eq!(message.content(), "still here"),
        other => panic!("expected broadcast, got {:?}", other),
    }

    let m = manager.clone();
    eventually(|| {
        let m = m.clone();
        async move { m.connection_count().await == 1 }
    })
    .await;
}

#[tokio::test]
async fn test_fragmented_writes() {
    let (_manager, addr) = start_server(&["general"]).await;
    let mut alice = connect(&addr, "alice").await;

    // Raw client that dribbles its whole session one byte at a time.
    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    let mut bob = Client::new("bob");
    for byte in bob.hello().expect("hello") {
        stream.write_all(&[byte]).await.expect("write");
    }
    let mut buf = [0u8; 2];
    timeout(STEP, stream.read_exact(&mut buf)).await.expect("timeout").expect("read");
    bob.receive_bytes(&buf).expect("server hello");

    for byte in bob.authenticate().expect("authenticate") {
        stream.write_all(&[byte]).await.expect("write");
        stream.flush().await.expect("flush");
    }
    timeout(STEP, stream.read_exact(&mut buf)).await.expect("timeout").expect("read");
    let parsed = bob.receive_bytes(&buf).expect("ack");
    assert_eq!(parsed.events, vec![ClientEvent::Authentication { success: true }]);

    for byte in bob.send_message("general", "slowly").expect("post") {
        stream.write_all(&[byte]).await.expect("write");
        stream.flush().await.expect("flush");
    }

    match next_event(&mut alice).await {
        ClientEvent::MessageReceived { message } => {
            assert_eq!(message.nick(), "bob");
            assert_eq!(message.content(), "slowly");
        }
        other => panic!("expected broadcast, got {:?}", other),
    }
}
