//! Integration tests for the client and server managers: lifecycle
//! events, message dispatch, and the pump contract.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lowlink::{
    Channel, ClientConfig, ClientNetworkManager, LowlinkError, MessageCode, NetworkError,
    NetworkMessage, ProtocolError, ServerConfig, ServerNetworkManager, WireReader, WireWriter,
};

// =========================================================================
// Test messages
// =========================================================================

const CHAT: MessageCode = MessageCode(10);
const COUNTER: MessageCode = MessageCode(11);

struct Chat {
    text: String,
}

impl NetworkMessage for Chat {
    fn serialize(&self, writer: &mut WireWriter) -> Result<(), ProtocolError> {
        writer.write_string(&self.text)
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            text: reader.read_string()?,
        })
    }
}

struct Counter {
    value: u32,
}

impl NetworkMessage for Counter {
    fn serialize(&self, writer: &mut WireWriter) -> Result<(), ProtocolError> {
        writer.write_u32(self.value);
        Ok(())
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            value: reader.read_u32()?,
        })
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on an ephemeral port and returns it with the port.
fn start_server(config: ServerConfig) -> (ServerNetworkManager, u16) {
    let mut server = ServerNetworkManager::new(config).expect("server should build");
    server.listen(0).expect("listen should succeed");
    let port = server.local_addr().expect("should have local addr").port();
    (server, port)
}

fn client() -> ClientNetworkManager {
    ClientNetworkManager::new(ClientConfig::default()).expect("client should build")
}

/// Pumps both managers until `done` reports true, or panics after five
/// seconds.
fn pump_until(
    server: &mut ServerNetworkManager,
    client: &mut ClientNetworkManager,
    mut done: impl FnMut() -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        server.process_message();
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Connects `client` to the local server and pumps until the link is
/// up on both sides.
fn connect_and_wait(
    server: &mut ServerNetworkManager,
    client: &mut ClientNetworkManager,
    port: u16,
) {
    client.connect("127.0.0.1", port).expect("connect");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.is_connected() {
        assert!(Instant::now() < deadline, "connect timed out");
        server.process_message();
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Pumps both managers for a fixed window, for asserting that something
/// does NOT happen.
fn pump_for(server: &mut ServerNetworkManager, client: &mut ClientNetworkManager, window: Duration) {
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        server.process_message();
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn test_connect_lifecycle_events_in_order() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    // Record the order the client-side events fire in.
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    client.on_connecting(move || l.lock().unwrap().push("connecting"));
    let l = Arc::clone(&log);
    client.on_connected(move |conn| {
        assert!(conn.is_connected());
        assert!(conn.connection_id().is_valid());
        l.lock().unwrap().push("connected");
    });

    let server_saw = Arc::new(AtomicU32::new(0));
    let s = Arc::clone(&server_saw);
    server.on_connected(move |conn| {
        assert!(conn.connection_id().is_valid());
        s.store(conn.connection_id().into_inner(), Ordering::SeqCst);
    });

    client.connect("127.0.0.1", port).expect("connect accepted");
    assert!(client.is_active());
    assert!(!client.is_connected());

    let c = Arc::clone(&log);
    let s = Arc::clone(&server_saw);
    pump_until(&mut server, &mut client, move || {
        c.lock().unwrap().len() == 2 && s.load(Ordering::SeqCst) != 0
    });

    assert_eq!(*log.lock().unwrap(), vec!["connecting", "connected"]);
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_connect_while_connected_fails() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    client.connect("127.0.0.1", port).expect("first connect");
    assert!(matches!(
        client.connect("127.0.0.1", port),
        Err(LowlinkError::AlreadyConnected)
    ));

    // Still an error once the attempt has completed.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.is_connected() {
        assert!(Instant::now() < deadline, "connect timed out");
        server.process_message();
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(matches!(
        client.connect("127.0.0.1", port),
        Err(LowlinkError::AlreadyConnected)
    ));
}

#[test]
fn test_connect_refused_reports_failure() {
    // Bind and immediately drop to get a port with nothing behind it.
    let port = {
        let sock = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        sock.local_addr().expect("addr").port()
    };

    let mut client = client();
    let failed_with = Arc::new(Mutex::new(None));
    let f = Arc::clone(&failed_with);
    client.on_connecting_failed(move |error| *f.lock().unwrap() = Some(error));

    client.connect("127.0.0.1", port).expect("connect accepted");

    let deadline = Instant::now() + Duration::from_secs(5);
    while failed_with.lock().unwrap().is_none() {
        assert!(Instant::now() < deadline, "timed out waiting for failure");
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(
        *failed_with.lock().unwrap(),
        Some(NetworkError::ConnectionRefused)
    );
    assert!(!client.is_active());
    assert_eq!(
        client.connection().last_error(),
        Some(NetworkError::ConnectionRefused)
    );
}

#[test]
fn test_disconnect_is_idempotent() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let disconnects = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&disconnects);
    client.on_disconnected(move |conn| {
        assert!(!conn.is_connected());
        d.fetch_add(1, Ordering::SeqCst);
    });

    client.connect("127.0.0.1", port).expect("connect");

    // Cancelling an attempt that never completed produces no
    // notification, and repeating the cancel is harmless.
    client.disconnect();
    client.disconnect();
    assert!(!client.is_active());
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);

    // Stale events from the cancelled attempt must be ignored, and the
    // manager must be reusable afterwards.
    pump_for(&mut server, &mut client, Duration::from_millis(50));
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    client.connect("127.0.0.1", port).expect("reconnect");
}

#[test]
fn test_local_disconnect_notifies_synchronously() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let disconnects = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&disconnects);
    client.on_disconnected(move |conn| {
        assert!(conn.last_error().is_none());
        d.fetch_add(1, Ordering::SeqCst);
    });

    connect_and_wait(&mut server, &mut client, port);

    // The notification lands inside the call, before any further pump.
    client.disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!client.is_active());

    // Repeating it is a no-op.
    client.disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    // Later pumps must not replay events from the retired link.
    pump_for(&mut server, &mut client, Duration::from_millis(50));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_server_shutdown_notifies_each_connection() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let server_disconnects = Arc::new(AtomicUsize::new(0));
    {
        let d = Arc::clone(&server_disconnects);
        server.on_disconnected(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
    }
    let client_closed = Arc::new(AtomicBool::new(false));
    {
        let c = Arc::clone(&client_closed);
        client.on_disconnected(move |conn| {
            // Remote close without an error is a clean shutdown.
            assert!(conn.last_error().is_none());
            c.store(true, Ordering::SeqCst);
        });
    }

    connect_and_wait(&mut server, &mut client, port);

    server.shutdown();
    assert_eq!(server_disconnects.load(Ordering::SeqCst), 1);
    assert!(!server.is_active());
    assert_eq!(server.connection_count(), 0);

    // The client notices the close on a later pump.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client_closed.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "client never saw the close");
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(!client.is_connected());
}

#[test]
fn test_idle_timeout_tears_down_silent_link() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = ClientNetworkManager::new(ClientConfig {
        connection_timeout: Duration::from_millis(300),
        ..ClientConfig::default()
    })
    .expect("client should build");

    let observed = Arc::new(Mutex::new(None));
    {
        let o = Arc::clone(&observed);
        client.on_disconnected(move |conn| *o.lock().unwrap() = Some(conn.last_error()));
    }

    connect_and_wait(&mut server, &mut client, port);

    // Neither side sends anything; the client's idle timeout must kill
    // the link on its own.
    let o = Arc::clone(&observed);
    pump_until(&mut server, &mut client, move || {
        o.lock().unwrap().is_some()
    });

    assert_eq!(
        *observed.lock().unwrap(),
        Some(Some(NetworkError::Timeout))
    );
    assert!(!client.is_connected());
    assert_eq!(client.connection().last_error(), Some(NetworkError::Timeout));
}

#[test]
fn test_server_disconnect_notifies_synchronously() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let remote_id = Arc::new(AtomicU32::new(0));
    {
        let r = Arc::clone(&remote_id);
        server.on_connected(move |conn| {
            r.store(conn.connection_id().into_inner(), Ordering::SeqCst)
        });
    }
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let d = Arc::clone(&disconnects);
        server.on_disconnected(move |conn| {
            assert!(conn.last_error().is_none());
            d.fetch_add(1, Ordering::SeqCst);
        });
    }

    connect_and_wait(&mut server, &mut client, port);
    let id = lowlink::ConnectionId::new(remote_id.load(Ordering::SeqCst));
    assert!(id.is_valid());

    // The notification lands inside the call, before any further pump.
    server.disconnect(id).expect("disconnect live connection");
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 0);

    // The id is gone; repeating the call is an error.
    assert!(matches!(
        server.disconnect(id),
        Err(LowlinkError::UnknownConnection(gone)) if gone == id
    ));

    // The client observes the close as a clean remote shutdown.
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.is_connected() {
        assert!(Instant::now() < deadline, "client never saw the close");
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(client.connection().last_error(), None);
}

#[test]
fn test_shutdown_discards_unpumped_accepts() {
    let (mut server, port) = start_server(ServerConfig::default());

    let accepted = Arc::new(AtomicUsize::new(0));
    {
        let a = Arc::clone(&accepted);
        server.on_connected(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Let the accept happen in the background without ever pumping the
    // server, so its queue holds an undelivered accept.
    let mut client = client();
    client.connect("127.0.0.1", port).expect("connect");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.is_connected() {
        assert!(Instant::now() < deadline, "connect timed out");
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }
    std::thread::sleep(Duration::from_millis(200));

    // Restarting the listener must not resurrect the pre-shutdown link.
    server.shutdown();
    server.listen(0).expect("listen again");
    pump_for(&mut server, &mut client, Duration::from_millis(100));

    assert_eq!(accepted.load(Ordering::SeqCst), 0);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_max_connections_rejects_excess() {
    let (mut server, port) = start_server(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    });

    let accepted = Arc::new(AtomicUsize::new(0));
    {
        let a = Arc::clone(&accepted);
        server.on_connected(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut first = client();
    let mut second = client();
    first.connect("127.0.0.1", port).expect("connect");
    second.connect("127.0.0.1", port).expect("connect");

    let a = Arc::clone(&accepted);
    let deadline = Instant::now() + Duration::from_secs(5);
    while a.load(Ordering::SeqCst) < 1 {
        assert!(Instant::now() < deadline, "first connection never accepted");
        server.process_message();
        first.process_message();
        second.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }

    // Give the refused attempt time to resolve either way.
    let settle = Instant::now() + Duration::from_millis(200);
    while Instant::now() < settle {
        server.process_message();
        first.process_message();
        second.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 1);
    assert!(!second.is_connected());
}

// =========================================================================
// Messaging
// =========================================================================

#[test]
fn test_reliable_messages_arrive_in_order() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let r = Arc::clone(&received);
        server
            .register_handler(COUNTER, move |_conn, reader| {
                let msg = Counter::deserialize(reader)?;
                r.lock().unwrap().push(msg.value);
                Ok(())
            })
            .expect("register");
    }

    connect_and_wait(&mut server, &mut client, port);

    for value in 0..50u32 {
        client
            .send_reliable(COUNTER, &Counter { value })
            .expect("send");
    }

    let r = Arc::clone(&received);
    pump_until(&mut server, &mut client, move || {
        r.lock().unwrap().len() == 50
    });
    assert_eq!(*received.lock().unwrap(), (0..50).collect::<Vec<u32>>());
}

#[test]
fn test_server_sends_to_client_by_id() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    // The server greets each connection as soon as it can address it.
    let pending = Arc::new(Mutex::new(Vec::new()));
    {
        let p = Arc::clone(&pending);
        server.on_connected(move |conn| p.lock().unwrap().push(conn.connection_id()));
    }

    let greeting = Arc::new(Mutex::new(None));
    {
        let g = Arc::clone(&greeting);
        client
            .register_handler(CHAT, move |_conn, reader| {
                let msg = Chat::deserialize(reader)?;
                *g.lock().unwrap() = Some(msg.text);
                Ok(())
            })
            .expect("register");
    }

    client.connect("127.0.0.1", port).expect("connect");

    let g = Arc::clone(&greeting);
    let deadline = Instant::now() + Duration::from_secs(5);
    while g.lock().unwrap().is_none() {
        assert!(Instant::now() < deadline, "greeting never arrived");
        server.process_message();
        for id in pending.lock().unwrap().drain(..) {
            server
                .send_reliable(
                    id,
                    CHAT,
                    &Chat {
                        text: "hello".into(),
                    },
                )
                .expect("send to new connection");
        }
        client.process_message();
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(greeting.lock().unwrap().as_deref(), Some("hello"));
}

#[test]
fn test_unreliable_messages_keep_relative_order() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let r = Arc::clone(&received);
        server
            .register_handler(COUNTER, move |_conn, reader| {
                let msg = Counter::deserialize(reader)?;
                r.lock().unwrap().push(msg.value);
                Ok(())
            })
            .expect("register");
    }

    connect_and_wait(&mut server, &mut client, port);

    for value in 0..20u32 {
        client
            .send_unreliable(COUNTER, &Counter { value })
            .expect("send");
    }
    // A reliable marker flushed behind them bounds the wait.
    client
        .send_reliable(COUNTER, &Counter { value: u32::MAX })
        .expect("send marker");

    let r = Arc::clone(&received);
    pump_until(&mut server, &mut client, move || {
        r.lock().unwrap().last() == Some(&u32::MAX)
    });

    // Delivered values may be a subset but must stay ascending.
    let values = received.lock().unwrap();
    let delivered = &values[..values.len() - 1];
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_zero_unreliable_queue_depth_floors_at_one() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = ClientNetworkManager::new(ClientConfig {
        unreliable_queue_len: 0,
        ..ClientConfig::default()
    })
    .expect("client should build");

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let r = Arc::clone(&received);
        server
            .register_handler(COUNTER, move |_conn, reader| {
                let msg = Counter::deserialize(reader)?;
                r.lock().unwrap().push(msg.value);
                Ok(())
            })
            .expect("register");
    }

    connect_and_wait(&mut server, &mut client, port);

    // A configured depth of 0 still leaves room for one message.
    client
        .send_unreliable(COUNTER, &Counter { value: 7 })
        .expect("send");
    client
        .send_reliable(COUNTER, &Counter { value: u32::MAX })
        .expect("send marker");

    // The reliable marker may overtake the unreliable message (the
    // writer favors the reliable queue), so only membership is checked.
    let r = Arc::clone(&received);
    pump_until(&mut server, &mut client, move || {
        r.lock().unwrap().len() == 2
    });
    let values = received.lock().unwrap();
    assert!(values.contains(&7));
    assert!(values.contains(&u32::MAX));
}

#[test]
fn test_handler_error_keeps_connection_open() {
    let (mut server, port) = start_server(ServerConfig::default());
    let mut client = client();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let c = Arc::clone(&calls);
        server
            .register_handler(CHAT, move |_conn, reader| {
                c.fetch_add(1, Ordering::SeqCst);
                // Read past the payload to force a handler failure.
                reader.read_u64()?;
                Ok(())
            })
            .expect("register");
    }

    connect_and_wait(&mut server, &mut client, port);

    client
        .send_reliable(CHAT, &Chat { text: "x".into() })
        .expect("send first");
    client
        .send_reliable(CHAT, &Chat { text: "y".into() })
        .expect("send second");

    let c = Arc::clone(&calls);
    pump_until(&mut server, &mut client, move || {
        c.load(Ordering::SeqCst) == 2
    });

    // The failing handler never cost us the connection.
    assert_eq!(server.connection_count(), 1);
    assert!(client.is_connected());
}

// =========================================================================
// Synchronous error paths
// =========================================================================

#[test]
fn test_send_without_connection_fails() {
    let client = client();
    let result = client.send_reliable(CHAT, &Chat { text: "x".into() });
    assert!(matches!(result, Err(LowlinkError::NotConnected)));
}

#[test]
fn test_send_to_unknown_connection_fails() {
    let (server, _port) = start_server(ServerConfig::default());
    let bogus = lowlink::ConnectionId::new(9999);
    let result = server.send_reliable(bogus, CHAT, &Chat { text: "x".into() });
    assert!(matches!(
        result,
        Err(LowlinkError::UnknownConnection(id)) if id == bogus
    ));
}

#[test]
fn test_duplicate_handler_rejected() {
    let mut client = client();
    client
        .register_handler(CHAT, |_conn, _reader| Ok(()))
        .expect("first registration");
    assert!(matches!(
        client.register_handler(CHAT, |_conn, _reader| Ok(())),
        Err(LowlinkError::DuplicateHandler(code)) if code == CHAT
    ));
}

#[test]
fn test_send_on_unconfigured_channel_fails() {
    let client = ClientNetworkManager::new(ClientConfig {
        channels: vec![Channel::Reliable],
        ..ClientConfig::default()
    })
    .expect("client should build");

    let result = client.send_unreliable(COUNTER, &Counter { value: 1 });
    assert!(matches!(
        result,
        Err(LowlinkError::ChannelUnavailable(Channel::Unreliable))
    ));
}

#[test]
fn test_listen_twice_fails() {
    let (mut server, _port) = start_server(ServerConfig::default());
    assert!(matches!(
        server.listen(0),
        Err(LowlinkError::AlreadyListening)
    ));
}
