//! Echo demo: a server and a client in one process, pumped from a
//! plain loop the way a game would pump them from its update tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use lowlink::{
    ClientConfig, ClientNetworkManager, ConnectionId, LowlinkError, MessageCode, NetworkMessage,
    ProtocolError, ServerConfig, ServerNetworkManager, WireReader, WireWriter,
};

const TEST_MESSAGE: MessageCode = MessageCode(10);
const PORT: u16 = 55555;

struct TestMessage {
    message: String,
}

impl NetworkMessage for TestMessage {
    fn serialize(&self, writer: &mut WireWriter) -> Result<(), ProtocolError> {
        writer.write_string(&self.message)
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            message: reader.read_string()?,
        })
    }
}

fn main() -> Result<(), LowlinkError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ---- Server ----------------------------------------------------------

    let mut server = ServerNetworkManager::new(ServerConfig {
        max_connections: 8,
        ..ServerConfig::default()
    })?;

    // The client's id on the server side, once it connects.
    let remote_client = Arc::new(AtomicU32::new(0));

    {
        let remote = Arc::clone(&remote_client);
        server.on_connected(move |conn| {
            tracing::info!("server: {conn} joined");
            remote.store(conn.connection_id().into_inner(), Ordering::SeqCst);
        });
    }
    server.on_disconnected(|conn| {
        tracing::info!("server: {conn} left");
    });
    server.register_handler(TEST_MESSAGE, |conn, reader| {
        let msg = TestMessage::deserialize(reader)?;
        tracing::info!("server: {conn} says {:?}", msg.message);
        Ok(())
    })?;

    server.listen(PORT)?;

    // ---- Client ----------------------------------------------------------

    let mut client = ClientNetworkManager::new(ClientConfig::default())?;

    client.on_connecting(|| tracing::info!("client: connecting"));
    client.on_connecting_failed(|error| tracing::warn!("client: connect failed: {error}"));
    client.on_connected(|conn| tracing::info!("client: connected as {conn}"));
    client.on_disconnected(|conn| tracing::info!("client: disconnected ({conn})"));
    client.register_handler(TEST_MESSAGE, |_conn, reader| {
        let msg = TestMessage::deserialize(reader)?;
        tracing::info!("client: server says {:?}", msg.message);
        Ok(())
    })?;

    client.connect("localhost", PORT)?;

    // ---- Update loop -----------------------------------------------------

    let mut greeted = false;
    for _tick in 0..120 {
        server.process_message();
        client.process_message();

        if client.is_connected() && !greeted {
            greeted = true;
            client.send_reliable(
                TEST_MESSAGE,
                &TestMessage {
                    message: "hello from the client".into(),
                },
            )?;

            let id = ConnectionId::new(remote_client.load(Ordering::SeqCst));
            if id.is_valid() {
                server.send_reliable(
                    id,
                    TEST_MESSAGE,
                    &TestMessage {
                        message: "hello from the server".into(),
                    },
                )?;
            }
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    client.disconnect();
    server.process_message();
    server.shutdown();

    Ok(())
}
