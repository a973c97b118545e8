//! Integration tests for the trigger server over real loopback sockets.
//!
//! Each test starts its own server on an ephemeral port and talks to it
//! with plain `TcpStream`s, the way instrument clients do.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use trigger_hub::{
    ClientTypes, CommandContext, MemorySink, NirsTrigger, Plugin, ServerOptions, ServerState,
    TriggerServer,
};

const WAIT: Duration = Duration::from_secs(3);

/// Minimal line client.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and consume the `WHO` greeting.
    async fn connect(server: &TriggerServer) -> Self {
        let addr = server.local_addr().expect("server not listening");
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        assert_eq!(client.recv().await.as_deref(), Some("WHO"));
        client
    }

    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn line(&mut self, line: &str) {
        self.send(&format!("{line}\r\n")).await;
    }

    /// Next line without its terminator, or `None` on EOF.
    async fn recv(&mut self) -> Option<String> {
        let mut buf = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut buf))
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(0);
        if n == 0 {
            return None;
        }
        Some(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Assert nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let mut buf = String::new();
        let got = timeout(Duration::from_millis(200), self.reader.read_line(&mut buf)).await;
        assert!(got.is_err(), "unexpected frame: {buf:?}");
    }
}

fn lab_types() -> ClientTypes {
    ClientTypes::from_pairs([("TRG", "trigger"), ("EXP", "experiment")])
}

async fn start(options: ServerOptions) -> TriggerServer {
    let server = TriggerServer::new(options.with_endpoint("127.0.0.1", 0));
    server.start().await.unwrap();
    server
}

async fn strict_server() -> TriggerServer {
    start(ServerOptions::default().with_client_types(lab_types())).await
}

/// Poll `check` until it holds or the wait expires.
async fn eventually(mut check: impl FnMut() -> bool) {
    let polled = timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition never became true");
}

#[tokio::test]
async fn test_verification_flow() {
    let server = strict_server().await;
    let mut client = TestClient::connect(&server).await;

    client.line("DATA 1").await;
    assert_eq!(client.recv().await.as_deref(), Some("!ENOTVERIFIED"));

    client.line("TP EXP").await;
    assert_eq!(client.recv().await.as_deref(), Some("VERIFIED"));

    client.line("TP TRG").await;
    assert_eq!(client.recv().await.as_deref(), Some("!EREPEATDECLARE"));

    assert_eq!(server.clients_of_type("EXP").len(), 1);
    assert!(server.clients_of_type("TRG").is_empty());
}

#[tokio::test]
async fn test_wrong_type_closes_connection_and_removes_client() {
    let server = strict_server().await;
    let mut client = TestClient::connect(&server).await;
    assert_eq!(server.client_count(), 1);

    client.line("TP NOPE").await;
    assert_eq!(client.recv().await.as_deref(), Some("!EWRONGTYPE"));
    assert_eq!(client.recv().await, None);

    eventually(|| server.client_count() == 0).await;
}

#[tokio::test]
async fn test_marker_reaches_only_trigger_clients() {
    let server = strict_server().await;
    NirsTrigger::new().integrate(&server).unwrap();

    let mut trg_a = TestClient::connect(&server).await;
    let mut trg_b = TestClient::connect(&server).await;
    let mut exp = TestClient::connect(&server).await;
    for (client, code) in [(&mut trg_a, "TRG"), (&mut trg_b, "TRG"), (&mut exp, "EXP")] {
        client.line(&format!("TP {code}")).await;
        assert_eq!(client.recv().await.as_deref(), Some("VERIFIED"));
    }

    exp.line("MK onset").await;
    assert_eq!(trg_a.recv().await.as_deref(), Some("onset"));
    assert_eq!(trg_b.recv().await.as_deref(), Some("onset"));

    exp.line("ST").await;
    assert_eq!(trg_a.recv().await.as_deref(), Some("ST"));
    assert_eq!(trg_b.recv().await.as_deref(), Some("ST"));

    exp.line("EX 3 4").await;
    assert_eq!(trg_a.recv().await.as_deref(), Some("EX 3 4"));

    exp.expect_silence().await;
}

#[tokio::test]
async fn test_id_redeclare_and_duplicate() {
    let server = start(ServerOptions::default()).await;
    let mut owner = TestClient::connect(&server).await;
    let mut intruder = TestClient::connect(&server).await;

    owner.line("ID A").await;
    assert_eq!(owner.recv().await.as_deref(), Some("REGISTERED"));
    owner.line("ID B").await;
    assert_eq!(owner.recv().await.as_deref(), Some("REGISTERED"));
    assert!(server.client_by_declared_id("A").is_none());
    assert!(server.client_by_declared_id("B").is_some());

    intruder.line("ID B").await;
    assert_eq!(intruder.recv().await.as_deref(), Some("!EDUPLICATEID"));
    assert_eq!(intruder.recv().await, None);

    eventually(|| server.client_count() == 1).await;
    server.send("MK ping", "B").unwrap();
    assert_eq!(owner.recv().await.as_deref(), Some("MK ping"));
}

#[tokio::test]
async fn test_disconnect_says_bye_and_clears_indexes() {
    let server = strict_server().await;
    let mut client = TestClient::connect(&server).await;

    client.line("TP TRG").await;
    assert_eq!(client.recv().await.as_deref(), Some("VERIFIED"));
    client.line("ID box").await;
    assert_eq!(client.recv().await.as_deref(), Some("REGISTERED"));

    client.line("DC").await;
    assert_eq!(client.recv().await.as_deref(), Some("!BYE"));
    assert_eq!(client.recv().await, None);

    eventually(|| server.client_count() == 0).await;
    assert!(server.clients_of_type("TRG").is_empty());
    assert!(server.client_by_declared_id("box").is_none());
}

#[tokio::test]
async fn test_remote_close_clears_indexes() {
    let server = strict_server().await;
    let mut client = TestClient::connect(&server).await;
    client.line("TP TRG").await;
    assert_eq!(client.recv().await.as_deref(), Some("VERIFIED"));
    client.line("ID box").await;
    assert_eq!(client.recv().await.as_deref(), Some("REGISTERED"));

    drop(client);

    eventually(|| server.client_count() == 0).await;
    assert!(server.clients_of_type("TRG").is_empty());
    assert!(server.client_by_declared_id("box").is_none());
    assert_eq!(server.broadcast("ST", "TRG"), 0);
}

#[tokio::test]
async fn test_uuid_reports_own_session() {
    let server = start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&server).await;

    client.line("UUID").await;
    let reply = client.recv().await.unwrap();
    let uuid = reply.strip_prefix("UUID ").unwrap();

    let clients = server.clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].uuid.to_string(), uuid);
}

#[tokio::test]
async fn test_unknown_command_is_answered_and_logged() {
    let sink = Arc::new(MemorySink::new());
    let server = start(
        ServerOptions::default().with_logger(trigger_hub::Logger::new(
            Arc::clone(&sink) as Arc<dyn trigger_hub::LogSink>
        )),
    )
    .await;
    let mut client = TestClient::connect(&server).await;

    client.line("FOO bar").await;
    assert_eq!(client.recv().await.as_deref(), Some("!EUNKNOWNCMD"));
    assert!(sink.contains("Unknown command 'FOO bar'"));
}

#[tokio::test]
async fn test_single_read_with_type_and_command() {
    let server = strict_server().await;
    server
        .register_command("DATA", |ctx: CommandContext| async move {
            ctx.session.send(format!("ACK {}", ctx.options));
            anyhow::Ok(())
        })
        .unwrap();
    let mut client = TestClient::connect(&server).await;

    client.send("TP EXP\r\nDATA 1\r\n").await;

    assert_eq!(client.recv().await.as_deref(), Some("VERIFIED"));
    assert_eq!(client.recv().await.as_deref(), Some("ACK 1"));
}

#[tokio::test]
async fn test_line_split_across_writes() {
    let server = start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&server).await;

    client.send("UU").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send("ID\n").await;

    let reply = client.recv().await.unwrap();
    assert!(reply.starts_with("UUID "), "got {reply:?}");
}

/// Write `raw`, half-close, and collect everything until the server hangs up.
async fn send_and_hang_up(server: &TriggerServer, raw: &str) -> String {
    let mut stream = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut received = String::new();
    timeout(WAIT, stream.read_to_string(&mut received))
        .await
        .expect("server never closed the connection")
        .unwrap();
    received
}

#[tokio::test]
async fn test_commands_before_half_close_are_relayed() {
    let server = strict_server().await;
    NirsTrigger::new().integrate(&server).unwrap();
    let mut trg = TestClient::connect(&server).await;
    trg.line("TP TRG").await;
    assert_eq!(trg.recv().await.as_deref(), Some("VERIFIED"));

    for round in 0..20 {
        let replies = send_and_hang_up(&server, "TP EXP\r\nST\r\n").await;
        assert!(replies.contains("VERIFIED\r\n"), "round {round}: {replies:?}");
        assert_eq!(trg.recv().await.as_deref(), Some("ST"), "round {round}");
    }

    eventually(|| server.client_count() == 1).await;
}

#[tokio::test]
async fn test_reply_is_flushed_before_half_closed_session_ends() {
    let server = start(ServerOptions::default()).await;

    for round in 0..20 {
        let replies = send_and_hang_up(&server, "UUID\r\n").await;
        assert!(
            replies.lines().any(|l| l.starts_with("UUID ")),
            "round {round}: {replies:?}"
        );
    }

    eventually(|| server.client_count() == 0).await;
}

#[tokio::test]
async fn test_start_retries_until_port_frees() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = TriggerServer::new(ServerOptions::default().with_endpoint("127.0.0.1", port));
    let starter = server.clone();
    let pending = tokio::spawn(async move { starter.start().await });

    eventually(|| server.state() == ServerState::Retrying).await;
    drop(blocker);

    let addr = timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(addr.port(), port);
    assert_eq!(server.state(), ServerState::Listening);
}

#[tokio::test]
async fn test_stop_cancels_pending_retry() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = TriggerServer::new(ServerOptions::default().with_endpoint("127.0.0.1", port));
    let starter = server.clone();
    let pending = tokio::spawn(async move { starter.start().await });

    eventually(|| server.state() == ServerState::Retrying).await;
    assert!(!server.stop().await);

    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(trigger_hub::ServerError::Cancelled)));
    assert_eq!(server.state(), ServerState::Idle);
}

#[tokio::test]
async fn test_change_endpoint_restarts_listener() {
    let server = strict_server().await;
    let client = TestClient::connect(&server).await;

    let moved = server.change_endpoint("127.0.0.1", 0).await.unwrap().unwrap();
    assert_eq!(server.local_addr(), Some(moved));
    assert_eq!(server.state(), ServerState::Listening);

    let _second = TestClient::connect(&server).await;
    // Sessions accepted before the move stay connected.
    assert_eq!(server.client_count(), 2);
    drop(client);

    server.stop().await;
    assert!(TcpStream::connect(moved).await.is_err());
    assert_eq!(server.change_endpoint("127.0.0.1", 0).await.unwrap(), None);
}

#[tokio::test]
async fn test_change_endpoint_during_retry_moves_listener() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = TriggerServer::new(ServerOptions::default().with_endpoint("127.0.0.1", port));
    let starter = server.clone();
    let pending = tokio::spawn(async move { starter.start().await });

    eventually(|| server.state() == ServerState::Retrying).await;
    let moved = server
        .change_endpoint("127.0.0.1", 0)
        .await
        .unwrap()
        .expect("retrying server should restart");

    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.local_addr(), Some(moved));
    assert_ne!(moved.port(), port);

    let old = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(old, Err(trigger_hub::ServerError::Cancelled)));

    // The cancelled attempt must not disturb the new listener.
    drop(blocker);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(server.local_addr(), Some(moved));
    let _client = TestClient::connect(&server).await;
}
