//! End-to-end tests against a real listener on an ephemeral port.

use kece::{Config, RwLockEngine, Server, Storage};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
    engine: RwLockEngine,
}

impl TestServer {
    async fn start(auth: &str) -> Self {
        let config = Config {
            port: 0,
            auth: auth.to_string(),
            ..Config::default()
        };
        let engine = RwLockEngine::new();
        let store: Arc<dyn Storage> = Arc::new(engine.clone());
        let server = Server::new(config, store);

        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            stop,
            task,
            engine,
        }
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) -> String {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.recv().await
    }

    async fn recv(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("reply timed out")
            .unwrap()
            .expect("connection closed")
    }
}

#[tokio::test]
async fn test_authenticated_session() {
    let server = TestServer::start("secret123").await;
    let mut client = TestClient::connect(server.addr).await;

    assert_eq!(client.send("AUTH secret123").await, "OK");
    assert_eq!(client.send("SET foo bar").await, "OK");
    assert_eq!(client.send("GET foo").await, "bar");
    assert_eq!(client.send("DEL foo").await, "OK");
    assert_eq!(client.send("GET foo").await, "ERROR");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unauthenticated_set_is_rejected() {
    let server = TestServer::start("secret123").await;
    let mut client = TestClient::connect(server.addr).await;

    assert_eq!(client.send("SET foo bar").await, "ERROR invalid auth");
    assert!(server.engine.get("foo").is_err());

    // A wrong secret does not help either
    assert_eq!(client.send("AUTH wrong").await, "ERROR invalid auth");
    assert_eq!(client.send("GET foo").await, "ERROR invalid auth");

    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_does_not_leak_to_other_connections() {
    let server = TestServer::start("secret123").await;
    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;

    assert_eq!(alice.send("AUTH secret123").await, "OK");
    assert_eq!(alice.send("SET foo bar").await, "OK");
    assert_eq!(bob.send("GET foo").await, "ERROR invalid auth");

    server.shutdown().await;
}

#[tokio::test]
async fn test_open_mode_needs_no_auth() {
    let server = TestServer::start("").await;
    let mut client = TestClient::connect(server.addr).await;

    assert_eq!(client.send("SET foo bar").await, "OK");
    assert_eq!(client.send("GET foo").await, "bar");
    assert_eq!(client.send("GET missing").await, "ERROR");
    assert_eq!(client.send("AUTH whatever").await, "ERROR");

    server.shutdown().await;
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let server = TestServer::start("").await;
    let mut client = TestClient::connect(server.addr).await;

    assert_eq!(client.send("").await, "ERROR empty command");
    assert_eq!(client.send("PING").await, "ERROR invalid command");
    assert!(client.send("SET onlykey").await.starts_with("ERROR "));
    assert_eq!(client.send("SET foo bar").await, "OK");

    server.shutdown().await;
}

#[tokio::test]
async fn test_ttl_expires_key() {
    let server = TestServer::start("").await;
    let mut client = TestClient::connect(server.addr).await;

    assert_eq!(client.send("SET temp value 1").await, "OK");
    assert_eq!(client.send("GET temp").await, "value");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.send("GET temp").await, "ERROR");

    server.shutdown().await;
}

#[tokio::test]
async fn test_pipelined_requests_get_one_reply_each() {
    let server = TestServer::start("").await;
    let mut client = TestClient::connect(server.addr).await;

    let mut batch = String::new();
    for i in 0..20 {
        batch.push_str(&format!("SET k{} v{}\n", i, i));
    }
    client.writer.write_all(batch.as_bytes()).await.unwrap();

    for _ in 0..20 {
        assert_eq!(client.recv().await, "OK");
    }

    // Replies may be reordered; compare as a set
    let mut batch = String::new();
    for i in 0..20 {
        batch.push_str(&format!("GET k{}\n", i));
    }
    client.writer.write_all(batch.as_bytes()).await.unwrap();

    let mut seen = HashSet::new();
    for _ in 0..20 {
        seen.insert(client.recv().await);
    }
    let expected: HashSet<String> = (0..20).map(|i| format!("v{}", i)).collect();
    assert_eq!(seen, expected);

    server.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_clients() {
    let server = TestServer::start("secret123").await;
    let mut tasks = Vec::new();

    for _ in 0..16 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = TestClient::connect(addr).await;
            assert_eq!(client.send("AUTH secret123").await, "OK");
            for _ in 0..10 {
                let key: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(12)
                    .map(char::from)
                    .collect();
                let value: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(24)
                    .map(char::from)
                    .collect();
                assert_eq!(client.send(&format!("SET {} {}", key, value)).await, "OK");
                assert_eq!(client.send(&format!("GET {}", key)).await, value);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_client_connections() {
    let server = TestServer::start("").await;
    let mut client = TestClient::connect(server.addr).await;
    assert_eq!(client.send("SET foo bar").await, "OK");

    server.shutdown().await;

    let mut rest = Vec::new();
    let read = tokio::time::timeout(
        Duration::from_secs(5),
        client.lines.get_mut().read_to_end(&mut rest),
    )
    .await
    .expect("connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)));
}
