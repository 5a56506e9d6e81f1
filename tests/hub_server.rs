use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use relay_hub::{Hub, HubServer, LineCommands, Logger, ServerConfig, Shutdown};

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (rd, wr) = stream.into_split();
        Client {
            lines: BufReader::new(rd).lines(),
            writer: wr,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }
}

fn test_config(max_members: usize) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        admin_addr: "127.0.0.1:0".into(),
        max_members,
        mailbox_capacity: 8,
        read_idle_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

async fn start(
    max_members: usize,
) -> (
    std::net::SocketAddr,
    Arc<Hub>,
    Shutdown,
    tokio::task::JoinHandle<Result<(), relay_hub::HubError>>,
) {
    let server = HubServer::bind(test_config(max_members), Arc::new(LineCommands), Logger::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let hub = Arc::clone(server.hub());
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));
    (addr, hub, shutdown, handle)
}

#[tokio::test]
async fn commands_broadcast_and_capacity_over_tcp() {
    let (addr, hub, shutdown, handle) = start(2).await;

    let mut a = Client::connect(addr).await;
    a.send("PING").await;
    assert_eq!(a.recv().await.as_deref(), Some("PONG"));

    let mut b = Client::connect(addr).await;
    b.send("ECHO hello there").await;
    assert_eq!(b.recv().await.as_deref(), Some("hello there"));
    assert_eq!(hub.len(), 2);

    // The hub is full: a third client is turned away
    let mut c = Client::connect(addr).await;
    assert_eq!(c.recv().await.as_deref(), Some("ERR server full"));
    assert_eq!(c.recv().await, None);
    assert_eq!(hub.len(), 2);

    // A broadcast reaches everyone, the sender included
    a.send("BCAST news").await;
    assert_eq!(a.recv().await.as_deref(), Some("news"));
    assert_eq!(b.recv().await.as_deref(), Some("news"));

    b.send("what").await;
    assert_eq!(b.recv().await.as_deref(), Some("ERR unknown"));

    let metrics = hub.metrics();
    assert_eq!(metrics.msgs_out, 2);
    assert_eq!(metrics.bytes_out, 2 * ("news".len() as u64 + 1));
    assert_eq!(metrics.msgs_in, 4);
    assert_eq!(metrics.drops, 0);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();

    assert!(hub.is_empty());
    assert_eq!(a.recv().await, None);
    assert_eq!(b.recv().await, None);
}

#[tokio::test]
async fn leaving_frees_a_slot_and_ids_keep_growing() {
    let (addr, hub, shutdown, handle) = start(1).await;

    let mut a = Client::connect(addr).await;
    a.send("PING").await;
    assert_eq!(a.recv().await.as_deref(), Some("PONG"));
    let first_id = hub.snapshot()[0].id;

    drop(a);
    for _ in 0..100 {
        if hub.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(hub.is_empty());

    let mut b = Client::connect(addr).await;
    b.send("PING").await;
    assert_eq!(b.recv().await.as_deref(), Some("PONG"));
    let snapshot = hub.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].id > first_id);
    assert_eq!(snapshot[0].msgs_in, 1);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}
