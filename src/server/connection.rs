/// === IMPORTS ===

// Shared ownership of the hub and of this connection between the two loops.
use std::sync::Arc;

// Per-connection counters and the lifecycle flag are touched lock-free.
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

// Bound on how long the reader waits for the next line.
use std::time::Duration;

// Generic duplex stream: TCP in production, in-memory pipes in tests.
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::logger::Logger;
use crate::server::commands::{Action, Dispatch};
use crate::server::hub::Hub;
use crate::server::mailbox::Mailbox;
use crate::server::shutdown::Shutdown;


/// === TYPES ===

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Both loops may still be running.
    Running = 0,
    /// One loop has ended and the connection has left the hub.
    Terminating = 1,
    /// Both loops are done and the mailbox is closed.
    Terminated = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Running,
            1 => Lifecycle::Terminating,
            _ => Lifecycle::Terminated,
        }
    }
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Eof,
    ReadError,
    IdleTimeout,
    Shutdown,
    /// The writer (or the hub) ended the connection first.
    Closed,
}

/// Why the writer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    StreamError,
    Shutdown,
    MailboxClosed,
    /// The reader (or the hub) ended the connection first.
    Closed,
}

/// Per-connection traffic counters.
#[derive(Debug, Default)]
struct Counters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    msgs_in: AtomicU64,
    msgs_out: AtomicU64,
}

/// Plain copy of a connection's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub msgs_in: u64,
    pub msgs_out: u64,
}

/// One live client. Identity never changes after the hub creates it.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    remote_addr: String,
    connected_at: DateTime<Utc>,
    mailbox: Mailbox,
    // Cancelled by `Hub::remove`; both loops drop their stream half on it
    closer: CancellationToken,
    lifecycle: AtomicU8,
    counters: Counters,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        remote_addr: String,
        mailbox_capacity: usize,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            mailbox: Mailbox::new(mailbox_capacity),
            closer,
            lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_in: self.counters.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.counters.bytes_out.load(Ordering::Relaxed),
            msgs_in: self.counters.msgs_in.load(Ordering::Relaxed),
            msgs_out: self.counters.msgs_out.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn close_stream(&self) {
        self.closer.cancel();
    }

    /// First-terminator-wins cleanup: leave the hub and close the stream.
    ///
    /// Safe to call from both loops; only the first call does anything and
    /// only that call returns `true`.
    pub fn teardown(&self, hub: &Hub) -> bool {
        let won = self
            .lifecycle
            .compare_exchange(
                Lifecycle::Running as u8,
                Lifecycle::Terminating as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            hub.remove(self);
        }
        won
    }

    /// Last step, once both loops are done: close the mailbox.
    async fn finish(&self, hub: &Hub) {
        // A connection whose loops never ran still has to leave the hub
        self.teardown(hub);
        self.mailbox.close().await;
        self.lifecycle
            .store(Lifecycle::Terminated as u8, Ordering::Release);
    }

    /// Queue a reply for this connection only. A reply that does not fit is
    /// dropped like any other message.
    pub fn reply(&self, hub: &Hub, text: &str) -> bool {
        match self.mailbox.try_enqueue(Bytes::copy_from_slice(text.as_bytes())) {
            Ok(()) => true,
            Err(_) => {
                hub.record_drop();
                false
            }
        }
    }

    fn record_in(&self, line_len: usize) {
        self.counters.msgs_in.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_in
            .fetch_add(line_len as u64 + 1, Ordering::Relaxed);
    }

    fn record_out(&self, written: usize) {
        self.counters.msgs_out.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_out
            .fetch_add(written as u64, Ordering::Relaxed);
    }
}


/// === SESSION ===

/// Everything a connection's loops need besides the stream itself.
pub struct Session<D: ?Sized> {
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<D>,
    pub shutdown: Shutdown,
    pub read_idle_timeout: Duration,
    pub logger: Logger,
}

// Manual impl: cloning only bumps the Arcs, `D` itself need not be Clone
impl<D: ?Sized> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: self.shutdown.clone(),
            read_idle_timeout: self.read_idle_timeout,
            logger: self.logger.clone(),
        }
    }
}

/// Drive one registered connection until it ends:
/// - the writer loop runs in its own task, draining the mailbox to the stream
/// - the reader loop runs here, dispatching every line
/// - whichever ends first removes the connection from the hub, which wakes the other
/// - once both are done the mailbox is closed
pub async fn run_connection<S, D>(session: Session<D>, conn: Arc<Connection>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    D: Dispatch + ?Sized,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let writer = tokio::spawn(writer_loop(
        Arc::clone(&session.hub),
        Arc::clone(&conn),
        write_half,
        session.shutdown.clone(),
        session.logger.clone(),
    ));

    let reader_exit = reader_loop(&session, &conn, read_half).await;

    let writer_exit = match writer.await {
        Ok(exit) => exit,
        Err(e) => {
            session
                .logger
                .warn(&format!("⚠️ Writer task for client {} failed: {}", conn.id(), e));
            WriterExit::StreamError
        }
    };

    conn.finish(&session.hub).await;
    session.logger.info(&format!(
        "🔌 Client connection closed: {} ID: {} (reader: {:?}, writer: {:?})",
        conn.remote_addr(),
        conn.id(),
        reader_exit,
        writer_exit
    ));
}

/// Consume lines until EOF, a read error, the idle deadline, or shutdown.
async fn reader_loop<R, D>(session: &Session<D>, conn: &Arc<Connection>, read_half: R) -> ReaderExit
where
    R: AsyncRead + Unpin,
    D: Dispatch + ?Sized,
{
    let mut lines = BufReader::new(read_half).lines();
    let mut logger = session.logger.clone();

    let exit = loop {
        // Cheap check first so a raised signal wins over buffered input
        if session.shutdown.is_triggered() {
            break ReaderExit::Shutdown;
        }

        // The deadline is refreshed before every read
        let next = tokio::select! {
            biased;
            _ = session.shutdown.wait() => break ReaderExit::Shutdown,
            _ = conn.closer.cancelled() => break ReaderExit::Closed,
            next = tokio::time::timeout(session.read_idle_timeout, lines.next_line()) => next,
        };

        let line = match next {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                logger.info(&format!("⚠️ {} disconnected gracefully.", conn.remote_addr()));
                break ReaderExit::Eof;
            }
            Ok(Err(e)) => {
                logger.warn(&format!("❌ Error reading from {}: {}", conn.remote_addr(), e));
                break ReaderExit::ReadError;
            }
            Err(_) => {
                logger.info(&format!(
                    "⏰ Client {} timed out after {:?} of inactivity",
                    conn.remote_addr(),
                    session.read_idle_timeout
                ));
                break ReaderExit::IdleTimeout;
            }
        };

        let line = line.trim();
        session.hub.record_inbound(line.len());
        conn.record_in(line.len());
        logger.new_request();

        for action in session.dispatcher.dispatch(conn, line, &logger) {
            match action {
                Action::Reply(text) => {
                    if !conn.reply(&session.hub, &text) {
                        logger.warn(&format!("Drop (backpressure) for own reply: {}", conn.id()));
                    }
                }
                Action::Broadcast(text) => {
                    session.hub.broadcast(&text);
                }
            }
        }
    };

    conn.teardown(&session.hub);
    exit
}

/// Drain the mailbox to the stream until shutdown, a write error, or closure.
async fn writer_loop<W>(
    hub: Arc<Hub>,
    conn: Arc<Connection>,
    mut write_half: W,
    shutdown: Shutdown,
    logger: Logger,
) -> WriterExit
where
    W: AsyncWrite + Unpin,
{
    let exit = loop {
        let next = tokio::select! {
            biased;
            // Queued messages are abandoned on shutdown
            _ = shutdown.wait() => {
                logger.info(&format!("Client Connection Closed: {} ID: {}", conn.remote_addr(), conn.id()));
                break WriterExit::Shutdown;
            }
            _ = conn.closer.cancelled() => break WriterExit::Closed,
            msg = conn.mailbox().recv() => msg,
        };

        let Some(msg) = next else {
            break WriterExit::MailboxClosed;
        };

        // A peer that stopped reading must not hold the writer past shutdown
        let written = tokio::select! {
            biased;
            _ = shutdown.wait() => break WriterExit::Shutdown,
            _ = conn.closer.cancelled() => break WriterExit::Closed,
            res = write_line(&mut write_half, &msg) => res,
        };

        if let Err(e) = written {
            logger.warn(&format!("❌ Failed to send to client {}: {}", conn.id(), e));
            break WriterExit::StreamError;
        }
        conn.record_out(msg.len() + 1);
    };

    if let Err(e) = write_half.shutdown().await {
        logger.debug(&format!("Shutdown of write half for client {} failed: {}", conn.id(), e));
    }
    conn.teardown(&hub);
    exit
}

async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, msg: &[u8]) -> std::io::Result<()> {
    w.write_all(msg).await?;
    w.write_all(b"\n").await?;
    w.flush().await
}
