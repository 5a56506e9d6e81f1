/// === IMPORTS ===

// Standard library type for holding an IP address and port together.
use std::net::SocketAddr;

// Arc is an atomic reference counter for shared ownership across tasks.
use std::sync::Arc;

// Tokio's non-blocking TCP listener and stream for incoming connections.
use tokio::net::{TcpListener, TcpStream};

// Writing the "server full" notice before closing a rejected socket.
use tokio::io::AsyncWriteExt;

// Owns every per-connection task so shutdown can wait for them.
use tokio::task::JoinSet;


/// === MODULES ===

pub mod commands;     // line vocabulary behind the `Dispatch` seam
pub mod connection;   // per-connection dual loops and teardown
pub mod hub;          // registry + broadcast engine
pub mod mailbox;      // bounded fail-fast outbound queue
pub mod shutdown;     // process-wide cancellation signal

use crate::admin;
use crate::config::ServerConfig;
use crate::error::HubError;
use crate::logger::Logger;

use crate::server::commands::{Dispatch, LineCommands};
use crate::server::connection::{run_connection, Session};
use crate::server::hub::Hub;
use crate::server::shutdown::Shutdown;


/// === RUN_SERVER ===

/// Launch the whole hub and block until shutdown:
/// - Validates the configuration
/// - Binds the line listener and the admin HTTP listener
/// - Serves both until the shutdown signal fires
/// - Waits for every connection to finish its teardown
pub async fn run_server(
    config: ServerConfig,
    logger: Logger,
    shutdown: Shutdown,
) -> Result<(), HubError> {
    config.validate()?;

    let server = HubServer::bind(config.clone(), Arc::new(LineCommands), logger.clone()).await?;

    let admin_listener = TcpListener::bind(config.admin_socket_addr()?).await?;
    logger.info(&format!(
        "🚀 HTTP server listening on {}",
        admin_listener.local_addr()?
    ));
    let admin_handle = tokio::spawn(admin::serve(
        admin_listener,
        Arc::clone(server.hub()),
        shutdown.clone(),
        logger.clone(),
    ));

    let result = server.run(shutdown.clone()).await;

    // If the line listener failed on its own, take the admin side down too
    shutdown.trigger();
    match admin_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => logger.error(&format!("HTTP listen error: {}", e)),
        Err(e) => logger.error(&format!("HTTP server task failed: {}", e)),
    }

    result
}


/// === SERVER ===

/// The line listener bound to its address, ready to run.
pub struct HubServer<D: Dispatch + ?Sized = LineCommands> {
    listener: TcpListener,
    hub: Arc<Hub>,
    dispatcher: Arc<D>,
    config: ServerConfig,
    logger: Logger,
}

impl<D: Dispatch + ?Sized> HubServer<D> {
    /// Bind `config.listen_addr` and build a fresh hub sized by `config`.
    pub async fn bind(
        config: ServerConfig,
        dispatcher: Arc<D>,
        logger: Logger,
    ) -> Result<Self, HubError> {
        let listener = TcpListener::bind(config.listen_socket_addr()?).await?;
        logger.info(&format!("🚀 TCP server listening on {}", listener.local_addr()?));

        let hub = Arc::new(Hub::new(
            config.max_members,
            config.mailbox_capacity,
            logger.clone(),
        ));

        Ok(Self {
            listener,
            hub,
            dispatcher,
            config,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until `shutdown` fires, then stop accepting and
    /// wait for every connection task to end.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), HubError> {
        let HubServer {
            listener,
            hub,
            dispatcher,
            config,
            logger,
        } = self;

        let session = Session {
            hub,
            dispatcher,
            shutdown: shutdown.clone(),
            read_idle_timeout: config.read_idle_timeout,
            logger: logger.clone(),
        };
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                // 1) Global shutdown signal (e.g. Ctrl+C)
                _ = shutdown.wait() => {
                    logger.info("🧹 Server received shutdown signal.");
                    break;
                }

                // 2) New client arrives
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        handle_new_connection(stream, addr, &session, &mut tasks);
                    }
                    // If accept failed (e.g. too many open files), warn and pause briefly
                    Err(e) => {
                        logger.warn(&format!("⚠️ Accept error: {}", e));
                        tokio::time::sleep(config.accept_error_backoff).await;
                    }
                },

                // 3) Reap finished connection tasks as we go
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        logger.warn(&format!("⚠️ Connection task failed: {}", e));
                    }
                }
            }
        }

        // Stop accepting before waiting on the live connections
        drop(listener);
        logger.info("TCP listener stopping");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                logger.warn(&format!("⚠️ Connection task failed: {}", e));
            }
        }
        logger.info(&format!(
            "✅ All connections closed; {} still registered",
            session.hub.len()
        ));

        Ok(())
    }
}


/// === CONNECTIONS ===

/// Register a freshly accepted socket and spawn its session, or turn it away.
fn handle_new_connection<D: Dispatch + ?Sized>(
    stream: TcpStream,
    addr: SocketAddr,
    session: &Session<D>,
    tasks: &mut JoinSet<()>,
) {
    // Disable Nagle's algorithm so short lines go out immediately
    if let Err(e) = stream.set_nodelay(true) {
        session
            .logger
            .warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", addr, e));
    }

    let closer = session.shutdown.child_token();
    let Some(conn) = session.hub.register(addr.to_string(), closer) else {
        session
            .logger
            .warn(&format!("Connection rejected: server full ({})", addr));
        tasks.spawn(reject(stream));
        return;
    };

    let mut session = session.clone();
    session.logger = session.logger.for_session();
    tasks.spawn(run_connection(session, conn, stream));
}

/// Tell a rejected peer why, then close.
async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(b"ERR server full\n").await;
    let _ = stream.shutdown().await;
}
