// Public module for reading and validating the hub configuration.
pub mod config;

// Public module exposing the crate-wide error type.
pub mod error;

// Public module exposing logging utilities for connection and server lifecycle events.
pub mod logger;

// The connection hub: registry, mailboxes, per-connection loops, listener.
pub mod server;

// Read-only HTTP views of the hub plus the out-of-band broadcast trigger.
pub mod admin;

// Pull the main entry points up so callers don't have to write full paths.
pub use config::{LoggerConfig, ServerConfig};
pub use error::HubError;
pub use logger::{init_logger, Logger};
pub use server::commands::{Action, Dispatch, LineCommands};
pub use server::connection::{Connection, ConnectionStats, Lifecycle};
pub use server::hub::{BroadcastReport, Hub, MemberInfo, Metrics};
pub use server::mailbox::{EnqueueError, Mailbox};
pub use server::shutdown::{spawn_shutdown_listener, Shutdown};
pub use server::{run_server, HubServer};
