use thiserror::Error;

/// Errors surfaced by the hub's entry points.
///
/// Faults of a single connection never show up here; they end in that
/// connection's teardown.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("invalid socket address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

pub type Result<T> = std::result::Result<T, HubError>;
