/// === IMPORTS ===

// Ordered map so snapshots come out sorted by connection id.
use std::collections::BTreeMap;

// Arc lets every connection task and the admin layer share one hub.
use std::sync::Arc;

// Monotonic clock for uptime.
use std::time::{Duration, Instant};

// Reference-counted byte buffer: one allocation per broadcast, shared by every mailbox.
use bytes::Bytes;

// Wall-clock timestamps for the admin snapshot.
use chrono::{DateTime, Utc};

// One exclusive lock guards membership and the aggregate counters together.
use parking_lot::Mutex;

// Serializable records for the admin endpoints.
use serde::Serialize;

// Fires when the hub removes a connection, ending both of its loops.
use tokio_util::sync::CancellationToken;

use crate::logger::Logger;
use crate::server::connection::Connection;
use crate::server::mailbox::EnqueueError;


/// === TYPES ===

/// Counters shared by the whole hub.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Totals {
    bytes_in: u64,
    bytes_out: u64,
    msgs_in: u64,
    msgs_out: u64,
    drops: u64,
}

struct HubState {
    members: BTreeMap<u64, Arc<Connection>>,
    // Last id handed out; ids start at 1 and are never reused
    next_id: u64,
    totals: Totals,
}

/// The registry of live connections plus the broadcast engine.
///
/// Critical sections never await and never touch a socket: enqueueing onto
/// a mailbox is non-blocking, so holding the lock across a whole fan-out is
/// bounded by the member count.
pub struct Hub {
    state: Mutex<HubState>,
    max_members: usize,
    mailbox_capacity: usize,
    started: Instant,
    logger: Logger,
}

/// What one broadcast did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// One row of `Hub::snapshot`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: u64,
    pub remote_addr: String,
    #[serde(rename = "connected_since", serialize_with = "rfc3339")]
    pub connected_at: DateTime<Utc>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub msgs_in: u64,
    pub msgs_out: u64,
}

/// Aggregate view returned by `Hub::metrics`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metrics {
    #[serde(rename = "uptime_sec", serialize_with = "whole_seconds")]
    pub uptime: Duration,
    #[serde(rename = "clients")]
    pub member_count: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub msgs_in: u64,
    pub msgs_out: u64,
    pub drops: u64,
    #[serde(rename = "max_clients")]
    pub max_members: usize,
}

fn rfc3339<S: serde::Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

fn whole_seconds<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}


/// === HUB ===

impl Hub {
    pub fn new(max_members: usize, mailbox_capacity: usize, logger: Logger) -> Self {
        Self {
            state: Mutex::new(HubState {
                members: BTreeMap::new(),
                next_id: 0,
                totals: Totals::default(),
            }),
            max_members,
            mailbox_capacity,
            started: Instant::now(),
            logger,
        }
    }

    pub fn max_members(&self) -> usize {
        self.max_members
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admit a new connection.
    ///
    /// Returns `None` when the hub is full; the caller is expected to tell
    /// the peer and close the stream. On success the connection gets the
    /// next id and is immediately visible to concurrent broadcasts.
    /// `closer` is cancelled when the connection is removed.
    pub fn register(
        &self,
        remote_addr: impl Into<String>,
        closer: CancellationToken,
    ) -> Option<Arc<Connection>> {
        let remote_addr = remote_addr.into();
        let (conn, population) = {
            let mut state = self.state.lock();
            if state.members.len() >= self.max_members {
                None
            } else {
                state.next_id += 1;
                let conn = Arc::new(Connection::new(
                    state.next_id,
                    remote_addr.clone(),
                    self.mailbox_capacity,
                    closer,
                ));
                state.members.insert(conn.id(), Arc::clone(&conn));
                Some((conn, state.members.len()))
            }
        }?;
        self.logger.info(&format!(
            "🔌 Client connected: {} ID: {} ({} of {})",
            remote_addr,
            conn.id(),
            population,
            self.max_members
        ));
        Some(conn)
    }

    /// Remove a connection and close its stream.
    ///
    /// Idempotent: only the first call for a given connection changes
    /// membership; it returns whether this call did.
    pub fn remove(&self, conn: &Connection) -> bool {
        let (removed, remaining) = {
            let mut state = self.state.lock();
            let removed = state.members.remove(&conn.id()).is_some();
            (removed, state.members.len())
        };
        conn.close_stream();
        if removed {
            self.logger.info(&format!(
                "🧼 Client disconnected: {} ID: {}; {} clients remain",
                conn.remote_addr(),
                conn.id(),
                remaining
            ));
        }
        removed
    }

    /// Fan `message` out to every member without waiting on any of them.
    ///
    /// A member whose mailbox is full loses this message for good and the
    /// loss is counted as a drop. Delivery is at most once, best effort.
    pub fn broadcast(&self, message: &str) -> BroadcastReport {
        let payload = Bytes::copy_from_slice(message.as_bytes());
        let wire_len = message.len() as u64 + 1;
        let mut report = BroadcastReport::default();
        let mut dropped_ids = Vec::new();

        {
            let mut state = self.state.lock();
            let HubState { members, totals, .. } = &mut *state;
            for (id, conn) in members.iter() {
                match conn.mailbox().try_enqueue(payload.clone()) {
                    Ok(()) => {
                        totals.msgs_out += 1;
                        totals.bytes_out += wire_len;
                        report.delivered += 1;
                    }
                    Err(EnqueueError::Full(_)) | Err(EnqueueError::Closed(_)) => {
                        totals.drops += 1;
                        report.dropped += 1;
                        dropped_ids.push(*id);
                    }
                }
            }
        }

        for id in dropped_ids {
            self.logger.debug(&format!("Drop (backpressure) for client: {}", id));
        }
        self.logger.info(&format!(
            "📣 Broadcast: {} (delivered {}, dropped {})",
            message, report.delivered, report.dropped
        ));
        report
    }

    /// Account one inbound line of `line_len` bytes (terminator not included).
    pub fn record_inbound(&self, line_len: usize) {
        let mut state = self.state.lock();
        state.totals.msgs_in += 1;
        state.totals.bytes_in += line_len as u64 + 1;
    }

    /// Account a message lost outside of a broadcast (e.g. a reply that did not fit).
    pub fn record_drop(&self) {
        self.state.lock().totals.drops += 1;
    }

    /// Point-in-time list of members, ordered by id.
    pub fn snapshot(&self) -> Vec<MemberInfo> {
        let members: Vec<Arc<Connection>> = {
            let state = self.state.lock();
            state.members.values().cloned().collect()
        };
        members
            .iter()
            .map(|conn| {
                let stats = conn.stats();
                MemberInfo {
                    id: conn.id(),
                    remote_addr: conn.remote_addr().to_string(),
                    connected_at: conn.connected_at(),
                    bytes_in: stats.bytes_in,
                    bytes_out: stats.bytes_out,
                    msgs_in: stats.msgs_in,
                    msgs_out: stats.msgs_out,
                }
            })
            .collect()
    }

    pub fn metrics(&self) -> Metrics {
        let state = self.state.lock();
        Metrics {
            uptime: self.started.elapsed(),
            member_count: state.members.len(),
            bytes_in: state.totals.bytes_in,
            bytes_out: state.totals.bytes_out,
            msgs_in: state.totals.msgs_in,
            msgs_out: state.totals.msgs_out,
            drops: state.totals.drops,
            max_members: self.max_members,
        }
    }
}
