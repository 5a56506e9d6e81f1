use chrono::{Local, SecondsFormat};

use crate::logger::Logger;
use crate::server::connection::Connection;

/// What the core should do with one dispatched line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Queue `text` for the sending connection only.
    Reply(String),
    /// Fan `text` out to every registered connection.
    Broadcast(String),
}

/// The seam between the hub and whatever a line means.
///
/// Implementations decide the vocabulary; the hub applies the returned
/// actions with its own fail-fast rules.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, conn: &Connection, line: &str, logger: &Logger) -> Vec<Action>;
}

/// The default vocabulary: `PING`, `ECHO <text>`, `TIME`, `BCAST <text>`.
/// Anything else is answered with `ERR unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCommands;

impl Dispatch for LineCommands {
    fn dispatch(&self, _conn: &Connection, line: &str, logger: &Logger) -> Vec<Action> {
        if line == "PING" {
            logger.info("PING received");
            vec![Action::Reply("PONG".to_string())]
        } else if let Some(msg) = line.strip_prefix("ECHO ") {
            logger.info(&format!("ECHO: {}", msg));
            vec![Action::Reply(msg.to_string())]
        } else if line == "TIME" {
            logger.info("TIME request");
            vec![Action::Reply(
                Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )]
        } else if let Some(msg) = line.strip_prefix("BCAST ") {
            logger.info(&format!("BCAST: {}", msg));
            vec![Action::Broadcast(msg.to_string())]
        } else {
            logger.info(&format!("Unknown command: {}", line));
            vec![Action::Reply("ERR unknown".to_string())]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn run(line: &str) -> Vec<Action> {
        let conn = Connection::new(1, "peer".into(), 1, CancellationToken::new());
        LineCommands.dispatch(&conn, line, &Logger::default())
    }

    #[test]
    fn known_commands() {
        assert_eq!(run("PING"), vec![Action::Reply("PONG".into())]);
        assert_eq!(run("ECHO hi there"), vec![Action::Reply("hi there".into())]);
        assert_eq!(run("BCAST news"), vec![Action::Broadcast("news".into())]);
    }

    #[test]
    fn time_is_rfc3339() {
        match run("TIME").as_slice() {
            [Action::Reply(ts)] => {
                assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "{}", ts)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn matching_is_exact_and_case_sensitive() {
        let unknown = vec![Action::Reply("ERR unknown".into())];
        assert_eq!(run("ping"), unknown);
        assert_eq!(run("PINGS"), unknown);
        // A prefix command needs its separating space
        assert_eq!(run("BCAST"), unknown);
        assert_eq!(run("ECHOhello"), unknown);
        assert_eq!(run(""), unknown);
    }
}
