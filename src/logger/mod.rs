// Import local time formatting tools from chrono
use chrono::Local;

// Set the global log level (e.g., Debug, Info, Warn, Error)
use log::LevelFilter;

// Set up the dispatch builder for combining logger outputs
use fern::colors::{Color, ColoredLevelConfig};
use fern::Dispatch;

// JSON handling for structured file output
use serde_json::Value as JsonValue;

// Standard I/O and filesystem operations (stdout, file creation)
use std::{fs, io};

// Used to initialize the global dispatcher only once in a thread-safe way
use std::sync::{Arc, OnceLock};

// Import the `LoggerConfig` (parsed from the environment) for all user settings
use crate::config::LoggerConfig;

/// Generate a fresh id for sessions and requests: a v4 uuid without dashes.
fn new_id() -> Arc<str> {
    Arc::from(uuid::Uuid::new_v4().simple().to_string())
}

/// A small Logger handle that wraps the `log` macros.
///
/// Clonable so every task can carry its own copy. A handle may be tagged
/// with a session id (one per connection) and a request id (one per line
/// or admin request); tagged handles prefix every record with both.
#[derive(Clone, Default)]
pub struct Logger {
    session: Option<Arc<str>>,
    request: Option<Arc<str>>,
}

impl Logger {
    /// Derive a handle bound to a brand-new session id.
    pub fn for_session(&self) -> Logger {
        Logger {
            session: Some(new_id()),
            request: None,
        }
    }

    /// Rotate the request id, keeping the session id.
    pub fn new_request(&mut self) {
        self.request = Some(new_id());
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request.as_deref()
    }

    /// Render a message with the session/request prefix, if any.
    pub fn render(&self, msg: &str) -> String {
        match (&self.session, &self.request) {
            (None, None) => msg.to_string(),
            (sid, rid) => format!(
                "Client:{} Request:{} - {}",
                sid.as_deref().unwrap_or("-"),
                rid.as_deref().unwrap_or("-"),
                msg
            ),
        }
    }

    /// Logs a message at DEBUG level
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", self.render(msg));
    }

    /// Logs a message at INFO level
    pub fn info(&self, msg: &str) {
        log::info!("{}", self.render(msg));
    }

    /// Logs a message at WARN level
    pub fn warn(&self, msg: &str) {
        log::warn!("{}", self.render(msg));
    }

    /// Logs a message at ERROR level
    pub fn error(&self, msg: &str) {
        log::error!("{}", self.render(msg));
    }
}

/// Static global LOGGER instance, initialized once
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Compute the path of the log file for this run:
/// `<log_file_path>/<name>-<DDMMYYYY.HH.MM.SS>.log`.
pub fn log_file_name(name: &str, cfg: &LoggerConfig) -> String {
    let stamp = Local::now().format("%d%m%Y.%H.%M.%S");
    let file = format!("{}-{}.log", name.replace('.', "_"), stamp);
    if cfg.log_file_path.is_empty() {
        file
    } else {
        format!("{}/{}", cfg.log_file_path.trim_end_matches('/'), file)
    }
}

/// Initialize the global logger exactly once, according to the provided settings.
/// After this call, all `log::debug!(), info!(), warn!(), error!()` calls (and the
/// `Logger` methods) go through the configured fern dispatcher.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    LOGGER
        .get_or_init(|| {
            // ────────────────────────────────────────────────────────────────
            // 1) Parse the configured level; unknown strings fall back to Info.
            // ────────────────────────────────────────────────────────────────
            let level = cfg
                .log_level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::Info);

            let mut base = Dispatch::new().level(level);

            // ────────────────────────────────────────────────────────────────
            // 2) Console branch: timestamp, name, colored level, message.
            // ────────────────────────────────────────────────────────────────
            if cfg.enable_console_log {
                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let colors = ColoredLevelConfig::new()
                    .info(Color::Green)
                    .warn(Color::Yellow)
                    .error(Color::Red)
                    .debug(Color::Blue);

                let log_format_console = move |out: fern::FormatCallback,
                                               message: &std::fmt::Arguments,
                                               record: &log::Record| {
                    out.finish(format_args!(
                        "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                        Local::now().format(&datefmt),
                        nm,
                        colors.color(record.level()),
                        message
                    ))
                };

                base = base.chain(
                    Dispatch::new()
                        .format(log_format_console)
                        .chain(io::stdout()),
                );
            }

            // ────────────────────────────────────────────────────────────────
            // 3) File branch: JSON envelopes or plain text lines.
            // ────────────────────────────────────────────────────────────────
            if cfg.enable_file_log {
                if !cfg.log_file_path.is_empty() {
                    if let Err(err) = fs::create_dir_all(&cfg.log_file_path) {
                        eprintln!(
                            "Warning: could not create log directory {}: {}",
                            cfg.log_file_path, err
                        );
                    }
                }

                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let enable_json = cfg.enable_json_log;
                let filepath = log_file_name(name, cfg);

                let log_format_file = move |out: fern::FormatCallback,
                                            message: &std::fmt::Arguments,
                                            record: &log::Record| {
                    if enable_json {
                        let envelope = serde_json::json!({
                            "timestamp": Local::now().format(&datefmt).to_string(),
                            "name":      nm,
                            "level":     record.level().to_string(),
                            "message":   JsonValue::String(message.to_string()),
                        });
                        out.finish(format_args!("{}", envelope))
                    } else {
                        out.finish(format_args!(
                            "{} - {} - {} - {}",
                            Local::now().format(&datefmt),
                            nm,
                            record.level(),
                            message
                        ))
                    }
                };

                // Don't panic on an unwritable file; fall back to a sink
                let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                    Ok(fh) => Box::new(fh),
                    Err(err) => {
                        eprintln!("Warning: could not open log file {}: {}", filepath, err);
                        Box::new(io::sink())
                    }
                };

                base = base.chain(Dispatch::new().format(log_format_file).chain(file_output));
            }

            // ────────────────────────────────────────────────────────────────
            // 4) Install as the global logger. Another logger may already be
            //    installed (tests, embedding); keep going in that case.
            // ────────────────────────────────────────────────────────────────
            if let Err(err) = base.apply() {
                eprintln!("Warning: logger already installed: {}", err);
            }

            Logger::default()
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_logger_renders_message_as_is() {
        let logger = Logger::default();
        assert_eq!(logger.render("hello"), "hello");
    }

    #[test]
    fn session_logger_prefixes_ids() {
        let mut logger = Logger::default().for_session();
        let sid = logger.session_id().map(str::to_owned);
        assert_eq!(sid.as_deref().map(str::len), Some(32));
        let expected = format!("Client:{} Request:- - hi", sid.clone().unwrap_or_default());
        assert_eq!(logger.render("hi"), expected);

        logger.new_request();
        let first = logger.request_id().map(str::to_owned);
        logger.new_request();
        assert_ne!(first.as_deref(), logger.request_id());
        assert_eq!(logger.session_id(), sid.as_deref());
        assert!(logger.render("x").ends_with(" - x"));
    }

    #[test]
    fn log_file_lives_under_configured_directory() {
        let cfg = LoggerConfig {
            log_file_path: "log/".into(),
            ..LoggerConfig::default()
        };
        let path = log_file_name("relay.hub", &cfg);
        assert!(path.starts_with("log/relay_hub-"));
        assert!(path.ends_with(".log"));
    }
}
