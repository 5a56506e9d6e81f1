// We need Duration to turn "60s"-style settings into a Rust time value
use std::time::Duration;

// Addresses are validated up front so bind errors are about the OS, not typos
use std::net::SocketAddr;

use crate::error::HubError;

/////////////////////////
// LoggerConfig        //
/////////////////////////

/// Settings for the fern dispatcher built in `logger::init_logger`.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level as understood by `log::LevelFilter` ("debug", "info", ...)
    pub log_level: String,
    /// Print colored records to stdout
    pub enable_console_log: bool,
    /// Write records to `<log_file_path>/<name>-<stamp>.log`
    pub enable_file_log: bool,
    /// Write one JSON envelope per line in the file sink
    pub enable_json_log: bool,
    /// Directory holding the log files (created if missing)
    pub log_file_path: String,
    /// chrono format string used for timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_console_log: true,
            enable_file_log: true,
            enable_json_log: false,
            log_file_path: "log".to_string(),
            date_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// Immutable snapshot of every setting the hub needs, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where line clients connect (e.g. `0.0.0.0:5000`)
    pub listen_addr: String,

    /// Where the admin HTTP endpoints are served (e.g. `0.0.0.0:9000`)
    pub admin_addr: String,

    /// Hard cap on simultaneously registered connections
    pub max_members: usize,

    /// Outbound mailbox slots per connection
    pub mailbox_capacity: usize,

    /// A connection that sends nothing for this long is dropped
    pub read_idle_timeout: Duration,

    /// Pause after a failed accept before trying again
    pub accept_error_backoff: Duration,

    /// How many Tokio worker threads to spin up (defaults to cpu-1)
    pub worker_threads: usize,

    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            admin_addr: "0.0.0.0:9000".to_string(),
            max_members: 200,
            mailbox_capacity: 64,
            read_idle_timeout: Duration::from_secs(60),
            accept_error_backoff: Duration::from_millis(100),
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            logger: LoggerConfig::default(),
        }
    }
}

/////////////////////////////////////////////
// Reading settings from the environment   //
/////////////////////////////////////////////

impl ServerConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    ///
    /// Missing keys use their default. Malformed values print a warning and
    /// also use the default, so a typo never prevents startup; `validate`
    /// is the place where impossible values are refused.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Helper: fetch `key`, parse it with `parse`, or fall back to `default`.
        let extract_or = |key: &str, default| -> String {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => value.trim().to_string(),
                _ => default,
            }
        };
        let parsed_or = |key: &str, default: usize| -> usize {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => match value.trim().parse::<usize>() {
                    Ok(v) => v,
                    Err(err) => {
                        eprintln!("Warning: '{}' is not a number ({}): {}", key, value, err);
                        default
                    }
                },
                _ => default,
            }
        };
        let duration_or = |key: &str, default: Duration| -> Duration {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => match parse_duration(value.trim()) {
                    Some(d) => d,
                    None => {
                        eprintln!("Warning: '{}' is not a duration: {}", key, value);
                        default
                    }
                },
                _ => default,
            }
        };
        let flag_or = |key: &str, default: bool| -> bool {
            match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
                Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
                Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
                Some(v) if !v.is_empty() => {
                    eprintln!("Warning: '{}' is not a boolean: {}", key, v);
                    default
                }
                _ => default,
            }
        };

        let logger = LoggerConfig {
            log_level: extract_or("LOG_LEVEL", defaults.logger.log_level.clone()),
            enable_console_log: flag_or("LOG_CONSOLE", defaults.logger.enable_console_log),
            enable_file_log: flag_or("LOG_FILE", defaults.logger.enable_file_log),
            enable_json_log: flag_or("LOG_JSON", defaults.logger.enable_json_log),
            log_file_path: extract_or("LOG_DIR", defaults.logger.log_file_path.clone()),
            date_format: defaults.logger.date_format.clone(),
        };

        let backoff_ms = parsed_or(
            "ACCEPT_BACKOFF_MS",
            defaults.accept_error_backoff.as_millis() as usize,
        );

        ServerConfig {
            listen_addr: normalize_addr(&extract_or("TCP_ADDR", defaults.listen_addr.clone())),
            admin_addr: normalize_addr(&extract_or("HTTP_ADDR", defaults.admin_addr.clone())),
            max_members: parsed_or("MAX_CLIENTS", defaults.max_members),
            mailbox_capacity: parsed_or("OUTBOX_SIZE", defaults.mailbox_capacity),
            read_idle_timeout: duration_or("READ_TIMEOUT", defaults.read_idle_timeout),
            accept_error_backoff: Duration::from_millis(backoff_ms as u64),
            worker_threads: parsed_or("WORKER_THREADS", defaults.worker_threads),
            logger,
        }
    }

    /// Refuse settings the hub cannot run with.
    pub fn validate(&self) -> Result<(), HubError> {
        fn invalid(key: &'static str, reason: &str) -> HubError {
            HubError::InvalidConfig {
                key,
                reason: reason.to_string(),
            }
        }

        if self.max_members == 0 {
            return Err(invalid("MAX_CLIENTS", "must be greater than zero"));
        }
        if self.mailbox_capacity == 0 {
            return Err(invalid("OUTBOX_SIZE", "must be greater than zero"));
        }
        if self.read_idle_timeout.is_zero() {
            return Err(invalid("READ_TIMEOUT", "must be greater than zero"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("WORKER_THREADS", "must be greater than zero"));
        }
        self.listen_socket_addr()?;
        self.admin_socket_addr()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, HubError> {
        Ok(self.listen_addr.parse()?)
    }

    pub fn admin_socket_addr(&self) -> Result<SocketAddr, HubError> {
        Ok(self.admin_addr.parse()?)
    }
}

/// `:5000` means every interface, as in most line servers' env files.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// Parse `500ms`, `60s`, `2m`, `1h`, or combinations such as `1m30s`.
/// A bare number has no unit and is rejected.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut rest = input;
    let mut total = Duration::ZERO;
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        // Out-of-range values are malformed, not fatal
        let step = Duration::try_from_secs_f64(secs).ok()?;
        total = total.checked_add(step)?;
    }

    Some(total)
}
