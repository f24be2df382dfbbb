//! Logger construction. Endpoints log at every suspension point (frame drop, handshake
//! transition, retransmit, peer timeout) through a `slog::Logger` built here rather than bare
//! `println!`, matching how the rest of the corpus wires up diagnostics.
use serdeconv;
use slog::Logger;
use sloggers::{Config, LoggerConfig};

/// Builds a terminal logger at the given severity. Falls back to `info` if the severity string
/// doesn't parse, since a bad config value shouldn't stop the endpoint from starting.
pub fn terminal_logger(level: &str) -> Logger {
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    );

    let config: LoggerConfig = serdeconv::from_toml_str(&toml).unwrap_or_else(|_| default_config());
    config.build_logger().unwrap_or_else(|_| default_config().build_logger().expect("default logger config is valid"))
}

fn default_config() -> LoggerConfig {
    serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
    )
    .expect("built-in default logger config is valid")
}

/// A logger that discards everything. Used by tests and by embedders who wire up their own
/// diagnostics pipeline instead.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
