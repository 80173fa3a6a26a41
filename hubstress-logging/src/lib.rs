//! Logging setup for hubstress
//!
//! Installs a `tracing-subscriber` fmt subscriber driven by the logging
//! section of the configuration: level filtering through `EnvFilter`, text,
//! compact or JSON output, and an optional log file written through a
//! non-blocking `tracing-appender` worker. Records emitted through the `log`
//! facade are bridged into the same subscriber.

pub mod init;

pub use init::{build_filter, default_log_file, init_logging, LoggingError, LoggingGuard};
