use std::{fs::File, io, path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::{subscriber, trace, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        format::{Compact, DefaultFields, Format, Json, JsonFields, Pretty},
        SubscriberBuilder,
    },
    EnvFilter, FmtSubscriber,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Info,
    Debug,
    Trace,
}

impl From<u8> for Verbosity {
    fn from(v: u8) -> Self {
        match v {
            0 => Verbosity::Info,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl From<Verbosity> for Level {
    fn from(v: Verbosity) -> Self {
        match v {
            Verbosity::Info => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    Full,
    Json,
    Compact,
}

fn standard_fmt() -> SubscriberBuilder {
    FmtSubscriber::builder()
        .with_thread_names(true)
        .with_line_number(true)
        .with_file(true)
}

fn compact_fmt() -> SubscriberBuilder<DefaultFields, Format<Compact>> {
    FmtSubscriber::builder()
        .with_line_number(false)
        .with_file(false)
        .compact()
}

fn full_fmt() -> SubscriberBuilder<Pretty, Format<Pretty>> {
    standard_fmt().pretty()
}

fn json_fmt() -> SubscriberBuilder<JsonFields, Format<Json>> {
    standard_fmt().json().flatten_event(true)
}

fn install<S>(subscriber: S) -> anyhow::Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber::set_global_default(subscriber)
        .context("[logger] a global subscriber is already installed")
}

/// Logs go to `log_file` when given, otherwise to stderr so command output
/// on stdout stays clean. `RUST_LOG` directives override the verbosity.
pub fn log(
    verbosity: Verbosity,
    mode: LoggingMode,
    log_file: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let level: Level = verbosity.into();
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;

    let log_writer = match log_file {
        Some(path) => Some(Arc::new(File::create(path).with_context(|| {
            format!("[logger] unable to create log file {}", path.display())
        })?)),
        None => None,
    };

    match (mode, log_writer) {
        (LoggingMode::Compact, Some(file)) => {
            install(compact_fmt().with_env_filter(env_filter).with_writer(file).finish())
        }
        (LoggingMode::Compact, None) => {
            install(compact_fmt().with_env_filter(env_filter).with_writer(io::stderr).finish())
        }
        (LoggingMode::Full, Some(file)) => {
            install(full_fmt().with_env_filter(env_filter).with_writer(file).finish())
        }
        (LoggingMode::Full, None) => {
            install(full_fmt().with_env_filter(env_filter).with_writer(io::stderr).finish())
        }
        (LoggingMode::Json, Some(file)) => install(
            json_fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(file)
                .finish(),
        ),
        (LoggingMode::Json, None) => {
            install(json_fmt().with_env_filter(env_filter).with_writer(io::stderr).finish())
        }
    }?;
    trace!(set_level = %level, "log level set");
    Ok(())
}
