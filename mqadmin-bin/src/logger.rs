use std::fs::OpenOptions;
use std::io;

use anyhow::Result;
use slog::{o, Drain, Duplicate, Logger, Never};
use slog_scope::GlobalLoggerGuard;

use mqadmin_conf::logging::{Log, To};

/// Install the process-wide logging pipeline.
///
/// `log` facade records are bridged through slog-stdlog into an async slog
/// drain writing to console and/or file per the `[log]` settings section.
/// The returned guard must be kept alive for the lifetime of the process.
pub fn logger_init(cfg: &Log) -> Result<GlobalLoggerGuard> {
    let logger = build_logger(cfg)?;
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(slog_log_to_level(cfg.level.inner()))?;
    Ok(guard)
}

fn build_logger(cfg: &Log) -> Result<Logger> {
    let drain: Box<dyn Drain<Ok = (), Err = Never> + Send> = match cfg.to {
        To::Off => Box::new(slog::Discard),
        To::Console => Box::new(slog::IgnoreResult::new(console_drain())),
        To::File => Box::new(slog::IgnoreResult::new(file_drain(&cfg.filename())?)),
        To::Both => {
            Box::new(slog::IgnoreResult::new(Duplicate::new(console_drain(), file_drain(&cfg.filename())?)))
        }
    };

    let drain = slog_async::Async::new(drain)
        .chan_size(8192)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Ok(Logger::root(drain, o!()))
}

fn console_drain() -> impl Drain<Ok = (), Err = io::Error> {
    let decorator = slog_term::TermDecorator::new().build();
    slog_term::FullFormat::new(decorator).use_local_timestamp().build()
}

fn file_drain(filename: &str) -> Result<impl Drain<Ok = (), Err = io::Error>> {
    let file = OpenOptions::new().create(true).append(true).open(filename).map_err(|e| {
        anyhow::Error::msg(format!("logger file config error, filename: {filename}, {e:?}"))
    })?;
    let decorator = slog_term::PlainDecorator::new(file);
    Ok(slog_term::FullFormat::new(decorator).use_local_timestamp().build())
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error => log::Level::Error,
        slog::Level::Critical => log::Level::Error,
    }
}
