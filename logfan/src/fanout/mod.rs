//! The fan-out logger.
//!
//! Every call is forwarded to an external [`log::Log`] first. Unless the
//! session is cancelled, the line is then turned into a [`LogRecord`],
//! handed to the interceptor (if one is installed) and published on the
//! [`LogBus`].

mod intercept;
mod macros;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::LogBus;
use crate::record::{LogLevel, LogRecord};

pub use intercept::{InterceptGuard, Interceptor};
use intercept::InterceptSlot;

/// Target used for forwarded records while the context is empty.
pub const DEFAULT_TARGET: &str = "logfan";

/// Leveled logging with an eager (`format_args!`) and a lazy overload per severity.
pub trait LeveledLog: Send + Sync {
    fn set_context(&self, name: &str);

    fn emit(&self, level: LogLevel, args: fmt::Arguments<'_>);

    /// `message` is called once per invocation.
    fn emit_with(&self, level: LogLevel, message: &dyn Fn() -> String);

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(LogLevel::Debug, args)
    }

    fn debug_with(&self, message: &dyn Fn() -> String) {
        self.emit_with(LogLevel::Debug, message)
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(LogLevel::Info, args)
    }

    fn info_with(&self, message: &dyn Fn() -> String) {
        self.emit_with(LogLevel::Info, message)
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(LogLevel::Warn, args)
    }

    fn warn_with(&self, message: &dyn Fn() -> String) {
        self.emit_with(LogLevel::Warn, message)
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(LogLevel::Error, args)
    }

    fn error_with(&self, message: &dyn Fn() -> String) {
        self.emit_with(LogLevel::Error, message)
    }

    fn fatal(&self, args: fmt::Arguments<'_>) {
        self.emit(LogLevel::Fatal, args)
    }

    fn fatal_with(&self, message: &dyn Fn() -> String) {
        self.emit_with(LogLevel::Fatal, message)
    }
}

/// Forwards to whatever logger is installed process-wide, honouring
/// [`log::max_level`] the same way the `log` macros do.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalLogger;

impl log::Log for GlobalLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if record.level() <= log::max_level() {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

pub struct LogFanout {
    logger: Box<dyn log::Log>,
    bus: LogBus,
    cancel: CancellationToken,
    context: RwLock<String>,
    interceptor: InterceptSlot,
}

impl LogFanout {
    /// Creates a fan-out that forwards to the process-wide `log` logger.
    pub fn new(bus: LogBus, cancel: CancellationToken) -> Self {
        Self::with_logger(Box::new(GlobalLogger), bus, cancel)
    }

    pub fn with_logger(logger: Box<dyn log::Log>, bus: LogBus, cancel: CancellationToken) -> Self {
        LogFanout {
            logger,
            bus,
            cancel,
            context: RwLock::new(String::new()),
            interceptor: InterceptSlot::default(),
        }
    }

    pub fn context(&self) -> String {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `callback` as the only interceptor until the guard is dropped.
    pub fn intercept<F>(&self, callback: F) -> InterceptGuard<'_>
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        InterceptGuard::new(&self.interceptor, Arc::new(callback))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &LogBus {
        &self.bus
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn forward(&self, level: LogLevel, context: &str, args: fmt::Arguments<'_>) {
        let target = if context.is_empty() {
            DEFAULT_TARGET
        } else {
            context
        };

        self.logger.log(
            &log::Record::builder()
                .args(args)
                .level(level.as_log_level())
                .target(target)
                .module_path_static(Some(module_path!()))
                .build(),
        );
    }
}

impl LeveledLog for LogFanout {
    fn set_context(&self, name: &str) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = name.to_owned();
    }

    fn emit(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let context = self.context();
        self.forward(level, &context, args);

        if self.cancel.is_cancelled() {
            return;
        }

        let record = LogRecord::new(context, level, args.to_string());

        // A panicking interceptor skips the publish below.
        if let Some(interceptor) = self.interceptor.current() {
            interceptor(&record);
        }

        self.bus.publish(record);
    }

    fn emit_with(&self, level: LogLevel, message: &dyn Fn() -> String) {
        let message = message();
        self.emit(level, format_args!("{message}"));
    }
}
