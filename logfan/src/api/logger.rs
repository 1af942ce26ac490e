use crate::record::LogRecord;

/// Process logger supplied by a foreign host.
#[uniffi::export(callback_interface)]
pub trait HostLogger: Send + Sync {
    fn log_string(&self, str: String);
}

/// Live consumer of the records a session publishes.
#[uniffi::export(callback_interface)]
pub trait LogListener: Send + Sync {
    fn on_record(&self, record: LogRecord);
}

pub struct HostLoggerConfig {
    logger: Box<dyn HostLogger>,
    max_level: log::LevelFilter,
}

impl HostLoggerConfig {
    pub fn new(logger: Box<dyn HostLogger>, max_level: log::LevelFilter) -> Self {
        HostLoggerConfig { logger, max_level }
    }
}

impl log::Log for HostLoggerConfig {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] [{}] {}", record.level(), record.target(), record.args());
        self.logger.log_string(message);
    }

    fn flush(&self) {}
}
