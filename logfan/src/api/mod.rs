mod logger;

pub use logger::{HostLogger, HostLoggerConfig, LogListener};

use crate::bus::DEFAULT_BUS_CAPACITY;

#[derive(Clone, Debug, uniffi::Record)]
pub struct SessionOpts {
    /// Initial context stamped on every record.
    pub context: String,
    pub bus_capacity: u32,
    pub debug: bool,
}

impl Default for SessionOpts {
    fn default() -> Self {
        SessionOpts {
            context: String::new(),
            bus_capacity: DEFAULT_BUS_CAPACITY as u32,
            debug: false,
        }
    }
}

impl SessionOpts {
    pub fn validate(&self) -> Result<(), LogfanError> {
        if self.bus_capacity == 0 {
            return Err(LogfanError::InvalidOptions(
                "bus_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum LogfanError {
    #[error("Invalid session options: {0}")]
    InvalidOptions(String),
    #[error("Failed to install logger: {0}")]
    LoggerSetupFailed(String),
    #[error("Session task failed: {0}")]
    TaskFailed(String),
    #[error("Session has been shut down")]
    ShutDown,
}

impl From<tokio::task::JoinError> for LogfanError {
    fn from(e: tokio::task::JoinError) -> Self {
        LogfanError::TaskFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let opts = SessionOpts {
            bus_capacity: 0,
            ..SessionOpts::default()
        };
        assert!(matches!(opts.validate(), Err(LogfanError::InvalidOptions(_))));
        assert!(SessionOpts::default().validate().is_ok());
    }

    #[test]
    fn debug_raises_level_filter() {
        let opts = SessionOpts {
            debug: true,
            ..SessionOpts::default()
        };
        assert_eq!(opts.level_filter(), log::LevelFilter::Debug);
        assert_eq!(SessionOpts::default().level_filter(), log::LevelFilter::Info);
    }
}
