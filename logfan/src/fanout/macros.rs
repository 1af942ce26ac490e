/// Logs through any [`LeveledLog`](crate::LeveledLog) at an explicit level.
///
/// ```
/// use logfan::{fan_log, LogBus, LogFanout, LogLevel};
/// use tokio_util::sync::CancellationToken;
///
/// let fanout = LogFanout::new(LogBus::default(), CancellationToken::new());
/// let mut rx = fanout.subscribe();
/// fan_log!(fanout, LogLevel::Info, "build {} finished in {}s", 3, 12);
/// assert_eq!(rx.try_recv().unwrap().message, "build 3 finished in 12s");
/// ```
#[macro_export]
macro_rules! fan_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        use $crate::LeveledLog as _;
        ($logger).emit($level, format_args!($($arg)+))
    }};
}

#[macro_export]
macro_rules! fan_debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::fan_log!($logger, $crate::LogLevel::Debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! fan_info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::fan_log!($logger, $crate::LogLevel::Info, $($arg)+)
    };
}

#[macro_export]
macro_rules! fan_warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::fan_log!($logger, $crate::LogLevel::Warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! fan_error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::fan_log!($logger, $crate::LogLevel::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! fan_fatal {
    ($logger:expr, $($arg:tt)+) => {
        $crate::fan_log!($logger, $crate::LogLevel::Fatal, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::{LogBus, LogFanout, LogLevel};

    #[test]
    fn macros_work_through_arc() {
        let fanout = Arc::new(LogFanout::new(LogBus::new(8), CancellationToken::new()));
        let mut rx = fanout.subscribe();
        let exit_code = 1;

        crate::fan_warn!(fanout, "exited with {exit_code}");
        crate::fan_fatal!(fanout, "{}", "gone");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.level, LogLevel::Warn);
        assert_eq!(first.message, "exited with 1");
        assert_eq!(rx.try_recv().unwrap().level, LogLevel::Fatal);
    }
}
