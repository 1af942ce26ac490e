use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub mod api;
pub mod bus;
pub mod fanout;
pub mod record;
pub mod task;

pub use api::{HostLogger, HostLoggerConfig, LogListener, LogfanError, SessionOpts};
pub use bus::{LogBus, DEFAULT_BUS_CAPACITY};
pub use fanout::{GlobalLogger, InterceptGuard, Interceptor, LeveledLog, LogFanout};
pub use record::{LogLevel, LogRecord};

use task::{spawn_listener_pump, TaskManager};

uniffi::setup_scaffolding!();

/// One supervised subprocess session: owns the bus, the cancellation token
/// and the fan-out logger that feeds them.
#[derive(uniffi::Object)]
pub struct Session {
    fanout: Arc<LogFanout>,
    cancel: CancellationToken,
    manager: TaskManager,
    opts: SessionOpts,
    rt: Handle,
}

pub fn new_with_current_runtime(opts: SessionOpts) -> Result<Session, LogfanError> {
    let rt = tokio::runtime::Handle::current();
    new_with_runtime(opts, &rt)
}

pub fn new_with_runtime(opts: SessionOpts, rt: &Handle) -> Result<Session, LogfanError> {
    opts.validate()?;

    let cancel = CancellationToken::new();
    let bus = LogBus::new(opts.bus_capacity as usize);
    let fanout = LogFanout::new(bus, cancel.clone());
    fanout.set_context(&opts.context);

    Ok(Session {
        fanout: Arc::new(fanout),
        cancel,
        manager: TaskManager::new(),
        opts,
        rt: rt.clone(),
    })
}

#[uniffi::export]
impl Session {
    #[uniffi::constructor]
    pub fn new(opts: SessionOpts) -> Result<Self, LogfanError> {
        static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build logfan runtime")
        });

        new_with_runtime(opts, RUNTIME.handle())
    }

    pub fn set_context(&self, name: String) {
        self.fanout.set_context(&name);
    }

    pub fn context(&self) -> String {
        self.fanout.context()
    }

    pub fn log(&self, level: LogLevel, message: String) {
        self.fanout.emit(level, format_args!("{message}"));
    }

    pub fn debug(&self, message: String) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: String) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: String) {
        self.log(LogLevel::Fatal, message);
    }

    /// Starts delivering every record published from now on to `listener`.
    pub fn add_listener(&self, listener: Box<dyn LogListener>) -> Result<(), LogfanError> {
        self.add_listener_fn(move |record| listener.on_record(record))
    }

    pub fn set_logger(&self, logger: Box<dyn HostLogger>) -> Result<(), LogfanError> {
        let max_level = self.opts.level_filter();
        let config = HostLoggerConfig::new(logger, max_level);

        log::set_boxed_logger(Box::new(config))
            .map_err(|e| LogfanError::LoggerSetupFailed(e.to_string()))?;

        log::set_max_level(max_level);

        Ok(())
    }

    /// Stops publishing. Forwarding to the process logger carries on.
    pub fn cancel(&self) {
        debug!("Cancelling session '{}'", self.fanout.context());
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn shutdown(&self) -> Result<(), LogfanError> {
        self.cancel();

        let manager = self.manager.clone();
        self.rt
            .spawn(async move { manager.shutdown().await })
            .await?;

        debug!("Session '{}' shut down", self.fanout.context());
        Ok(())
    }
}

impl Session {
    pub fn logger(&self) -> Arc<LogFanout> {
        self.fanout.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.fanout.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Adds a listener implemented in Rust. Same lifecycle as [`Session::add_listener`].
    pub fn add_listener_fn<F>(&self, listener: F) -> Result<(), LogfanError>
    where
        F: Fn(LogRecord) + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(LogfanError::ShutDown);
        }

        let name = format!("listener-{}", self.manager.len());
        debug!("Adding {} to session '{}'", name, self.fanout.context());

        let pump = spawn_listener_pump(
            &self.rt,
            &self.cancel,
            name,
            self.fanout.subscribe(),
            listener,
        );
        self.manager.add_task(pump);

        Ok(())
    }
}
