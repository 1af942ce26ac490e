//! Broadcast channel carrying [`LogRecord`]s to live consumers.
//!
//! - `publish` never blocks; records sent while nobody listens are dropped.
//! - A receiver only sees records sent after it subscribed.
//! - Slow receivers get `RecvError::Lagged(n)` and skip the `n` oldest records.

use tokio::sync::broadcast;

use crate::record::LogRecord;

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct LogBus {
    tx: broadcast::Sender<LogRecord>,
}

impl LogBus {
    /// Creates a bus whose ring buffer holds `capacity` records (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        LogBus { tx }
    }

    pub fn publish(&self, record: LogRecord) {
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        LogBus::new(DEFAULT_BUS_CAPACITY)
    }
}
