use futures::Future;
use log::{debug, warn};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::record::LogRecord;

/// Something that can be cancelled and then awaited.
///
/// `join` consumes the boxed task and hands back a boxed future, which keeps
/// the trait object-safe.
pub trait CancellableTask: Send + 'static {
    fn cancel(&self);

    fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A tokio task paired with the token that stops it.
pub struct TokioTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl TokioTask {
    /// Spawns `block` on `rt`. The task's token is a child of `parent`, so
    /// cancelling the parent stops the task too.
    pub fn spawn<Fn, Fut>(rt: &Handle, parent: &CancellationToken, block: Fn) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
        Fn: FnOnce(CancellationToken) -> Fut + Send + 'static,
    {
        let token = parent.child_token();
        let f = block(token.clone());

        let inner_token = token.clone();
        let handle = rt.spawn(async move {
            tokio::select! {
                _ = inner_token.cancelled() => {}
                _ = f => {}
            }
        });

        TokioTask { handle, token }
    }
}

impl CancellableTask for TokioTask {
    fn cancel(&self) {
        self.token.cancel();
    }

    fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let _ = self.handle.await;
        })
    }
}

/// Delivers every record read from a bus receiver to `deliver` until the
/// token is cancelled or the bus closes.
pub fn spawn_listener_pump<F>(
    rt: &Handle,
    parent: &CancellationToken,
    name: String,
    mut rx: broadcast::Receiver<LogRecord>,
    deliver: F,
) -> TokioTask
where
    F: Fn(LogRecord) + Send + 'static,
{
    TokioTask::spawn(rt, parent, move |token| async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("[{}] Cancellation signal received, stopping listener", name);
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Ok(record) => deliver(record),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("[{}] Listener fell behind, skipped {} records", name, skipped);
                        }
                        Err(RecvError::Closed) => {
                            debug!("[{}] Log bus closed", name);
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Holds the tasks a session started. Clones share the same list, so any
/// clone can add tasks or shut everything down.
#[derive(Clone, Default)]
pub struct TaskManager {
    inner: Arc<Mutex<Vec<Box<dyn CancellableTask + Send>>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, task: impl CancellableTask) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every task, then awaits each one. The list is drained up front
    /// so the lock is never held across an `.await`.
    pub async fn shutdown(&self) {
        let tasks: Vec<Box<dyn CancellableTask + Send>> = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        for task in &tasks {
            task.cancel();
        }

        for task in tasks {
            task.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LogBus;
    use crate::record::LogLevel;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn pump_delivers_published_records() {
        let bus = LogBus::new(16);
        let parent = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let pump = spawn_listener_pump(
            &Handle::current(),
            &parent,
            "test".to_string(),
            bus.subscribe(),
            move |record| {
                let _ = tx.send(record);
            },
        );

        bus.publish(LogRecord::new("ctx", LogLevel::Info, "hello"));
        bus.publish(LogRecord::new("ctx", LogLevel::Error, "oops"));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.message, "hello");
        assert_eq!(second.level, LogLevel::Error);

        pump.cancel();
        timeout(Duration::from_secs(1), Box::new(pump).join()).await.unwrap();
    }

    #[tokio::test]
    async fn parent_cancellation_stops_pump() {
        let bus = LogBus::new(16);
        let parent = CancellationToken::new();

        let pump = spawn_listener_pump(
            &Handle::current(),
            &parent,
            "test".to_string(),
            bus.subscribe(),
            |_| {},
        );

        parent.cancel();
        let joined = timeout(Duration::from_secs(1), Box::new(pump).join()).await;
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn shutdown_drains_manager() {
        let bus = LogBus::new(16);
        let parent = CancellationToken::new();
        let manager = TaskManager::new();

        for i in 0..3 {
            manager.add_task(spawn_listener_pump(
                &Handle::current(),
                &parent,
                format!("pump-{i}"),
                bus.subscribe(),
                |_| {},
            ));
        }
        assert_eq!(manager.len(), 3);
        assert_eq!(bus.receiver_count(), 3);

        timeout(Duration::from_secs(1), manager.shutdown()).await.unwrap();

        assert!(manager.is_empty());
        assert_eq!(bus.receiver_count(), 0);
        assert!(!parent.is_cancelled());
    }
}
