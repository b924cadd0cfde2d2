//! Blocking front end over an asynchronous [`TaskEngine`].
//!
//! The caller's thread parks on a oneshot receiver while the engine runs the
//! sequence on its own thread. The observer resolves the oneshot exactly once.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::task::{Dispatcher, FinishStatus, TaskEngine, TaskError, TaskIterator, TaskObserver};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("blocking on the engine thread would deadlock")]
    WouldDeadlock,

    #[error("engine finished without reporting a result")]
    Abandoned,

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

#[derive(Clone)]
pub struct SyncBridge {
    engine: Arc<dyn TaskEngine>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl SyncBridge {
    pub fn new(engine: Arc<dyn TaskEngine>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { engine, dispatcher }
    }

    /// Bridge over an engine that is also its own dispatcher.
    pub fn for_engine<E>(engine: Arc<E>) -> Self
    where
        E: TaskEngine + Dispatcher + 'static,
    {
        Self {
            engine: engine.clone(),
            dispatcher: engine,
        }
    }

    /// Runs `tasks` to completion and returns how the sequence ended.
    ///
    /// Blocks the calling thread. Must not be called from the dispatch thread
    /// or from inside an async runtime.
    pub fn execute(&self, tasks: TaskIterator) -> Result<FinishStatus, BridgeError> {
        if self.dispatcher.is_dispatch_thread() {
            warn!("synchronous execution requested on the dispatch thread");
            return Err(BridgeError::WouldDeadlock);
        }

        let (sender, receiver) = oneshot::channel();
        let observer = CompletionObserver {
            sender: Some(sender),
        };
        let engine = Arc::clone(&self.engine);
        let steps = tasks.len();
        self.dispatcher
            .dispatch(Box::new(move || engine.execute(tasks, Box::new(observer))))
            .map_err(|e| BridgeError::Dispatch(e.to_string()))?;

        let status = receiver.blocking_recv().map_err(|_| BridgeError::Abandoned)?;
        debug!(steps, ?status, "step sequence finished");
        Ok(status)
    }
}

struct CompletionObserver {
    sender: Option<oneshot::Sender<FinishStatus>>,
}

impl TaskObserver for CompletionObserver {
    fn task_finished(&mut self, title: &str, result: &Result<(), TaskError>) {
        if let Err(e) = result {
            debug!(title, error = %e, "step did not complete");
        }
    }

    fn all_finished(&mut self, status: FinishStatus) {
        // A second call has nothing left to resolve.
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DedicatedThreadEngine, DispatchError, Job, Task, TaskMonitor};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct Noop;

    impl Task for Noop {
        fn title(&self) -> &str {
            "noop"
        }

        fn run(&mut self, _monitor: &TaskMonitor) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn one_step() -> TaskIterator {
        let mut tasks = TaskIterator::new();
        tasks.push(Noop);
        tasks
    }

    #[test]
    fn completes_from_a_foreign_thread() {
        let bridge = SyncBridge::for_engine(Arc::new(DedicatedThreadEngine::spawn("bridge").unwrap()));
        assert_eq!(bridge.execute(one_step()).unwrap(), FinishStatus::Succeeded);
        assert_eq!(bridge.execute(TaskIterator::new()).unwrap(), FinishStatus::Succeeded);
    }

    #[test]
    fn refuses_to_block_the_dispatch_thread() {
        let engine = Arc::new(DedicatedThreadEngine::spawn("bridge").unwrap());
        let bridge = SyncBridge::for_engine(Arc::clone(&engine));
        let inner = bridge.clone();
        let (tx, rx) = std_mpsc::channel();
        engine
            .dispatch(Box::new(move || {
                let _ = tx.send(inner.execute(one_step()));
            }))
            .unwrap();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(BridgeError::WouldDeadlock)));
    }

    struct DroppingEngine;

    impl TaskEngine for DroppingEngine {
        fn execute(&self, _tasks: TaskIterator, observer: Box<dyn TaskObserver>) {
            drop(observer);
        }
    }

    struct Inline;

    impl Dispatcher for Inline {
        fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
            job();
            Ok(())
        }

        fn is_dispatch_thread(&self) -> bool {
            false
        }
    }

    #[test]
    fn dropped_observer_is_abandoned() {
        let bridge = SyncBridge::new(Arc::new(DroppingEngine), Arc::new(Inline));
        assert!(matches!(bridge.execute(one_step()), Err(BridgeError::Abandoned)));
    }

    struct Closed;

    impl Dispatcher for Closed {
        fn dispatch(&self, _job: Job) -> Result<(), DispatchError> {
            Err(DispatchError::Closed)
        }

        fn is_dispatch_thread(&self) -> bool {
            false
        }
    }

    #[test]
    fn dispatch_failure_is_reported() {
        let bridge = SyncBridge::new(Arc::new(DroppingEngine), Arc::new(Closed));
        assert!(matches!(bridge.execute(one_step()), Err(BridgeError::Dispatch(_))));
    }

    struct DoubleReport;

    impl TaskEngine for DoubleReport {
        fn execute(&self, _tasks: TaskIterator, mut observer: Box<dyn TaskObserver>) {
            observer.all_finished(FinishStatus::Cancelled { step: 0 });
            observer.all_finished(FinishStatus::Succeeded);
        }
    }

    #[test]
    fn first_resolution_wins() {
        let bridge = SyncBridge::new(Arc::new(DoubleReport), Arc::new(Inline));
        assert_eq!(
            bridge.execute(one_step()).unwrap(),
            FinishStatus::Cancelled { step: 0 }
        );
    }
}
