//! Step-sequence task model and a single-threaded engine that runs it.
//!
//! A [`TaskEngine`] accepts an ordered [`TaskIterator`] and reports back
//! through a [`TaskObserver`] once the whole sequence has ended. Execution is
//! asynchronous: `execute` returns before any step has run.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<crate::error::EngineError> for TaskError {
    fn from(e: crate::error::EngineError) -> Self {
        Self::Failed(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("engine thread has shut down")]
    Closed,

    #[error("cannot start engine thread: {0}")]
    Spawn(String),
}

/// One step of a sequence.
pub trait Task: Send {
    fn title(&self) -> &str;

    fn run(&mut self, monitor: &TaskMonitor) -> Result<(), TaskError>;
}

/// Handed to each running step. Shared by all steps of one sequence.
#[derive(Debug, Clone, Default)]
pub struct TaskMonitor {
    cancelled: Arc<AtomicBool>,
}

impl TaskMonitor {
    /// Stops the sequence after the current step.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, message: &str) {
        debug!(status = message, "task status");
    }
}

/// Ordered, appendable list of steps.
#[derive(Default)]
pub struct TaskIterator {
    tasks: VecDeque<Box<dyn Task>>,
}

impl TaskIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl Task + 'static) {
        self.tasks.push_back(Box::new(task));
    }

    pub fn append(&mut self, other: TaskIterator) {
        self.tasks.extend(other.tasks);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Iterator for TaskIterator {
    type Item = Box<dyn Task>;

    fn next(&mut self) -> Option<Self::Item> {
        self.tasks.pop_front()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishStatus {
    Succeeded,
    /// `step` is the zero-based position of the failing step.
    Failed {
        step: usize,
        title: String,
        message: String,
    },
    /// `step` steps completed before the sequence stopped.
    Cancelled { step: usize },
}

impl FinishStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

pub trait TaskObserver: Send {
    fn task_finished(&mut self, _title: &str, _result: &Result<(), TaskError>) {}

    fn all_finished(&mut self, status: FinishStatus);
}

pub trait TaskEngine: Send + Sync {
    fn execute(&self, tasks: TaskIterator, observer: Box<dyn TaskObserver>);
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs closures on the engine's affinity thread.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;

    fn is_dispatch_thread(&self) -> bool;
}

/// Runs every step sequence, and every dispatched job, on one named thread in
/// submission order.
pub struct DedicatedThreadEngine {
    sender: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl DedicatedThreadEngine {
    pub fn spawn(name: &str) -> Result<Self, DispatchError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("job panicked on engine thread");
                    }
                }
                debug!("engine thread exiting");
            })
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;
        let worker_id = worker.thread().id();
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            worker_id,
        })
    }

    fn send(&self, job: Job) -> Result<(), DispatchError> {
        let sender = self.sender.as_ref().ok_or(DispatchError::Closed)?;
        sender.send(job).map_err(|_| DispatchError::Closed)
    }
}

impl TaskEngine for DedicatedThreadEngine {
    fn execute(&self, tasks: TaskIterator, observer: Box<dyn TaskObserver>) {
        // On a closed channel the observer is dropped unresolved.
        if self.send(Box::new(move || run_sequence(tasks, observer))).is_err() {
            warn!("step sequence submitted to a stopped engine");
        }
    }
}

impl Dispatcher for DedicatedThreadEngine {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.send(job)
    }

    fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for DedicatedThreadEngine {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

fn run_sequence(tasks: TaskIterator, mut observer: Box<dyn TaskObserver>) {
    let monitor = TaskMonitor::default();
    let mut status = FinishStatus::Succeeded;

    for (step, mut task) in tasks.enumerate() {
        if monitor.is_cancelled() {
            status = FinishStatus::Cancelled { step };
            break;
        }

        let title = task.title().to_string();
        debug!(step, title = %title, "running step");
        let result = match catch_unwind(AssertUnwindSafe(|| task.run(&monitor))) {
            Ok(result) => result,
            Err(_) => Err(TaskError::Failed(format!("step '{title}' panicked"))),
        };
        observer.task_finished(&title, &result);

        match result {
            Ok(()) => {}
            Err(TaskError::Cancelled) => {
                status = FinishStatus::Cancelled { step };
                break;
            }
            Err(TaskError::Failed(message)) => {
                debug!(step, title = %title, error = %message, "step failed");
                status = FinishStatus::Failed {
                    step,
                    title,
                    message,
                };
                break;
            }
        }
    }

    observer.all_finished(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct Record {
        title: String,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        outcome: fn(&TaskMonitor) -> Result<(), TaskError>,
    }

    impl Task for Record {
        fn title(&self) -> &str {
            &self.title
        }

        fn run(&mut self, monitor: &TaskMonitor) -> Result<(), TaskError> {
            self.log.lock().push(self.title.clone());
            (self.outcome)(monitor)
        }
    }

    struct Forward(std_mpsc::Sender<FinishStatus>);

    impl TaskObserver for Forward {
        fn all_finished(&mut self, status: FinishStatus) {
            let _ = self.0.send(status);
        }
    }

    fn sequence(
        log: &Arc<parking_lot::Mutex<Vec<String>>>,
        steps: &[(&str, fn(&TaskMonitor) -> Result<(), TaskError>)],
    ) -> TaskIterator {
        let mut tasks = TaskIterator::new();
        for (title, outcome) in steps {
            tasks.push(Record {
                title: title.to_string(),
                log: Arc::clone(log),
                outcome: *outcome,
            });
        }
        tasks
    }

    fn run(engine: &DedicatedThreadEngine, tasks: TaskIterator) -> FinishStatus {
        let (tx, rx) = std_mpsc::channel();
        engine.execute(tasks, Box::new(Forward(tx)));
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn steps_run_in_order() {
        let engine = DedicatedThreadEngine::spawn("test-engine").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let status = run(&engine, sequence(&log, &[("a", |_| Ok(())), ("b", |_| Ok(()))]));
        assert_eq!(status, FinishStatus::Succeeded);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn first_failure_stops_the_sequence() {
        let engine = DedicatedThreadEngine::spawn("test-engine").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let status = run(
            &engine,
            sequence(
                &log,
                &[
                    ("a", |_| Ok(())),
                    ("b", |_| Err(TaskError::Failed("boom".into()))),
                    ("c", |_| Ok(())),
                ],
            ),
        );
        assert_eq!(
            status,
            FinishStatus::Failed {
                step: 1,
                title: "b".into(),
                message: "boom".into()
            }
        );
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn monitor_cancel_stops_after_current_step() {
        let engine = DedicatedThreadEngine::spawn("test-engine").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let status = run(
            &engine,
            sequence(
                &log,
                &[
                    ("a", |m| {
                        m.cancel();
                        Ok(())
                    }),
                    ("b", |_| Ok(())),
                ],
            ),
        );
        assert_eq!(status, FinishStatus::Cancelled { step: 1 });
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn panicking_step_is_a_failure() {
        let engine = DedicatedThreadEngine::spawn("test-engine").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let status = run(&engine, sequence(&log, &[("a", |_| panic!("bad step"))]));
        assert!(matches!(status, FinishStatus::Failed { step: 0, .. }));

        // Engine thread survives.
        let status = run(&engine, sequence(&log, &[("b", |_| Ok(()))]));
        assert!(status.is_success());
    }

    #[test]
    fn empty_sequence_succeeds() {
        let engine = DedicatedThreadEngine::spawn("test-engine").unwrap();
        assert_eq!(run(&engine, TaskIterator::new()), FinishStatus::Succeeded);
    }

    #[test]
    fn dispatched_jobs_run_on_the_engine_thread() {
        let engine = Arc::new(DedicatedThreadEngine::spawn("test-engine").unwrap());
        assert!(!engine.is_dispatch_thread());

        let (tx, rx) = std_mpsc::channel();
        let probe = Arc::clone(&engine);
        engine
            .dispatch(Box::new(move || {
                let _ = tx.send((probe.is_dispatch_thread(), thread::current().name().map(String::from)));
            }))
            .unwrap();
        let (on_engine, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(on_engine);
        assert_eq!(name.as_deref(), Some("test-engine"));
    }

    #[test]
    fn append_keeps_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut tasks = sequence(&log, &[("a", |_| Ok(()))]);
        tasks.append(sequence(&log, &[("b", |_| Ok(())), ("c", |_| Ok(()))]));
        assert_eq!(tasks.len(), 3);
        let titles: Vec<String> = tasks.map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }
}
