use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::debug;

/// Name of the queue used when neither the handler nor the dispatch context
/// names one
pub const DEFAULT_DISPATCH_QUEUE: &str = "DispatchQueue";

/// A unit of work of a [`DispatchQueue`]. The runtime handle is the executor
/// asynchronous handler bodies are spawned onto.
pub(crate) type QueueTask = Box<dyn FnOnce(&tokio::runtime::Handle) + Send>;

#[derive(Debug, Error)]
pub enum Error {
    /// IO Error
    #[error("IO {0}")]
    Io(io::Error),

    /// An operation was attempted after the queue was stopped
    #[error("an operation was attempted on stopped dispatch queue {0}")]
    Stopped(String),
}

struct State {
    tasks: VecDeque<QueueTask>,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

/// A named serial executor.
///
/// Tasks of one queue run one after another in arrival order on a dedicated
/// worker thread; tasks of different queues run in parallel. Stopping the
/// queue abandons pending tasks.
pub(crate) struct DispatchQueue {
    name: String,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    /// Start a new queue named `name` with its worker thread
    pub(crate) fn start(
        name: impl Into<String>,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self, Error> {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread_name = format!("dispatch-{name}");
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || Self::run(worker_shared, runtime))
            .map_err(Error::Io)?;

        Ok(Self {
            name,
            shared,
            worker: Some(worker),
        })
    }

    fn run(shared: Arc<Shared>, runtime: tokio::runtime::Handle) {
        loop {
            let task = {
                let mut state = shared.state.lock().unwrap();
                loop {
                    if state.stopped {
                        return;
                    }
                    if let Some(task) = state.tasks.pop_front() {
                        break task;
                    }
                    state = shared.available.wait(state).unwrap();
                }
            };

            task(&runtime);
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Append a unit of work to the queue; returns immediately
    pub(crate) fn enqueue(&self, task: QueueTask) -> Result<(), Error> {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return Err(Error::Stopped(self.name.clone()));
        }

        state.tasks.push_back(task);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Atomically discard every pending task and return the number discarded
    pub(crate) fn purge_tasks(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        let purged = state.tasks.len();
        state.tasks.clear();

        if purged > 0 {
            debug!("purged {purged} tasks from dispatch queue {}", self.name);
        }
        purged
    }

    /// Stop dequeuing and join the worker thread; pending tasks are abandoned
    pub(crate) fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.shared.available.notify_all();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
