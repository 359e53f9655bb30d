//! Host-thread handoff for callbacks
//!
//! A [`CallbackExecutor`] owns one dedicated OS thread. Callbacks bound to
//! it are not run on the native thread that invoked the trampoline;
//! instead the invocation is sent over a channel and the native thread
//! blocks until the executor replies. Work that is already running on the
//! executor thread (native code called from a callback calling back again)
//! runs inline, so nested chains cannot deadlock.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{debug, error};

use crate::ffi::Value;

/// A unit of host work producing a callback result
pub type Job = Box<dyn FnOnce() -> Value + Send>;

struct Request {
    job: Job,
    reply: Sender<Value>,
}

struct ExecutorInner {
    name: String,
    thread_id: ThreadId,
    requests: Sender<Request>,
}

/// Dedicated host thread that runs callback closures
#[derive(Clone)]
pub struct CallbackExecutor {
    inner: Arc<ExecutorInner>,
}

impl CallbackExecutor {
    /// Spawn the executor thread
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Request>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for request in rx.iter() {
                    let result = panic::catch_unwind(AssertUnwindSafe(request.job));
                    match result {
                        Ok(value) => {
                            let _ = request.reply.send(value);
                        }
                        Err(_) => {
                            error!("callback panicked on executor thread; aborting");
                            std::process::abort();
                        }
                    }
                }
                debug!("callback executor stopped");
            })?;

        debug!(executor = name, "callback executor started");
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                name: name.to_string(),
                thread_id: handle.thread().id(),
                requests: tx,
            }),
        })
    }

    /// Executor name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Check if the calling thread is the executor thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Run `job` on the executor thread and wait for its result.
    ///
    /// Returns `None` if the executor thread is gone.
    pub fn run(&self, job: Job) -> Option<Value> {
        if self.is_current() {
            return Some(job());
        }
        let (reply, result) = bounded(1);
        self.inner.requests.send(Request { job, reply }).ok()?;
        result.recv().ok()
    }
}

impl std::fmt::Debug for CallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackExecutor")
            .field("name", &self.inner.name)
            .field("thread", &self.inner.thread_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_on_executor_thread() {
        let executor = CallbackExecutor::spawn("test-executor").unwrap();
        let caller = thread::current().id();
        let probe = executor.clone();
        let value = executor
            .run(Box::new(move || {
                assert_ne!(thread::current().id(), caller);
                Value::Bool(probe.is_current())
            }))
            .unwrap();
        assert_eq!(value, Value::Bool(true));
        assert!(!executor.is_current());
    }

    #[test]
    fn test_nested_run_is_inline() {
        let executor = CallbackExecutor::spawn("nested-executor").unwrap();
        let inner = executor.clone();
        let value = executor
            .run(Box::new(move || {
                inner
                    .run(Box::new(|| Value::I32(7)))
                    .unwrap_or(Value::Void)
            }))
            .unwrap();
        assert_eq!(value, Value::I32(7));
    }

    #[test]
    fn test_many_threads_share_executor() {
        let executor = CallbackExecutor::spawn("shared-executor").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = executor.clone();
                thread::spawn(move || executor.run(Box::new(move || Value::I64(i * 2))))
            })
            .collect();
        let mut total = 0;
        for handle in handles {
            if let Some(Value::I64(v)) = handle.join().unwrap() {
                total += v;
            }
        }
        assert_eq!(total, 56);
    }
}
