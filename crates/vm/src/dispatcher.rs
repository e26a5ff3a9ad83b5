//! The worker pool dispatcher.
//!
//! A pool owns `N` workers of one interpreter flavor. Each worker signals
//! readiness on a one-slot channel; dispatch selects over the ready set,
//! hands the job to the winner on a one-slot job channel and awaits the
//! result on a per-job reply channel. The timed variants bound both the
//! wait for a ready worker and the wait for output, interrupting the worker
//! through its cancellation flag when the budget runs out.

use crate::host::ContractHandler;
use crate::job::ContractJob;
use crate::value::ScriptValue;
use crate::worker::{ScriptRuntime, Worker};
use crate::{VmConfig, VmError, VmResult};
use crossbeam_channel::{bounded, Receiver, Select, Sender};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct JobEnvelope {
    job: ContractJob,
    handler: Arc<dyn ContractHandler>,
    reply: Sender<VmResult<ScriptValue>>,
}

struct WorkerHandle {
    ready: Receiver<()>,
    job: Option<Sender<JobEnvelope>>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// A pool of interpreter workers of one flavor.
pub struct WorkerPool {
    name: String,
    running: Arc<AtomicBool>,
    pending_async: Arc<AtomicI64>,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawns `config.worker_count` workers whose runtimes are built by
    /// `factory` (invoked on each worker's own thread).
    pub fn new<F>(name: &str, config: VmConfig, factory: F) -> Self
    where
        F: Fn(VmConfig) -> Box<dyn ScriptRuntime> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let mut workers = Vec::with_capacity(config.worker_count);

        for index in 0..config.worker_count {
            let (ready_tx, ready_rx) = bounded::<()>(1);
            let (job_tx, job_rx) = bounded::<JobEnvelope>(1);
            let cancel = Arc::new(AtomicBool::new(false));

            let worker_cancel = Arc::clone(&cancel);
            let worker_config = config.clone();
            let worker_factory = Arc::clone(&factory);
            let pool_name = name.to_string();
            let thread = std::thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || {
                    let runtime = worker_factory(worker_config.clone());
                    let mut worker = Worker::new(runtime, worker_config, worker_cancel);
                    loop {
                        if ready_tx.send(()).is_err() {
                            break;
                        }
                        let envelope = match job_rx.recv() {
                            Ok(envelope) => envelope,
                            Err(_) => break,
                        };
                        let result = worker.run(&envelope.job, envelope.handler);
                        // The dispatcher may have abandoned a timed-out job.
                        let _ = envelope.reply.send(result);
                    }
                    debug!(pool = %pool_name, index, "worker exited");
                })
                .expect("worker thread spawn");

            workers.push(WorkerHandle {
                ready: ready_rx,
                job: Some(job_tx),
                cancel,
                thread: Some(thread),
            });
        }

        Self {
            name: name.to_string(),
            running: Arc::new(AtomicBool::new(true)),
            pending_async: Arc::new(AtomicI64::new(0)),
            workers,
        }
    }

    /// The pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of in-flight async jobs.
    pub fn pending_async_jobs(&self) -> i64 {
        self.pending_async.load(Ordering::Relaxed)
    }

    /// Stops accepting new work.
    pub fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn claim_worker(&self, deadline: Option<Instant>) -> VmResult<usize> {
        let mut select = Select::new();
        for handle in &self.workers {
            select.recv(&handle.ready);
        }

        let operation = match deadline {
            Some(deadline) => select
                .select_deadline(deadline)
                .map_err(|_| VmError::WorkerTimeout)?,
            None => select.select(),
        };
        let index = operation.index();
        operation
            .recv(&self.workers[index].ready)
            .map_err(|_| VmError::WorkerClosed)?;
        Ok(index)
    }

    fn dispatch(
        &self,
        index: usize,
        job: ContractJob,
        handler: Arc<dyn ContractHandler>,
    ) -> VmResult<Receiver<VmResult<ScriptValue>>> {
        let (reply_tx, reply_rx) = bounded(1);
        let sender = self.workers[index]
            .job
            .as_ref()
            .ok_or(VmError::WorkerClosed)?;
        sender
            .send(JobEnvelope {
                job,
                handler,
                reply: reply_tx,
            })
            .map_err(|_| VmError::WorkerClosed)?;
        Ok(reply_rx)
    }

    /// Executes a job on the next ready worker, blocking until a result is
    /// available.
    pub fn send_work(
        &self,
        job: ContractJob,
        handler: Arc<dyn ContractHandler>,
    ) -> VmResult<ScriptValue> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(VmError::VmNotRunning);
        }
        let index = self.claim_worker(None)?;
        let reply = self.dispatch(index, job, handler)?;
        reply.recv().map_err(|_| VmError::WorkerClosed)?
    }

    /// Executes a job with a wall-clock budget covering both the wait for a
    /// ready worker and the execution itself. On expiry the claimed worker
    /// is interrupted through its cancellation flag and `WorkerTimeout` is
    /// returned.
    pub fn send_work_timed(
        &self,
        timeout: Duration,
        job: ContractJob,
        handler: Arc<dyn ContractHandler>,
    ) -> VmResult<ScriptValue> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(VmError::VmNotRunning);
        }
        let deadline = Instant::now() + timeout;
        let index = self.claim_worker(Some(deadline))?;
        let reply = self.dispatch(index, job, handler)?;

        match reply.recv_deadline(deadline) {
            Ok(result) => result,
            Err(_) => {
                warn!(pool = %self.name, index, "worker over budget, interrupting");
                self.workers[index].cancel.store(true, Ordering::Relaxed);
                Err(VmError::WorkerTimeout)
            }
        }
    }

    /// Asynchronous form of [`WorkerPool::send_work`].
    pub fn send_work_async<C>(self: &Arc<Self>, job: ContractJob, handler: Arc<dyn ContractHandler>, callback: C)
    where
        C: FnOnce(VmResult<ScriptValue>) + Send + 'static,
    {
        let pool = Arc::clone(self);
        pool.pending_async.fetch_add(1, Ordering::Relaxed);
        std::thread::spawn(move || {
            let result = pool.send_work(job, handler);
            pool.pending_async.fetch_sub(1, Ordering::Relaxed);
            callback(result);
        });
    }

    /// Asynchronous form of [`WorkerPool::send_work_timed`].
    pub fn send_work_timed_async<C>(
        self: &Arc<Self>,
        timeout: Duration,
        job: ContractJob,
        handler: Arc<dyn ContractHandler>,
        callback: C,
    ) where
        C: FnOnce(VmResult<ScriptValue>) + Send + 'static,
    {
        let pool = Arc::clone(self);
        pool.pending_async.fetch_add(1, Ordering::Relaxed);
        std::thread::spawn(move || {
            let result = pool.send_work_timed(timeout, job, handler);
            pool.pending_async.fetch_sub(1, Ordering::Relaxed);
            callback(result);
        });
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in &mut self.workers {
            handle.cancel.store(true, Ordering::Relaxed);
            handle.job.take();
        }
        for handle in &mut self.workers {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
