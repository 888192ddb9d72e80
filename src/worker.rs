//! Background-work scheduling.
//!
//! The plugin schedules work from its `run()` through a
//! [`WorkScheduler`]; a dedicated thread picks requests up, invokes the
//! plugin's work callback (which may respond zero or more times) and
//! queues responses for delivery.  Responses are always delivered back
//! to the plugin from the host's `process()` step, never from the
//! worker thread, so only the realtime thread touches the handle
//! during a cycle.
//!
//! Two-phase construction, like plugin instantiation demands: the
//! scheduler endpoint exists before the plugin does, the work
//! interface is wired in afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use once_cell::sync::OnceCell;

use crate::module::WorkInterface;

/// Requests and responses a worker can hold before dispatch fails.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// A dedicated thread services requests; normal realtime operation.
    Threaded,
    /// `schedule` runs the work callback immediately on the calling
    /// thread.  Used while exporting (determinism over deadline) and
    /// for the state-restore worker.
    Inline,
}

struct SchedulerShared {
    mode: WorkerMode,
    request_tx: Sender<Vec<u8>>,
    response_tx: Sender<Vec<u8>>,
    iface: OnceCell<Arc<dyn WorkInterface>>,
    dispatch_failures: AtomicU64,
}

/// The schedule endpoint handed to the plugin at instantiation.
///
/// `schedule` never blocks: in threaded mode a full request queue is a
/// dispatch failure (counted, no response will arrive), matching the
/// rule that the audio thread must not wait.
#[derive(Clone)]
pub struct WorkScheduler {
    shared: Arc<SchedulerShared>,
}

impl WorkScheduler {
    pub fn schedule(&self, data: &[u8]) -> bool {
        let shared = &*self.shared;
        match shared.mode {
            WorkerMode::Threaded => {
                if shared.request_tx.try_send(data.to_vec()).is_err() {
                    shared.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                true
            }
            WorkerMode::Inline => {
                let Some(iface) = shared.iface.get() else {
                    shared.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    return false;
                };
                let response_tx = shared.response_tx.clone();
                let mut respond = |body: &[u8]| {
                    if response_tx.try_send(body.to_vec()).is_err() {
                        shared.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    }
                };
                if iface.work(&mut respond, data).is_err() {
                    shared.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                true
            }
        }
    }
}

/// Per-instance worker facility.
pub struct Worker {
    shared: Arc<SchedulerShared>,
    request_rx: Option<Receiver<Vec<u8>>>,
    response_rx: Receiver<Vec<u8>>,
    exiting: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(mode: WorkerMode) -> Self {
        let (request_tx, request_rx) = bounded::<Vec<u8>>(QUEUE_DEPTH);
        let (response_tx, response_rx) = bounded::<Vec<u8>>(QUEUE_DEPTH);
        Self {
            shared: Arc::new(SchedulerShared {
                mode,
                request_tx,
                response_tx,
                iface: OnceCell::new(),
                dispatch_failures: AtomicU64::new(0),
            }),
            request_rx: Some(request_rx),
            response_rx,
            exiting: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn mode(&self) -> WorkerMode {
        self.shared.mode
    }

    pub fn scheduler(&self) -> WorkScheduler {
        WorkScheduler {
            shared: self.shared.clone(),
        }
    }

    /// Wires in the plugin's work interface after instantiation and,
    /// in threaded mode, starts the service thread.
    pub fn activate(&mut self, iface: Arc<dyn WorkInterface>) {
        if self.shared.iface.set(iface.clone()).is_err() {
            log::warn!("worker activated twice, ignoring");
            return;
        }
        if self.shared.mode != WorkerMode::Threaded {
            return;
        }
        let Some(request_rx) = self.request_rx.take() else {
            return;
        };
        let response_tx = self.shared.response_tx.clone();
        let exiting = self.exiting.clone();
        let thread = std::thread::Builder::new()
            .name("plugdock-worker".to_string())
            .spawn(move || {
                worker_thread_main(iface, request_rx, response_tx, exiting)
            })
            .expect("failed to spawn worker thread");
        self.thread = Some(thread);
    }

    /// Delivers pending responses to the plugin, then signals the end
    /// of the cycle.  Called from the realtime thread after `run()`.
    pub fn drain_responses(&self) {
        let Some(iface) = self.shared.iface.get() else {
            return;
        };
        let mut delivered = false;
        while let Ok(body) = self.response_rx.try_recv() {
            iface.work_response(&body);
            delivered = true;
        }
        if delivered {
            iface.end_run();
        }
    }

    /// Failed dispatches since the last call (scheduler side plus
    /// response-queue overflows).
    pub fn take_dispatch_failures(&self) -> u64 {
        self.shared.dispatch_failures.swap(0, Ordering::Relaxed)
    }

    /// Stops the service thread and joins it.  Idempotent.
    pub fn terminate(&mut self) {
        self.exiting.store(true, Ordering::Release);
        // wake a blocked recv with a sentinel; the thread checks the
        // exiting flag before treating it as a request
        let _ = self.shared.request_tx.try_send(Vec::new());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_thread_main(
    iface: Arc<dyn WorkInterface>,
    request_rx: Receiver<Vec<u8>>,
    response_tx: Sender<Vec<u8>>,
    exiting: Arc<AtomicBool>,
) {
    use crossbeam_channel::RecvTimeoutError;
    let tick = std::time::Duration::from_millis(100);
    loop {
        match request_rx.recv_timeout(tick) {
            Ok(request) => {
                if exiting.load(Ordering::Acquire) {
                    break;
                }
                let mut respond = |body: &[u8]| {
                    if response_tx.try_send(body.to_vec()).is_err() {
                        log::warn!("worker response queue full, response dropped");
                    }
                };
                if iface.work(&mut respond, &request).is_err() {
                    log::warn!("plugin work callback failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if exiting.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;
    use parking_lot::Mutex;

    /// Echoes every request back as a response.
    struct EchoWork {
        seen: Mutex<Vec<Vec<u8>>>,
        ended: AtomicU64,
    }

    impl EchoWork {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                ended: AtomicU64::new(0),
            })
        }
    }

    impl WorkInterface for EchoWork {
        fn work(
            &self,
            respond: &mut dyn FnMut(&[u8]),
            data: &[u8],
        ) -> Result<(), WorkError> {
            respond(data);
            Ok(())
        }

        fn work_response(&self, data: &[u8]) {
            self.seen.lock().push(data.to_vec());
        }

        fn end_run(&self) {
            self.ended.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn inline_worker_responds_same_cycle() {
        let iface = EchoWork::new();
        let mut worker = Worker::new(WorkerMode::Inline);
        worker.activate(iface.clone());
        let sched = worker.scheduler();
        assert!(sched.schedule(&[1, 2, 3]));
        worker.drain_responses();
        assert_eq!(iface.seen.lock().as_slice(), &[vec![1, 2, 3]]);
        assert_eq!(iface.ended.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn threaded_worker_delivers_in_request_order() {
        let iface = EchoWork::new();
        let mut worker = Worker::new(WorkerMode::Threaded);
        worker.activate(iface.clone());
        let sched = worker.scheduler();
        for i in 0u8..8 {
            assert!(sched.schedule(&[i]));
        }
        // give the thread time to service everything
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            worker.drain_responses();
            if iface.seen.lock().len() == 8 || std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let seen = iface.seen.lock().clone();
        assert_eq!(seen, (0u8..8).map(|i| vec![i]).collect::<Vec<_>>());
        worker.terminate();
    }

    #[test]
    fn schedule_before_activation_fails_inline() {
        let worker = Worker::new(WorkerMode::Inline);
        let sched = worker.scheduler();
        assert!(!sched.schedule(&[0]));
        assert_eq!(worker.take_dispatch_failures(), 1);
    }
}
