//! Ordered asynchronous execution stream.
//!
//! A [`Stream`] owns one worker thread.  Operations submitted from the
//! driving thread are queued and executed by the worker strictly in
//! submission order; [`Stream::submit`] never waits for execution.
//! [`Stream::sync`] is the only blocking point: it returns once every
//! operation submitted before the call has completed.
//!
//! # Error model
//!
//! Failures are sticky.  Once an operation fails on the worker, every later
//! operation on the same stream is skipped, new submissions are rejected with
//! [`Status::InvalidOperation`], and every `sync` reports the original
//! failure.  A failed stream can only be destroyed.
//!
//! # Destruction
//!
//! Dropping a stream closes its queue and joins the worker, so all work
//! already submitted finishes before the stream is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use tnr_core::backend::{Backend, CapabilitySet};
use tnr_core::error::{EngineError, Result, Status};

use crate::context::{Device, FaultPoint, OpKind, ResourceKind};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// One unit of work bound for a stream.
pub(crate) struct Operation {
    kind: OpKind,
    backend: Backend,
    job: Job,
}

impl Operation {
    pub(crate) fn new<F>(kind: OpKind, backend: Backend, job: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            kind,
            backend,
            job: Box::new(job),
        }
    }
}

enum Command {
    Run(Operation),
    Sync(mpsc::Sender<()>),
}

#[derive(Clone, Debug)]
struct Failure {
    kind: OpKind,
    status: Status,
    message: String,
}

#[derive(Default)]
struct StreamShared {
    failure: Mutex<Option<Failure>>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl StreamShared {
    fn failure(&self) -> Option<Failure> {
        match self.failure.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_failure(&self, failure: Failure) {
        let mut guard = match self.failure.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_or_insert(failure);
    }
}

/// Ordered asynchronous operation queue bound to a capability set.
pub struct Stream {
    id: u64,
    capabilities: CapabilitySet,
    device: Arc<Device>,
    shared: Arc<StreamShared>,
    tx: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    /// Create a stream able to run operations on every backend in `capabilities`.
    ///
    /// # Errors
    ///
    /// - [`Status::InvalidArgument`] if `capabilities` is empty.
    /// - [`Status::NotImplemented`] if the device lacks one of the backends.
    pub fn create(device: &Arc<Device>, capabilities: CapabilitySet) -> Result<Self> {
        if capabilities.is_empty() {
            return Err(EngineError::accelerator(
                Status::InvalidArgument,
                "stream needs at least one backend",
            ));
        }
        if !device.capabilities().is_superset_of(capabilities) {
            return Err(EngineError::accelerator(
                Status::NotImplemented,
                format!(
                    "device supports {}, stream requested {capabilities}",
                    device.capabilities()
                ),
            ));
        }

        let id = device.register(ResourceKind::Stream)?;
        let shared = Arc::new(StreamShared::default());
        let (tx, rx) = mpsc::channel::<Command>();

        let worker = {
            let device = Arc::clone(device);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("tnr-stream-{id}"))
                .spawn(move || run_worker(id, &device, &shared, rx))
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                device.deregister(ResourceKind::Stream, id);
                return Err(EngineError::accelerator(
                    Status::OutOfMemory,
                    format!("failed to start stream worker: {e}"),
                ));
            }
        };

        debug!(id, %capabilities, "Stream created");
        Ok(Self {
            id,
            capabilities,
            device: Arc::clone(device),
            shared,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Operations submitted but not yet completed.
    pub fn pending(&self) -> u64 {
        let submitted = self.shared.submitted.load(Ordering::Acquire);
        let completed = self.shared.completed.load(Ordering::Acquire);
        submitted.saturating_sub(completed)
    }

    /// `true` once an operation on this stream has failed.
    pub fn is_failed(&self) -> bool {
        self.shared.failure().is_some()
    }

    /// Enqueue an operation.  Returns without waiting for it to run.
    pub(crate) fn submit(&self, op: Operation) -> Result<()> {
        if !self.capabilities.contains(op.backend) {
            return Err(EngineError::accelerator(
                Status::InvalidArgument,
                format!(
                    "{} on backend {} but stream {} was created with {}",
                    op.kind, op.backend, self.id, self.capabilities
                ),
            ));
        }
        if let Some(failure) = self.shared.failure() {
            return Err(EngineError::accelerator(
                Status::InvalidOperation,
                format!(
                    "stream {} is in an error state after {} failed: {}",
                    self.id, failure.kind, failure.message
                ),
            ));
        }
        self.device.check_fault(FaultPoint::Submit(op.kind))?;

        let tx = self.tx.as_ref().ok_or_else(|| {
            EngineError::accelerator(Status::InvalidOperation, "stream is being destroyed")
        })?;
        let kind = op.kind;
        tx.send(Command::Run(op)).map_err(|_| {
            EngineError::accelerator(
                Status::InvalidOperation,
                format!("stream {} worker is not running", self.id),
            )
        })?;
        self.shared.submitted.fetch_add(1, Ordering::AcqRel);
        debug!(stream = self.id, op = %kind, "Operation submitted");
        Ok(())
    }

    /// Block until every operation submitted so far has completed.
    ///
    /// Returns the stream's first failure if any operation failed.
    pub fn sync(&self) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            EngineError::accelerator(Status::InvalidOperation, "stream is being destroyed")
        })?;
        let (ack_tx, ack_rx) = mpsc::channel();
        tx.send(Command::Sync(ack_tx)).map_err(|_| {
            EngineError::accelerator(
                Status::InternalError,
                format!("stream {} worker is not running", self.id),
            )
        })?;
        ack_rx.recv().map_err(|_| {
            EngineError::accelerator(
                Status::InternalError,
                format!("stream {} worker exited during sync", self.id),
            )
        })?;

        match self.shared.failure() {
            None => Ok(()),
            Some(failure) => Err(EngineError::accelerator(
                failure.status,
                format!("{} failed: {}", failure.kind, failure.message),
            )),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain its queue and exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!(stream = self.id, "Stream worker panicked");
        }
        self.device.deregister(ResourceKind::Stream, self.id);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("pending", &self.pending())
            .field("failed", &self.is_failed())
            .finish()
    }
}

fn run_worker(id: u64, device: &Device, shared: &StreamShared, rx: mpsc::Receiver<Command>) {
    for command in rx {
        match command {
            Command::Run(op) => {
                if shared.failure().is_none() {
                    let kind = op.kind;
                    let result = device
                        .check_fault(FaultPoint::Execute(kind))
                        .and_then(|()| (op.job)());
                    if let Err(err) = result {
                        let (status, message) = match err {
                            EngineError::Accelerator { status, message } => (status, message),
                            other => (Status::InternalError, other.to_string()),
                        };
                        warn!(stream = id, op = %kind, %status, %message, "Operation failed");
                        shared.record_failure(Failure {
                            kind,
                            status,
                            message,
                        });
                    }
                }
                shared.completed.fetch_add(1, Ordering::AcqRel);
            }
            Command::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn compute_stream(device: &Arc<Device>) -> Stream {
        Stream::create(device, Backend::Cuda.stream_capabilities()).unwrap()
    }

    #[test]
    fn operations_run_in_submission_order() {
        let device = Device::host();
        let stream = compute_stream(&device);
        let log = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..32 {
            let log = Arc::clone(&log);
            stream
                .submit(Operation::new(OpKind::ConvertImageFormat, Backend::Cuda, move || {
                    log.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        stream.sync().unwrap();

        assert_eq!(*log.lock().unwrap(), (0..32).collect::<Vec<_>>());
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn failure_is_sticky() {
        let device = Device::host();
        let stream = compute_stream(&device);
        let ran_after = Arc::new(AtomicU64::new(0));

        stream
            .submit(Operation::new(OpKind::TemporalNoiseReduction, Backend::Cuda, || {
                Err(EngineError::accelerator(Status::InternalError, "boom"))
            }))
            .unwrap();
        {
            let ran_after = Arc::clone(&ran_after);
            // Submitted before the failure is observed; must be skipped.
            let _ = stream.submit(Operation::new(OpKind::ConvertImageFormat, Backend::Cuda, move || {
                ran_after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let err = stream.sync().unwrap_err();
        assert_eq!(err.status(), Some(Status::InternalError));
        assert!(err.to_string().contains("boom"));
        assert_eq!(ran_after.load(Ordering::SeqCst), 0);

        let err = stream
            .submit(Operation::new(OpKind::ConvertImageFormat, Backend::Cuda, || Ok(())))
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidOperation));
        assert!(stream.sync().is_err());
    }

    #[test]
    fn backend_outside_stream_capabilities_is_rejected() {
        let device = Device::host();
        let stream = compute_stream(&device);
        let err = stream
            .submit(Operation::new(OpKind::TemporalNoiseReduction, Backend::Vic, || Ok(())))
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
    }

    #[test]
    fn create_checks_device_capabilities() {
        let device = Device::builder()
            .capabilities(CapabilitySet::only(Backend::Cuda))
            .build();
        let err = Stream::create(&device, Backend::Vic.stream_capabilities()).unwrap_err();
        assert_eq!(err.status(), Some(Status::NotImplemented));
        assert_eq!(device.ledger().streams.created, 0);

        let err = Stream::create(&device, CapabilitySet::EMPTY).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArgument));
    }

    #[test]
    fn drop_drains_queue_and_releases_once() {
        let device = Device::host();
        let done = Arc::new(AtomicU64::new(0));
        {
            let stream = compute_stream(&device);
            for _ in 0..8 {
                let done = Arc::clone(&done);
                stream
                    .submit(Operation::new(OpKind::ConvertImageFormat, Backend::Cuda, move || {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }))
                    .unwrap();
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 8);
        let snap = device.ledger();
        assert_eq!(snap.streams.created, 1);
        assert_eq!(snap.streams.released, 1);
    }

    #[test]
    fn execute_fault_surfaces_at_sync() {
        let device = Device::builder()
            .fail_at(
                FaultPoint::Execute(OpKind::ConvertImageFormat),
                2,
                Status::InternalError,
            )
            .build();
        let stream = compute_stream(&device);
        for _ in 0..3 {
            stream
                .submit(Operation::new(OpKind::ConvertImageFormat, Backend::Cuda, || Ok(())))
                .unwrap();
        }
        assert!(stream.sync().is_err());
    }
}
