use std::{
    borrow::Cow,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::ThreadId,
    time::Duration,
};

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cpu::{Cpu, CpuBuilder, CpuQueue};
pub use event::{EventId, EventOptions, QueueEvent};
pub use gpu::{Gpu, GpuBuildError, GpuBuilder, GpuQueue};

use super::{ops::BackendOp, shape::ShapeError, storage::StorageError, tensor::TensorError};

pub mod cpu;
pub mod event;
pub mod gpu;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("kernel error: {0}")]
    Kernel(String),
    #[error("op {op} panicked: {message}")]
    Panic {
        op: Cow<'static, str>,
        message: String,
    },
    #[error("{backend} queue does not support op {op}")]
    Unsupported {
        backend: DeviceKind,
        op: Cow<'static, str>,
    },
    #[error("wait timed out after {0:?}")]
    TimedOut(Duration),
    #[error("queue worker disconnected")]
    Disconnected,
    #[error("failed to spawn queue worker: {0}")]
    Spawn(String),
}

impl From<StorageError> for QueueError {
    fn from(value: StorageError) -> Self {
        Self::Tensor(value.into())
    }
}

impl From<ShapeError> for QueueError {
    fn from(value: ShapeError) -> Self {
        Self::Tensor(value.into())
    }
}

impl QueueError {
    /// An error raised from inside an op's closure.
    #[inline]
    pub fn kernel(message: impl Into<String>) -> Self {
        Self::Kernel(message.into())
    }
}

pub trait Device {
    fn id(&self) -> uid::Id<DeviceId>;
    fn name(&self) -> &str;
    fn kind(&self) -> DeviceKind;
}

/// Identity, thread affinity and sticky error of a queue.
///
/// Shared between a queue handle and its worker.
#[derive(Debug)]
pub(crate) struct QueueState {
    id: uid::Id<QueueId>,
    name: Arc<str>,
    thread: ThreadId,
    poisoned: AtomicBool,
    error: Mutex<Option<QueueError>>,
}

impl QueueState {
    pub fn new(name: Arc<str>) -> Self {
        Self {
            id: uid::Id::new(),
            name,
            thread: std::thread::current().id(),
            poisoned: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> uid::Id<QueueId> {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asserts that the queue is used from the thread that created it.
    #[inline]
    pub fn check_thread(&self) {
        #[cfg(any(debug_assertions, feature = "strict"))]
        assert_eq!(
            std::thread::current().id(),
            self.thread,
            "queue `{}` used from a foreign thread",
            self.name
        );
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Stores the first error and stops further scheduling.
    pub fn poison(&self, err: QueueError) {
        log::error!("queue `{}` poisoned: {err}", self.name);
        let mut error = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if error.is_none() {
            *error = Some(err);
        }
        self.poisoned.store(true, Ordering::Release);
    }

    pub fn last_error(&self) -> Option<QueueError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        let mut error = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = error.take() {
            log::debug!("queue `{}` reset after: {err}", self.name);
        }
        self.poisoned.store(false, Ordering::Release);
    }

    /// Returns the stored error if the queue is poisoned.
    pub fn check(&self) -> Result<(), QueueError> {
        match self.is_poisoned() {
            false => Ok(()),
            true => Err(self.last_error().unwrap_or(QueueError::Disconnected)),
        }
    }
}

/// A serial stream of work on a device.
///
/// Ops submitted to one queue run in submission order. Once an op fails the queue is poisoned:
/// further ops are dropped without running until [`DeviceQueue::reset_error`] is called, and
/// the failure stays observable through [`DeviceQueue::last_error`].
///
/// A queue must only be used from the thread that created it.
pub trait DeviceQueue {
    /// Runs the ops given to this queue. An op can only be enqueued if it has a kernel for it.
    type Backend;

    fn id(&self) -> uid::Id<QueueId>;
    fn name(&self) -> &str;
    fn device(&self) -> &dyn Device;
    /// Returns `true` if ops run inline before `enqueue` returns.
    fn executes_synchronously(&self) -> bool;
    /// Timeout applied to waits issued through this queue.
    fn timeout(&self) -> Option<Duration>;

    fn last_error(&self) -> Option<QueueError>;
    fn reset_error(&self);

    /// Schedules an op. Ops given to a poisoned queue are dropped and this still returns `Ok`.
    fn enqueue(&self, op: Box<dyn BackendOp<Self::Backend>>) -> Result<(), QueueError>;

    /// Signals `event` once all previously enqueued work has run.
    fn record(&self, event: QueueEvent) -> Result<QueueEvent, QueueError>;

    /// Holds back later work on this queue until `event` is signaled.
    fn wait_for(&self, event: &QueueEvent) -> Result<(), QueueError>;

    #[inline]
    fn create_event(&self, options: EventOptions) -> QueueEvent {
        QueueEvent::new(options)
    }

    /// Blocks until everything enqueued so far has run.
    fn wait_until_queue_is_complete(&self) -> Result<(), QueueError> {
        let event = self.create_event(EventOptions::default());
        let event = self.record(event)?;
        event.wait(self.timeout())?;
        match self.last_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{QueueError, QueueState};
    use crate::loom::{storage::StorageError, tensor::TensorError};

    #[test]
    fn test_queue_state() {
        let state = QueueState::new("state".into());
        assert!(!state.is_poisoned());
        assert!(state.check().is_ok());

        state.poison(QueueError::kernel("first"));
        state.poison(QueueError::kernel("second"));
        assert!(state.is_poisoned());
        assert!(matches!(state.last_error(), Some(QueueError::Kernel(x)) if x == "first"));
        assert!(matches!(state.check(), Err(QueueError::Kernel(_))));

        state.reset();
        assert!(!state.is_poisoned());
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_error_conversion() {
        let err: QueueError = StorageError::ReadOnly("x".into()).into();
        assert!(matches!(
            err,
            QueueError::Tensor(TensorError::Storage(StorageError::ReadOnly(_)))
        ));
        assert_eq!(
            format!("{err}"),
            "storage access violation: `x` is read-only"
        );
    }
}
