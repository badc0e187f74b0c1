use std::{
    any::Any,
    cell::RefCell,
    panic::AssertUnwindSafe,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use super::{
    Device, DeviceId, DeviceKind, DeviceQueue, QueueError, QueueEvent, QueueId, QueueState,
};
use crate::loom::{ops::BackendOp, platform};

#[derive(Debug, Clone)]
pub struct Cpu {
    /// The unique identifier of the device.
    id: uid::Id<DeviceId>,
    name: Arc<str>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        let id = uid::Id::new();
        let name = "cpu".into();
        Self { id, name }
    }

    /// Creates an asynchronous queue with default settings.
    #[inline]
    pub fn queue(&self, name: &str) -> Result<CpuQueue, QueueError> {
        CpuBuilder::new(self).name(name).build()
    }
}

impl Device for Cpu {
    #[inline]
    fn id(&self) -> uid::Id<DeviceId> {
        self.id
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }
}

/// Host execution context handed to every op.
#[derive(Debug)]
pub struct Backend {
    queue: uid::Id<QueueId>,
    name: Arc<str>,
    /// Number of ops that ran to completion.
    executed: usize,
}

impl Backend {
    #[inline]
    pub fn queue(&self) -> uid::Id<QueueId> {
        self.queue
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn executed(&self) -> usize {
        self.executed
    }

    fn execute(&mut self, op: &dyn BackendOp<Self>) -> Result<(), QueueError> {
        log::trace!("[{}] execute {}: {:?}", self.name, op.name(), op.io());
        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("execute", op = %op.name()).entered();
        op.execute(self)?;
        self.executed += 1;
        Ok(())
    }
}

enum Message {
    Execute(Box<dyn BackendOp<Backend>>),
    Signal(QueueEvent),
    Wait(QueueEvent),
}

struct Worker {
    sender: flume::Sender<Message>,
    handle: JoinHandle<()>,
}

enum Executor {
    /// Runs ops on the calling thread.
    Inline(RefCell<Backend>),
    /// Sends ops to a private worker thread.
    Worker(Option<Worker>),
}

/// A queue executing ops on the host, either inline or on its own worker thread.
pub struct CpuQueue {
    device: Cpu,
    state: Arc<QueueState>,
    timeout: Option<Duration>,
    executor: Executor,
}

impl std::fmt::Debug for CpuQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuQueue")
            .field("id", &self.state.id())
            .field("name", &self.state.name())
            .field("synchronous", &self.executes_synchronously())
            .field("poisoned", &self.state.is_poisoned())
            .finish()
    }
}

impl CpuQueue {
    fn send(&self, message: Message) -> Result<(), QueueError> {
        match &self.executor {
            Executor::Worker(Some(worker)) => worker
                .sender
                .send(message)
                .map_err(|_| QueueError::Disconnected),
            _ => Err(QueueError::Disconnected),
        }
    }
}

impl DeviceQueue for CpuQueue {
    type Backend = Backend;

    #[inline]
    fn id(&self) -> uid::Id<QueueId> {
        self.state.id()
    }

    #[inline]
    fn name(&self) -> &str {
        self.state.name()
    }

    #[inline]
    fn device(&self) -> &dyn Device {
        &self.device
    }

    #[inline]
    fn executes_synchronously(&self) -> bool {
        matches!(self.executor, Executor::Inline(_))
    }

    #[inline]
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn last_error(&self) -> Option<QueueError> {
        self.state.check_thread();
        self.state.last_error()
    }

    fn reset_error(&self) {
        self.state.check_thread();
        self.state.reset();
    }

    fn enqueue(&self, op: Box<dyn BackendOp<Backend>>) -> Result<(), QueueError> {
        self.state.check_thread();
        if self.state.is_poisoned() {
            log::warn!("queue `{}` is poisoned, dropping {}", self.name(), op.name());
            return Ok(());
        }
        match &self.executor {
            Executor::Inline(backend) => {
                let mut backend = backend
                    .try_borrow_mut()
                    .map_err(|_| QueueError::kernel("queue re-entered from inside an op"))?;
                if let Err(err) = backend.execute(op.as_ref()) {
                    self.state.poison(err);
                }
                Ok(())
            }
            Executor::Worker(_) => self.send(Message::Execute(op)),
        }
    }

    fn record(&self, event: QueueEvent) -> Result<QueueEvent, QueueError> {
        self.state.check_thread();
        self.state.check()?;
        match &self.executor {
            Executor::Inline(_) => event.signal(),
            Executor::Worker(_) => self.send(Message::Signal(event.clone()))?,
        }
        Ok(event)
    }

    fn wait_for(&self, event: &QueueEvent) -> Result<(), QueueError> {
        self.state.check_thread();
        self.state.check()?;
        match &self.executor {
            Executor::Inline(_) => event.wait(self.timeout),
            Executor::Worker(_) => self.send(Message::Wait(event.clone())),
        }
    }
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        let Executor::Worker(worker) = &mut self.executor else {
            return;
        };
        let Some(Worker { sender, handle }) = worker.take() else {
            return;
        };
        drop(sender);
        if handle.join().is_err() {
            log::error!("queue `{}` worker panicked", self.state.name());
        }
        log::debug!("queue `{}` closed", self.state.name());
    }
}

#[derive(Debug, Clone)]
pub struct CpuBuilder {
    pub device: Cpu,
    pub name: Option<String>,
    pub synchronous: bool,
    pub timeout: Option<Duration>,
}

impl CpuBuilder {
    pub fn new(device: &Cpu) -> Self {
        Self {
            device: device.clone(),
            name: None,
            synchronous: false,
            timeout: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs ops inline on the calling thread instead of on a worker.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<CpuQueue, QueueError> {
        let Self {
            device,
            name,
            synchronous,
            timeout,
        } = self;

        let name: Arc<str> = match name {
            Some(name) => name.into(),
            None => format!("{}-queue", device.name()).into(),
        };
        let state = Arc::new(QueueState::new(name.clone()));
        let backend = Backend {
            queue: state.id(),
            name: name.clone(),
            executed: 0,
        };

        let executor = match synchronous {
            true => Executor::Inline(RefCell::new(backend)),
            false => {
                let (sender, receiver) = flume::unbounded();
                let worker_state = state.clone();
                let handle = platform::spawn_worker(&name, move || {
                    serve(backend, worker_state, receiver, timeout)
                })
                .map_err(|err| QueueError::Spawn(err.to_string()))?;
                Executor::Worker(Some(Worker { sender, handle }))
            }
        };

        log::debug!(
            "queue `{name}` created on {} ({})",
            device.name(),
            match synchronous {
                true => "synchronous",
                false => "asynchronous",
            }
        );
        Ok(CpuQueue {
            device,
            state,
            timeout,
            executor,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

fn serve(
    mut backend: Backend,
    state: Arc<QueueState>,
    receiver: flume::Receiver<Message>,
    timeout: Option<Duration>,
) {
    #[cfg(feature = "trace")]
    let _span = tracing::debug_span!("serve", queue = %state.name()).entered();

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Execute(op) => {
                if state.is_poisoned() {
                    log::warn!("queue `{}` is poisoned, dropping {}", state.name(), op.name());
                    continue;
                }
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    backend.execute(op.as_ref())
                }));
                let result = result.unwrap_or_else(|payload| {
                    Err(QueueError::Panic {
                        op: op.name(),
                        message: panic_message(payload),
                    })
                });
                if let Err(err) = result {
                    state.poison(err);
                }
            }
            Message::Signal(event) => event.signal(),
            Message::Wait(event) => loop {
                match event.wait(timeout) {
                    Ok(()) => break,
                    Err(err) => log::warn!("queue `{}`: {err}, still waiting", state.name()),
                }
            },
        }
    }

    log::debug!(
        "queue `{}` worker exits after {} ops",
        state.name(),
        backend.executed()
    );
}
