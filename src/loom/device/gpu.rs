use std::{cell::RefCell, sync::Arc, time::Duration};

use thiserror::Error;

use super::{
    Device, DeviceId, DeviceKind, DeviceQueue, QueueError, QueueEvent, QueueId, QueueState,
};
use crate::loom::ops::BackendOp;

#[derive(Debug, Clone)]
pub struct Gpu {
    /// The unique identifier of the device.
    id: uid::Id<DeviceId>,
    name: Arc<str>,
    /// Handle to a WebGPU compute device.
    device: wgpu::Device,
    /// The WebGPU command queue.
    queue: wgpu::Queue,
}

impl Gpu {
    /// Creates a queue on the device.
    pub fn queue(&self, name: &str) -> GpuQueue {
        log::debug!("queue `{name}` created on {}", self.name);
        let state = Arc::new(QueueState::new(name.into()));
        let backend = RefCell::new(Backend {
            queue: state.id(),
            name: name.into(),
            device: self.clone(),
        });
        GpuQueue {
            device: self.clone(),
            state,
            backend,
            timeout: None,
        }
    }
}

impl Device for Gpu {
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
        DeviceKind::Gpu
    }
}

#[derive(Debug)]
pub struct Backend {
    queue: uid::Id<QueueId>,
    name: Arc<str>,
    device: Gpu,
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
    pub fn device(&self) -> &Gpu {
        &self.device
    }
}

pub struct GpuBuilder {
    pub adapter: wgpu::Adapter,
    pub features: wgpu::Features,
    pub limits: wgpu::Limits,
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum GpuBuildError {
    #[error("failed to request adaptor")]
    RequestAdapterError(#[from] wgpu::RequestAdapterError),
    #[error("failed to request device")]
    RequestDeviceError(#[from] wgpu::RequestDeviceError),
}

impl GpuBuilder {
    pub fn new(adapter: wgpu::Adapter) -> Self {
        Self {
            adapter,
            features: wgpu::Features::empty(),
            limits: Default::default(),
            name: None,
        }
    }

    /// Picks the default adapter of `instance`.
    pub async fn request(instance: &wgpu::Instance) -> Result<Self, GpuBuildError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await?;
        Ok(Self::new(adapter))
    }

    pub async fn build(self) -> Result<Gpu, GpuBuildError> {
        let Self {
            adapter,
            features,
            limits,
            name,
        } = self;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: name.as_deref(),
                required_features: features,
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let name = name.unwrap_or_else(|| adapter.get_info().name).into();
        let id = uid::Id::new();
        log::debug!("gpu `{name}` created");
        Ok(Gpu {
            id,
            name,
            device,
            queue,
        })
    }

    pub fn limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn features(mut self, features: wgpu::Features) -> Self {
        self.features = features;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A queue on a WebGPU device.
///
/// Only synchronization works: the device kernels reject every op, which poisons the queue.
#[derive(Debug)]
pub struct GpuQueue {
    device: Gpu,
    state: Arc<QueueState>,
    backend: RefCell<Backend>,
    timeout: Option<Duration>,
}

impl GpuQueue {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl DeviceQueue for GpuQueue {
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
        false
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
        let mut backend = self
            .backend
            .try_borrow_mut()
            .map_err(|_| QueueError::kernel("queue re-entered from inside an op"))?;
        log::trace!("[{}] execute {}: {:?}", backend.name, op.name(), op.io());
        if let Err(err) = op.execute(&mut backend) {
            self.state.poison(err);
        }
        Ok(())
    }

    fn record(&self, event: QueueEvent) -> Result<QueueEvent, QueueError> {
        self.state.check_thread();
        self.state.check()?;

        let signal = event.clone();
        self.device
            .queue
            .on_submitted_work_done(move || signal.signal());
        self.device.queue.submit([]);
        if let Err(err) = self.device.device.poll(wgpu::PollType::Wait) {
            log::warn!("queue `{}` failed to poll: {err}", self.name());
        }
        Ok(event)
    }

    fn wait_for(&self, event: &QueueEvent) -> Result<(), QueueError> {
        self.state.check_thread();
        self.state.check()?;
        event.wait(self.timeout)
    }
}
