//! Strided tensor views and the device queues that execute generic operations over them.
//!
//! [`loom`] holds the data model (shapes, storages, views) and the queue contract;
//! [`hal`] holds the generic operations and their host kernels.

pub mod hal;
pub mod loom;

pub use hal::frontend::DeviceFunctions;
pub use loom::{
    device::{
        Cpu, CpuBuilder, CpuQueue, Device, DeviceKind, DeviceQueue, EventOptions, Gpu, GpuBuilder,
        GpuQueue, QueueError, QueueEvent,
    },
    num::{DataType, Scalar},
    shape::{IntoShape, Shape, ShapeError},
    storage::{Storage, StorageError},
    tensor::{SharedView, TensorError, TensorView},
};
