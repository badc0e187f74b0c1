//! The `loom` module provides the foundational abstractions for strided tensor computation.
//! It describes how elements are laid out in memory and how work over them is scheduled onto devices.
//!
//! ## Key Components
//! 1. **Shapes**:
//!    - Extents and strides of a tensor (`Shape`), with the index algebra over them.
//!    - Broadcasting by repetition (stride 0), joining, transposition and containment tests.
//!
//! 2. **Storage and Views**:
//!    - Reference-counted, uniquely identified element buffers (`Storage`).
//!    - Views (`TensorView`) that window into a storage without copying.
//!    - Write capabilities (`SharedView`) that make aliasing explicit at op boundaries.
//!
//! 3. **Numerical System**:
//!    - Scalar types (`f32`, `f16`, `u8`, etc.) and their data type metadata (`DataType`).
//!
//! 4. **Execution Model**:
//!    - Queues (`DeviceQueue`) that run ops inline or on a private serial worker.
//!    - One-shot events (`QueueEvent`) for completion signaling.
//!    - Sticky error state that stops scheduling once an op fails.

pub mod device;
pub mod num;
pub mod ops;
pub mod platform;
pub mod shape;
pub mod storage;
pub mod tensor;
