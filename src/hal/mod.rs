//! Generic operations over tensor views.
//!
//! [`ops`] defines the op objects a queue runs, `cpu` and `gpu` their kernels per backend,
//! and [`frontend`] the [`DeviceFunctions`](frontend::DeviceFunctions) surface that validates
//! arguments and enqueues the ops.

pub mod cpu;
pub mod frontend;
mod gpu;
pub mod ops;
