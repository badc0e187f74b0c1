//! Device kernels of the generic ops. No shaders are written yet, so every kernel fails
//! with [`QueueError::Unsupported`] naming the op.

use crate::{
    hal::ops::{CopyOp, FillOp, FoldOp, IndexOp, MapOp, ZipOp},
    loom::{
        device::{Device, QueueError, gpu::Backend},
        num::Scalar,
        ops::{BackendOp, TensorOp},
    },
};

fn unsupported(backend: &Backend, op: &dyn TensorOp) -> Result<(), QueueError> {
    Err(QueueError::Unsupported {
        backend: backend.device().kind(),
        op: op.name(),
    })
}

macro_rules! impl_unsupported {
    ($op:ident<$($t:ident),+>) => {
        impl<$($t: Scalar),+> BackendOp<Backend> for $op<$($t),+> {
            fn execute(&self, backend: &mut Backend) -> Result<(), QueueError> {
                unsupported(backend, self)
            }
        }
    };
}

impl_unsupported!(MapOp<T, U>);
impl_unsupported!(ZipOp<L, R, U>);
impl_unsupported!(FoldOp<T, A>);
impl_unsupported!(FillOp<T>);
impl_unsupported!(IndexOp<T>);
impl_unsupported!(CopyOp<T>);
