use std::borrow::Cow;

use crate::loom::{
    device::QueueError,
    num::Scalar,
    ops::{Resolved, ResolvedMut, TensorIr, TensorOp},
};

pub type MapFn<T, U> = Box<dyn Fn(T) -> Result<U, QueueError> + Send>;
pub type ZipFn<L, R, U> = Box<dyn Fn(L, R) -> Result<U, QueueError> + Send>;
pub type FoldFn<A, T> = Box<dyn Fn(A, T) -> Result<A, QueueError> + Send>;

/// Applies `f` to every element of `input`, writing into `output`.
pub struct MapOp<T, U> {
    pub input: Resolved<T>,
    pub output: ResolvedMut<U>,
    pub f: MapFn<T, U>,
}

/// Combines the elements of two inputs pairwise.
pub struct ZipOp<L, R, U> {
    pub inputs: (Resolved<L>, Resolved<R>),
    pub output: ResolvedMut<U>,
    pub f: ZipFn<L, R, U>,
}

/// Folds `input` into `output`.
///
/// `output` is a broadcast of the accumulator up to the extents of `input`, so every input
/// element lands on the accumulator of its reduced position.
pub struct FoldOp<T, A> {
    pub input: Resolved<T>,
    pub output: ResolvedMut<A>,
    pub f: FoldFn<A, T>,
}

pub struct FillOp<T> {
    pub output: ResolvedMut<T>,
    pub value: T,
}

/// Writes the row-major spatial index of each element, counting from `start`.
pub struct IndexOp<T> {
    pub output: ResolvedMut<T>,
    pub start: usize,
}

pub struct CopyOp<T> {
    pub input: Resolved<T>,
    pub output: ResolvedMut<T>,
}

impl<T: Scalar, U: Scalar> TensorOp for MapOp<T, U> {
    fn name(&self) -> Cow<'static, str> {
        "map".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.input.ir(), self.output.ir()]
    }
}

impl<L: Scalar, R: Scalar, U: Scalar> TensorOp for ZipOp<L, R, U> {
    fn name(&self) -> Cow<'static, str> {
        "zip".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.inputs.0.ir(), self.inputs.1.ir(), self.output.ir()]
    }
}

impl<T: Scalar, A: Scalar> TensorOp for FoldOp<T, A> {
    fn name(&self) -> Cow<'static, str> {
        "fold".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.input.ir(), self.output.ir()]
    }
}

impl<T: Scalar> TensorOp for FillOp<T> {
    fn name(&self) -> Cow<'static, str> {
        "fill".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.output.ir()]
    }
}

impl<T: Scalar> TensorOp for IndexOp<T> {
    fn name(&self) -> Cow<'static, str> {
        "index".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.output.ir()]
    }
}

impl<T: Scalar> TensorOp for CopyOp<T> {
    fn name(&self) -> Cow<'static, str> {
        "copy".into()
    }

    fn io(&self) -> Vec<TensorIr> {
        vec![self.input.ir(), self.output.ir()]
    }
}
