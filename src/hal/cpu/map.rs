use itertools::Itertools;

use crate::{
    hal::ops::{CopyOp, MapOp, ZipOp},
    loom::{
        device::{QueueError, cpu::Backend},
        num::Scalar,
        ops::BackendOp,
    },
};

impl<T: Scalar, U: Scalar> BackendOp<Backend> for MapOp<T, U> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let input = self.input.gather()?;
        self.output.update(input, |y, x| {
            *y = (self.f)(x)?;
            Ok(())
        })
    }
}

impl<L: Scalar, R: Scalar, U: Scalar> BackendOp<Backend> for ZipOp<L, R, U> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let lhs = self.inputs.0.gather()?;
        let rhs = self.inputs.1.gather()?;
        self.output.update(lhs.into_iter().zip_eq(rhs), |z, (x, y)| {
            *z = (self.f)(x, y)?;
            Ok(())
        })
    }
}

impl<T: Scalar> BackendOp<Backend> for CopyOp<T> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let input = self.input.gather()?;
        self.output.scatter(input)
    }
}
