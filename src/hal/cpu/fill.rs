use crate::{
    hal::ops::{FillOp, IndexOp},
    loom::{
        device::{QueueError, cpu::Backend},
        num::Scalar,
        ops::BackendOp,
    },
};

impl<T: Scalar> BackendOp<Backend> for FillOp<T> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let count = self.output.shape().count();
        self.output.scatter(std::iter::repeat_n(self.value, count))
    }
}

impl<T: Scalar> BackendOp<Backend> for IndexOp<T> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let count = self.output.shape().count();
        let start = self.start;
        let indices = (0..count).map(|index| T::from_index(start.wrapping_add(index)));
        self.output.scatter(indices)
    }
}
