use crate::{
    hal::ops::FoldOp,
    loom::{
        device::{QueueError, cpu::Backend},
        num::Scalar,
        ops::BackendOp,
    },
};

impl<T: Scalar, A: Scalar> BackendOp<Backend> for FoldOp<T, A> {
    fn execute(&self, _backend: &mut Backend) -> Result<(), QueueError> {
        let input = self.input.gather()?;
        self.output.update(input, |acc, x| {
            *acc = (self.f)(*acc, x)?;
            Ok(())
        })
    }
}
