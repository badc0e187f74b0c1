use itertools::Itertools;

use super::ops::{CopyOp, FillOp, FoldOp, IndexOp, MapOp, ZipOp};
use crate::loom::{
    device::{DeviceQueue, QueueError},
    num::Scalar,
    ops::BackendOp,
    shape::{Shape, ShapeError},
    storage::Storage,
    tensor::{SharedView, TensorError, TensorView, implicitly_match_extents},
};

impl<T: Scalar> TensorView<T> {
    /// # Shared View (`shared_view`)
    /// Obtains the capability to write this view on `queue`.
    ///
    /// If the view is not shared yet and its storage has other handles, the elements are first
    /// copied (on `queue`) into fresh dense storage, so earlier clones of the view keep seeing
    /// the old values. The view is marked shared afterwards.
    ///
    /// On a poisoned queue the view is left untouched, since the writes that would follow are
    /// dropped anyway.
    ///
    /// ## Errors
    /// * [`TensorError::AccessViolation`] if the storage is read-only or the view is a broadcast.
    pub fn shared_view<Q>(&mut self, queue: &Q) -> Result<SharedView<T>, QueueError>
    where
        Q: DeviceQueue + ?Sized,
        CopyOp<T>: BackendOp<Q::Backend>,
    {
        if self.storage().is_read_only() {
            let message = format!("`{}` is backed by read-only memory", self.name());
            return Err(TensorError::AccessViolation(message.into()).into());
        }
        if self.shape().is_broadcast() {
            let message = format!("`{}` is a broadcast view {}", self.name(), self.shape());
            return Err(TensorError::AccessViolation(message.into()).into());
        }

        // writes on a poisoned queue are dropped, so the view keeps its storage
        if queue.last_error().is_some() {
            return Ok(SharedView::new(self.clone(), queue.id()));
        }

        if !self.is_shared() && !self.storage().is_unique() {
            log::trace!("[{}] copy `{}` on write", queue.name(), self.name());
            let shape = self.shape().dense();
            let storage = Storage::new(shape.span_count(), self.name());
            let mut target = self.clone();
            target.set_storage(storage, shape);
            let output = SharedView::new(target.clone(), queue.id()).resolve_mut();
            queue.enqueue(Box::new(CopyOp {
                input: self.resolve(),
                output,
            }))?;
            if queue.last_error().is_some() {
                return Ok(SharedView::new(self.clone(), queue.id()));
            }
            *self = target;
        }

        self.set_shared();
        Ok(SharedView::new(self.clone(), queue.id()))
    }
}

fn check_extents(expected: &Shape, got: &Shape) -> Result<(), ShapeError> {
    match expected.extents() == got.extents() {
        true => Ok(()),
        false => Err(ShapeError::Mismatch(expected.clone(), got.clone())),
    }
}

/// Generic operations, available on every [`DeviceQueue`].
///
/// Arguments are validated before anything is enqueued; a validation failure leaves the queue
/// untouched. Failures inside the ops poison the queue instead of being returned here.
pub trait DeviceFunctions: DeviceQueue {
    /// Copies `x` into `result`, broadcasting `x` if needed.
    fn copy<T: Scalar>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<T>,
    ) -> Result<(), QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
    {
        x.matched_to(result.extents())?;
        let result = result.shared_view(self)?;
        self.copy_into(x, &result)
    }

    /// Copies `x` into an already shared view.
    fn copy_into<T: Scalar>(
        &self,
        x: &TensorView<T>,
        result: &SharedView<T>,
    ) -> Result<(), QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
    {
        if result.queue() != self.id() {
            let message = format!(
                "`{}` is shared with another queue than `{}`",
                result.name(),
                self.name()
            );
            return Err(TensorError::AccessViolation(message.into()).into());
        }
        let x = x.matched_to(result.extents())?;
        self.enqueue(Box::new(CopyOp {
            input: x.resolve(),
            output: result.resolve_mut(),
        }))
    }

    /// A dense copy of `x`. Strided and broadcast views come back with row-major strides.
    fn materialized<T: Scalar>(&self, x: &TensorView<T>) -> Result<TensorView<T>, QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
    {
        let mut result = TensorView::create(x.shape().dense(), x.name());
        self.copy(x, &mut result)?;
        Ok(result)
    }

    fn fill<T: Scalar>(&self, result: &mut TensorView<T>, value: T) -> Result<(), QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
        FillOp<T>: BackendOp<Self::Backend>,
    {
        let output = result.shared_view(self)?.resolve_mut();
        self.enqueue(Box::new(FillOp { output, value }))
    }

    /// Writes `start, start + 1, ...` in row-major logical order.
    fn fill_with_index<T: Scalar>(
        &self,
        result: &mut TensorView<T>,
        start: usize,
    ) -> Result<(), QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
        IndexOp<T>: BackendOp<Self::Backend>,
    {
        let count = result.shape().count();
        if start.checked_add(count.saturating_sub(1)).is_none() {
            let message = format!("index of `{}` overflows from {start} by {count}", result.name());
            return Err(QueueError::kernel(message));
        }
        let output = result.shared_view(self)?.resolve_mut();
        self.enqueue(Box::new(IndexOp { output, start }))
    }

    /// # Element-wise Map (`map_op`)
    /// Applies `f` to every element of `x`, writing into `result`.
    ///
    /// ## Arguments
    /// * `x` - The input, broadcast to the extents of `result` if needed.
    /// * `result` - The output. Its strides may differ from those of `x`.
    /// * `f` - The scalar function.
    fn map_op<T, U, F>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<U>,
        f: F,
    ) -> Result<(), QueueError>
    where
        T: Scalar,
        U: Scalar,
        F: Fn(T) -> U + Send + 'static,
        CopyOp<U>: BackendOp<Self::Backend>,
        MapOp<T, U>: BackendOp<Self::Backend>,
    {
        self.try_map_op(x, result, move |x| Ok(f(x)))
    }

    /// Like [`DeviceFunctions::map_op`] with a fallible `f`. An error from `f` poisons the queue.
    fn try_map_op<T, U, F>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<U>,
        f: F,
    ) -> Result<(), QueueError>
    where
        T: Scalar,
        U: Scalar,
        F: Fn(T) -> Result<U, QueueError> + Send + 'static,
        CopyOp<U>: BackendOp<Self::Backend>,
        MapOp<T, U>: BackendOp<Self::Backend>,
    {
        let x = x.matched_to(result.extents())?;
        let output = result.shared_view(self)?.resolve_mut();
        self.enqueue(Box::new(MapOp {
            input: x.resolve(),
            output,
            f: Box::new(f),
        }))
    }

    /// # Element-wise Combine (`map_op2`)
    /// Combines `lhs` and `rhs` element by element into `result`.
    ///
    /// ## Arguments
    /// * `lhs`, `rhs` - The operands. The one with fewer elements is broadcast up to the
    ///   extents of the other.
    /// * `result` - The output, with the extents of the broadcast operands.
    /// * `f` - The scalar function.
    fn map_op2<L, R, U, F>(
        &self,
        lhs: &TensorView<L>,
        rhs: &TensorView<R>,
        result: &mut TensorView<U>,
        f: F,
    ) -> Result<(), QueueError>
    where
        L: Scalar,
        R: Scalar,
        U: Scalar,
        F: Fn(L, R) -> U + Send + 'static,
        CopyOp<U>: BackendOp<Self::Backend>,
        ZipOp<L, R, U>: BackendOp<Self::Backend>,
    {
        self.try_map_op2(lhs, rhs, result, move |x, y| Ok(f(x, y)))
    }

    /// Like [`DeviceFunctions::map_op2`] with a fallible `f`.
    fn try_map_op2<L, R, U, F>(
        &self,
        lhs: &TensorView<L>,
        rhs: &TensorView<R>,
        result: &mut TensorView<U>,
        f: F,
    ) -> Result<(), QueueError>
    where
        L: Scalar,
        R: Scalar,
        U: Scalar,
        F: Fn(L, R) -> Result<U, QueueError> + Send + 'static,
        CopyOp<U>: BackendOp<Self::Backend>,
        ZipOp<L, R, U>: BackendOp<Self::Backend>,
    {
        let (lhs, rhs) = implicitly_match_extents(lhs, rhs)?;
        let lhs = lhs.matched_to(result.extents())?;
        let rhs = rhs.matched_to(result.extents())?;
        let output = result.shared_view(self)?.resolve_mut();
        self.enqueue(Box::new(ZipOp {
            inputs: (lhs.resolve(), rhs.resolve()),
            output,
            f: Box::new(f),
        }))
    }

    /// # Reduction (`reduction_op`)
    /// Folds `x` into the values already held by `result`.
    ///
    /// `result` has the rank of `x`, and each of its extents equals that of `x` or is 1.
    /// Axes of extent 1 are the reduced ones.
    fn reduction_op<T, A, F>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<A>,
        f: F,
    ) -> Result<(), QueueError>
    where
        T: Scalar,
        A: Scalar,
        F: Fn(A, T) -> A + Send + 'static,
        CopyOp<A>: BackendOp<Self::Backend>,
        FoldOp<T, A>: BackendOp<Self::Backend>,
    {
        self.try_reduction_op(x, result, move |acc, x| Ok(f(acc, x)))
    }

    /// Like [`DeviceFunctions::reduction_op`] with a fallible `f`.
    fn try_reduction_op<T, A, F>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<A>,
        f: F,
    ) -> Result<(), QueueError>
    where
        T: Scalar,
        A: Scalar,
        F: Fn(A, T) -> Result<A, QueueError> + Send + 'static,
        CopyOp<A>: BackendOp<Self::Backend>,
        FoldOp<T, A>: BackendOp<Self::Backend>,
    {
        result.shape().repeated(x.extents())?;
        let output = result.shared_view(self)?.resolve_repeated(x.extents())?;
        self.enqueue(Box::new(FoldOp {
            input: x.resolve(),
            output,
            f: Box::new(f),
        }))
    }

    /// # Reduce (`reduce`)
    /// Fills `result` with `initial`, folds all of `x` into it with `op_next`, then applies
    /// `op_final` to every accumulator.
    ///
    /// ## Arguments
    /// * `axes` - The axes to reduce, all of them if `None`. Reduced axes keep extent 1 in
    ///   `result`; the rank never changes.
    fn reduce<T, A, F, G>(
        &self,
        x: &TensorView<T>,
        result: &mut TensorView<A>,
        axes: Option<&[isize]>,
        initial: A,
        op_next: F,
        op_final: G,
    ) -> Result<(), QueueError>
    where
        T: Scalar,
        A: Scalar,
        F: Fn(A, T) -> A + Send + 'static,
        G: Fn(A) -> A + Send + 'static,
        CopyOp<A>: BackendOp<Self::Backend>,
        FillOp<A>: BackendOp<Self::Backend>,
        FoldOp<T, A>: BackendOp<Self::Backend>,
        MapOp<A, A>: BackendOp<Self::Backend>,
    {
        let expected = x.shape().reduced(axes)?;
        check_extents(&expected, result.shape())?;

        self.fill(result, initial)?;
        self.reduction_op(x, result, op_next)?;
        let acc = result.clone();
        self.map_op(&acc, result, op_final)
    }

    /// # Concatenation (`concat`)
    /// Copies `tensors` one after another along `axis` into `result`.
    ///
    /// The extents of `result` must be those of [`Shape::joined`] over the inputs.
    fn concat<T: Scalar>(
        &self,
        tensors: &[TensorView<T>],
        axis: isize,
        result: &mut TensorView<T>,
    ) -> Result<(), QueueError>
    where
        CopyOp<T>: BackendOp<Self::Backend>,
    {
        let Some((first, rest)) = tensors.split_first().filter(|_| tensors.len() > 1) else {
            return Err(ShapeError::JoinArity(tensors.len()).into());
        };
        let shapes = rest.iter().map(|x| x.shape().clone()).collect_vec();
        let expected = first.shape().joined(&shapes, axis)?;
        check_extents(&expected, result.shape())?;
        let axis = first.shape().make_positive(&[axis])?[0];

        let result = result.shared_view(self)?;
        let mut index = vec![0; result.shape().rank()];
        for x in tensors {
            let target = result.view(&index, x.extents())?;
            self.copy_into(x, &target)?;
            index[axis] += x.extents()[axis];
        }
        Ok(())
    }
}

impl<Q: DeviceQueue + ?Sized> DeviceFunctions for Q {}
