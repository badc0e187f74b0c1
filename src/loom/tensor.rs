use std::{borrow::Cow, sync::Arc};

use derive_more::Deref;
use thiserror::Error;

use super::{
    device::QueueId,
    num::Scalar,
    shape::{IntoShape, Shape, ShapeError},
    storage::{SharedBuffer, Storage, StorageError},
};

#[derive(Debug, Clone, Error)]
pub enum TensorError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("tensor creation error: shape {shape} spans {span} elements, got {got}")]
    ElementCount {
        shape: Shape,
        span: usize,
        got: usize,
    },
    #[error("tensor view error: region at {offset:?} of {extents:?} is out of bounds of {shape}")]
    OutOfBounds {
        shape: Shape,
        offset: Vec<usize>,
        extents: Vec<usize>,
    },
    #[error("tensor access violation: {0}")]
    AccessViolation(Cow<'static, str>),
}

/// A window into a [`Storage`]: a shape, an element offset, and whether the view is shared.
///
/// Cloning a view never copies elements. Views are immutable descriptors; writes go through
/// a [`SharedView`] obtained from a queue.
#[derive(Debug, Clone)]
pub struct TensorView<T> {
    shape: Shape,
    storage: Storage<T>,
    offset: usize,
    shared: bool,
}

impl<T: Scalar> TensorView<T> {
    fn from_storage(storage: Storage<T>, shape: Shape, shared: bool) -> Self {
        Self {
            shape,
            storage,
            offset: 0,
            shared,
        }
    }

    fn check_span(shape: &Shape, got: usize) -> Result<(), TensorError> {
        let span = shape.span_count();
        match span == got {
            true => Ok(()),
            false => Err(TensorError::ElementCount {
                shape: shape.clone(),
                span,
                got,
            }),
        }
    }

    /// Allocates zeroed storage covering the span of `shape`.
    pub fn create(shape: impl IntoShape, name: &str) -> Self {
        let shape = shape.into_shape();
        let storage = Storage::new(shape.span_count(), name);
        Self::from_storage(storage, shape, false)
    }

    /// Allocates a dense, non-broadcast tensor with the extents of `shape`.
    /// This is the canonical write target of an operation.
    pub fn create_dense(shape: impl IntoShape) -> Self {
        let shape = shape.into_shape().dense();
        Self::create(shape, "dense")
    }

    /// Wraps read-only caller memory.
    pub fn from_reference(
        buffer: Arc<[T]>,
        shape: impl IntoShape,
        name: &str,
    ) -> Result<Self, TensorError> {
        let shape = shape.into_shape();
        Self::check_span(&shape, buffer.len())?;
        let storage = Storage::reference(buffer, name);
        Ok(Self::from_storage(storage, shape, false))
    }

    /// Wraps read-write caller memory. The view starts out shared so writes land in `buffer`.
    pub fn from_reference_mut(
        buffer: SharedBuffer<T>,
        shape: impl IntoShape,
        name: &str,
    ) -> Result<Self, TensorError> {
        let shape = shape.into_shape();
        let storage = Storage::reference_mut(buffer, name);
        Self::check_span(&shape, storage.count())?;
        Ok(Self::from_storage(storage, shape, true))
    }

    /// Copies `elements` into fresh storage. There must be exactly one element per
    /// physical position, so a broadcast shape takes fewer elements than it has logically.
    pub fn from_elements(
        elements: impl IntoIterator<Item = T>,
        shape: impl IntoShape,
        name: &str,
    ) -> Result<Self, TensorError> {
        let shape = shape.into_shape();
        let elements: Vec<T> = elements.into_iter().collect();
        Self::check_span(&shape, elements.len())?;
        let storage = Storage::from_elements(elements, shape.span_count(), name)?;
        Ok(Self::from_storage(storage, shape, false))
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.storage.name()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.shape.count()
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        self.shape.extents()
    }

    /// A sub-view of `extents` starting at `index`, sharing the same storage.
    pub fn view(&self, index: &[usize], extents: impl AsRef<[usize]>) -> Result<Self, TensorError> {
        let extents = extents.as_ref();
        if !self.shape.contains(index, extents) {
            return Err(TensorError::OutOfBounds {
                shape: self.shape.clone(),
                offset: index.to_vec(),
                extents: extents.to_vec(),
            });
        }
        let shape = Shape::with_strides(extents, self.shape.strides())?;
        let offset = self.offset + self.shape.linear_index(index);
        Ok(Self {
            shape,
            offset,
            ..self.clone()
        })
    }

    /// A broadcast view that repeats extent 1 axes up to `extents`.
    pub fn repeated(&self, extents: impl AsRef<[usize]>) -> Result<Self, TensorError> {
        let shape = self.shape.repeated(extents)?;
        Ok(Self {
            shape,
            ..self.clone()
        })
    }

    pub fn transposed(&self) -> Self {
        let shape = self.shape.transposed();
        Self {
            shape,
            ..self.clone()
        }
    }

    pub fn squeezed(&self, axes: Option<&[isize]>) -> Result<Self, TensorError> {
        let shape = self.shape.squeezed(axes)?;
        Ok(Self {
            shape,
            ..self.clone()
        })
    }

    /// The view itself if its extents already are `extents`, otherwise a broadcast of it.
    pub fn matched_to(&self, extents: &[usize]) -> Result<Self, TensorError> {
        match self.extents() == extents {
            true => Ok(self.clone()),
            false => self.repeated(extents),
        }
    }

    /// Returns `true` if both views address exactly the same elements in the same order.
    #[inline]
    pub fn is_same_identity(&self, other: &Self) -> bool {
        self.storage.id() == other.storage.id()
            && self.offset == other.offset
            && self.shape.strides() == other.shape.strides()
    }

    /// Reads the elements back in row-major logical order.
    ///
    /// Work enqueued on an asynchronous queue is not visible until the queue is waited on.
    pub fn to_vec(&self) -> Result<Vec<T>, TensorError> {
        let data = self.storage.read()?;
        let elements = self
            .shape
            .offsets_from(self.offset)
            .map(|offset| data[offset])
            .collect();
        Ok(elements)
    }

    /// Reads back a single element.
    pub fn element(&self, index: &[usize]) -> Result<T, TensorError> {
        let unit = vec![1; index.len()];
        if !self.shape.contains(index, &unit) {
            return Err(TensorError::OutOfBounds {
                shape: self.shape.clone(),
                offset: index.to_vec(),
                extents: unit,
            });
        }
        let data = self.storage.read()?;
        Ok(data[self.offset + self.shape.linear_index(index)])
    }

    pub(crate) fn set_storage(&mut self, storage: Storage<T>, shape: Shape) {
        self.storage = storage;
        self.shape = shape;
        self.offset = 0;
    }

    pub(crate) fn set_shared(&mut self) {
        self.shared = true;
    }
}

impl<T: Scalar> PartialEq for TensorView<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.extents() != other.extents() {
            return false;
        }
        if self.is_same_identity(other) {
            return true;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        }
    }
}

/// Broadcasts the operand with fewer elements up to the extents of the other one.
pub fn implicitly_match_extents<L: Scalar, R: Scalar>(
    lhs: &TensorView<L>,
    rhs: &TensorView<R>,
) -> Result<(TensorView<L>, TensorView<R>), TensorError> {
    if lhs.extents() == rhs.extents() {
        return Ok((lhs.clone(), rhs.clone()));
    }
    match lhs.count().cmp(&rhs.count()) {
        std::cmp::Ordering::Less => Ok((lhs.repeated(rhs.extents())?, rhs.clone())),
        std::cmp::Ordering::Greater => Ok((lhs.clone(), rhs.repeated(lhs.extents())?)),
        std::cmp::Ordering::Equal => Err(TensorError::Shape(ShapeError::Mismatch(
            lhs.shape().clone(),
            rhs.shape().clone(),
        ))),
    }
}

/// The write capability for a view, bound to the queue that issued it.
///
/// Only a shared view can be resolved into a mutable element sequence.
#[derive(Debug, Clone, Deref)]
pub struct SharedView<T> {
    #[deref]
    view: TensorView<T>,
    queue: uid::Id<QueueId>,
}

impl<T: Scalar> SharedView<T> {
    pub(crate) fn new(view: TensorView<T>, queue: uid::Id<QueueId>) -> Self {
        Self { view, queue }
    }

    /// The queue this capability was issued by.
    #[inline]
    pub fn queue(&self) -> uid::Id<QueueId> {
        self.queue
    }

    #[inline]
    pub fn as_view(&self) -> &TensorView<T> {
        &self.view
    }

    #[inline]
    pub fn into_view(self) -> TensorView<T> {
        self.view
    }

    /// A writable sub-view, bound to the same queue.
    pub fn view(&self, index: &[usize], extents: impl AsRef<[usize]>) -> Result<Self, TensorError> {
        let view = self.view.view(index, extents)?;
        let queue = self.queue;
        Ok(Self { view, queue })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{Arc, RwLock},
    };

    use itertools::Itertools;

    use super::{TensorError, TensorView, implicitly_match_extents};
    use crate::loom::{shape::Shape, storage::StorageError};

    #[test]
    fn test_create() -> Result<(), Box<dyn Error>> {
        let x = TensorView::<f32>::create([2, 3], "x");
        assert_eq!(x.count(), 6);
        assert_eq!(x.storage().count(), 6);
        assert_eq!(x.to_vec()?, vec![0.0; 6]);
        assert!(!x.is_shared());

        let y = TensorView::<f32>::create_dense(Shape::column_major_extents([2, 3]));
        assert!(y.shape().is_dense());
        assert_eq!(y.name(), "dense");

        let z = TensorView::from_elements(0..6u32, [2, 3], "z")?;
        assert_eq!(z.to_vec()?, (0..6).collect_vec());
        assert!(matches!(
            TensorView::from_elements(0..5u32, [2, 3], "short"),
            Err(TensorError::ElementCount {
                span: 6,
                got: 5,
                ..
            })
        ));

        let broadcast = Shape::with_strides([4, 3], [0, 1])?;
        let w = TensorView::from_elements([1u32, 2, 3], broadcast, "w")?;
        assert_eq!(w.count(), 12);
        assert_eq!(w.to_vec()?, [1, 2, 3].repeat(4));
        Ok(())
    }

    #[test]
    fn test_reference() -> Result<(), Box<dyn Error>> {
        let buffer: Arc<[f32]> = vec![1.0, 2.0, 3.0, 4.0].into();
        let x = TensorView::from_reference(buffer.clone(), [2, 2], "x")?;
        assert!(!x.is_shared());
        assert!(x.storage().is_read_only());
        assert_eq!(x.to_vec()?, buffer.to_vec());
        assert!(TensorView::from_reference(buffer, [3, 2], "bad").is_err());

        let buffer = Arc::new(RwLock::new(vec![0u8; 4].into_boxed_slice()));
        let y = TensorView::from_reference_mut(buffer.clone(), [4], "y")?;
        assert!(y.is_shared());
        y.storage().write()?[2] = 9;
        assert_eq!(y.to_vec()?, vec![0, 0, 9, 0]);
        assert_eq!(&buffer.read().unwrap()[..], &[0, 0, 9, 0]);
        Ok(())
    }

    #[test]
    fn test_view() -> Result<(), Box<dyn Error>> {
        let x = TensorView::from_elements(0..12u32, [3, 4], "x")?;
        let v = x.view(&[1, 1], [2, 2])?;
        assert_eq!(v.offset(), 5);
        assert_eq!(v.storage().id(), x.storage().id());
        assert_eq!(v.to_vec()?, vec![5, 6, 9, 10]);
        assert_eq!(v.element(&[1, 0])?, 9);
        assert!(matches!(
            v.element(&[2, 0]),
            Err(TensorError::OutOfBounds { .. })
        ));
        assert!(matches!(
            x.view(&[2, 2], [2, 2]),
            Err(TensorError::OutOfBounds { .. })
        ));

        let t = x.transposed();
        assert_eq!(t.extents(), &[4, 3]);
        assert_eq!(t.element(&[3, 2])?, 11);
        assert_eq!(t.to_vec()?[..3], [0, 4, 8]);

        let s = x.view(&[0, 2], [3, 1])?.squeezed(None)?;
        assert_eq!(s.extents(), &[3]);
        assert_eq!(s.to_vec()?, vec![2, 6, 10]);
        Ok(())
    }

    #[test]
    fn test_broadcast_read() -> Result<(), Box<dyn Error>> {
        let (m, n) = (5, 4);
        let v = TensorView::from_elements((0..n).map(|x| x as f32), [1, n], "v")?;
        let r = v.repeated([m, n])?;
        assert_eq!(r.storage().id(), v.storage().id());
        for i in 0..m {
            for j in 0..n {
                assert_eq!(r.element(&[i, j])?, v.element(&[0, j])?);
            }
        }
        assert!(v.repeated([m, n + 1]).is_err());
        Ok(())
    }

    #[test]
    fn test_implicitly_match_extents() -> Result<(), Box<dyn Error>> {
        let x = TensorView::<f32>::create([2, 3], "x");
        let y = TensorView::<u32>::create([1, 3], "y");
        let (lhs, rhs) = implicitly_match_extents(&x, &y)?;
        assert_eq!(lhs.extents(), &[2, 3]);
        assert_eq!(rhs.extents(), &[2, 3]);
        assert_eq!(rhs.shape().strides(), &[0, 1]);

        let (lhs, rhs) = implicitly_match_extents(&y, &x)?;
        assert_eq!(lhs.shape().strides(), &[0, 1]);
        assert_eq!(rhs.shape().strides(), &[3, 1]);

        let a = TensorView::<f32>::create([2, 1], "a");
        let b = TensorView::<f32>::create([1, 2], "b");
        assert!(matches!(
            implicitly_match_extents(&a, &b),
            Err(TensorError::Shape(_))
        ));
        Ok(())
    }

    #[test]
    fn test_equality() -> Result<(), Box<dyn Error>> {
        let x = TensorView::from_elements([1.0f32, 2.0, 3.0, 4.0], [2, 2], "x")?;
        let y = TensorView::from_elements([1.0f32, 2.0, 3.0, 4.0], [2, 2], "y")?;
        let z = TensorView::from_elements([1.0f32, 2.0, 3.0, 4.0], [4], "z")?;
        assert!(x == y);
        assert!(x != z);
        assert!(x != x.transposed());

        // equality on the same elements never reads them
        let n = 1 << 20;
        let nan = TensorView::from_elements(vec![f32::NAN; n], [n], "nan")?;
        assert!(nan == nan.clone());
        let other = TensorView::from_elements(vec![f32::NAN; n], [n], "other")?;
        assert!(nan != other);
        Ok(())
    }

    #[test]
    fn test_resized_reference() -> Result<(), Box<dyn Error>> {
        let buffer = Arc::new(RwLock::new(vec![0i32; 4].into_boxed_slice()));
        let x = TensorView::from_reference_mut(buffer.clone(), [4], "x")?;
        *buffer.write().unwrap() = vec![0i32; 2].into_boxed_slice();
        assert!(matches!(
            x.to_vec(),
            Err(TensorError::Storage(StorageError::Resized { .. }))
        ));
        Ok(())
    }
}
