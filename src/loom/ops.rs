use std::{borrow::Cow, sync::Arc};

use derive_more::Display;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{
    device::QueueError,
    num::{DataType, Scalar},
    shape::Shape,
    storage::{Storage, StorageError},
    tensor::{SharedView, TensorView},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

/// Describes one tensor an op touches.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TensorIr {
    pub id: usize,
    pub name: Arc<str>,
    pub shape: Shape,
    pub offset: usize,
    pub r#type: DataType,
    pub access: Access,
}

/// A read-only element sequence, fixed at the time an op is built.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    storage: Storage<T>,
    shape: Shape,
    offset: usize,
}

/// A writable element sequence, fixed at the time an op is built.
///
/// Can only be obtained from a [`SharedView`].
#[derive(Debug, Clone)]
pub struct ResolvedMut<T> {
    storage: Storage<T>,
    shape: Shape,
    offset: usize,
}

fn ir<T: Scalar>(storage: &Storage<T>, shape: &Shape, offset: usize, access: Access) -> TensorIr {
    TensorIr {
        id: storage.id().get(),
        name: storage.name().into(),
        shape: shape.clone(),
        offset,
        r#type: T::DATA_TYPE,
        access,
    }
}

impl<T: Scalar> Resolved<T> {
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn ir(&self) -> TensorIr {
        ir(&self.storage, &self.shape, self.offset, Access::ReadOnly)
    }

    /// Copies the elements out in row-major logical order.
    pub fn gather(&self) -> Result<Vec<T>, StorageError> {
        let data = self.storage.read()?;
        let elements = self
            .shape
            .offsets_from(self.offset)
            .map(|offset| data[offset])
            .collect();
        Ok(elements)
    }
}

impl<T: Scalar> ResolvedMut<T> {
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn ir(&self) -> TensorIr {
        ir(&self.storage, &self.shape, self.offset, Access::ReadWrite)
    }

    /// Visits every element in row-major logical order, paired with the next item of `values`.
    ///
    /// # Panics
    /// Panics if `values` does not yield exactly one item per logical element.
    pub fn update<V>(
        &self,
        values: impl IntoIterator<Item = V>,
        mut f: impl FnMut(&mut T, V) -> Result<(), QueueError>,
    ) -> Result<(), QueueError> {
        let mut data = self.storage.write()?;
        for (offset, value) in self.shape.offsets_from(self.offset).zip_eq(values) {
            f(&mut data[offset], value)?;
        }
        Ok(())
    }

    /// Overwrites the elements in row-major logical order.
    pub fn scatter(&self, values: impl IntoIterator<Item = T>) -> Result<(), QueueError> {
        self.update(values, |x, value| {
            *x = value;
            Ok(())
        })
    }
}

impl<T: Scalar> TensorView<T> {
    /// Fixes the storage, shape and offset the view currently reads.
    #[inline]
    pub fn resolve(&self) -> Resolved<T> {
        Resolved {
            storage: self.storage().clone(),
            shape: self.shape().clone(),
            offset: self.offset(),
        }
    }

    #[inline]
    pub fn ir(&self, access: Access) -> TensorIr {
        ir(self.storage(), self.shape(), self.offset(), access)
    }
}

impl<T: Scalar> SharedView<T> {
    /// Fixes the storage, shape and offset the view writes.
    #[inline]
    pub fn resolve_mut(&self) -> ResolvedMut<T> {
        ResolvedMut {
            storage: self.storage().clone(),
            shape: self.shape().clone(),
            offset: self.offset(),
        }
    }

    /// Writes through a broadcast of the view, so repeated positions hit the same element.
    /// Used for accumulating reductions.
    pub(crate) fn resolve_repeated(&self, extents: &[usize]) -> Result<ResolvedMut<T>, QueueError> {
        let shape = self.shape().repeated(extents)?;
        Ok(ResolvedMut {
            storage: self.storage().clone(),
            shape,
            offset: self.offset(),
        })
    }
}

pub trait TensorOp: Send {
    #[inline]
    fn name(&self) -> Cow<'static, str> {
        std::any::type_name::<Self>().into()
    }

    /// Tensors read and written by the op.
    fn io(&self) -> Vec<TensorIr>;
}

/// Implemented for each backend that is able to run an op.
pub trait BackendOp<B>: TensorOp {
    fn execute(&self, backend: &mut B) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::Access;
    use crate::loom::{
        device::QueueError,
        num::DataType,
        tensor::{SharedView, TensorView},
    };

    #[test]
    fn test_resolve() -> Result<(), Box<dyn Error>> {
        let x = TensorView::from_elements(0..6u32, [2, 3], "x")?;
        let resolved = x.transposed().resolve();
        assert_eq!(resolved.gather()?, vec![0, 3, 1, 4, 2, 5]);

        let ir = x.ir(Access::ReadOnly);
        assert_eq!(ir.id, x.storage().id().get());
        assert_eq!(&*ir.name, "x");
        assert_eq!(ir.r#type, DataType::U32);
        assert_eq!(resolved.ir().shape.extents(), &[3, 2]);
        Ok(())
    }

    #[test]
    fn test_resolve_mut() -> Result<(), Box<dyn Error>> {
        let x = TensorView::<f32>::create([2, 2], "x");
        let shared = SharedView::new(x.clone(), uid::Id::new());
        let column = shared.view(&[0, 1], [2, 1])?.resolve_mut();
        column.scatter([5.0, 7.0])?;
        assert_eq!(x.to_vec()?, vec![0.0, 5.0, 0.0, 7.0]);

        let result = column.update([1.0f32, -1.0], |x, value| match value > 0.0 {
            true => {
                *x += value;
                Ok(())
            }
            false => Err(QueueError::kernel("negative")),
        });
        assert!(matches!(result, Err(QueueError::Kernel(_))));
        assert_eq!(x.to_vec()?, vec![0.0, 6.0, 0.0, 7.0]);

        let row = SharedView::new(TensorView::<f32>::create([1, 2], "row"), uid::Id::new());
        let acc = row.resolve_repeated(&[3, 2])?;
        acc.update([1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], |x, value| {
            *x += value;
            Ok(())
        })?;
        assert_eq!(row.to_vec()?, vec![9.0, 12.0]);
        Ok(())
    }
}
