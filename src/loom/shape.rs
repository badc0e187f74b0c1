use std::sync::Arc;

use derive_more::Display;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ShapeError {
    #[error("shape mismatch: {0} is not compatible with {1}")]
    Mismatch(Shape, Shape),
    #[error("shape broadcast error: axis {axis} of {shape} cannot repeat from {from} to {to}")]
    Broadcast {
        shape: Shape,
        axis: usize,
        from: usize,
        to: usize,
    },
    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },
    #[error("rank mismatch: expected {expected}, got {got}")]
    Rank { expected: usize, got: usize },
    #[error("shape join error: at least 2 shapes are required, got {0}")]
    JoinArity(usize),
    #[error("shape join error: {0} and {1} differ outside axis {2}")]
    Join(Shape, Shape, usize),
    #[error("shape squeeze error: axis {axis} of {shape} has extent {extent}")]
    Squeeze {
        shape: Shape,
        axis: usize,
        extent: usize,
    },
}

/// Extents and strides of a tensor.
///
/// Strides are in elements. A stride of 0 on an axis with extent larger than 1 repeats
/// the same element along that axis (a broadcast axis).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("[{}]", extents.iter().format(", "))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Shape {
    extents: Arc<[usize]>,
    strides: Arc<[usize]>,
}

pub trait IntoShape {
    fn into_shape(self) -> Shape;
}

impl IntoShape for Shape {
    #[inline]
    fn into_shape(self) -> Shape {
        self
    }
}

impl IntoShape for &Shape {
    #[inline]
    fn into_shape(self) -> Shape {
        self.clone()
    }
}

impl<const N: usize> IntoShape for [usize; N] {
    #[inline]
    fn into_shape(self) -> Shape {
        Shape::from_extents(self)
    }
}

impl IntoShape for &[usize] {
    #[inline]
    fn into_shape(self) -> Shape {
        Shape::from_extents(self)
    }
}

impl IntoShape for Vec<usize> {
    #[inline]
    fn into_shape(self) -> Shape {
        Shape::from_extents(self)
    }
}

/// Row-major strides of `extents`.
pub fn dense_strides(extents: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; extents.len()];
    let mut stride = 1;
    for (x, &extent) in strides.iter_mut().zip(extents).rev() {
        *x = stride;
        stride *= extent;
    }
    strides
}

/// Column-major strides of `extents`.
pub fn column_major_strides(extents: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; extents.len()];
    let mut stride = 1;
    for (x, &extent) in strides.iter_mut().zip(extents) {
        *x = stride;
        stride *= extent;
    }
    strides
}

impl Shape {
    /// Creates a dense (row-major) shape.
    pub fn from_extents(extents: impl AsRef<[usize]>) -> Self {
        let extents = extents.as_ref();
        debug_assert!(
            extents.iter().all(|&x| x > 0) || extents.iter().all(|&x| x == 0),
            "zero extents only appear in the empty shape: {extents:?}"
        );
        let strides = dense_strides(extents);
        Self {
            extents: extents.into(),
            strides: strides.into(),
        }
    }

    /// Creates a column-major shape.
    pub fn column_major_extents(extents: impl AsRef<[usize]>) -> Self {
        let extents = extents.as_ref();
        let strides = column_major_strides(extents);
        Self {
            extents: extents.into(),
            strides: strides.into(),
        }
    }

    /// Creates a shape with explicit strides.
    pub fn with_strides(
        extents: impl AsRef<[usize]>,
        strides: impl AsRef<[usize]>,
    ) -> Result<Self, ShapeError> {
        let extents = extents.as_ref();
        let strides = strides.as_ref();
        if extents.len() != strides.len() {
            return Err(ShapeError::Rank {
                expected: extents.len(),
                got: strides.len(),
            });
        }
        Ok(Self {
            extents: extents.into(),
            strides: strides.into(),
        })
    }

    /// The rank 0 shape of a single element.
    #[inline]
    pub fn scalar() -> Self {
        Self::from_extents([0usize; 0])
    }

    /// The canonical empty shape of the given rank.
    #[inline]
    pub fn empty(rank: usize) -> Self {
        Self::from_extents(vec![0; rank])
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of logical elements.
    #[inline]
    pub fn count(&self) -> usize {
        self.extents.iter().product()
    }

    /// Number of physical elements between the first and the last addressed one, inclusive.
    pub fn span_count(&self) -> usize {
        if self.count() == 0 {
            return 0;
        }
        1 + itertools::izip!(self.extents.iter(), self.strides.iter())
            .map(|(&extent, &stride)| (extent - 1) * stride)
            .sum::<usize>()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if the strides are the row-major strides of the extents.
    #[inline]
    pub fn is_dense(&self) -> bool {
        self.strides.as_ref() == dense_strides(&self.extents).as_slice()
    }

    /// Returns `true` if any axis repeats its elements.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        itertools::izip!(self.extents.iter(), self.strides.iter())
            .any(|(&extent, &stride)| extent > 1 && stride == 0)
    }

    /// The same extents with row-major strides.
    #[inline]
    pub fn dense(&self) -> Self {
        Self::from_extents(&self.extents)
    }

    /// The same extents with column-major strides.
    #[inline]
    pub fn column_major(&self) -> Self {
        Self::column_major_extents(&self.extents)
    }

    /// Linear offset of a logical index. Callers validate the index range.
    #[inline]
    pub fn linear_index(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.rank());
        index
            .iter()
            .zip(self.strides.iter())
            .map(|(&index, &stride)| index * stride)
            .sum()
    }

    /// Normalizes negative axes, where `-1` is the last axis.
    pub fn make_positive(&self, axes: &[isize]) -> Result<Vec<usize>, ShapeError> {
        let rank = self.rank();
        axes.iter()
            .map(|&axis| {
                let positive = match axis {
                    x if x < 0 => rank as isize + x,
                    x => x,
                };
                match positive {
                    x if (0..rank as isize).contains(&x) => Ok(x as usize),
                    _ => Err(ShapeError::AxisOutOfRange { axis, rank }),
                }
            })
            .collect()
    }

    /// Repeats axes of extent 1 up to `extents` by setting their strides to 0.
    pub fn repeated(&self, extents: impl AsRef<[usize]>) -> Result<Self, ShapeError> {
        let extents = extents.as_ref();
        if extents.len() != self.rank() {
            return Err(ShapeError::Rank {
                expected: self.rank(),
                got: extents.len(),
            });
        }
        let strides = itertools::izip!(self.extents.iter(), self.strides.iter(), extents)
            .enumerate()
            .map(|(axis, (&from, &stride, &to))| match (from, to) {
                (from, to) if from == to => Ok(stride),
                (1, to) if to > 1 => Ok(0),
                (from, to) => Err(ShapeError::Broadcast {
                    shape: self.clone(),
                    axis,
                    from,
                    to,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            extents: extents.into(),
            strides: strides.into(),
        })
    }

    /// Joins shapes along `axis`. All shapes must agree on every other axis.
    pub fn joined(&self, others: &[Shape], axis: isize) -> Result<Self, ShapeError> {
        if others.is_empty() {
            return Err(ShapeError::JoinArity(1));
        }
        let axis = self.make_positive(&[axis])?[0];
        let mut extents = self.extents.to_vec();
        for other in others {
            if other.rank() != self.rank() {
                return Err(ShapeError::Rank {
                    expected: self.rank(),
                    got: other.rank(),
                });
            }
            let agree = itertools::izip!(self.extents.iter(), other.extents.iter())
                .enumerate()
                .all(|(index, (x, y))| index == axis || x == y);
            if !agree {
                return Err(ShapeError::Join(self.clone(), other.clone(), axis));
            }
            extents[axis] += other.extents[axis];
        }
        Ok(Self::from_extents(extents))
    }

    /// Reverses the axis order. No data moves.
    pub fn transposed(&self) -> Self {
        let extents: Arc<[usize]> = self.extents.iter().rev().copied().collect();
        let strides: Arc<[usize]> = self.strides.iter().rev().copied().collect();
        Self { extents, strides }
    }

    /// Removes axes of extent 1: the listed ones, or all of them if `axes` is `None`.
    pub fn squeezed(&self, axes: Option<&[isize]>) -> Result<Self, ShapeError> {
        let axes = match axes {
            Some(axes) => self.make_positive(axes)?,
            None => (0..self.rank()).filter(|&x| self.extents[x] == 1).collect(),
        };
        if let Some(&axis) = axes.iter().find(|&&x| self.extents[x] != 1) {
            return Err(ShapeError::Squeeze {
                shape: self.clone(),
                axis,
                extent: self.extents[axis],
            });
        }
        let (extents, strides): (Vec<_>, Vec<_>) =
            itertools::izip!(self.extents.iter(), self.strides.iter())
                .enumerate()
                .filter(|(index, _)| !axes.contains(index))
                .map(|(_, (&extent, &stride))| (extent, stride))
                .unzip();
        Ok(Self {
            extents: extents.into(),
            strides: strides.into(),
        })
    }

    /// The dense shape a reduction over `axes` produces: the listed axes (all if `None`)
    /// collapse to extent 1 and the rank is kept.
    pub fn reduced(&self, axes: Option<&[isize]>) -> Result<Self, ShapeError> {
        let extents = match axes {
            Some(axes) => {
                let axes = self.make_positive(axes)?;
                self.extents
                    .iter()
                    .enumerate()
                    .map(|(index, &extent)| match axes.contains(&index) {
                        true => 1,
                        false => extent,
                    })
                    .collect_vec()
            }
            None => vec![1; self.rank()],
        };
        Ok(Self::from_extents(extents))
    }

    /// Returns `true` if the region at `offset` of `extents` lies inside the shape.
    pub fn contains(&self, offset: &[usize], extents: &[usize]) -> bool {
        offset.len() == self.rank()
            && extents.len() == self.rank()
            && itertools::izip!(offset, extents, self.extents.iter())
                .all(|(&offset, &extent, &bound)| offset + extent <= bound)
    }

    /// Returns `true` if `shape` fits inside the shape at the origin.
    pub fn contains_shape(&self, shape: &Shape) -> bool {
        let offset = vec![0; shape.rank()];
        self.contains(&offset, shape.extents())
    }

    /// Iterates the linear offsets of all elements in row-major logical order.
    #[inline]
    pub fn offsets(&self) -> Offsets<'_> {
        self.offsets_from(0)
    }

    /// Like [`Shape::offsets`], starting at `base`.
    pub fn offsets_from(&self, base: usize) -> Offsets<'_> {
        Offsets {
            shape: self,
            index: vec![0; self.rank()],
            offset: base,
            remaining: self.count(),
        }
    }
}

/// Iterator over the linear offsets of a [`Shape`], produced by [`Shape::offsets`].
#[derive(Debug, Clone)]
pub struct Offsets<'a> {
    shape: &'a Shape,
    index: Vec<usize>,
    offset: usize,
    remaining: usize,
}

impl Iterator for Offsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.offset;
        for axis in (0..self.index.len()).rev() {
            let extent = self.shape.extents[axis];
            let stride = self.shape.strides[axis];
            self.index[axis] += 1;
            self.offset += stride;
            if self.index[axis] < extent {
                break;
            }
            self.offset -= stride * extent;
            self.index[axis] = 0;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{Shape, ShapeError};

    #[test]
    fn test_dense() {
        let shape = Shape::from_extents([2, 3, 4]);
        assert_eq!(shape.strides(), &[12, 4, 1]);
        assert_eq!(shape.count(), 24);
        assert_eq!(shape.span_count(), 24);
        assert!(shape.is_dense());
        assert!(!shape.is_broadcast());

        let shape = Shape::column_major_extents([2, 3, 4]);
        assert_eq!(shape.strides(), &[1, 2, 6]);
        assert!(!shape.is_dense());
        assert_eq!(shape.dense().strides(), &[12, 4, 1]);
        assert_eq!(shape.dense().column_major(), shape);

        let scalar = Shape::scalar();
        assert_eq!(scalar.rank(), 0);
        assert_eq!(scalar.count(), 1);
        assert_eq!(scalar.span_count(), 1);
        assert_eq!(scalar.offsets().collect_vec(), vec![0]);

        let empty = Shape::empty(2);
        assert!(empty.is_empty());
        assert_eq!(empty.span_count(), 0);
        assert_eq!(empty.offsets().count(), 0);
        assert_eq!(format!("{}", Shape::from_extents([2, 3])), "[2, 3]");
    }

    #[test]
    fn test_linear_index() {
        let shape = Shape::from_extents([2, 3]);
        assert_eq!(shape.linear_index(&[0, 0]), 0);
        assert_eq!(shape.linear_index(&[0, 2]), 2);
        assert_eq!(shape.linear_index(&[1, 0]), 3);
        assert_eq!(shape.linear_index(&[1, 2]), 5);

        let shape = Shape::with_strides([2, 3], [1, 2]).unwrap();
        assert_eq!(shape.linear_index(&[1, 2]), 5);
        assert_eq!(shape.offsets().collect_vec(), vec![0, 2, 4, 1, 3, 5]);
        assert!(matches!(
            Shape::with_strides([2, 3], [1]),
            Err(ShapeError::Rank {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_make_positive() {
        let shape = Shape::from_extents([2, 3, 4]);
        assert_eq!(shape.make_positive(&[0, -1, -3]).unwrap(), vec![0, 2, 0]);
        assert!(matches!(
            shape.make_positive(&[3]),
            Err(ShapeError::AxisOutOfRange { axis: 3, rank: 3 })
        ));
        assert!(matches!(
            shape.make_positive(&[-4]),
            Err(ShapeError::AxisOutOfRange { axis: -4, rank: 3 })
        ));
    }

    #[test]
    fn test_repeated() {
        let shape = Shape::from_extents([1, 3]);
        let repeated = shape.repeated([4, 3]).unwrap();
        assert_eq!(repeated.extents(), &[4, 3]);
        assert_eq!(repeated.strides(), &[0, 1]);
        assert_eq!(repeated.count(), 12);
        assert_eq!(repeated.span_count(), 3);
        assert!(repeated.is_broadcast());
        assert_eq!(
            repeated.offsets().collect_vec(),
            vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2]
        );

        assert!(matches!(
            shape.repeated([4, 6]),
            Err(ShapeError::Broadcast {
                axis: 1,
                from: 3,
                to: 6,
                ..
            })
        ));
        assert!(matches!(
            Shape::from_extents([2, 3]).repeated([1, 3]),
            Err(ShapeError::Broadcast { axis: 0, .. })
        ));
        assert!(matches!(
            shape.repeated([0, 3]),
            Err(ShapeError::Broadcast {
                axis: 0,
                from: 1,
                to: 0,
                ..
            })
        ));
        assert!(matches!(
            shape.repeated([3]),
            Err(ShapeError::Rank { .. })
        ));
    }

    #[test]
    fn test_repeated_random() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..64 {
            let rank = rng.usize(1..5);
            let source = (0..rank).map(|_| rng.usize(1..3)).collect_vec();
            let target = source
                .iter()
                .map(|&x| match x {
                    1 => rng.usize(1..5),
                    x => x,
                })
                .collect_vec();
            let shape = Shape::from_extents(&source);
            let repeated = shape.repeated(&target).unwrap();
            for (axis, (&from, &to)) in source.iter().zip(&target).enumerate() {
                if to > from {
                    assert_eq!(from, 1);
                    assert_eq!(repeated.strides()[axis], 0);
                } else {
                    assert_eq!(repeated.strides()[axis], shape.strides()[axis]);
                }
            }
            assert_eq!(repeated.count(), target.iter().product::<usize>());
            assert!(repeated.offsets().all(|x| x < shape.span_count()));
        }
    }

    #[test]
    fn test_joined() {
        let x = Shape::from_extents([2, 3]);
        let y = Shape::from_extents([4, 3]);
        assert_eq!(x.joined(&[y.clone()], 0).unwrap().extents(), &[6, 3]);
        assert_eq!(x.joined(&[x.clone(), x.clone()], -1).unwrap().extents(), &[2, 9]);
        assert!(matches!(
            x.joined(&[y.clone()], 1),
            Err(ShapeError::Join(_, _, 1))
        ));
        assert!(matches!(x.joined(&[], 0), Err(ShapeError::JoinArity(1))));
        assert!(matches!(
            x.joined(&[Shape::from_extents([2])], 0),
            Err(ShapeError::Rank { .. })
        ));
    }

    #[test]
    fn test_transposed() {
        let shape = Shape::from_extents([2, 3, 4]);
        let transposed = shape.transposed();
        assert_eq!(transposed.extents(), &[4, 3, 2]);
        assert_eq!(transposed.strides(), &[1, 4, 12]);
        assert_eq!(transposed.count(), shape.count());
        assert_eq!(transposed.span_count(), shape.span_count());
        assert_eq!(transposed.transposed(), shape);

        let matrix = Shape::from_extents([2, 3]).transposed();
        assert_eq!(matrix.offsets().collect_vec(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_contains() {
        let shape = Shape::from_extents([4, 5]);
        assert!(shape.contains(&[1, 2], &[3, 3]));
        assert!(!shape.contains(&[1, 2], &[4, 3]));
        assert!(!shape.contains(&[1], &[3]));
        assert!(shape.contains_shape(&Shape::from_extents([4, 1])));
        assert!(!shape.contains_shape(&Shape::from_extents([5, 1])));
        assert!(!shape.contains_shape(&Shape::from_extents([4])));
    }

    #[test]
    fn test_reduced_squeezed() {
        let shape = Shape::from_extents([3, 2]);
        assert_eq!(shape.reduced(None).unwrap().extents(), &[1, 1]);
        assert_eq!(shape.reduced(Some(&[1])).unwrap().extents(), &[3, 1]);
        assert_eq!(shape.reduced(Some(&[-2])).unwrap().extents(), &[1, 2]);
        assert!(shape.reduced(Some(&[2])).is_err());

        let shape = Shape::from_extents([1, 3, 1, 2]);
        let squeezed = shape.squeezed(None).unwrap();
        assert_eq!(squeezed.extents(), &[3, 2]);
        assert_eq!(squeezed.strides(), &[2, 1]);
        assert_eq!(shape.squeezed(Some(&[0])).unwrap().extents(), &[3, 1, 2]);
        assert!(matches!(
            shape.squeezed(Some(&[1])),
            Err(ShapeError::Squeeze {
                axis: 1,
                extent: 3,
                ..
            })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() -> Result<(), Box<dyn std::error::Error>> {
        let shape = Shape::from_extents([1, 3]).repeated([4, 3])?;
        let json = serde_json::to_string(&shape)?;
        assert_eq!(json, r#"{"extents":[4,3],"strides":[0,1]}"#);
        assert_eq!(serde_json::from_str::<Shape>(&json)?, shape);
        Ok(())
    }
}
