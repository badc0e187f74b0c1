use std::fmt::Debug;

use bytemuck::Pod;
use casey::upper;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    F16,
    F32,
    F64,
    U8,
    U16,
    U32,
    I32,
    I64,
}

impl DataType {
    /// Returns the size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::I32 => 4,
            DataType::I64 => 8,
        }
    }
}

pub trait Zero {
    fn zero() -> Self;
}

pub trait One {
    fn one() -> Self;
}

/// Element types a storage can hold.
pub trait Scalar:
    Sized + Copy + Pod + Zero + One + PartialEq + Debug + Send + Sync + 'static + sealed::Sealed
{
    const DATA_TYPE: DataType;

    /// Converts a spatial index into an element. Integer types wrap on overflow.
    fn from_index(index: usize) -> Self;
}

macro_rules! impl_scalar {
    ($t:ident, $zero:expr, $one:expr, $from:expr) => {
        impl Zero for $t {
            fn zero() -> Self {
                $zero
            }
        }

        impl One for $t {
            fn one() -> Self {
                $one
            }
        }

        impl Scalar for $t {
            const DATA_TYPE: DataType = {
                use DataType::*;
                upper!($t)
            };

            #[inline]
            fn from_index(index: usize) -> Self {
                ($from)(index)
            }
        }

        impl sealed::Sealed for $t {}
    };
}

impl_scalar!(f16, f16::ZERO, f16::ONE, |x: usize| f16::from_f32(x as f32));
impl_scalar!(f32, 0.0, 1.0, |x: usize| x as f32);
impl_scalar!(f64, 0.0, 1.0, |x: usize| x as f64);
impl_scalar!(u8, 0, 1, |x: usize| x as u8);
impl_scalar!(u16, 0, 1, |x: usize| x as u16);
impl_scalar!(u32, 0, 1, |x: usize| x as u32);
impl_scalar!(i32, 0, 1, |x: usize| x as i32);
impl_scalar!(i64, 0, 1, |x: usize| x as i64);

mod sealed {
    pub trait Sealed {}
}
