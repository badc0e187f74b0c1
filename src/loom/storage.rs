use std::{
    ops::Deref,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;

use super::num::Scalar;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage creation error: {got} elements exceed capacity {capacity}")]
    ElementCount { capacity: usize, got: usize },
    #[error("storage access violation: `{0}` is read-only")]
    ReadOnly(Arc<str>),
    #[error("storage access error: `{name}` was resized from {count} to {len} elements")]
    Resized {
        name: Arc<str>,
        count: usize,
        len: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageId;

/// A caller-owned buffer that a [`Storage`] may write through.
pub type SharedBuffer<T> = Arc<RwLock<Box<[T]>>>;

#[derive(Debug)]
enum Buffer<T> {
    /// Memory allocated by the storage itself.
    Owned(RwLock<Box<[T]>>),
    /// Read-only memory supplied by the caller.
    Reference(Arc<[T]>),
    /// Read-write memory supplied by the caller.
    ReferenceMut(SharedBuffer<T>),
}

#[derive(Debug)]
struct StorageInner<T> {
    id: uid::Id<StorageId>,
    name: Arc<str>,
    count: usize,
    buffer: Buffer<T>,
}

/// A reference-counted, uniquely identified buffer of elements.
///
/// Cloning a storage is cheap and yields another handle to the same buffer.
/// A storage never changes its element count once created.
#[derive(Debug)]
pub struct Storage<T> {
    inner: Arc<StorageInner<T>>,
}

impl<T> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Read access to the elements of a [`Storage`].
pub enum StorageRead<'a, T> {
    Locked(RwLockReadGuard<'a, Box<[T]>>),
    Borrowed(&'a [T]),
}

impl<T> Deref for StorageRead<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        match self {
            StorageRead::Locked(guard) => guard,
            StorageRead::Borrowed(data) => data,
        }
    }
}

/// Write access to the elements of a [`Storage`].
pub type StorageWrite<'a, T> = RwLockWriteGuard<'a, Box<[T]>>;

impl<T: Scalar> Storage<T> {
    fn from_buffer(buffer: Buffer<T>, count: usize, name: &str) -> Self {
        let id = uid::Id::new();
        let name = name.into();
        let inner = StorageInner {
            id,
            name,
            count,
            buffer,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Allocates `count` zeroed elements.
    pub fn new(count: usize, name: &str) -> Self {
        let data = vec![T::zero(); count].into_boxed_slice();
        Self::from_buffer(Buffer::Owned(RwLock::new(data)), count, name)
    }

    /// Allocates `capacity` elements and copies `elements` into them.
    /// Elements not covered by the input stay zero.
    pub fn from_elements(
        elements: impl IntoIterator<Item = T>,
        capacity: usize,
        name: &str,
    ) -> Result<Self, StorageError> {
        let mut data = Vec::with_capacity(capacity);
        for element in elements {
            if data.len() == capacity {
                let got = capacity + 1;
                return Err(StorageError::ElementCount { capacity, got });
            }
            data.push(element);
        }
        data.resize(capacity, T::zero());
        let data = data.into_boxed_slice();
        Ok(Self::from_buffer(
            Buffer::Owned(RwLock::new(data)),
            capacity,
            name,
        ))
    }

    /// Wraps caller memory without copying. The storage is read-only.
    pub fn reference(buffer: Arc<[T]>, name: &str) -> Self {
        let count = buffer.len();
        Self::from_buffer(Buffer::Reference(buffer), count, name)
    }

    /// Wraps caller memory without copying. Writes through the storage land in `buffer`.
    pub fn reference_mut(buffer: SharedBuffer<T>, name: &str) -> Self {
        let count = buffer.read().unwrap_or_else(PoisonError::into_inner).len();
        Self::from_buffer(Buffer::ReferenceMut(buffer), count, name)
    }

    #[inline]
    pub fn id(&self) -> uid::Id<StorageId> {
        self.inner.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.inner.count
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        matches!(self.inner.buffer, Buffer::Reference(_))
    }

    /// Returns `true` if the storage wraps caller memory.
    #[inline]
    pub fn is_reference(&self) -> bool {
        !matches!(self.inner.buffer, Buffer::Owned(_))
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns `true` if this is the only handle to the buffer.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    fn check_len(&self, len: usize) -> Result<(), StorageError> {
        match len == self.inner.count {
            true => Ok(()),
            false => Err(StorageError::Resized {
                name: self.inner.name.clone(),
                count: self.inner.count,
                len,
            }),
        }
    }

    /// Locks the buffer for reading.
    pub fn read(&self) -> Result<StorageRead<'_, T>, StorageError> {
        let data = match &self.inner.buffer {
            Buffer::Owned(data) => data.read().unwrap_or_else(PoisonError::into_inner),
            Buffer::ReferenceMut(data) => data.read().unwrap_or_else(PoisonError::into_inner),
            Buffer::Reference(data) => return Ok(StorageRead::Borrowed(data)),
        };
        self.check_len(data.len())?;
        Ok(StorageRead::Locked(data))
    }

    /// Locks the buffer for writing. Fails on read-only storages.
    pub fn write(&self) -> Result<StorageWrite<'_, T>, StorageError> {
        let data = match &self.inner.buffer {
            Buffer::Owned(data) => data.write().unwrap_or_else(PoisonError::into_inner),
            Buffer::ReferenceMut(data) => data.write().unwrap_or_else(PoisonError::into_inner),
            Buffer::Reference(_) => return Err(StorageError::ReadOnly(self.inner.name.clone())),
        };
        self.check_len(data.len())?;
        Ok(data)
    }

    /// Copies out the raw bytes of all elements.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let data = self.read()?;
        Ok(bytemuck::cast_slice::<T, u8>(&data).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{Arc, RwLock},
    };

    use half::f16;

    use super::{Storage, StorageError};

    #[test]
    fn test_create() -> Result<(), Box<dyn Error>> {
        let storage = Storage::<f32>::new(4, "zeros");
        assert_eq!(storage.count(), 4);
        assert_eq!(storage.name(), "zeros");
        assert_eq!(&storage.read()?[..], &[0.0; 4]);
        assert!(!storage.is_read_only());
        assert!(!storage.is_reference());

        let other = Storage::<f32>::new(4, "zeros");
        assert_ne!(storage.id(), other.id());

        let clone = storage.clone();
        assert_eq!(storage.id(), clone.id());
        assert_eq!(storage.ref_count(), 2);
        drop(clone);
        assert!(storage.is_unique());
        Ok(())
    }

    #[test]
    fn test_from_elements() -> Result<(), Box<dyn Error>> {
        let storage = Storage::from_elements([1u32, 2, 3], 5, "padded")?;
        assert_eq!(&storage.read()?[..], &[1, 2, 3, 0, 0]);

        let storage = Storage::from_elements([1u32, 2, 3], 3, "exact")?;
        assert_eq!(&storage.read()?[..], &[1, 2, 3]);

        let result = Storage::from_elements(0..10u32, 4, "overflow");
        assert!(matches!(
            result,
            Err(StorageError::ElementCount {
                capacity: 4,
                got: 5
            })
        ));
        Ok(())
    }

    #[test]
    fn test_reference() -> Result<(), Box<dyn Error>> {
        let buffer: Arc<[f32]> = vec![1.0, 2.0, 3.0].into();
        let storage = Storage::reference(buffer.clone(), "weights");
        assert!(storage.is_read_only());
        assert!(storage.is_reference());
        assert_eq!(&storage.read()?[..], &buffer[..]);
        assert!(matches!(storage.write(), Err(StorageError::ReadOnly(_))));
        Ok(())
    }

    #[test]
    fn test_reference_mut() -> Result<(), Box<dyn Error>> {
        let buffer = Arc::new(RwLock::new(vec![0u16; 3].into_boxed_slice()));
        let storage = Storage::reference_mut(buffer.clone(), "output");
        assert!(!storage.is_read_only());
        assert!(storage.is_reference());
        storage.write()?[1] = 7;
        assert_eq!(&buffer.read().unwrap()[..], &[0, 7, 0]);

        *buffer.write().unwrap() = vec![0u16; 5].into_boxed_slice();
        assert!(matches!(
            storage.read(),
            Err(StorageError::Resized {
                count: 3,
                len: 5,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_to_bytes() -> Result<(), Box<dyn Error>> {
        let data = [f16::from_f32(1.0), f16::from_f32(-2.0)];
        let storage = Storage::from_elements(data, 2, "half")?;
        let bytes = storage.to_bytes()?;
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[..2], data[0].to_ne_bytes());
        assert_eq!(bytes[2..], data[1].to_ne_bytes());
        Ok(())
    }
}
