use std::ops::{Deref, Index, IndexMut};
use std::sync::Arc;

/// Owning handle over one rank's local slice.
///
/// Storage sits behind an `Arc`, so `share` hands out a second handle to the
/// same elements without copying. Sharing is never implicit: `Clone` is not
/// implemented, and every call site picks `share` or `to_vec`. Writes go
/// through `as_mut_slice`/`IndexMut`, which detach a shared handle onto its
/// own copy first, so mutating one alias never shows through another.
#[derive(Debug)]
pub struct DistributedBuffer<T> {
    data: Arc<Vec<T>>,
}

impl<T> DistributedBuffer<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Takes over `data`, releasing this handle's previous storage.
    pub fn rebind(&mut self, data: Vec<T>) {
        self.data = Arc::new(data);
    }

    /// A second handle aliasing the same storage.
    pub fn share(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Number of live handles over this storage, this one included.
    pub fn alias_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T: Clone + Default> DistributedBuffer<T> {
    /// `len` default-valued elements.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: Arc::new(vec![T::default(); len]),
        }
    }

    /// Drops the contents and owns a fresh buffer of `len` default values.
    pub fn reallocate(&mut self, len: usize) {
        self.data = Arc::new(vec![T::default(); len]);
    }

    /// Owns a fresh buffer of `len` elements keeping the first `min(old, len)`.
    pub fn resize(&mut self, len: usize) {
        let keep = self.len().min(len);
        let mut fresh = Vec::with_capacity(len);
        fresh.extend_from_slice(&self.data[..keep]);
        fresh.resize(len, T::default());
        self.data = Arc::new(fresh);
    }
}

impl<T: Clone> DistributedBuffer<T> {
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.as_ref().clone()
    }

    /// Unwraps the storage, copying only if other handles still alias it.
    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

impl<T> Default for DistributedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for DistributedBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl<T: Clone> From<&[T]> for DistributedBuffer<T> {
    fn from(data: &[T]) -> Self {
        Self::from(data.to_vec())
    }
}

impl<T> Deref for DistributedBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> Index<usize> for DistributedBuffer<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.data[i]
    }
}

impl<T: Clone> IndexMut<usize> for DistributedBuffer<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.as_mut_slice()[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_is_default_filled() {
        let buf = DistributedBuffer::<i32>::zeroed(5);
        assert_eq!(buf.as_slice(), &[0; 5]);
        assert_eq!(DistributedBuffer::<i32>::new().len(), 0);
    }

    #[test]
    fn reallocate_discards_contents() {
        let mut buf = DistributedBuffer::from(vec![4, 5, 6]);
        buf.reallocate(2);
        assert_eq!(buf.as_slice(), &[0, 0]);
    }

    #[test]
    fn resize_keeps_prefix() {
        let mut buf = DistributedBuffer::from(vec![1, 2, 3, 4]);
        buf.resize(2);
        assert_eq!(buf.as_slice(), &[1, 2]);
        buf.resize(4);
        assert_eq!(buf.as_slice(), &[1, 2, 0, 0]);
    }

    #[test]
    fn rebind_releases_old_storage() {
        let mut a = DistributedBuffer::from(vec![1, 2, 3]);
        let b = a.share();
        assert_eq!(a.alias_count(), 2);
        a.rebind(vec![9]);
        assert_eq!(a.as_slice(), &[9]);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
        assert_eq!(b.alias_count(), 1);
    }

    #[test]
    fn write_through_shared_handle_detaches() {
        let mut a = DistributedBuffer::from(vec![1, 2, 3]);
        let b = a.share();
        assert!(a.ptr_eq(&b));
        a[0] = 7;
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.as_slice(), &[7, 2, 3]);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn into_vec_copies_only_when_aliased() {
        let a = DistributedBuffer::from(vec![1, 2]);
        let b = a.share();
        assert_eq!(a.into_vec(), vec![1, 2]);
        assert_eq!(b.alias_count(), 1);
        assert_eq!(b.into_vec(), vec![1, 2]);
    }
}
