//! Transfer buffers

use core::borrow::BorrowMut;
use core::cmp::min;

/// A fixed-capacity transfer buffer with a logical size
///
/// The storage is created by the device stack (see [Usbd::io_create]) and is
/// moved into every read/write submission. It comes back by value inside the
/// matching [Completion].
///
/// [Usbd::io_create]: crate::usbd::Usbd::io_create
/// [Completion]: crate::usbd::Completion
pub struct IoBuf<T: BorrowMut<[u8]>> {
    inner: T,
    size: usize, // bytes of valid data, starting at 0
}

impl<T: BorrowMut<[u8]>> IoBuf<T> {
    pub fn new(inner: T) -> IoBuf<T> {
        IoBuf { inner, size: 0 }
    }

    /// Total number of bytes the storage can hold
    pub fn capacity(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Number of valid bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Sets the logical size, clamped to the capacity
    pub fn set_size(&mut self, size: usize) {
        self.size = min(size, self.capacity());
    }

    /// Valid bytes
    pub fn data(&self) -> &[u8] {
        &self.inner.borrow()[..self.size]
    }

    /// The whole storage, regardless of the logical size
    pub fn storage_mut(&mut self) -> &mut [u8] {
        self.inner.borrow_mut()
    }

    /// Appends `data` returning the number of bytes actually written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = min(self.capacity() - self.size, data.len());
        let start = self.size;
        self.inner.borrow_mut()[start..start + count].copy_from_slice(&data[..count]);
        self.size += count;
        debug_assert!(self.size <= self.capacity());
        count
    }

    /// Lets `f` fill up to `max_count` bytes after the valid data.
    ///
    /// `f` returns the number of bytes it produced; the logical size grows by
    /// that much. Fails with `overflow_err` if `max_count` bytes do not fit.
    pub fn write_with<E>(
        &mut self,
        max_count: usize,
        overflow_err: E,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        if self.capacity() - self.size < max_count {
            return Err(overflow_err);
        }

        let start = self.size;
        let inner = self.inner.borrow_mut();

        f(&mut inner[start..start + max_count]).map(|count| {
            let advance_by = min(count, max_count);
            self.size += advance_by;
            advance_by
        })
    }

    pub fn clean(&mut self) {
        self.size = 0;
    }
}
