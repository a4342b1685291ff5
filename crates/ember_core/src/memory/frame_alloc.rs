//! # Frame Arena
//!
//! A bump allocator for command arguments that live for one frame.
//!
//! Allocations hand out a [`FrameHandle`] instead of a pointer. The handle
//! records the arena generation; clearing the arena bumps the generation,
//! so a handle used after its frame has been recycled is detected instead
//! of reading someone else's bytes.

use bytemuck::Pod;

use crate::error::{CoreError, CoreResult};

/// Alignment of every allocation, in bytes.
const ALLOC_ALIGN: usize = 16;

/// Handle to bytes stored in a [`FrameAlloc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle {
    arena: usize,
    generation: u64,
    offset: u32,
    len: u32,
}

impl FrameHandle {
    /// Index of the arena that owns the bytes.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> usize {
        self.arena
    }

    /// Arena generation the allocation was made in.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Length of the allocation in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true for zero-length allocations.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A bump-pointer arena, cleared wholesale at frame boundaries.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. [`FrameAllocPair`](super::FrameAllocPair)
/// wraps each one in a mutex.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = FrameAlloc::new(0, 64 * 1024);
///
/// let handle = arena.alloc_slice(&[1.0f32, 2.0, 3.0])?;
/// let floats: Vec<f32> = arena.read_slice(handle)?;
///
/// arena.clear(); // `handle` is stale from here on
/// ```
pub struct FrameAlloc {
    index: usize,
    storage: Box<[u8]>,
    offset: usize,
    generation: u64,
}

impl FrameAlloc {
    /// Creates an arena with `capacity` bytes, identified by `index`.
    ///
    /// # Panics
    ///
    /// Panics if capacity does not fit in a `u32`.
    #[must_use]
    pub fn new(index: usize, capacity: usize) -> Self {
        assert!(
            u32::try_from(capacity).is_ok(),
            "Frame arena capacity must fit in u32"
        );
        Self {
            index,
            storage: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
            generation: 0,
        }
    }

    /// Arena index within its pair.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes handed out since the last clear, including alignment padding.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.offset
    }

    /// Bytes still free.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }

    /// Number of times this arena has been cleared.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Copies `bytes` into the arena.
    ///
    /// # Errors
    ///
    /// [`CoreError::FrameArenaExhausted`] if there is not enough room.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> CoreResult<FrameHandle> {
        let start = (self.offset + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1);
        let end = start.checked_add(bytes.len()).unwrap_or(usize::MAX);

        if end > self.capacity() {
            return Err(CoreError::FrameArenaExhausted {
                requested: bytes.len(),
                remaining: self.remaining(),
            });
        }

        self.storage[start..end].copy_from_slice(bytes);
        self.offset = end;

        // Both fit: capacity is checked against u32 at construction.
        #[allow(clippy::cast_possible_truncation)]
        let (offset, len) = (start as u32, bytes.len() as u32);

        Ok(FrameHandle {
            arena: self.index,
            generation: self.generation,
            offset,
            len,
        })
    }

    /// Copies one plain-old-data value into the arena.
    ///
    /// # Errors
    ///
    /// [`CoreError::FrameArenaExhausted`] if there is not enough room.
    pub fn alloc<T: Pod>(&mut self, value: &T) -> CoreResult<FrameHandle> {
        self.alloc_bytes(bytemuck::bytes_of(value))
    }

    /// Copies a slice of plain-old-data values into the arena.
    ///
    /// # Errors
    ///
    /// [`CoreError::FrameArenaExhausted`] if there is not enough room.
    pub fn alloc_slice<T: Pod>(&mut self, values: &[T]) -> CoreResult<FrameHandle> {
        self.alloc_bytes(bytemuck::cast_slice(values))
    }

    /// Borrows the bytes behind a handle.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleFrameAllocation`] if the handle belongs to another
    /// arena or to a generation that has since been cleared.
    pub fn bytes(&self, handle: FrameHandle) -> CoreResult<&[u8]> {
        if handle.arena != self.index || handle.generation != self.generation {
            return Err(CoreError::StaleFrameAllocation {
                arena: handle.arena,
                expected: self.generation,
                found: handle.generation,
            });
        }

        let start = handle.offset as usize;
        Ok(&self.storage[start..start + handle.len()])
    }

    /// Reads back one value stored with [`FrameAlloc::alloc`].
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleFrameAllocation`] for a recycled handle,
    /// [`CoreError::FrameAllocationMismatch`] if `T` has a different size.
    pub fn read<T: Pod>(&self, handle: FrameHandle) -> CoreResult<T> {
        let bytes = self.bytes(handle)?;
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(CoreError::FrameAllocationMismatch {
                stored: bytes.len(),
                requested: std::mem::size_of::<T>(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Reads back a slice stored with [`FrameAlloc::alloc_slice`].
    ///
    /// # Errors
    ///
    /// Same as [`FrameAlloc::read`].
    pub fn read_slice<T: Pod>(&self, handle: FrameHandle) -> CoreResult<Vec<T>> {
        let bytes = self.bytes(handle)?;
        let size = std::mem::size_of::<T>();
        if size == 0 || bytes.len() % size != 0 {
            return Err(CoreError::FrameAllocationMismatch {
                stored: bytes.len(),
                requested: size,
            });
        }
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Resets the arena, invalidating every outstanding handle.
    ///
    /// No memory is freed or reallocated.
    #[inline]
    pub fn clear(&mut self) {
        self.offset = 0;
        self.generation += 1;
    }
}

impl std::fmt::Debug for FrameAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAlloc")
            .field("index", &self.index)
            .field("capacity", &self.capacity())
            .field("used", &self.offset)
            .field("generation", &self.generation)
            .finish()
    }
}
