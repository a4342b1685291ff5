//! # Double-Buffered Frame Arenas
//!
//! ```text
//! Frame N:
//!   Commands allocate from Arena A
//!   Arena B still holds frame N-1 arguments for commands not yet played
//!
//! update():
//!   active = B, B is cleared
//!   Arena A stays valid until the next update()
//! ```
//!
//! Handles survive exactly one `update()`. After the second, their arena
//! has been cleared and reads report [`CoreError::StaleFrameAllocation`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};

use super::frame_alloc::{FrameAlloc, FrameHandle};
use crate::error::{CoreError, CoreResult};

/// Two frame arenas, one active, swapped on every frame boundary.
///
/// `update()` must be called by the single thread that drives the frame
/// cadence. The per-arena mutexes only make concurrent reads safe; they do
/// not stretch the two-frame validity window.
pub struct FrameAllocPair {
    arenas: [Mutex<FrameAlloc>; 2],
    active: AtomicUsize,
    frames: AtomicU64,
}

impl FrameAllocPair {
    /// Creates two arenas of `capacity` bytes each. Arena 0 starts active.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            arenas: [
                Mutex::new(FrameAlloc::new(0, capacity)),
                Mutex::new(FrameAlloc::new(1, capacity)),
            ],
            active: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
        }
    }

    /// Index of the active arena.
    #[inline]
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Number of `update()` calls so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Advances to the other arena and clears it for the coming frame.
    pub fn update(&self) {
        let next = (self.active.load(Ordering::Acquire) + 1) % 2;
        self.arenas[next].lock().clear();
        self.active.store(next, Ordering::Release);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Locks the active arena for transient argument storage.
    #[must_use]
    pub fn active(&self) -> MutexGuard<'_, FrameAlloc> {
        self.arenas[self.active_index()].lock()
    }

    /// Copies a value into the active arena.
    ///
    /// # Errors
    ///
    /// [`CoreError::FrameArenaExhausted`] if the arena is full.
    pub fn alloc<T: Pod>(&self, value: &T) -> CoreResult<FrameHandle> {
        self.active().alloc(value)
    }

    /// Copies a slice into the active arena.
    ///
    /// # Errors
    ///
    /// [`CoreError::FrameArenaExhausted`] if the arena is full.
    pub fn alloc_slice<T: Pod>(&self, values: &[T]) -> CoreResult<FrameHandle> {
        self.active().alloc_slice(values)
    }

    /// Reads a value back from whichever arena owns the handle.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleFrameAllocation`] once the handle's arena has been
    /// cleared, [`CoreError::FrameAllocationMismatch`] on a size mismatch.
    pub fn read<T: Pod>(&self, handle: FrameHandle) -> CoreResult<T> {
        self.arena(handle)?.lock().read(handle)
    }

    /// Reads a slice back from whichever arena owns the handle.
    ///
    /// # Errors
    ///
    /// Same as [`FrameAllocPair::read`].
    pub fn read_slice<T: Pod>(&self, handle: FrameHandle) -> CoreResult<Vec<T>> {
        self.arena(handle)?.lock().read_slice(handle)
    }

    fn arena(&self, handle: FrameHandle) -> CoreResult<&Mutex<FrameAlloc>> {
        self.arenas
            .get(handle.arena())
            .ok_or(CoreError::StaleFrameAllocation {
                arena: handle.arena(),
                expected: 0,
                found: handle.generation(),
            })
    }
}

impl std::fmt::Debug for FrameAllocPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAllocPair")
            .field("active", &self.active_index())
            .field("frames", &self.frame_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_alternates() {
        let pair = FrameAllocPair::new(256);
        assert_eq!(pair.active_index(), 0);
        pair.update();
        assert_eq!(pair.active_index(), 1);
        pair.update();
        assert_eq!(pair.active_index(), 0);
        assert_eq!(pair.frame_count(), 2);
    }

    #[test]
    fn test_handle_survives_one_update() {
        let pair = FrameAllocPair::new(256);
        let handle = pair.alloc(&[1u32, 2, 3, 4]).unwrap();

        pair.update();
        assert_eq!(pair.read::<[u32; 4]>(handle).unwrap(), [1, 2, 3, 4]);

        pair.update();
        assert!(matches!(
            pair.read::<[u32; 4]>(handle),
            Err(CoreError::StaleFrameAllocation { arena: 0, .. })
        ));
    }

    #[test]
    fn test_update_clears_new_active_only() {
        let pair = FrameAllocPair::new(256);
        let _ = pair.alloc(&1u64).unwrap();
        pair.update();
        let _ = pair.alloc(&2u64).unwrap();

        assert_eq!(pair.active().index(), 1);
        assert!(pair.active().used() > 0);
        // Arena 0 keeps last frame's bytes until it becomes active again.
        assert!(pair.arenas[0].lock().used() > 0);
    }

    #[test]
    fn test_full_arena_is_exhausted_not_stale() {
        let pair = FrameAllocPair::new(32);
        let kept = pair.alloc(&[7u64; 4]).unwrap();

        assert!(matches!(
            pair.active().alloc(&1u8),
            Err(CoreError::FrameArenaExhausted { requested: 1, remaining: 0 })
        ));
        // Existing allocations stay readable while the arena is full.
        assert_eq!(pair.read::<[u64; 4]>(kept).unwrap(), [7; 4]);

        pair.update();
        assert!(pair.alloc(&1u8).is_ok());
    }
}
