// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{AllocError, Handle, Region};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const BUFFER_ALIGN: usize = 64;

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Bump arena for the `Frame` mode.
///
/// Allocations live until [`reset`](FrameRegion::reset), which reclaims the
/// whole buffer at once. The host loop resets once per frame; handles from
/// the previous frame must not be touched afterwards.
pub struct FrameRegion {
    base: usize,
    cap: usize,
    layout: Layout,
    offset: Mutex<usize>,
}

impl FrameRegion {
    pub fn with_capacity(cap: usize) -> Self {
        assert!(cap > 0, "frame arena capacity must be non-zero");
        let layout = Layout::from_size_align(cap, BUFFER_ALIGN)
            .expect("frame arena capacity is not a valid layout");
        // Safety: non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let base = match NonNull::new(ptr) {
            Some(base) => base.as_ptr() as usize,
            None => alloc::handle_alloc_error(layout),
        };
        Self {
            base,
            cap,
            layout,
            offset: Mutex::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> usize {
        *self.lock()
    }

    /// Reclaim the whole arena.
    ///
    /// Handles from before the reset must no longer be used.
    pub fn reset(&self) {
        *self.lock() = 0;
    }
}

impl Region for FrameRegion {
    fn alloc(&self, layout: Layout) -> Result<Handle, AllocError> {
        if layout.size() == 0 {
            return Ok(Handle::dangling(layout.align()));
        }
        let mut offset = self.lock();
        let addr = align_up(self.base + *offset, layout.align());
        let end = addr + layout.size();
        if end > self.base + self.cap {
            log::trace!(
                "frame arena exhausted: {} requested, {} free",
                layout.size(),
                self.cap - *offset
            );
            return Err(AllocError::new(layout.size()));
        }
        *offset = end - self.base;
        // Safety: the address is inside the live arena buffer.
        Ok(Handle::from_ptr(unsafe {
            NonNull::new_unchecked(addr as *mut u8)
        }))
    }

    fn addr(&self, handle: Handle) -> NonNull<u8> {
        handle.as_ptr()
    }

    unsafe fn free(&self, _handle: Handle, _layout: Layout) {
        // Reclaimed wholesale by `reset`.
    }
}

impl Drop for FrameRegion {
    fn drop(&mut self) {
        // Safety: the buffer was allocated with `self.layout` and is
        // released exactly once.
        unsafe { alloc::dealloc(self.base as *mut u8, self.layout) }
    }
}

/// Double-buffered frame arena for the `DFrame` mode.
///
/// Two halves alternate: allocations go to the current half, and
/// [`swap`](DFrameRegion::swap) makes the other half current and clears it.
/// An allocation therefore survives the frame in which it was made plus the
/// following one.
pub struct DFrameRegion {
    halves: [FrameRegion; 2],
    current: AtomicUsize,
}

impl DFrameRegion {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            halves: [FrameRegion::with_capacity(cap), FrameRegion::with_capacity(cap)],
            current: AtomicUsize::new(0),
        }
    }

    fn current_half(&self) -> &FrameRegion {
        &self.halves[self.current.load(Ordering::Acquire)]
    }

    /// Make the other half current and clear it.
    pub fn swap(&self) {
        let next = self.current.load(Ordering::Acquire) ^ 1;
        self.halves[next].reset();
        self.current.store(next, Ordering::Release);
    }
}

impl Region for DFrameRegion {
    fn alloc(&self, layout: Layout) -> Result<Handle, AllocError> {
        self.current_half().alloc(layout)
    }

    fn addr(&self, handle: Handle) -> NonNull<u8> {
        handle.as_ptr()
    }

    unsafe fn free(&self, _handle: Handle, _layout: Layout) {
        // Reclaimed wholesale by `swap`.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_until_exhausted() {
        let arena = FrameRegion::with_capacity(256);
        let layout = Layout::from_size_align(64, 8).unwrap();

        for _ in 0..4 {
            arena.alloc(layout).unwrap();
        }
        assert!(arena.alloc(layout).is_err());
        assert_eq!(arena.used(), 256);

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert!(arena.alloc(layout).is_ok());
    }

    #[test]
    fn respects_alignment() {
        let arena = FrameRegion::with_capacity(1024);
        arena.alloc(Layout::from_size_align(1, 1).unwrap()).unwrap();
        let handle = arena.alloc(Layout::from_size_align(64, 64).unwrap()).unwrap();
        assert_eq!(handle.addr() % 64, 0);
    }

    #[test]
    fn dframe_survives_one_swap() {
        let arena = DFrameRegion::with_capacity(128);
        let layout = Layout::from_size_align(32, 8).unwrap();

        let first = arena.alloc(layout).unwrap();
        // Safety: allocated from the current half just above.
        unsafe { arena.addr(first).as_ptr().write_bytes(0x5A, 32) };

        arena.swap();
        let _second = arena.alloc(layout).unwrap();
        // The previous frame's allocation is still intact.
        // Safety: `first` lives in the non-current half until the next swap.
        unsafe { assert_eq!(arena.addr(first).as_ptr().read(), 0x5A) };

        arena.swap();
        let third = arena.alloc(layout).unwrap();
        assert_eq!(first.addr(), third.addr());
    }
}
