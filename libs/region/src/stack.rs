// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{AllocError, Handle, Region};
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;

/// Per-thread grow-only stack for the `Static` mode.
///
/// Every thread bumps through its own chunk list; chunks are only released
/// when the thread exits. `free` is a no-op.
pub struct StackRegion {
    chunk_size: usize,
}

struct Chunk {
    base: usize,
    cap: usize,
    layout: Layout,
}

struct ThreadStack {
    chunks: Vec<Chunk>,
    // Bump offset within the last chunk.
    offset: usize,
}

thread_local! {
    static STACK: RefCell<ThreadStack> = RefCell::new(ThreadStack {
        chunks: Vec::new(),
        offset: 0,
    });
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl StackRegion {
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "stack chunk size must be non-zero");
        Self { chunk_size }
    }

    fn grow(&self, stack: &mut ThreadStack, min_size: usize) -> Result<(), AllocError> {
        let size = min_size.max(self.chunk_size);
        let layout = Layout::from_size_align(size, CHUNK_ALIGN)
            .map_err(|_| AllocError::new(min_size))?;
        // Safety: non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or_else(|| AllocError::new(min_size))?;
        stack.chunks.push(Chunk {
            base: base.as_ptr() as usize,
            cap: size,
            layout,
        });
        stack.offset = 0;
        Ok(())
    }
}

const CHUNK_ALIGN: usize = 64;

impl Region for StackRegion {
    fn alloc(&self, layout: Layout) -> Result<Handle, AllocError> {
        if layout.size() == 0 {
            return Ok(Handle::dangling(layout.align()));
        }
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            // Alignment is computed on absolute addresses so requests more
            // aligned than the chunk base still land correctly.
            let fits = stack.chunks.last().is_some_and(|chunk| {
                align_up(chunk.base + stack.offset, layout.align()) + layout.size()
                    <= chunk.base + chunk.cap
            });
            if !fits {
                self.grow(&mut stack, layout.size() + layout.align())?;
            }

            let chunk_base = stack.chunks.last().expect("chunk was just ensured").base;
            let addr = align_up(chunk_base + stack.offset, layout.align());
            stack.offset = addr + layout.size() - chunk_base;
            // Safety: the address is non-null (inside a live allocation)
            // and stays within the chunk capacity.
            Ok(Handle::from_ptr(unsafe {
                NonNull::new_unchecked(addr as *mut u8)
            }))
        })
    }

    fn addr(&self, handle: Handle) -> NonNull<u8> {
        handle.as_ptr()
    }

    unsafe fn free(&self, _handle: Handle, _layout: Layout) {
        // Grow-only by contract; memory returns when the thread exits.
    }
}

impl Drop for ThreadStack {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            // Safety: chunks are owned by this thread and released exactly
            // once at thread exit.
            unsafe { alloc::dealloc(chunk.base as *mut u8, chunk.layout) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocations_do_not_overlap() {
        let region = StackRegion::new(1024);
        let layout = Layout::from_size_align(48, 8).unwrap();

        let a = region.alloc(layout).unwrap();
        let b = region.alloc(layout).unwrap();
        assert!(b.addr() >= a.addr() + 48 || a.addr() >= b.addr() + 48);
        // Safety: both are live stack allocations.
        unsafe {
            region.addr(a).as_ptr().write_bytes(0x11, 48);
            region.addr(b).as_ptr().write_bytes(0x22, 48);
            assert_eq!(region.addr(a).as_ptr().read(), 0x11);
            assert_eq!(region.addr(b).as_ptr().read(), 0x22);
        }
    }

    #[test]
    fn grows_past_a_chunk() {
        let region = StackRegion::new(128);
        let layout = Layout::from_size_align(100, 8).unwrap();
        let handles: Vec<_> = (0..8).map(|_| region.alloc(layout).unwrap()).collect();
        for window in handles.windows(2) {
            assert_ne!(window[0].addr(), window[1].addr());
        }
    }

    #[test]
    fn each_thread_gets_its_own_stack() {
        let region = std::sync::Arc::new(StackRegion::new(256));
        let layout = Layout::from_size_align(64, 8).unwrap();

        let local = region.alloc(layout).unwrap();
        let remote = {
            let region = std::sync::Arc::clone(&region);
            std::thread::spawn(move || region.alloc(layout).unwrap().addr())
                .join()
                .unwrap()
        };
        assert_ne!(local.addr(), remote);
    }
}
