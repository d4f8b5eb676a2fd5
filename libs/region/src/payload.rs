// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{AllocError, Handle, Mode, Regions};
use std::alloc::Layout;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

/// A typed value stored in a region allocation.
///
/// This is the ownership shape task payloads travel in: the submitter
/// builds a `Payload`, the payload moves with the task, and the runner
/// consumes it (or lets it drop), which releases the backing allocation.
/// The allocation therefore outlives the task's execution by construction.
pub struct Payload<T> {
    ptr: NonNull<T>,
    handle: Handle,
    mode: Mode,
    regions: Arc<Regions>,
}

// Safety: a Payload is an owning pointer; moving it between threads moves
// the value, and every region here may be called from any thread.
unsafe impl<T: Send> Send for Payload<T> {}

impl<T> Payload<T> {
    /// Store `value` in the `mode` region of `regions`.
    ///
    /// # Panics
    ///
    /// Panics when the region is out of capacity; use
    /// [`try_new`](Payload::try_new) to handle that case.
    pub fn new(value: T, mode: Mode, regions: &Arc<Regions>) -> Self {
        match Self::try_new(value, mode, regions) {
            Ok(payload) => payload,
            Err(err) => panic!("payload allocation failed: {err}"),
        }
    }

    /// Store `value` in the `mode` region of `regions`.
    pub fn try_new(value: T, mode: Mode, regions: &Arc<Regions>) -> Result<Self, AllocError> {
        let layout = Layout::new::<T>();
        let handle = regions.alloc(layout, mode)?;
        let ptr = regions.addr(handle, mode).cast::<T>();
        // Safety: freshly allocated for T's layout.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self {
            ptr,
            handle,
            mode,
            regions: Arc::clone(regions),
        })
    }

    /// Move the value out and release the backing allocation.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // Safety: the value is initialized and, because `self` is wrapped
        // in ManuallyDrop, will not be dropped a second time.
        let value = unsafe { this.ptr.as_ptr().read() };
        // Safety: handle and layout match the original allocation.
        unsafe {
            this.regions
                .free(this.handle, Layout::new::<T>(), this.mode);
        }
        value
    }

    /// The region mode backing this payload.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The raw handle backing this payload.
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl<T> Deref for Payload<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the pointed-to value stays initialized for the lifetime
        // of the payload.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Payload<T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see Deref; `&mut self` gives exclusive access.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for Payload<T> {
    fn drop(&mut self) {
        // Safety: the value is initialized and dropped exactly once, then
        // the matching allocation is released.
        unsafe {
            self.ptr.as_ptr().drop_in_place();
            self.regions
                .free(self.handle, Layout::new::<T>(), self.mode);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Payload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("mode", &self.mode)
            .field("value", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn deref_and_into_inner() {
        let regions = Arc::new(Regions::new());
        let mut payload = Payload::new(vec![1u32, 2, 3], Mode::Default, &regions);
        payload.push(4);
        assert_eq!(payload.len(), 4);
        assert_eq!(payload.into_inner(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn drop_runs_destructor_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Probe;
        impl Drop for Probe {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let regions = Arc::new(Regions::new());
        drop(Payload::new(Probe, Mode::System, &regions));
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);

        let _probe = Payload::new(Probe, Mode::System, &regions).into_inner();
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn zero_sized_payload() {
        let regions = Arc::new(Regions::new());
        let payload = Payload::new((), Mode::Frame, &regions);
        payload.into_inner();
    }
}
