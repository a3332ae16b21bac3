use alloc::alloc::{alloc, dealloc, Layout};
use core::ptr::NonNull;

use crate::planner::Allocator;

const ALIGN: usize = 8;
/// Each block starts with its total size, so that `free` can rebuild the
/// layout from the pointer alone
const HEADER: usize = ALIGN;

/// Installs networks into the global heap
#[derive(Copy, Clone, Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    pub const fn new() -> Self {
        Self
    }
}

impl Allocator for HeapAllocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let total = size.checked_add(HEADER)?;
        let layout = Layout::from_size_align(total, ALIGN).ok()?;
        let block = NonNull::new(unsafe { alloc(layout) })?;
        unsafe {
            (block.as_ptr() as *mut usize).write(total);
            NonNull::new(block.as_ptr().add(HEADER))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let block = ptr.as_ptr().sub(HEADER);
        let total = (block as *const usize).read();
        dealloc(block, Layout::from_size_align_unchecked(total, ALIGN));
    }
}
