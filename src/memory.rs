use std::ffi::c_void;
use std::slice;

/// WASM page size in bytes (64 KiB).
pub const PAGE_SIZE: u32 = 65536;

/// Element count substituted when a module declares a zero-sized table.
pub const DEFAULT_TABLE_ELEMENTS: u32 = 10;

/// Linear memory descriptor shared with the loaded artifact.
///
/// The descriptor itself lives inside artifact-owned storage (the
/// instance constructor hands the bridge a pointer to fill in); the
/// `data` buffer is bridge-owned and freed by the `ExecutionContext`
/// the memory is bound to. Invariant: `size == pages * PAGE_SIZE`.
#[repr(C)]
#[derive(Debug)]
pub struct LinearMemory {
    pub data: *mut u8,
    pub pages: u32,
    pub max_pages: u32,
    pub size: u32,
}

impl LinearMemory {
    /// # Safety
    /// `data` must point to a live allocation of at least `size` bytes.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.size as usize) }
    }

    /// # Safety
    /// `data` must point to a live allocation of at least `size` bytes.
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data, self.size as usize) }
    }
}

/// One indirect-call table slot: the function's registered type id and
/// its entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TableElem {
    pub func_type: u32,
    pub func: *const c_void,
}

/// Indirect-call table descriptor shared with the loaded artifact.
/// Same ownership split as [`LinearMemory`]: artifact-owned descriptor,
/// bridge-owned buffer.
#[repr(C)]
#[derive(Debug)]
pub struct Table {
    pub data: *mut TableElem,
    pub max_size: u32,
    pub size: u32,
}

/// Zero-filled allocation from the C allocator. Buffers handed to the
/// artifact use `calloc`/`free` because the deallocator is fixed by the
/// ABI contract, not by this crate.
pub(crate) fn alloc_zeroed(size: usize) -> *mut u8 {
    unsafe { libc::calloc(size.max(1), 1).cast() }
}

/// # Safety
/// `ptr` must have come from [`alloc_zeroed`] (or the artifact's
/// scratch allocator) and must not be freed twice.
pub(crate) unsafe fn free(ptr: *mut c_void) {
    unsafe { libc::free(ptr) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_zero_filled() {
        let size = 3 * PAGE_SIZE as usize;
        let ptr = alloc_zeroed(size);
        assert!(!ptr.is_null());
        let buf = unsafe { slice::from_raw_parts(ptr, size) };
        assert!(buf.iter().all(|&b| b == 0));
        unsafe { free(ptr.cast()) };
    }
}
