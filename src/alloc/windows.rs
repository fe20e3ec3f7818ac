use core::ptr::NonNull;
use std::io;

use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_RESERVE, PAGE_NOCACHE, PAGE_READONLY, PAGE_READWRITE,
};

use super::{ffi::windows as ffi, SecretAllocator};

/// Provides an implementation of the `SecretAllocator` trait for Windows systems.
///
/// The memory is committed with `VirtualAlloc` and pinned into the working
/// set with `VirtualLock`, so it never reaches the page file.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSecretAllocator(());

impl WindowsSecretAllocator {
    /// Creates a new allocator. It holds no state.
    pub const fn new() -> Self {
        Self(())
    }
}

impl SecretAllocator for WindowsSecretAllocator {
    fn alloc(&self, size: usize) -> io::Result<NonNull<u8>> {
        let virt_alloc = ffi::virtual_alloc(
            size,
            PAGE_READWRITE | PAGE_NOCACHE,
            MEM_COMMIT | MEM_RESERVE,
        )?
        .cast::<u8>();

        if let Err(err) = ffi::virtual_lock(virt_alloc, size) {
            let _ = ffi::virtual_free(virt_alloc);
            return Err(err);
        }

        Ok(virt_alloc)
    }

    fn make_read_only(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        ffi::virtual_protect(ptr, size, PAGE_READONLY).map(drop)
    }

    fn make_writable(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        ffi::virtual_protect(ptr, size, PAGE_READWRITE).map(drop)
    }

    fn dealloc(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        // May fail (unchecked)
        let _ = ffi::virtual_unlock(ptr, size);
        ffi::virtual_free(ptr)
    }
}
