use core::ptr::{self, NonNull};
use std::io;

/// Creates a memory-mapped region backed by `memfd_secret` on Linux.
///
/// Wraps the `SYS_memfd_secret`, `ftruncate` and `mmap` system calls.
/// The returned pages are removed from the kernel direct map and cannot
/// be swapped out, so no further `mlock` is required.
///
/// # Arguments
///
/// * `len` - The length of the memory region.
/// * `prot` - Memory protection flags.
/// * `flags` - Mapping flags (`MAP_SHARED` is required by the kernel).
///
/// # Returns
///
/// * A result containing a non-null pointer to the memory region on success,
///   or an I/O error on failure.
#[cfg(all(target_os = "linux", feature = "memfd-secret"))]
pub fn mmap_memfd_secret(len: usize, prot: i32, flags: i32) -> io::Result<NonNull<[u8]>> {
    let fd = match unsafe { libc::syscall(libc::SYS_memfd_secret, 0) } {
        -1 => return Err(io::Error::last_os_error()),
        fd => fd as i32,
    };

    let result = match unsafe { libc::ftruncate(fd, len as libc::off_t) } {
        -1 => Err(io::Error::last_os_error()),
        _ => self::mmap_impl(len, prot, flags, fd),
    };

    // The mapping keeps the secret memory alive on its own.
    unsafe { libc::close(fd) };
    result
}

/// Maps an anonymous memory region into the process's address space.
///
/// Wraps the `mmap` system call.
///
/// # Arguments
///
/// * `len` - The length of the memory region.
/// * `prot` - Memory protection flags.
/// * `flags` - Mapping flags.
///
/// # Returns
///
/// * A result containing a non-null pointer to the memory region on success,
///   or an I/O error on failure.
pub fn mmap(len: usize, prot: i32, flags: i32) -> io::Result<NonNull<[u8]>> {
    self::mmap_impl(len, prot, flags, -1)
}

/// Changes the access protection of a memory region.
///
/// Wraps the `mprotect` system call. Protection acts on entire pages.
pub fn mprotect(ptr: NonNull<u8>, len: usize, prot: i32) -> io::Result<()> {
    match unsafe { libc::mprotect(ptr.as_ptr() as _, len, prot) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Provides advice about the use of memory.
///
/// Wraps the `madvise` system call.
///
/// # Arguments
///
/// * `ptr` - A non-null pointer to the memory region.
/// * `len` - The length of the memory region.
/// * `advice` - The advice to be given.
///
/// # Returns
///
/// * A result indicating success or an I/O error on failure.
pub fn madvise(ptr: NonNull<u8>, len: usize, advice: i32) -> io::Result<()> {
    match unsafe { libc::madvise(ptr.as_ptr() as _, len, advice) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Locks a memory region, preventing it from being paged out to swap.
///
/// Wraps the `mlock` system call.
pub fn mlock(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    match unsafe { libc::mlock(ptr.as_ptr() as _, len) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Unlocks a memory region, allowing it to be paged out to swap.
///
/// Wraps the `munlock` system call.
pub fn munlock(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    match unsafe { libc::munlock(ptr.as_ptr() as _, len) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Unmaps a memory region within the process's address space.
///
/// Wraps the `munmap` system call.
pub fn munmap(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    match unsafe { libc::munmap(ptr.as_ptr() as _, len) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Used by `mmap` and `mmap_memfd_secret` functions
#[inline]
fn mmap_impl(len: usize, prot: i32, flags: i32, fd: i32) -> io::Result<NonNull<[u8]>> {
    match unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, fd, 0) } {
        libc::MAP_FAILED => Err(io::Error::last_os_error()),
        ptr => {
            let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
            Ok(NonNull::slice_from_raw_parts(ptr, len))
        }
    }
}

/// Retrieves the system's page size.
///
/// Wraps the `sysconf` system call on Unix-like systems
/// and `vm_page_size` on macOS.
#[inline]
pub(super) fn page_size() -> usize {
    #[cfg(target_os = "macos")]
    unsafe {
        libc::vm_page_size as usize
    }
    #[cfg(not(target_os = "macos"))]
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
}
