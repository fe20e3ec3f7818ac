mod ffi;
#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

use core::{ptr::NonNull, slice};
use std::io;

use zeroize::Zeroize;

pub use self::ffi::page_size;

/// Allocator used by [`LockedMemory`] when none is specified.
#[cfg(target_family = "unix")]
pub type PlatformAllocator = unix::UnixSecretAllocator;
/// Allocator used by [`LockedMemory`] when none is specified.
#[cfg(target_family = "windows")]
pub type PlatformAllocator = windows::WindowsSecretAllocator;

/// Trait representing a source of page-granular memory for secrets.
///
/// Implementors should ensure that the memory is kept out of swap and
/// core dumps, and is not accessible by other processes. Every `size`
/// passed to these functions is a whole number of pages, as returned by
/// [`page_aligned`].
pub trait SecretAllocator {
    /// Maps `size` bytes of readable and writable memory.
    fn alloc(&self, size: usize) -> io::Result<NonNull<u8>>;

    /// Revokes write access to the pages.
    fn make_read_only(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Restores write access to the pages.
    fn make_writable(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Returns the pages to the system. The caller has already wiped them.
    fn dealloc(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()>;
}

/// Rounds `len` up to a whole number of pages, never less than one page.
pub fn page_aligned(len: usize) -> usize {
    let page_size = page_size();
    len.max(1).div_ceil(page_size) * page_size
}

/// Overwrites `bytes` with zeros in a way the compiler cannot elide.
#[inline]
pub fn wipe(bytes: &mut [u8]) {
    bytes.zeroize();
}

/// Overwrites the whole allocation of `bytes`, spare capacity included,
/// and truncates it to zero length.
#[inline]
pub fn wipe_vec(bytes: &mut Vec<u8>) {
    bytes.zeroize();
}

/// A page-aligned allocation owned by exactly one memory handle.
///
/// `ptr` is `None` once the pages have been handed back to the allocator.
struct Region<A: SecretAllocator> {
    ptr: Option<NonNull<u8>>,
    len: usize,
    size: usize,
    allocator: A,
}

impl<A: SecretAllocator> Region<A> {
    fn new(len: usize, allocator: A) -> io::Result<Self> {
        if len > isize::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length out of bounds",
            ));
        }

        let size = page_aligned(len);
        let ptr = allocator.alloc(size)?;

        Ok(Self {
            ptr: Some(ptr),
            len,
            size,
            allocator,
        })
    }

    fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self.ptr {
            Some(ptr) => unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Zeroes the whole mapping and returns it to the allocator.
    ///
    /// The pages are unmapped even when they could not be made writable,
    /// in which case they are left to the kernel unwiped and the
    /// protection error is reported.
    fn release(&mut self) -> io::Result<()> {
        let Some(ptr) = self.ptr.take() else {
            return Ok(());
        };

        let writable = self.allocator.make_writable(ptr, self.size);
        if writable.is_ok() {
            wipe(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.size) });
        }

        let freed = self.allocator.dealloc(ptr, self.size);
        writable.and(freed)
    }
}

impl<A: SecretAllocator> Drop for Region<A> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("failed to release secret memory: {err}");
        }
    }
}

// The pointer is never shared outside of the owning handle, so the region
// moves between threads as freely as its allocator does.
unsafe impl<A: SecretAllocator + Send> Send for Region<A> {}
unsafe impl<A: SecretAllocator + Sync> Sync for Region<A> {}

/// Writable, locked memory that has not been sealed yet.
///
/// Used to stage a secret's bytes before converting the pages to
/// read-only with [`LockedMemory::into_read_only`].
pub struct LockedMemory<A: SecretAllocator = PlatformAllocator>(Region<A>);

impl<A: SecretAllocator + Default> LockedMemory<A> {
    /// Allocates a new zero-filled memory region holding `len` bytes.
    pub fn with_length(len: usize) -> io::Result<Self> {
        Self::with_length_in(len, A::default())
    }
}

impl<A: SecretAllocator> LockedMemory<A> {
    /// Allocates a new zero-filled memory region holding `len` bytes from
    /// the given allocator.
    pub fn with_length_in(len: usize, allocator: A) -> io::Result<Self> {
        Region::new(len, allocator).map(Self)
    }

    /// Number of usable bytes, excluding the page padding.
    pub fn len(&self) -> usize {
        self.0.len
    }

    /// Returns `true` if the region holds no usable bytes.
    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// Returns the usable bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns the usable bytes as a mutable slice.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.0.as_bytes_mut()
    }

    /// Converts the memory to read-only, consuming the writable handle.
    ///
    /// On failure the pages are wiped and released before the error is
    /// returned.
    pub fn into_read_only(self) -> io::Result<SealedMemory<A>> {
        let region = self.0;
        if let Some(ptr) = region.ptr {
            region.allocator.make_read_only(ptr, region.size)?;
        }

        Ok(SealedMemory(region))
    }
}

/// Read-only, locked memory holding a finished secret.
pub struct SealedMemory<A: SecretAllocator = PlatformAllocator>(Region<A>);

impl<A: SecretAllocator> SealedMemory<A> {
    /// Number of sealed bytes, excluding the page padding.
    pub fn len(&self) -> usize {
        self.0.len
    }

    /// Returns `true` if nothing was sealed.
    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// Returns the sealed bytes. Writing through the pages would fault.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Wipes and releases the memory, reporting any OS error.
    ///
    /// The handle is consumed whatever the outcome. If the pages could be
    /// made writable they are zeroed before the allocator sees them, so a
    /// failing `dealloc` never leaves the secret behind. Dropping the
    /// handle does the same but can only log failures.
    pub fn release(mut self) -> io::Result<()> {
        self.0.release()
    }
}
