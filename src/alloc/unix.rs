use core::ptr::NonNull;
use std::io;

use libc::{MAP_ANON, MAP_PRIVATE, PROT_READ, PROT_WRITE};

use super::{ffi::unix as ffi, SecretAllocator};

/// `madvise` advice pairs (exclude, include) controlling core dump contents.
#[cfg(any(target_os = "linux", target_os = "android"))]
const DUMP_ADVICE: Option<(i32, i32)> = Some((libc::MADV_DONTDUMP, libc::MADV_DODUMP));
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
const DUMP_ADVICE: Option<(i32, i32)> = Some((libc::MADV_NOCORE, libc::MADV_CORE));
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
const DUMP_ADVICE: Option<(i32, i32)> = None;

/// Provides an implementation of the `SecretAllocator` trait for Unix-based systems.
///
/// On Linux the allocator first asks for `memfd_secret` pages, which are
/// invisible to the rest of the kernel and to other processes. When the
/// running kernel lacks or refuses that syscall, and on every other Unix, it maps
/// anonymous private pages, locks them in RAM and excludes them from core
/// dumps.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSecretAllocator(());

impl UnixSecretAllocator {
    /// Creates a new allocator. It holds no state.
    pub const fn new() -> Self {
        Self(())
    }

    #[cfg(all(target_os = "linux", feature = "memfd-secret"))]
    fn alloc_memfd_secret(&self, size: usize) -> io::Result<Option<NonNull<u8>>> {
        match ffi::mmap_memfd_secret(size, PROT_READ | PROT_WRITE, libc::MAP_SHARED) {
            Ok(mmap) => Ok(Some(mmap.cast())),
            Err(err) if memfd_secret_unavailable(&err) => {
                log::debug!("memfd_secret is unavailable ({err}), using locked anonymous memory");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn alloc_anonymous(&self, size: usize) -> io::Result<NonNull<u8>> {
        let mmap = ffi::mmap(size, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANON)?.cast::<u8>();

        if let Err(err) = ffi::mlock(mmap, size) {
            let _ = ffi::munmap(mmap, size);
            return Err(err);
        }

        if let Some((exclude, _)) = DUMP_ADVICE {
            if let Err(err) = ffi::madvise(mmap, size, exclude) {
                let _ = ffi::munlock(mmap, size);
                let _ = ffi::munmap(mmap, size);
                return Err(err);
            }
        }

        Ok(mmap)
    }
}

/// Tells apart a kernel or sandbox that refuses `memfd_secret` from a
/// genuine resource failure.
///
/// `ENOSYS` means the syscall does not exist. `EPERM` and `EACCES` come from
/// seccomp profiles and LSMs that deny it, and `EINVAL` from kernels that
/// know the syscall but boot with `secretmem.enable=0`. Exhaustion errors
/// such as `ENOMEM` or `EAGAIN` are reported as they are.
#[cfg(all(target_os = "linux", feature = "memfd-secret"))]
fn memfd_secret_unavailable(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }

    matches!(
        err.raw_os_error(),
        Some(libc::ENOSYS | libc::EPERM | libc::EACCES | libc::EINVAL)
    )
}

impl SecretAllocator for UnixSecretAllocator {
    fn alloc(&self, size: usize) -> io::Result<NonNull<u8>> {
        #[cfg(all(target_os = "linux", feature = "memfd-secret"))]
        {
            if let Some(mmap) = self.alloc_memfd_secret(size)? {
                return Ok(mmap);
            }
        }

        self.alloc_anonymous(size)
    }

    // NOTE Protection acts on an entire page, not a section.
    fn make_read_only(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        ffi::mprotect(ptr, size, PROT_READ)
    }

    // NOTE Protection acts on an entire page, not a section.
    fn make_writable(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        ffi::mprotect(ptr, size, PROT_READ | PROT_WRITE)
    }

    fn dealloc(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        // May fail (unchecked), e.g. on memfd_secret pages that were never mlock'd
        if let Some((_, include)) = DUMP_ADVICE {
            let _ = ffi::madvise(ptr, size, include);
        }
        let _ = ffi::munlock(ptr, size);

        ffi::munmap(ptr, size)
    }
}

#[cfg(all(test, target_os = "linux", feature = "memfd-secret"))]
mod tests {
    use super::*;

    use std::thread;

    use crate::alloc::{page_size, LockedMemory};

    /// Installs a seccomp filter on the calling thread that makes
    /// `memfd_secret` fail with `errno`. Returns `false` when the kernel
    /// does not allow the filter to be installed.
    fn deny_memfd_secret(errno: i32) -> bool {
        let nr = libc::SYS_memfd_secret as u32;
        let mut filter = [
            libc::sock_filter {
                code: (libc::BPF_LD | libc::BPF_W | libc::BPF_ABS) as u16,
                jt: 0,
                jf: 0,
                k: 0, // offsetof(struct seccomp_data, nr)
            },
            libc::sock_filter {
                code: (libc::BPF_JMP | libc::BPF_JEQ | libc::BPF_K) as u16,
                jt: 0,
                jf: 1,
                k: nr,
            },
            libc::sock_filter {
                code: (libc::BPF_RET | libc::BPF_K) as u16,
                jt: 0,
                jf: 0,
                k: libc::SECCOMP_RET_ERRNO | (errno as u32 & libc::SECCOMP_RET_DATA),
            },
            libc::sock_filter {
                code: (libc::BPF_RET | libc::BPF_K) as u16,
                jt: 0,
                jf: 0,
                k: libc::SECCOMP_RET_ALLOW,
            },
        ];
        let program = libc::sock_fprog {
            len: filter.len() as u16,
            filter: filter.as_mut_ptr(),
        };

        let (on, off): (libc::c_ulong, libc::c_ulong) = (1, 0);
        unsafe {
            libc::prctl(libc::PR_SET_NO_NEW_PRIVS, on, off, off, off) == 0
                && libc::prctl(
                    libc::PR_SET_SECCOMP,
                    libc::SECCOMP_MODE_FILTER as libc::c_ulong,
                    &program as *const libc::sock_fprog,
                ) == 0
        }
    }

    /// Runs `alloc` on a fresh thread whose `memfd_secret` calls fail with
    /// `errno`. The filter dies with the thread.
    fn alloc_with_memfd_secret_denied(errno: i32) -> Option<io::Result<()>> {
        thread::spawn(move || {
            if !deny_memfd_secret(errno) {
                return None;
            }

            let allocator = UnixSecretAllocator::new();
            let size = page_size();
            Some(allocator.alloc(size).and_then(|ptr| {
                unsafe { ptr.as_ptr().write_volatile(0x5A) };
                allocator.dealloc(ptr, size)
            }))
        })
        .join()
        .expect("Thread panicked")
    }

    #[test]
    fn test_unavailable_errors_fall_back() {
        for errno in [libc::ENOSYS, libc::EPERM, libc::EACCES, libc::EINVAL] {
            assert!(memfd_secret_unavailable(&io::Error::from_raw_os_error(errno)));
        }
        assert!(memfd_secret_unavailable(&io::Error::from(
            io::ErrorKind::Unsupported
        )));
    }

    #[test]
    fn test_resource_errors_are_reported() {
        for errno in [libc::ENOMEM, libc::EAGAIN, libc::EMFILE] {
            assert!(!memfd_secret_unavailable(&io::Error::from_raw_os_error(errno)));
        }
    }

    #[test]
    fn test_seccomp_denied_memfd_secret_falls_back() {
        for errno in [libc::EPERM, libc::EACCES] {
            match alloc_with_memfd_secret_denied(errno) {
                Some(result) => result.expect("Allocation should fall back"),
                None => eprintln!("seccomp filters are unavailable, skipping"),
            }
        }
    }

    #[test]
    fn test_seccomp_denied_memfd_secret_seals() {
        let sealed = thread::spawn(|| {
            if !deny_memfd_secret(libc::EPERM) {
                return None;
            }

            let mut memory = LockedMemory::<UnixSecretAllocator>::with_length(7)
                .expect("Allocation should fall back");
            memory.as_bytes_mut().copy_from_slice(b"hunter2");
            let sealed = memory.into_read_only().expect("Failed to seal");
            let bytes = sealed.as_bytes().to_vec();
            sealed.release().expect("Failed to release");
            Some(bytes)
        })
        .join()
        .expect("Thread panicked");

        match sealed {
            Some(bytes) => assert_eq!(bytes, b"hunter2"),
            None => eprintln!("seccomp filters are unavailable, skipping"),
        }
    }
}
