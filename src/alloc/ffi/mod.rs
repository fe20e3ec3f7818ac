use std::sync::OnceLock;

#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

/// Retrieves the system's page size, queried once per process.
///
/// # Platform-specific behavior
/// - **Unix-based systems:** `libc::vm_page_size` on macOS,
///   `sysconf(_SC_PAGESIZE)` elsewhere.
/// - **Windows:** the `dwPageSize` field of `GetSystemInfo`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    #[cfg(target_family = "unix")]
    {
        *PAGE_SIZE.get_or_init(self::unix::page_size)
    }
    #[cfg(target_family = "windows")]
    {
        *PAGE_SIZE.get_or_init(self::windows::page_size)
    }
}
