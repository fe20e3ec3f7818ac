//! Best-effort wiping of every live secret when the process is interrupted.

use std::{
    io,
    sync::{Mutex, PoisonError},
};

/// Installs a process-wide handler that [`purge`](crate::purge)s every
/// live secret when the process receives an interrupt or termination
/// request, then lets the process die as it would have otherwise.
///
/// Once installed the handler is never removed and later calls return
/// `Ok(())` straight away. It replaces any handler previously installed
/// for the same signals.
///
/// A failed installation leaves nothing behind: handlers already swapped
/// in are put back and no background thread or pipe survives. The call can
/// then be retried.
///
/// # Platform-specific behavior
/// - **Unix:** handles `SIGINT`, `SIGTERM`, `SIGHUP` and `SIGQUIT`. The
///   signal handler only writes to a pipe; a background thread does the
///   purge and then re-raises the signal with its default action.
/// - **Windows:** registers a console control handler, which the system
///   already runs on its own thread.
pub fn catch_interrupt() -> io::Result<()> {
    static INSTALLED: Mutex<bool> = Mutex::new(false);

    install_once(&INSTALLED, imp::install)
}

fn install_once(installed: &Mutex<bool>, install: fn() -> io::Result<()>) -> io::Result<()> {
    let mut installed = installed.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    match install() {
        Ok(()) => {
            *installed = true;
            Ok(())
        }
        Err(err) => {
            log::warn!("failed to install interrupt handler: {err}");
            Err(err)
        }
    }
}

#[cfg(target_family = "unix")]
mod imp {
    use core::{mem, ptr};
    use std::{
        io,
        sync::atomic::{AtomicI32, Ordering},
        thread,
    };

    use libc::c_int;

    const SIGNALS: [c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

    static PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);
    static RECEIVED: AtomicI32 = AtomicI32::new(0);

    // Only async-signal-safe calls in here.
    extern "C" fn on_signal(signo: c_int) {
        RECEIVED.store(signo, Ordering::SeqCst);

        let byte = 1u8;
        unsafe {
            libc::write(
                PIPE_WRITE.load(Ordering::SeqCst),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
    }

    pub(super) fn install() -> io::Result<()> {
        install_for(&SIGNALS)
    }

    /// Routes `signals` to a new purge thread, or changes nothing on failure.
    pub(super) fn install_for(signals: &[c_int]) -> io::Result<()> {
        let mut fds = [0 as c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let [read_fd, write_fd] = fds;
        PIPE_WRITE.store(write_fd, Ordering::SeqCst);

        let mut previous = Vec::with_capacity(signals.len());
        let result = signals
            .iter()
            .try_for_each(|&signo| {
                let old = set_handler(signo)?;
                previous.push((signo, old));
                Ok(())
            })
            .and_then(|()| {
                thread::Builder::new()
                    .name("secret-cell-interrupt".into())
                    .spawn(move || wait_and_purge(read_fd))
                    .map(drop)
            });

        if result.is_err() {
            for (signo, old) in previous.iter().rev() {
                unsafe { libc::sigaction(*signo, old, ptr::null_mut()) };
            }
            PIPE_WRITE.store(-1, Ordering::SeqCst);
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
        }

        result
    }

    /// Points `signo` at `on_signal` and returns the action it replaced.
    fn set_handler(signo: c_int) -> io::Result<libc::sigaction> {
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;

        let mut old: libc::sigaction = unsafe { mem::zeroed() };
        if unsafe { libc::sigemptyset(&mut action.sa_mask) } == -1
            || unsafe { libc::sigaction(signo, &action, &mut old) } == -1
        {
            return Err(io::Error::last_os_error());
        }

        Ok(old)
    }

    fn wait_and_purge(read_fd: c_int) {
        let mut byte = 0u8;
        loop {
            match unsafe { libc::read(read_fd, &mut byte as *mut u8 as *mut libc::c_void, 1) } {
                1 => break,
                -1 if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted => continue,
                _ => return,
            }
        }

        let signo = RECEIVED.load(Ordering::SeqCst);
        log::warn!("received signal {signo}, wiping live secrets");
        crate::purge();

        unsafe {
            libc::signal(signo, libc::SIG_DFL);
            libc::raise(signo);
            libc::_exit(128 + signo);
        }
    }
}

#[cfg(target_family = "windows")]
mod imp {
    use std::io;

    use windows_sys::Win32::{Foundation::BOOL, System::Console::SetConsoleCtrlHandler};

    unsafe extern "system" fn on_ctrl(_ctrl_type: u32) -> BOOL {
        log::warn!("received console control event, wiping live secrets");
        crate::purge();

        // Not handled: let the default handler terminate the process.
        0
    }

    pub(super) fn install() -> io::Result<()> {
        match unsafe { SetConsoleCtrlHandler(Some(on_ctrl), 1) } {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}
