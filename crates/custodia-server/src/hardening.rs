//! Process-level hardening applied before logging is initialized.
//!
//! Secrets pass through this process in plaintext between the overlay's
//! decrypt step and the response being written; core dumps and swapped
//! memory are both ways that plaintext could end up on disk.

#[cfg(unix)]
#[allow(unsafe_code)]
pub fn disable_core_dumps() -> Result<(), String> {
    let limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: `limit` is a valid, fully-initialized `rlimit` for the
    // duration of this call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(not(unix))]
pub fn disable_core_dumps() -> Result<(), String> {
    Ok(())
}

#[cfg(unix)]
#[allow(unsafe_code)]
pub fn lock_memory() -> Result<(), String> {
    // SAFETY: no arguments beyond flag constants; mlockall has no unsafe
    // preconditions other than the flags being one it recognizes.
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(not(unix))]
pub fn lock_memory() -> Result<(), String> {
    Ok(())
}
