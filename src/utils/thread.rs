#![allow(unused)]

use anyhow::{Result, anyhow};
use std::ffi::CStr;

// Linux limits pthread names to 16 bytes, including the null terminator.
const MAX_PTHREAD_NAME_LEN: usize = 16;

/// Publish `name` to the kernel for the current thread.
///
/// `std::thread::Builder::name` only labels the Rust-side handle; this is
/// the name external tools (`ps`, `/proc/<pid>/task/*/comm`) actually see,
/// truncated to the pthread limit.
#[cfg(target_os = "linux")]
pub(crate) fn set_current_thread_name(name: &str) {
    let bytes = name.as_bytes();
    let len_to_copy = std::cmp::min(bytes.len(), MAX_PTHREAD_NAME_LEN - 1);

    // The buffer is zero-initialized and we write at most
    // `MAX_PTHREAD_NAME_LEN - 1` bytes, so it stays null-terminated.
    let mut c_name_buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];
    for i in 0..len_to_copy {
        c_name_buf[i] = bytes[i] as libc::c_char;
    }

    unsafe {
        let thread = libc::pthread_self();
        libc::pthread_setname_np(thread, c_name_buf.as_ptr());
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_current_thread_name(_name: &str) {}

/// Kernel-visible name of the current thread.
///
/// Uses `pthread_getname_np`, the counterpart to `pthread_setname_np`, so
/// the result reflects what the OS reports rather than the Rust-side
/// handle label.
#[cfg(target_os = "linux")]
pub(crate) fn get_current_thread_name() -> Result<String> {
    // Zero-initialized, so it's guaranteed to be null-terminated.
    let mut c_name_buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];

    let ret = unsafe {
        let thread = libc::pthread_self();
        libc::pthread_getname_np(thread, c_name_buf.as_mut_ptr(), MAX_PTHREAD_NAME_LEN)
    };

    if ret != 0 {
        return Err(anyhow!(
            "pthread_getname_np failed with error code: {}",
            ret
        ));
    }

    let c_str = unsafe { CStr::from_ptr(c_name_buf.as_ptr()) };
    c_str
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| anyhow!("thread name is not valid UTF-8: {}", e))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn get_current_thread_name() -> Result<String> {
    Ok(std::thread::current()
        .name()
        .unwrap_or_default()
        .to_string())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_then_get_round_trip() {
        thread::spawn(|| {
            set_current_thread_name("minirun-named");
            let name = get_current_thread_name().unwrap();
            assert_eq!(name, "minirun-named");
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_long_names_truncate_to_pthread_limit() {
        thread::spawn(|| {
            set_current_thread_name("minirun-worker-overflow");
            let name = get_current_thread_name().unwrap();
            // 15 usable bytes plus the null terminator.
            assert_eq!(name, "minirun-worker-");
        })
        .join()
        .unwrap();
    }
}
