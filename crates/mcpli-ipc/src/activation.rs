//! Adoption of orchestrator-inherited listening sockets.
//!
//! Under socket activation the orchestrator owns the listening socket and
//! hands the daemon an inherited file descriptor. The descriptor is looked
//! up by the socket key from the service definition: on macOS through
//! `launch_activate_socket`, and otherwise (standalone orchestrator, tests)
//! through an environment variable of that name whose value is the fd
//! number.
//!
//! This module is the only place in the workspace that touches raw file
//! descriptors, hence the narrow `allow(unsafe_code)` scopes.

use std::os::unix::net::UnixListener as StdUnixListener;

use crate::error::{IpcError, IpcResult};

/// Adopt the inherited listener advertised under `socket_key`.
///
/// The returned listener is set non-blocking, ready for
/// `tokio::net::UnixListener::from_std`.
///
/// # Errors
///
/// Returns [`IpcError::Activation`] if the orchestrator did not hand this
/// process a descriptor under that key.
pub fn take_activated_listener(socket_key: &str) -> IpcResult<StdUnixListener> {
    #[cfg(target_os = "macos")]
    {
        match launchd::activate(socket_key) {
            Ok(listener) => {
                listener.set_nonblocking(true).map_err(IpcError::Io)?;
                return Ok(listener);
            },
            Err(reason) => {
                tracing::debug!(key = socket_key, reason, "launchd activation unavailable");
            },
        }
    }

    let listener = fd_from_env(socket_key)?;
    listener.set_nonblocking(true).map_err(IpcError::Io)?;
    Ok(listener)
}

/// Adopt a listener from an fd number stored in the env var `socket_key`.
fn fd_from_env(socket_key: &str) -> IpcResult<StdUnixListener> {
    let raw = std::env::var(socket_key).map_err(|_| {
        IpcError::Activation(format!("no inherited descriptor under key {socket_key}"))
    })?;
    let fd = parse_inherited_fd(socket_key, &raw)?;

    // Invariant: the orchestrator opened this descriptor for us and nothing
    // else in this process claims it; adopting it transfers ownership.
    #[allow(unsafe_code)]
    let listener = unsafe {
        use std::os::fd::FromRawFd;
        StdUnixListener::from_raw_fd(fd)
    };
    Ok(listener)
}

/// Validate an advertised descriptor number before adoption.
fn parse_inherited_fd(socket_key: &str, raw: &str) -> IpcResult<i32> {
    let fd: i32 = raw.trim().parse().map_err(|_| {
        IpcError::Activation(format!("{socket_key} does not hold a descriptor number: {raw}"))
    })?;
    if fd < 3 {
        return Err(IpcError::Activation(format!(
            "refusing to adopt stdio descriptor {fd}"
        )));
    }
    Ok(fd)
}

#[cfg(target_os = "macos")]
mod launchd {
    use std::ffi::CString;
    use std::os::unix::net::UnixListener as StdUnixListener;

    #[allow(unsafe_code)]
    unsafe extern "C" {
        /// From `<launch.h>`: fills `fds` with a malloc'd array of
        /// descriptors for the named socket entry; caller frees.
        fn launch_activate_socket(
            name: *const libc::c_char,
            fds: *mut *mut libc::c_int,
            cnt: *mut libc::size_t,
        ) -> libc::c_int;
    }

    /// Ask launchd for the descriptors declared under `name` in the job's
    /// `Sockets` dictionary. mcpli declares exactly one.
    #[allow(unsafe_code)]
    pub(super) fn activate(name: &str) -> Result<StdUnixListener, String> {
        let c_name =
            CString::new(name).map_err(|_| "socket key contains a NUL byte".to_string())?;

        let mut fds: *mut libc::c_int = std::ptr::null_mut();
        let mut count: libc::size_t = 0;

        // Safety: c_name outlives the call; fds/count are valid out-pointers.
        let rc = unsafe { launch_activate_socket(c_name.as_ptr(), &raw mut fds, &raw mut count) };
        if rc != 0 {
            return Err(format!("launch_activate_socket returned {rc}"));
        }
        if fds.is_null() || count == 0 {
            return Err("launchd advertised no descriptors".to_string());
        }

        // Safety: launchd hands us `count` descriptors in a malloc'd array;
        // we take the first, close any extras, and free the array.
        let listener = unsafe {
            use std::os::fd::FromRawFd;
            let first = *fds;
            for i in 1..count {
                libc::close(*fds.add(i));
            }
            libc::free(fds.cast());
            StdUnixListener::from_raw_fd(first)
        };
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_an_activation_error() {
        let err = take_activated_listener("MCPLI_TEST_NO_SUCH_KEY").unwrap_err();
        assert!(matches!(err, IpcError::Activation(_)));
    }

    #[test]
    fn stdio_descriptors_are_refused() {
        for raw in ["0", "1", "2", "-1"] {
            let err = parse_inherited_fd("KEY", raw).unwrap_err();
            assert!(matches!(err, IpcError::Activation(_)));
        }
    }

    #[test]
    fn garbage_fd_numbers_are_refused() {
        let err = parse_inherited_fd("KEY", "not-a-number").unwrap_err();
        assert!(matches!(err, IpcError::Activation(_)));
    }

    #[test]
    fn valid_fd_numbers_parse() {
        assert_eq!(parse_inherited_fd("KEY", " 7 ").unwrap(), 7);
    }
}
