//! Small Win32 plumbing shared by the capture and identity modules.

use std::ffi::OsStr;
use std::os::windows::prelude::OsStrExt;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};

/// Thin RAII wrapper: closes the wrapped handle on drop, error paths
/// included.
pub(crate) struct OwnedHandle(HANDLE);

// Kernel handles are plain table indices; nothing thread-affine about them.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Wrap a just-acquired handle; `None` for either Win32 "no handle"
    /// sentinel.
    pub(crate) fn open(handle: HANDLE) -> Option<Self> {
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            None
        } else {
            Some(Self(handle))
        }
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Null-terminated UTF-16 for Win32 name parameters.
pub(crate) fn wide(name: &str) -> Vec<u16> {
    OsStr::new(name).encode_wide().chain(Some(0)).collect()
}
