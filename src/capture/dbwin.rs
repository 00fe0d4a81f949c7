//! Win32 binding to the `OutputDebugString` broadcast facility.
//!
//! The facility is a de facto wire protocol built from three named kernel
//! objects, world-accessible so arbitrary processes can broadcast:
//!
//!   * `DBWIN_BUFFER_READY` — auto-reset event, signaled by the reader
//!     when the shared buffer is free (created initially signaled),
//!   * `DBWIN_DATA_READY`   — auto-reset event, signaled by a broadcaster
//!     after writing (created unsignaled),
//!   * `DBWIN_BUFFER`       — 4096-byte section holding a `u32` pid
//!     followed by NUL-terminated ANSI text.
//!
//! The names must match exactly; they are not configurable. Only one
//! reader per machine meaningfully binds them; multiple readers race for
//! messages, which is inherent to the facility.
//!
//! Every handle acquired here, the mapped view included, is released on
//! drop.

use std::io;
use std::mem::size_of;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::{
    Foundation::{HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT},
    Security::{
        InitializeSecurityDescriptor, SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR,
        SetSecurityDescriptorDacl,
    },
    System::{
        Memory::{
            CreateFileMappingW, FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
            PAGE_READWRITE, UnmapViewOfFile,
        },
        SystemServices::SECURITY_DESCRIPTOR_REVISION,
        Threading::{CreateEventW, SetEvent, WaitForMultipleObjects},
    },
};

use super::{CaptureError, DebugSource, RawDebugEvent, StopSignal, Wait};
use crate::win32::{OwnedHandle, wide};

const ACKNOWLEDGE_EVENT: &str = "DBWIN_BUFFER_READY";
const DATA_READY_EVENT: &str = "DBWIN_DATA_READY";
const BUFFER_NAME: &str = "DBWIN_BUFFER";

/// Full size of the shared section, fixed by the facility.
const BUFFER_SIZE: u32 = 4096;
/// The reader maps only the leading slice: the pid plus as much text as
/// viewers historically consume.
const VIEW_SIZE: usize = 512;

/// World-accessible security: a NULL-DACL descriptor, so the named objects
/// can be opened by any broadcaster.
struct WorldAccess {
    // Boxed so the pointer stored in `attributes` stays stable.
    _descriptor: Box<SECURITY_DESCRIPTOR>,
    attributes: SECURITY_ATTRIBUTES,
}

impl WorldAccess {
    fn new() -> Result<Self, CaptureError> {
        let mut descriptor: Box<SECURITY_DESCRIPTOR> = Box::new(unsafe { std::mem::zeroed() });
        let descriptor_ptr = descriptor.as_mut() as *mut SECURITY_DESCRIPTOR as *mut _;

        let ok = unsafe { InitializeSecurityDescriptor(descriptor_ptr, SECURITY_DESCRIPTOR_REVISION) };
        if ok == 0 {
            return Err(CaptureError::Security(io::Error::last_os_error()));
        }
        let ok = unsafe { SetSecurityDescriptorDacl(descriptor_ptr, 1, ptr::null(), 0) };
        if ok == 0 {
            return Err(CaptureError::Security(io::Error::last_os_error()));
        }

        let attributes = SECURITY_ATTRIBUTES {
            nLength: size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: descriptor_ptr,
            bInheritHandle: 0,
        };
        Ok(Self { _descriptor: descriptor, attributes })
    }

    fn as_ptr(&self) -> *const SECURITY_ATTRIBUTES {
        &self.attributes
    }
}

/// Create (or open, when another reader got there first) one named
/// auto-reset handshake event.
fn create_event(
    security: &WorldAccess,
    name: &'static str,
    initially_signaled: bool,
) -> Result<OwnedHandle, CaptureError> {
    let wide_name = wide(name);
    let raw = unsafe {
        CreateEventW(
            security.as_ptr(),
            0,
            if initially_signaled { 1 } else { 0 },
            wide_name.as_ptr(),
        )
    };
    OwnedHandle::open(raw)
        .ok_or_else(|| CaptureError::Event { name, source: io::Error::last_os_error() })
}

/// Unnamed manual-reset event backing `StopSignal`, so a stop request
/// interrupts the handshake wait immediately.
pub(crate) fn stop_event() -> Option<OwnedHandle> {
    let raw = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
    OwnedHandle::open(raw)
}

/// The reader's half of the handshake: both events, the shared section,
/// and a read-only view of its head. This process never writes the
/// section; only broadcasters do.
pub struct DbwinSource {
    acknowledge: OwnedHandle,
    data_ready: OwnedHandle,
    mapping: OwnedHandle,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
}

// The view pointer is only dereferenced from the capture thread.
unsafe impl Send for DbwinSource {}

impl DbwinSource {
    /// Bind to the machine-wide facility, creating the named objects if
    /// this process is first.
    pub fn create() -> Result<Self, CaptureError> {
        let security = WorldAccess::new()?;

        let acknowledge = create_event(&security, ACKNOWLEDGE_EVENT, true)?;
        let data_ready = create_event(&security, DATA_READY_EVENT, false)?;

        let wide_name = wide(BUFFER_NAME);
        let raw = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                security.as_ptr(),
                PAGE_READWRITE,
                0,
                BUFFER_SIZE,
                wide_name.as_ptr(),
            )
        };
        let mapping = OwnedHandle::open(raw).ok_or_else(|| CaptureError::SharedMemory {
            name: BUFFER_NAME,
            source: io::Error::last_os_error(),
        })?;

        let view = unsafe { MapViewOfFile(mapping.raw(), FILE_MAP_READ, 0, 0, VIEW_SIZE) };
        if view.Value.is_null() {
            return Err(CaptureError::MapView {
                name: BUFFER_NAME,
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self { acknowledge, data_ready, mapping, view })
    }

    /// Pid then NUL-terminated ANSI text, copied out of the read-only view.
    fn read_broadcast(&self) -> RawDebugEvent {
        let base = self.view.Value as *const u8;
        let process_id = unsafe { ptr::read_unaligned(base as *const u32) };
        let payload = unsafe { std::slice::from_raw_parts(base.add(4), VIEW_SIZE - 4) };
        let len = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        RawDebugEvent { process_id, text: payload[..len].to_vec() }
    }
}

impl DebugSource for DbwinSource {
    fn acknowledge(&mut self) -> Result<(), CaptureError> {
        let ok = unsafe { SetEvent(self.acknowledge.raw()) };
        if ok == 0 {
            return Err(CaptureError::Wait(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn wait(&mut self, stop: &StopSignal, timeout: Duration) -> Result<Wait, CaptureError> {
        let mut handles: [HANDLE; 2] = [ptr::null_mut(), self.data_ready.raw()];
        let count: u32 = match stop.native_event() {
            Some(stop_handle) => {
                handles[0] = stop_handle;
                2
            }
            None => {
                // No native stop event: wait on data alone; the loop's flag
                // check still bounds termination by one timeout.
                handles[0] = self.data_ready.raw();
                1
            }
        };

        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        let signaled = unsafe { WaitForMultipleObjects(count, handles.as_ptr(), 0, millis) };

        if count == 2 && signaled == WAIT_OBJECT_0 {
            return Ok(Wait::Stopped);
        }
        if signaled == WAIT_OBJECT_0 + count - 1 {
            return Ok(Wait::Data(self.read_broadcast()));
        }
        if signaled == WAIT_TIMEOUT {
            return Ok(Wait::Timeout);
        }
        Err(CaptureError::Wait(io::Error::last_os_error()))
    }
}

impl Drop for DbwinSource {
    fn drop(&mut self) {
        // Unmap before the mapping handle closes; the events close with
        // their `OwnedHandle`s.
        unsafe { UnmapViewOfFile(self.view) };
    }
}
