//! Process-identity resolution.
//!
//! Maps a process id to its executable's base file name. Resolution is
//! best-effort by contract: any failure (missing process, access denied,
//! enumeration error) yields an empty string, never an error, and callers
//! treat empty as "identity unknown". Each message is resolved once, at
//! capture time.

#[cfg(windows)]
mod windows;

/// Seam between the capture loop and the platform resolver.
pub trait ResolveIdentity: Send + Sync {
    /// Base file name of the process executable, or "" when the process is
    /// missing or inaccessible.
    fn executable_name(&self, process_id: u32) -> String;
}

impl<F> ResolveIdentity for F
where
    F: Fn(u32) -> String + Send + Sync,
{
    fn executable_name(&self, process_id: u32) -> String {
        self(process_id)
    }
}

/// Resolver backed by the host OS process tables.
#[derive(Debug, Default)]
pub struct SystemResolver;

impl ResolveIdentity for SystemResolver {
    fn executable_name(&self, process_id: u32) -> String {
        resolve_executable_name(process_id)
    }
}

/// Resolve through the strategy picked once by the capability probe.
#[cfg(windows)]
pub fn resolve_executable_name(process_id: u32) -> String {
    windows::resolve(process_id)
}

/// The debug-output facility only exists on Windows; identity is always
/// unknown elsewhere.
#[cfg(not(windows))]
pub fn resolve_executable_name(_process_id: u32) -> String {
    String::new()
}
