//! Win32 resolution strategies.
//!
//! Two ways to learn an executable name, selected once per process
//! lifetime by a capability probe and cached:
//!   * module enumeration, for hosts whose process tables predate a usable
//!     Toolhelp snapshot,
//!   * Toolhelp process snapshot otherwise.
//! Every handle is released through `OwnedHandle`, enumeration failures
//! included.

use std::mem::size_of;
use std::sync::OnceLock;

use windows_sys::Win32::{
    Foundation::HMODULE,
    System::{
        Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
            TH32CS_SNAPPROCESS,
        },
        ProcessStatus::{K32EnumProcessModules, K32GetModuleBaseNameW},
        Threading::{OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ},
    },
};

use crate::win32::OwnedHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    ModuleEnumeration,
    Snapshot,
}

/// Probe once: a host that can take a Toolhelp snapshot scans snapshots,
/// anything older enumerates modules.
fn strategy() -> Strategy {
    static PROBE: OnceLock<Strategy> = OnceLock::new();
    *PROBE.get_or_init(|| {
        let probe = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        match OwnedHandle::open(probe) {
            Some(_) => Strategy::Snapshot,
            None => Strategy::ModuleEnumeration,
        }
    })
}

pub(super) fn resolve(process_id: u32) -> String {
    match strategy() {
        Strategy::ModuleEnumeration => by_module_enumeration(process_id),
        Strategy::Snapshot => by_snapshot(process_id),
    }
}

/// Open the target with query+read rights, enumerate its modules, and
/// return the first one carrying the native executable extension.
fn by_module_enumeration(process_id: u32) -> String {
    let process =
        unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, process_id) };
    let Some(process) = OwnedHandle::open(process) else {
        return String::new();
    };

    let mut modules: [HMODULE; 256] = [std::ptr::null_mut(); 256];
    let mut needed = 0u32;
    let ok = unsafe {
        K32EnumProcessModules(
            process.raw(),
            modules.as_mut_ptr(),
            (modules.len() * size_of::<HMODULE>()) as u32,
            &mut needed,
        )
    };
    if ok == 0 {
        return String::new();
    }

    let count = (needed as usize / size_of::<HMODULE>()).min(modules.len());
    for module in &modules[..count] {
        let mut name = [0u16; 260];
        let len = unsafe {
            K32GetModuleBaseNameW(process.raw(), *module, name.as_mut_ptr(), name.len() as u32)
        };
        if len == 0 {
            continue;
        }
        let base = String::from_utf16_lossy(&name[..len as usize]);
        if has_executable_extension(&base) {
            return base;
        }
    }
    String::new()
}

/// Walk a system-wide snapshot until the pid matches; the entry already
/// carries the base file name.
fn by_snapshot(process_id: u32) -> String {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    let Some(snapshot) = OwnedHandle::open(snapshot) else {
        return String::new();
    };

    let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
    entry.dwSize = size_of::<PROCESSENTRY32W>() as u32;

    let mut ok = unsafe { Process32FirstW(snapshot.raw(), &mut entry) };
    while ok != 0 {
        if entry.th32ProcessID == process_id {
            return wide_until_nul(&entry.szExeFile);
        }
        ok = unsafe { Process32NextW(snapshot.raw(), &mut entry) };
    }
    String::new()
}

fn wide_until_nul(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn has_executable_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("exe"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_executable_extension("NOTEPAD.EXE"));
        assert!(has_executable_extension("notepad.exe"));
        assert!(!has_executable_extension("ntdll.dll"));
        assert!(!has_executable_extension("noext"));
    }

    #[test]
    fn wide_strings_stop_at_the_first_nul() {
        let mut buf = [0u16; 8];
        for (i, c) in "a.exe".encode_utf16().enumerate() {
            buf[i] = c;
        }
        assert_eq!(wide_until_nul(&buf), "a.exe");
        assert_eq!(wide_until_nul(&[0u16; 4]), "");
    }

    #[test]
    fn own_process_resolves_to_this_test_binary() {
        let name = resolve(std::process::id());
        assert!(has_executable_extension(&name), "unexpected name {name:?}");
    }
}
