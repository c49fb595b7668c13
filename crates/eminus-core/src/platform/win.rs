//! Win32 collaborators.

use std::ffi::{OsStr, OsString};
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use ::windows::core::PCWSTR;
use ::windows::Win32::Foundation::HMODULE;
use ::windows::Win32::System::Diagnostics::Debug::{
    FormatMessageW, FORMAT_MESSAGE_ARGUMENT_ARRAY, FORMAT_MESSAGE_FROM_SYSTEM,
    FORMAT_MESSAGE_IGNORE_INSERTS,
};
use ::windows::Win32::System::LibraryLoader::{
    GetDllDirectoryW, GetModuleHandleW, LoadLibraryW, SetDllDirectoryW,
};
use ::windows::Win32::System::SystemInformation::{GetSystemDirectoryW, GetWindowsDirectoryW};

use super::{ErrorDecoder, LibraryHost, UNKNOWN_MESSAGE};
use crate::error::LoadError;
use crate::resolver::SearchEnvironment;

const MAX_PATH: usize = 260;
const MESSAGE_CAPACITY: usize = 1024;
/// MAKELANGID(LANG_NEUTRAL, SUBLANG_DEFAULT)
const LANG_NEUTRAL_DEFAULT: u32 = 0x0400;
const FACILITY_WIN32: u32 = 7;

fn wide(s: impl AsRef<OsStr>) -> Vec<u16> {
    s.as_ref().encode_wide().chain(std::iter::once(0)).collect()
}

/// Calls a `GetXxxDirectoryW`-style function into a `MAX_PATH` buffer.
fn query_dir(query: impl FnOnce(&mut [u16]) -> u32) -> Option<PathBuf> {
    let mut buf = [0u16; MAX_PATH];
    let len = query(&mut buf) as usize;
    if len == 0 || len > buf.len() {
        return None;
    }
    Some(PathBuf::from(OsString::from_wide(&buf[..len])))
}

/// Win32 error code carried by a `windows` crate error.
fn win32_code(err: &::windows::core::Error) -> u32 {
    let hr = err.code().0 as u32;
    if (hr >> 16) & 0x1fff == FACILITY_WIN32 {
        hr & 0xffff
    } else {
        hr
    }
}

/// Search locations of the running process.
#[derive(Debug, Clone, Default)]
pub struct OsEnvironment {
    library_dir: Option<PathBuf>,
}

impl OsEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment whose library-directory override is `dir` rather than the
    /// process `SetDllDirectoryW` value.
    pub fn with_library_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            library_dir: Some(dir.as_ref().to_path_buf()),
        }
    }
}

impl SearchEnvironment for OsEnvironment {
    fn executable_dir(&self) -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }

    fn library_dir(&self) -> Option<PathBuf> {
        self.library_dir
            .clone()
            .or_else(|| query_dir(|buf| unsafe { GetDllDirectoryW(Some(buf)) }))
    }

    fn system_dir(&self) -> Option<PathBuf> {
        query_dir(|buf| unsafe { GetSystemDirectoryW(Some(buf)) })
    }

    fn installation_dir(&self) -> Option<PathBuf> {
        query_dir(|buf| unsafe { GetWindowsDirectoryW(Some(buf)) })
    }

    fn search_path(&self) -> Option<OsString> {
        std::env::var_os("PATH")
    }
}

/// Loader backed by `LoadLibraryW`.
///
/// Modules are never freed; they stay mapped for the life of the process.
#[derive(Debug, Default)]
pub struct NativeHost {
    modules: Vec<(String, HMODULE)>,
}

impl NativeHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LibraryHost for NativeHost {
    fn is_loaded(&self, name: &str) -> bool {
        if self.modules.iter().any(|(loaded, _)| loaded.eq_ignore_ascii_case(name)) {
            return true;
        }
        let name = wide(name);
        unsafe { GetModuleHandleW(PCWSTR(name.as_ptr())) }.is_ok()
    }

    fn load(&mut self, name: &str) -> Result<(), LoadError> {
        let wide_name = wide(name);
        tracing::debug!(name, "LoadLibraryW");

        match unsafe { LoadLibraryW(PCWSTR(wide_name.as_ptr())) } {
            Ok(module) => {
                self.modules.push((name.to_string(), module));
                Ok(())
            }
            Err(err) => Err(LoadError::os(win32_code(&err), err.message())),
        }
    }

    fn set_search_directory(&mut self, dir: &Path) {
        let wide_dir = wide(dir);
        if let Err(err) = unsafe { SetDllDirectoryW(PCWSTR(wide_dir.as_ptr())) } {
            tracing::warn!(dir = %dir.display(), error = %err, "SetDllDirectoryW failed");
        }
    }
}

/// Decodes Win32 error codes with `FormatMessageW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsErrorDecoder;

impl ErrorDecoder for OsErrorDecoder {
    fn decode(&self, code: u32, args: &[&str]) -> String {
        let wide_args: Vec<Vec<u16>> = args.iter().map(wide).collect();
        let arg_ptrs: Vec<usize> = wide_args.iter().map(|a| a.as_ptr() as usize).collect();

        let (flags, arguments) = if arg_ptrs.is_empty() {
            (FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS, None)
        } else {
            (
                FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_ARGUMENT_ARRAY,
                Some(arg_ptrs.as_ptr() as *const *const i8),
            )
        };

        let mut buf = vec![0u16; MESSAGE_CAPACITY];
        let len = unsafe {
            FormatMessageW(
                flags,
                None,
                code,
                LANG_NEUTRAL_DEFAULT,
                ::windows::core::PWSTR(buf.as_mut_ptr()),
                buf.len() as u32,
                arguments,
            )
        } as usize;

        if len == 0 {
            return UNKNOWN_MESSAGE.to_string();
        }
        String::from_utf16_lossy(&buf[..len.min(buf.len())])
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_not_found() {
        let message = OsErrorDecoder.decode(crate::platform::NOT_FOUND, &[]);
        assert_ne!(message, UNKNOWN_MESSAGE);
    }

    #[test]
    fn test_decode_unknown() {
        assert_eq!(OsErrorDecoder.decode(0x3fff_ffff, &[]), UNKNOWN_MESSAGE);
    }

    #[test]
    fn test_kernel32_is_loaded() {
        assert!(NativeHost::new().is_loaded("kernel32.dll"));
    }

    #[test]
    fn test_load_missing_module() {
        let mut host = NativeHost::new();
        let err = host.load("eminus_definitely_missing.dll").unwrap_err();
        assert_eq!(err.code(), Some(crate::platform::NOT_FOUND));
    }

    #[test]
    fn test_system_dir_resolves() {
        assert!(OsEnvironment::new().system_dir().is_some());
    }
}
