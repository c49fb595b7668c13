//! `dlopen`-based collaborators.
//!
//! The dynamic linker has no process-wide "extra library directory", so the
//! host resolves bare names itself through [`PathResolver`] with the
//! configured directory as the library-directory override, and falls back to
//! the linker's own search when nothing matches.

use std::ffi::{CStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY, RTLD_NOW};

use super::{ErrorDecoder, LibraryHost, UNKNOWN_MESSAGE};
use crate::error::LoadError;
use crate::resolver::{PathResolver, SearchEnvironment};

#[cfg(target_os = "macos")]
const SEARCH_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const SEARCH_PATH_VAR: &str = "LD_LIBRARY_PATH";

const SYSTEM_DIR: &str = "/usr/lib";
const INSTALLATION_DIR: &str = "/lib";

#[cfg(target_os = "linux")]
const LINKER_CONFIG: &str = "/etc/ld.so.conf";

/// Directories the dynamic linker searches after the search-path variable:
/// the `ld.so.conf` entries, then the multiarch and `lib64` defaults.
#[cfg(target_os = "linux")]
fn linker_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    read_linker_config(Path::new(LINKER_CONFIG), &mut dirs, 0);

    let multiarch = format!("{}-linux-gnu", std::env::consts::ARCH);
    for root in ["/lib", "/usr/lib"] {
        dirs.push(Path::new(root).join(&multiarch));
    }
    dirs.push(PathBuf::from("/lib64"));
    dirs.push(PathBuf::from("/usr/lib64"));
    dirs
}

#[cfg(not(target_os = "linux"))]
fn linker_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/local/lib")]
}

/// Collect directory lines of an `ld.so.conf`-style file, following
/// `include` lines. Patterns are supported in the last path component only.
#[cfg(target_os = "linux")]
fn read_linker_config(path: &Path, dirs: &mut Vec<PathBuf>, depth: usize) {
    if depth > 8 {
        return;
    }
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or(line).trim();
        if line.is_empty() || line.starts_with("hwcap") {
            continue;
        }
        match line.strip_prefix("include") {
            Some(pattern) if pattern.starts_with(char::is_whitespace) => {
                let pattern = pattern.trim();
                let pattern = match path.parent() {
                    Some(base) if !pattern.starts_with('/') => base.join(pattern),
                    _ => PathBuf::from(pattern),
                };
                for included in expand_pattern(&pattern) {
                    read_linker_config(&included, dirs, depth + 1);
                }
            }
            _ => dirs.push(PathBuf::from(line)),
        }
    }
}

/// Files matching `pattern`, where the file name may contain one `*`.
#[cfg(target_os = "linux")]
fn expand_pattern(pattern: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (pattern.parent(), pattern.file_name()) else {
        return Vec::new();
    };
    let name = name.to_string_lossy();
    let Some((prefix, suffix)) = name.split_once('*') else {
        return vec![pattern.to_path_buf()];
    };

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let file = entry.file_name();
            let file = file.to_string_lossy();
            file.len() >= prefix.len() + suffix.len()
                && file.starts_with(prefix)
                && file.ends_with(suffix)
        })
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files
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

    /// Environment whose library-directory override is `dir`.
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
        self.library_dir.clone()
    }

    fn system_dir(&self) -> Option<PathBuf> {
        Some(PathBuf::from(SYSTEM_DIR))
    }

    fn installation_dir(&self) -> Option<PathBuf> {
        Some(PathBuf::from(INSTALLATION_DIR))
    }

    /// The search-path variable followed by the linker's own directories.
    fn search_path(&self) -> Option<OsString> {
        let mut dirs: Vec<PathBuf> = std::env::var_os(SEARCH_PATH_VAR)
            .map(|list| std::env::split_paths(&list).collect())
            .unwrap_or_default();
        dirs.extend(linker_dirs());
        dirs.retain(|dir| !dir.as_os_str().as_bytes().contains(&b':'));
        std::env::join_paths(dirs).ok()
    }
}

/// Loader backed by `dlopen`.
///
/// Loaded libraries stay mapped for as long as the host lives.
///
/// [`LibraryHost::set_search_directory`] only affects how this host resolves
/// the bare names it is asked to load. The dynamic linker itself never
/// searches that directory, so a plugin's sibling dependency there is only
/// satisfied once it has been loaded (libraries are opened `RTLD_GLOBAL`, and
/// a resident soname is reused). List siblings ahead of the plugins that
/// need them.
pub struct NativeHost {
    resolver: PathResolver<OsEnvironment>,
    libraries: Vec<(String, Library)>,
}

impl NativeHost {
    pub fn new() -> Self {
        Self {
            resolver: PathResolver::new(OsEnvironment::new()),
            libraries: Vec::new(),
        }
    }

    /// What to hand to `dlopen` for a bare name: a resolved path when one of
    /// the search locations has it, otherwise the name itself.
    fn target(&self, name: &str) -> OsString {
        match self.resolver.resolve(name) {
            Some(path) => path.into_os_string(),
            None => OsString::from(name),
        }
    }
}

impl Default for NativeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryHost for NativeHost {
    fn is_loaded(&self, name: &str) -> bool {
        if self.libraries.iter().any(|(loaded, _)| loaded == name) {
            return true;
        }

        // RTLD_NOLOAD only hands back a handle when the object is resident.
        let probe = unsafe { Library::open(Some(self.target(name)), RTLD_LAZY | libc::RTLD_NOLOAD) };
        probe.is_ok()
    }

    fn load(&mut self, name: &str) -> Result<(), LoadError> {
        let target = self.target(name);
        tracing::debug!(name, path = ?target, "dlopen");

        match unsafe { Library::open(Some(&target), RTLD_NOW | RTLD_GLOBAL) } {
            Ok(library) => {
                self.libraries.push((name.to_string(), library));
                Ok(())
            }
            Err(err) => Err(classify(&err.to_string())),
        }
    }

    fn set_search_directory(&mut self, dir: &Path) {
        tracing::debug!(dir = %dir.display(), "library search directory set");
        self.resolver = PathResolver::new(OsEnvironment::with_library_dir(dir));
    }
}

/// Recover an errno-style code from a `dlerror` description.
fn classify(description: &str) -> LoadError {
    let lower = description.to_ascii_lowercase();
    let code = if lower.contains("no such file") {
        Some(libc::ENOENT)
    } else if lower.contains("invalid elf header")
        || lower.contains("wrong elf class")
        || lower.contains("file too short")
        || lower.contains("not a mach-o file")
    {
        Some(libc::ENOEXEC)
    } else if lower.contains("permission denied") {
        Some(libc::EACCES)
    } else {
        None
    };

    match code {
        Some(code) => LoadError::os(code as u32, description),
        None => LoadError::Unexpected(description.to_string()),
    }
}

/// Decodes errno values with the C library's message table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsErrorDecoder;

impl ErrorDecoder for OsErrorDecoder {
    fn decode(&self, code: u32, _args: &[&str]) -> String {
        let Ok(code) = libc::c_int::try_from(code) else {
            return UNKNOWN_MESSAGE.to_string();
        };

        let mut buf = [0 as libc::c_char; 256];
        let rc = unsafe { libc::strerror_r(code, buf.as_mut_ptr(), buf.len()) };
        if rc != 0 {
            return UNKNOWN_MESSAGE.to_string();
        }

        let message = unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .trim()
            .to_string();
        if message.is_empty()
            || message.starts_with("Unknown error")
            || message == "No error information"
        {
            UNKNOWN_MESSAGE.to_string()
        } else {
            message
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing() {
        let err = classify("libfoo.so: cannot open shared object file: No such file or directory");
        assert_eq!(err.code(), Some(libc::ENOENT as u32));
    }

    #[test]
    fn test_classify_bad_image() {
        let err = classify("/tmp/x.so: invalid ELF header");
        assert_eq!(err.code(), Some(libc::ENOEXEC as u32));
    }

    #[test]
    fn test_classify_unknown() {
        let err = classify("/tmp/x.so: undefined symbol: foo");
        assert_eq!(err, LoadError::Unexpected("/tmp/x.so: undefined symbol: foo".into()));
    }

    #[test]
    fn test_decode_known_and_unknown() {
        let decoder = OsErrorDecoder;
        assert_eq!(decoder.decode(libc::ENOENT as u32, &[]), "No such file or directory");
        assert_eq!(decoder.decode(999_999, &[]), UNKNOWN_MESSAGE);
        assert_eq!(decoder.decode(u32::MAX, &[]), UNKNOWN_MESSAGE);
    }

    #[test]
    fn test_load_missing_library() {
        let mut host = NativeHost::new();
        let err = host.load("libeminus_definitely_missing.so").unwrap_err();
        assert_eq!(err.code(), Some(crate::platform::NOT_FOUND));
        assert!(!host.is_loaded("libeminus_definitely_missing.so"));
    }

    #[test]
    fn test_search_directory_resolves_bare_names() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("libeminus_garbage.so"), vec![b'x'; 4096]).unwrap();

        let mut host = NativeHost::new();
        let err = host.load("libeminus_garbage.so").unwrap_err();
        assert_eq!(err.code(), Some(libc::ENOENT as u32));

        host.set_search_directory(dir.path());
        let err = host.load("libeminus_garbage.so").unwrap_err();
        assert_ne!(err.code(), Some(libc::ENOENT as u32));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linker_config_includes_are_followed() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_d = dir.path().join("ld.so.conf.d");
        std::fs::create_dir(&conf_d).unwrap();
        std::fs::write(conf_d.join("a.conf"), "/opt/a/lib\n# comment\n").unwrap();
        std::fs::write(conf_d.join("b.conf"), "/opt/b/lib # trailing\n").unwrap();
        std::fs::write(conf_d.join("skip.txt"), "/opt/skip\n").unwrap();
        let root = dir.path().join("ld.so.conf");
        std::fs::write(&root, "include ld.so.conf.d/*.conf\n/opt/root/lib\n").unwrap();

        let mut dirs = Vec::new();
        read_linker_config(&root, &mut dirs, 0);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/opt/a/lib"),
                PathBuf::from("/opt/b/lib"),
                PathBuf::from("/opt/root/lib"),
            ]
        );
    }

    /// Host with nothing resident, so resolution has to come from disk.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    struct EmptyHost;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    impl LibraryHost for EmptyHost {
        fn is_loaded(&self, _name: &str) -> bool {
            false
        }

        fn load(&mut self, _name: &str) -> Result<(), LoadError> {
            unreachable!("checker never loads")
        }

        fn set_search_directory(&mut self, _dir: &Path) {}
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_checker_finds_dependencies_in_linker_directories() {
        use crate::checker::{DependencyChecker, DependencyReport, ImportTableChecker};
        use crate::imports::fixtures::elf64_with_needed;

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("libplug.so"),
            elf64_with_needed(&["libc.so.6", "libeminus_absent.so.1"]),
        )
        .unwrap();

        let checker = ImportTableChecker::new(OsEnvironment::with_library_dir(dir.path()));
        let report = checker.check("libplug.so", &EmptyHost);
        assert_eq!(
            report,
            DependencyReport::MissingImports {
                module: "libplug.so".into(),
                missing: vec!["libeminus_absent.so.1".into()],
            }
        );
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_libc_is_loaded() {
        let host = NativeHost::new();
        assert!(host.is_loaded("libc.so.6"));
    }
}
