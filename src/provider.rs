//! Artifact loading capability.
//!
//! `Code` does not hard-wire dynamic linking: it goes through a
//! [`CodeProvider`], so compiled-in modules (tests) or alternative
//! packaging can substitute for shared objects without touching the
//! bridge core. [`DlProvider`] is the production implementation.

use std::ffi::{CStr, CString, c_void};
use std::path::Path;
use std::ptr::NonNull;

/// Opaque handle to a loaded artifact, owned by the provider that
/// produced it.
pub type ArtifactHandle = *mut c_void;

/// Pluggable loading strategy for compiled module artifacts.
pub trait CodeProvider: Send + Sync {
    /// Open the artifact at `path`. The error string is the provider's
    /// underlying diagnostic (e.g. the dlopen error).
    fn load(&self, path: &Path) -> Result<ArtifactHandle, String>;

    /// Resolve a symbol in a loaded artifact.
    fn resolve(&self, artifact: ArtifactHandle, symbol: &str) -> Option<NonNull<c_void>>;

    /// Release a loaded artifact and everything resolved from it.
    fn unload(&self, artifact: ArtifactHandle);
}

/// Loads artifacts as shared objects via dlopen/dlsym/dlclose.
pub struct DlProvider;

impl CodeProvider for DlProvider {
    fn load(&self, path: &Path) -> Result<ArtifactHandle, String> {
        use std::os::unix::ffi::OsStrExt;
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| "artifact path contains a NUL byte".to_string())?;
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            Err(dl_error())
        } else {
            Ok(handle)
        }
    }

    fn resolve(&self, artifact: ArtifactHandle, symbol: &str) -> Option<NonNull<c_void>> {
        let csym = CString::new(symbol).ok()?;
        NonNull::new(unsafe { libc::dlsym(artifact, csym.as_ptr()) })
    }

    fn unload(&self, artifact: ArtifactHandle) {
        unsafe {
            libc::dlclose(artifact);
        }
    }
}

fn dl_error() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dynamic linker failure".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}
