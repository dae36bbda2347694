use std::ffi::c_void;
use std::mem;
use std::path::Path;
use std::ptr::NonNull;

use log::debug;

use crate::error::{Error, Result};
use crate::ops::{self, RuntimeOps};
use crate::provider::{ArtifactHandle, CodeProvider, DlProvider};
use crate::resolver::Resolver;
use crate::trap;
use crate::types::TypeRegistry;

/// Operation-table revision this crate implements. Artifacts may export
/// [`ABI_VERSION_SYMBOL`] to have the loader reject a mismatched build;
/// artifacts without the symbol are accepted.
pub const ABI_VERSION: u32 = 1;

/// Optional `u32` data symbol carrying the translator's ABI revision.
pub const ABI_VERSION_SYMBOL: &str = "wexec_abi_version";

const SYM_INIT_RT_OPS: &str = "init_rt_ops";
const SYM_INIT_FUNC_TYPES: &str = "init_func_types";
const SYM_INIT_IMPORT_FUNCS: &str = "init_import_funcs";
const SYM_NEW_HANDLE: &str = "new_handle";

type InstallOpsFn = unsafe extern "C" fn(*mut RuntimeOps);
type InitEntryFn = unsafe extern "C" fn(*mut c_void);
type ConstructorFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;

/// One loaded module artifact: the immutable "code side" shared by every
/// execution context instantiated from it.
///
/// Created by [`Code::load`], initialized exactly once with
/// [`Code::initialize`], then typically wrapped in an `Arc` and shared.
/// Dropping the `Code` frees the registered function types and unloads
/// the artifact; contexts keep the `Code` alive through their `Arc`, so
/// unloading under a live context is unrepresentable.
pub struct Code {
    provider: Box<dyn CodeProvider>,
    resolver: Box<dyn Resolver>,
    artifact: ArtifactHandle,
    registry: TypeRegistry,
    init_func_types: InitEntryFn,
    init_import_funcs: InitEntryFn,
    new_handle: ConstructorFn,
    initialized: bool,
}

// The artifact handle is only written at load/unload time; dlsym-style
// resolution through it is thread-safe, and the registry is immutable
// once `initialize` returns.
unsafe impl Send for Code {}
unsafe impl Sync for Code {}

impl std::fmt::Debug for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Code")
            .field("artifact", &self.artifact)
            .field("registry", &self.registry)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl Code {
    /// Load an artifact as a shared object via the default
    /// [`DlProvider`].
    pub fn load(path: impl AsRef<Path>, resolver: Box<dyn Resolver>) -> Result<Code> {
        Self::load_with(Box::new(DlProvider), path, resolver)
    }

    /// Load an artifact through an explicit provider.
    ///
    /// Resolves the four well-known entry points and installs the
    /// operation table. On any failure the artifact is unloaded before
    /// returning; no partially loaded `Code` escapes.
    pub fn load_with(
        provider: Box<dyn CodeProvider>,
        path: impl AsRef<Path>,
        resolver: Box<dyn Resolver>,
    ) -> Result<Code> {
        let path = path.as_ref();
        let artifact = provider.load(path).map_err(|reason| Error::Load {
            path: path.display().to_string(),
            reason,
        })?;

        let entries = match resolve_entries(provider.as_ref(), artifact) {
            Ok(entries) => entries,
            Err(err) => {
                provider.unload(artifact);
                return Err(err);
            }
        };
        let (install_ops, init_func_types, init_import_funcs, new_handle) = entries;

        // The artifact copies the table into its own storage, so the
        // local value does not need to outlive this call.
        let mut ops = ops::build();
        unsafe { install_ops(&mut ops) };
        debug!("loaded artifact `{}`", path.display());

        Ok(Code {
            provider,
            resolver,
            artifact,
            registry: TypeRegistry::default(),
            init_func_types,
            init_import_funcs,
            new_handle,
            initialized: false,
        })
    }

    /// Run the artifact's type initializer, then its import-binding
    /// initializer. Types must exist before imports are checked against
    /// them. Must be called exactly once before any context is created.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        let ctx = (self as *mut Code).cast::<c_void>();
        let init_func_types = self.init_func_types;
        let init_import_funcs = self.init_import_funcs;
        trap::catch_traps(|| unsafe { init_func_types(ctx) }).map_err(Error::Trap)?;
        trap::catch_traps(|| unsafe { init_import_funcs(ctx) }).map_err(Error::Trap)?;
        self.initialized = true;
        debug!("initialized code: {} function types", self.registry.len());
        Ok(())
    }

    /// Registered function signatures, for embedder-side type checking.
    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub(crate) fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn constructor(&self) -> ConstructorFn {
        self.new_handle
    }

    pub(crate) fn resolve_export(&self, name: &str) -> Option<NonNull<c_void>> {
        self.provider.resolve(self.artifact, name)
    }
}

impl Drop for Code {
    fn drop(&mut self) {
        self.provider.unload(self.artifact);
    }
}

fn resolve_entries(
    provider: &dyn CodeProvider,
    artifact: ArtifactHandle,
) -> Result<(InstallOpsFn, InitEntryFn, InitEntryFn, ConstructorFn)> {
    if let Some(sym) = provider.resolve(artifact, ABI_VERSION_SYMBOL) {
        let found = unsafe { sym.cast::<u32>().as_ptr().read() };
        if found != ABI_VERSION {
            return Err(Error::AbiMismatch {
                expected: ABI_VERSION,
                found,
            });
        }
    }

    let required = |symbol: &'static str| -> Result<NonNull<c_void>> {
        provider
            .resolve(artifact, symbol)
            .ok_or(Error::MissingEntryPoint { symbol })
    };

    unsafe {
        Ok((
            mem::transmute::<*mut c_void, InstallOpsFn>(required(SYM_INIT_RT_OPS)?.as_ptr()),
            mem::transmute::<*mut c_void, InitEntryFn>(required(SYM_INIT_FUNC_TYPES)?.as_ptr()),
            mem::transmute::<*mut c_void, InitEntryFn>(required(SYM_INIT_IMPORT_FUNCS)?.as_ptr()),
            mem::transmute::<*mut c_void, ConstructorFn>(required(SYM_NEW_HANDLE)?.as_ptr()),
        ))
    }
}
