use std::ffi::c_void;

use crate::context::ExecutionContext;

/// Opaque token identifying a resolved host or cross-module function.
///
/// The bridge never interprets the value; it only carries it between
/// `resolve_func` and `call_func`. A missing symbol crosses the ABI as a
/// null handle for generated code to handle.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncHandle(*mut c_void);

impl FuncHandle {
    pub fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// Build a handle from a resolver-chosen integer token.
    pub fn from_token(token: usize) -> Self {
        Self(token as *mut c_void)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn token(self) -> usize {
        self.0 as usize
    }
}

/// Embedder-supplied capability mapping imported names to host functions
/// and globals, and performing host calls on behalf of module code.
///
/// `call_func` receives the live [`ExecutionContext`] so the callee can
/// observe or charge gas and read the module's linear memory.
pub trait Resolver: Send + Sync {
    /// Map a (module, name) pair to a function handle. `None` crosses
    /// the ABI as a null handle; rejecting it is the generated code's
    /// responsibility, not this layer's.
    fn resolve_func(&self, module: &str, name: &str) -> Option<FuncHandle>;

    /// Value of an imported 64-bit global.
    fn resolve_global(&self, module: &str, name: &str) -> i64;

    /// Invoke a previously resolved handle with a fixed-width parameter
    /// array, returning a single 64-bit result.
    fn call_func(&self, handle: FuncHandle, ctx: &mut ExecutionContext, params: &[i64]) -> i64;
}
