use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::Arc;

use log::{debug, trace};

use crate::code::Code;
use crate::error::{Error, Result};
use crate::memory::{self, LinearMemory, Table};
use crate::trap::{self, TrapCode};

/// Calling convention of every exported function symbol:
/// `(instance_handle, params, param_count) -> result`.
type ExportFn = unsafe extern "C" fn(*mut c_void, *const i64, i64) -> i64;

/// Gas accounting state embedded in the instance handle. The counter is
/// maintained cooperatively by generated code; the bridge only stores
/// and exposes it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GasState {
    pub limit: u64,
    pub used: u64,
}

/// Fixed leading layout of the opaque instance handle produced by the
/// artifact's constructor.
///
/// Binary-layout contract with translator output (field order matters);
/// the `gas_used`/`static_top` accessors read through it. Artifacts can
/// declare the revision they were built against via
/// [`crate::ABI_VERSION_SYMBOL`].
#[repr(C)]
#[derive(Debug)]
pub struct InstancePrefix {
    pub user_ctx: *mut c_void,
    pub gas: GasState,
    pub call_stack_depth: u32,
    pub static_top: u32,
}

/// One instantiation of a [`Code`]: owns the linear memory and
/// indirect-call table buffers plus the instance handle, and exposes
/// `call` for invoking exported functions.
///
/// Boxed because the artifact retains the context's address for the
/// lifetime of the instance. Single-threaded and single-use: one context
/// services one execution request end to end. Dropping the context frees
/// the memory buffer, the table buffer, and the instance handle, in that
/// order.
pub struct ExecutionContext {
    code: Arc<Code>,
    mem: *mut LinearMemory,
    table: *mut Table,
    handle: *mut InstancePrefix,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("code", &self.code)
            .field("mem", &self.mem)
            .field("table", &self.table)
            .field("handle", &self.handle)
            .finish()
    }
}

impl ExecutionContext {
    /// Instantiate `code`, running the artifact's constructor with this
    /// context as its user data. The constructor performs its own memory
    /// and table allocation through the operation table; a resource trap
    /// during construction surfaces as `Error::Trap`.
    pub fn new(code: Arc<Code>, gas_limit: u64) -> Result<Box<ExecutionContext>> {
        if !code.is_initialized() {
            return Err(Error::Uninitialized);
        }
        let constructor = code.constructor();
        let mut ctx = Box::new(ExecutionContext {
            code,
            mem: ptr::null_mut(),
            table: ptr::null_mut(),
            handle: ptr::null_mut(),
        });
        let user_ctx = ptr::from_mut(&mut *ctx).cast::<c_void>();
        let handle =
            trap::catch_traps(|| unsafe { constructor(user_ctx) }).map_err(Error::Trap)?;
        if handle.is_null() {
            return Err(Error::Trap(TrapCode::NoMemory));
        }
        ctx.handle = handle.cast();
        unsafe {
            (*ctx.handle).gas = GasState {
                limit: gas_limit,
                used: 0,
            };
        }
        trace!("instantiated context with gas limit {gas_limit}");
        Ok(ctx)
    }

    /// Invoke the exported function `name`.
    ///
    /// No arity or type validation is performed against the export's
    /// declared signature: the artifact comes from the trusted
    /// translator, and a mismatched `params` slice is a caller contract
    /// violation. A trap raised during execution surfaces as
    /// `Error::Trap`; a missing export fails without side effects.
    pub fn call(&mut self, name: &str, params: &[i64]) -> Result<i64> {
        let Some(sym) = self.code.resolve_export(name) else {
            return Err(Error::ExportNotFound(name.to_string()));
        };
        let func = unsafe { mem::transmute::<*mut c_void, ExportFn>(sym.as_ptr()) };
        let handle = self.handle.cast::<c_void>();
        let (params_ptr, param_count) = (params.as_ptr(), params.len() as i64);
        trace!("call `{name}` with {param_count} params");
        trap::catch_traps(|| unsafe { func(handle, params_ptr, param_count) })
            .map_err(Error::Trap)
    }

    pub fn gas_limit(&self) -> u64 {
        unsafe { (*self.handle).gas.limit }
    }

    pub fn gas_used(&self) -> u64 {
        unsafe { (*self.handle).gas.used }
    }

    /// Overwrite the used-gas counter, for embedder checkpoint/rollback
    /// between calls.
    pub fn set_gas_used(&mut self, used: u64) {
        unsafe { (*self.handle).gas.used = used }
    }

    pub fn reset_gas_used(&mut self) {
        self.set_gas_used(0);
    }

    /// The module's static-data boundary within linear memory; module
    /// heap space begins above it.
    pub fn static_top(&self) -> u32 {
        unsafe { (*self.handle).static_top }
    }

    /// The bound linear memory, if the constructor allocated one.
    pub fn memory(&self) -> Option<&[u8]> {
        unsafe { self.mem.as_ref().map(|m| m.as_slice()) }
    }

    pub fn memory_mut(&mut self) -> Option<&mut [u8]> {
        unsafe { self.mem.as_mut().map(|m| m.as_mut_slice()) }
    }

    pub(crate) fn code(&self) -> &Code {
        &self.code
    }

    pub(crate) fn code_cloned(&self) -> Arc<Code> {
        self.code.clone()
    }

    /// Bind the memory descriptor allocated through the operation table.
    /// At most one memory per context; the constructor is expected to
    /// allocate once, so a rebind only replaces the association.
    pub(crate) fn bind_memory(&mut self, mem: *mut LinearMemory) {
        if !self.mem.is_null() {
            debug!("rebinding linear memory without releasing the previous buffer");
        }
        self.mem = mem;
    }

    pub(crate) fn bind_table(&mut self, table: *mut Table) {
        if !self.table.is_null() {
            debug!("rebinding indirect-call table without releasing the previous buffer");
        }
        self.table = table;
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // The descriptors live inside the instance handle allocation, so
        // the buffers must go first.
        unsafe {
            if let Some(mem) = self.mem.as_mut() {
                memory::free(mem.data.cast());
                mem.data = ptr::null_mut();
            }
            if let Some(table) = self.table.as_mut() {
                memory::free(table.data.cast());
                table.data = ptr::null_mut();
            }
            if !self.handle.is_null() {
                memory::free(self.handle.cast());
            }
        }
    }
}
