//! The operation table: the fixed ABI of callback entry points a loaded
//! artifact uses to request host services.
//!
//! The table is built once per `Code::load` and handed to the artifact's
//! `init_rt_ops` entry point, which copies it into artifact-side storage.
//! The opaque `ctx` pointer each callback receives is whatever pointer
//! the bridge passed to the artifact entry point that triggered it: the
//! `Code` during `init_func_types`/`init_import_funcs`, the
//! `ExecutionContext` during `new_handle` and exported-function calls.

use std::ffi::{CStr, c_char, c_void};
use std::ptr;
use std::slice;

use log::{debug, trace};

use crate::code::Code;
use crate::context::ExecutionContext;
use crate::memory::{self, DEFAULT_TABLE_ELEMENTS, LinearMemory, PAGE_SIZE, Table, TableElem};
use crate::resolver::FuncHandle;
use crate::trap::{self, TrapCode};
use crate::types::ValKind;

/// Callback entry points installed into the artifact at load time.
///
/// Binary-layout contract with translator output; field order and
/// signatures must not change without bumping `ABI_VERSION`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RuntimeOps {
    pub register_func_type:
        unsafe extern "C" fn(ctx: *mut c_void, param_count: u32, result_count: u32, kinds: *const u32) -> u32,
    pub allocate_memory:
        unsafe extern "C" fn(ctx: *mut c_void, memory: *mut LinearMemory, initial_pages: u32, max_pages: u32),
    pub grow_memory:
        unsafe extern "C" fn(ctx: *mut c_void, memory: *mut LinearMemory, delta: u32) -> u32,
    pub allocate_table:
        unsafe extern "C" fn(ctx: *mut c_void, table: *mut Table, elements: u32, max_elements: u32),
    pub scratch_alloc: unsafe extern "C" fn(ctx: *mut c_void, size: u32) -> *mut c_void,
    pub resolve_func:
        unsafe extern "C" fn(ctx: *mut c_void, module: *const c_char, name: *const c_char) -> *mut c_void,
    pub call_func:
        unsafe extern "C" fn(ctx: *mut c_void, func: *mut c_void, params: *const i64, param_count: u32) -> i64,
    pub resolve_global:
        unsafe extern "C" fn(ctx: *mut c_void, module: *const c_char, name: *const c_char) -> i64,
    pub trap: unsafe extern "C" fn(code: u32) -> !,
}

pub(crate) fn build() -> RuntimeOps {
    RuntimeOps {
        register_func_type,
        allocate_memory,
        grow_memory,
        allocate_table,
        scratch_alloc,
        resolve_func,
        call_func,
        resolve_global,
        trap,
    }
}

/// `ctx` is the `Code` being initialized. Called only from inside
/// `init_func_types`, never concurrently.
unsafe extern "C" fn register_func_type(
    ctx: *mut c_void,
    param_count: u32,
    result_count: u32,
    kinds: *const u32,
) -> u32 {
    let code = unsafe { &mut *ctx.cast::<Code>() };
    let total = param_count as usize + result_count as usize;
    let raw: &[u32] = if total == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(kinds, total) }
    };
    let mut all = Vec::with_capacity(total);
    for &k in raw {
        match ValKind::from_raw(k) {
            Some(kind) => all.push(kind),
            None => trap::raise(TrapCode::InvalidConversion),
        }
    }
    let (params, results) = all.split_at(param_count as usize);
    code.registry_mut().register(params, results).get()
}

/// `ctx` is the `ExecutionContext` under construction. A zero-page
/// request is rounded up to one page.
unsafe extern "C" fn allocate_memory(
    ctx: *mut c_void,
    memory: *mut LinearMemory,
    initial_pages: u32,
    max_pages: u32,
) {
    let context = unsafe { &mut *ctx.cast::<ExecutionContext>() };
    let pages = if initial_pages == 0 { 1 } else { initial_pages };
    let size = u64::from(pages) * u64::from(PAGE_SIZE);
    if size > u64::from(u32::MAX) {
        trap::raise(TrapCode::NoMemory);
    }
    let data = memory::alloc_zeroed(size as usize);
    if data.is_null() {
        trap::raise(TrapCode::NoMemory);
    }
    unsafe {
        (*memory).data = data;
        (*memory).pages = pages;
        (*memory).max_pages = max_pages;
        (*memory).size = size as u32;
    }
    trace!("allocated {pages} pages of linear memory");
    context.bind_memory(memory);
}

/// Growth is disabled: any attempt is an out-of-bounds violation,
/// regardless of remaining headroom.
unsafe extern "C" fn grow_memory(_ctx: *mut c_void, _memory: *mut LinearMemory, _delta: u32) -> u32 {
    trap::raise(TrapCode::OutOfBounds)
}

/// `ctx` is the `ExecutionContext` under construction. A zero-element
/// request is rounded up to `DEFAULT_TABLE_ELEMENTS`.
unsafe extern "C" fn allocate_table(
    ctx: *mut c_void,
    table: *mut Table,
    elements: u32,
    max_elements: u32,
) {
    let context = unsafe { &mut *ctx.cast::<ExecutionContext>() };
    let elements = if elements == 0 {
        DEFAULT_TABLE_ELEMENTS
    } else {
        elements
    };
    let size = elements as usize * size_of::<TableElem>();
    let data = memory::alloc_zeroed(size);
    if data.is_null() {
        trap::raise(TrapCode::NoMemory);
    }
    unsafe {
        (*table).data = data.cast();
        (*table).max_size = max_elements;
        (*table).size = elements;
    }
    trace!("allocated indirect-call table with {elements} elements");
    context.bind_table(table);
}

/// General-purpose scratch allocation for the artifact (instance handle,
/// translator-emitted auxiliary blocks). Zero-filled.
unsafe extern "C" fn scratch_alloc(_ctx: *mut c_void, size: u32) -> *mut c_void {
    let ptr = memory::alloc_zeroed(size as usize);
    if ptr.is_null() {
        trap::raise(TrapCode::NoMemory);
    }
    ptr.cast()
}

/// `ctx` is the `Code`; import functions are resolved once, during
/// `init_import_funcs`.
unsafe extern "C" fn resolve_func(
    ctx: *mut c_void,
    module: *const c_char,
    name: *const c_char,
) -> *mut c_void {
    let code = unsafe { &*ctx.cast::<Code>() };
    let module = unsafe { CStr::from_ptr(module) }.to_string_lossy();
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
    match code.resolver().resolve_func(&module, &name) {
        Some(handle) => handle.as_ptr(),
        None => {
            debug!("unresolved import function {module}.{name}");
            ptr::null_mut()
        }
    }
}

/// `ctx` is the calling `ExecutionContext`.
unsafe extern "C" fn call_func(
    ctx: *mut c_void,
    func: *mut c_void,
    params: *const i64,
    param_count: u32,
) -> i64 {
    let context = unsafe { &mut *ctx.cast::<ExecutionContext>() };
    let params: &[i64] = if param_count == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(params, param_count as usize) }
    };
    let code = context.code_cloned();
    code.resolver().call_func(FuncHandle::new(func), context, params)
}

/// `ctx` is the `ExecutionContext`; imported globals are resolved per
/// instantiation.
unsafe extern "C" fn resolve_global(
    ctx: *mut c_void,
    module: *const c_char,
    name: *const c_char,
) -> i64 {
    let context = unsafe { &*ctx.cast::<ExecutionContext>() };
    let module = unsafe { CStr::from_ptr(module) }.to_string_lossy();
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
    context.code().resolver().resolve_global(&module, &name)
}

unsafe extern "C" fn trap(code: u32) -> ! {
    trap::raise(TrapCode::from_raw(code))
}
