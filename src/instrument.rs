//! `-finstrument-functions` entry points
//!
//! Link the static library into a host compiled with
//! `-finstrument-functions`: the compiler calls the two `__cyg_profile_*`
//! symbols around every function, and the ELF constructor/destructor entries
//! start and end the process-wide session around `main`.

use crate::global;
use crate::node::FuncId;
use std::ffi::c_void;

#[no_mangle]
pub extern "C" fn __cyg_profile_func_enter(func: *mut c_void, caller: *mut c_void) {
    global::on_enter(FuncId::from_ptr(func), FuncId::from_ptr(caller));
}

#[no_mangle]
pub extern "C" fn __cyg_profile_func_exit(func: *mut c_void, caller: *mut c_void) {
    global::on_exit(FuncId::from_ptr(func), FuncId::from_ptr(caller));
}

extern "C" fn trace_begin() {
    global::session_start();
}

extern "C" fn trace_end() {
    global::session_end();
}

#[used]
#[cfg_attr(any(target_os = "linux", target_os = "android", target_os = "freebsd"), link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static TRACE_BEGIN: extern "C" fn() = trace_begin;

#[used]
#[cfg_attr(any(target_os = "linux", target_os = "android", target_os = "freebsd"), link_section = ".fini_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_term_func")]
static TRACE_END: extern "C" fn() = trace_end;
