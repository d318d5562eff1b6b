//! Thin helpers over the `libsqlite3-sys` bindings.
//!
//! The raw API is re-exported as-is; the functions here wrap the handful of
//! calls that return C strings.

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::*;

/// The SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static, NUL-terminated string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// The SQLite library version as a number (`3XXYYZZ`).
pub fn version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string for every code
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Most recent error message on `db`.
///
/// # Safety
/// `db` must be a valid connection handle.
pub unsafe fn error_message(db: *mut sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg never returns null for a valid handle
    unsafe {
        let ptr = sqlite3_errmsg(db);
        if ptr.is_null() {
            return String::new();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
