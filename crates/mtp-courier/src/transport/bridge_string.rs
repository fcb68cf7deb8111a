//! Ownership of strings allocated by the native bridge.
//!
//! The bridge hands out heap-allocated C strings that must be released through its own
//! free function. [`BridgeString`] copies the bytes into Rust and frees the original
//! exactly once, on drop.

use std::ffi::{CStr, c_char};

/// Releases a string previously returned by the bridge.
pub type FreeFn = unsafe extern "C" fn(*mut c_char);

pub struct BridgeString {
    ptr: *mut c_char,
    free: FreeFn,
}

impl BridgeString {
    /// Takes ownership of `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a NUL-terminated string allocated by the bridge, not yet freed,
    /// and `free` must be the bridge function that releases it.
    pub unsafe fn from_raw(ptr: *mut c_char, free: FreeFn) -> Option<Self> {
        if ptr.is_null() { None } else { Some(Self { ptr, free }) }
    }

    /// Copies the contents out, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        // SAFETY: non-null and NUL-terminated per `from_raw`'s contract; still owned by us.
        unsafe { CStr::from_ptr(self.ptr) }.to_string_lossy().into_owned()
    }
}

impl Drop for BridgeString {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from the bridge and is freed only here.
        unsafe { (self.free)(self.ptr) }
    }
}

/// Copies and frees a bridge string in one step.
///
/// # Safety
///
/// Same contract as [`BridgeString::from_raw`].
pub unsafe fn take_bridge_string(ptr: *mut c_char, free: FreeFn) -> Option<String> {
    // SAFETY: forwarded to the caller.
    unsafe { BridgeString::from_raw(ptr, free) }.map(|s| s.to_string_lossy())
}
