//! Raw layouts and callback trampolines for ngspice's shared-library API
//!
//! Mirrors `sharedspice.h`. `NG_BOOL` is C `bool`, which matches Rust `bool`.

use simserver_core::{CallbackAdapter, ExitNotice, SampleValue};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

// ============================================================================
// C Layouts
// ============================================================================

/// One value of one vector in a `SendData` callback
#[repr(C)]
#[allow(dead_code)]
pub struct VecValues {
    pub name: *mut c_char,
    pub creal: f64,
    pub cimag: f64,
    pub is_scale: bool,
    pub is_complex: bool,
}

/// All values of one simulation step
#[repr(C)]
pub struct VecValuesAll {
    pub veccount: c_int,
    pub vecindex: c_int,
    pub vecsa: *mut *mut VecValues,
}

/// Metadata of one vector in a `SendInitData` callback
#[repr(C)]
#[allow(dead_code)]
pub struct VecInfo {
    pub number: c_int,
    pub vecname: *mut c_char,
    pub is_real: bool,
    pub pdvec: *mut c_void,
    pub pdvecscale: *mut c_void,
}

/// Metadata of a newly created plot
#[repr(C)]
#[allow(dead_code)]
pub struct VecInfoAll {
    pub name: *mut c_char,
    pub title: *mut c_char,
    pub date: *mut c_char,
    pub type_: *mut c_char,
    pub veccount: c_int,
    pub vecs: *mut *mut VecInfo,
}

pub type SendCharFn = unsafe extern "C" fn(*mut c_char, c_int, *mut c_void) -> c_int;
pub type SendStatFn = unsafe extern "C" fn(*mut c_char, c_int, *mut c_void) -> c_int;
pub type ControlledExitFn = unsafe extern "C" fn(c_int, bool, bool, c_int, *mut c_void) -> c_int;
pub type SendDataFn = unsafe extern "C" fn(*mut VecValuesAll, c_int, c_int, *mut c_void) -> c_int;
pub type SendInitDataFn = unsafe extern "C" fn(*mut VecInfoAll, c_int, *mut c_void) -> c_int;
pub type BgThreadRunningFn = unsafe extern "C" fn(bool, c_int, *mut c_void) -> c_int;

pub type NgSpiceInit = unsafe extern "C" fn(
    Option<SendCharFn>,
    Option<SendStatFn>,
    Option<ControlledExitFn>,
    Option<SendDataFn>,
    Option<SendInitDataFn>,
    Option<BgThreadRunningFn>,
    *mut c_void,
) -> c_int;
pub type NgSpiceCommand = unsafe extern "C" fn(*mut c_char) -> c_int;
pub type NgSpiceRunning = unsafe extern "C" fn() -> bool;

// ============================================================================
// Trampolines
// ============================================================================

/// Run `f` against the adapter behind `user`, never unwinding into C.
///
/// # Safety
/// `user` must be null or point to a live `CallbackAdapter`.
unsafe fn dispatch(user: *mut c_void, f: impl FnOnce(&CallbackAdapter)) -> c_int {
    if user.is_null() {
        return 0;
    }
    let adapter = &*(user as *const CallbackAdapter);
    match catch_unwind(AssertUnwindSafe(|| f(adapter))) {
        Ok(()) => 0,
        Err(_) => {
            tracing::error!("Panic in engine callback");
            1
        }
    }
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string valid for this call.
unsafe fn text<'a>(ptr: *const c_char) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        return std::borrow::Cow::Borrowed("");
    }
    CStr::from_ptr(ptr).to_string_lossy()
}

pub unsafe extern "C" fn send_char(what: *mut c_char, _id: c_int, user: *mut c_void) -> c_int {
    dispatch(user, |a| a.log_line(&text(what)))
}

pub unsafe extern "C" fn send_stat(what: *mut c_char, _id: c_int, user: *mut c_void) -> c_int {
    dispatch(user, |a| a.status_line(&text(what)))
}

pub unsafe extern "C" fn controlled_exit(
    status: c_int,
    immediate: bool,
    exit_upon_quit: bool,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    dispatch(user, |a| {
        a.exited(ExitNotice {
            status,
            immediate,
            exit_upon_quit,
        })
    })
}

pub unsafe extern "C" fn send_init_data(
    via: *mut VecInfoAll,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    if via.is_null() {
        return 0;
    }
    dispatch(user, |a| {
        let via = &*via;
        let names: Vec<String> = pointers(via.vecs, via.veccount)
            .map(|info| {
                if info.is_null() {
                    String::new()
                } else {
                    text((*info).vecname).into_owned()
                }
            })
            .collect();
        a.vectors_announced(&text(via.name), names);
    })
}

pub unsafe extern "C" fn send_data(
    vva: *mut VecValuesAll,
    _count: c_int,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    if vva.is_null() {
        return 0;
    }
    dispatch(user, |a| {
        let vva = &*vva;
        let values: Vec<SampleValue> = pointers(vva.vecsa, vva.veccount)
            .map(|v| {
                // Keep positions aligned with the announced vectors
                if v.is_null() {
                    return SampleValue::real(f64::NAN);
                }
                let v = &*v;
                SampleValue {
                    real: v.creal,
                    imag: v.cimag,
                    is_scale: v.is_scale,
                    is_complex: v.is_complex,
                }
            })
            .collect();
        a.samples(&values);
    })
}

pub unsafe extern "C" fn bg_thread_running(halted: bool, _id: c_int, user: *mut c_void) -> c_int {
    dispatch(user, |a| a.run_state_changed(halted))
}

/// Iterate the entries of a C array of `count` pointers
///
/// # Safety
/// `array` must be null or point to `count` readable pointers.
unsafe fn pointers<T>(array: *mut *mut T, count: c_int) -> impl Iterator<Item = *mut T> {
    let len = if array.is_null() { 0 } else { count.max(0) as usize };
    (0..len).map(move |i| *array.add(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_replaces_invalid_utf8() {
        let raw = b"stdout v(out) = 1.0 \xb5V\0";
        let line = unsafe { text(raw.as_ptr() as *const c_char) };
        assert_eq!(line, "stdout v(out) = 1.0 \u{fffd}V");
    }

    #[test]
    fn test_text_null_is_empty() {
        let line = unsafe { text(std::ptr::null()) };
        assert_eq!(line, "");
    }

    #[test]
    fn test_null_user_data_is_ignored() {
        let mut line = *b"stdout hello\0";
        let code = unsafe {
            send_char(
                line.as_mut_ptr() as *mut c_char,
                0,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(code, 0);
    }
}
