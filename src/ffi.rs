//! FFI bindings for MediGuard Drift
//!
//! C-compatible entry points for host applications. All inputs and outputs are
//! null-terminated JSON strings; returned strings are allocated here and must
//! be freed with `mediguard_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::{PipelineConfig, DEFAULT_BASELINE_MIN_SAMPLES};
use crate::encoder::ResultEncoder;
use crate::explain::{explain_with_fallback, RuleBasedExplainer};
use crate::pipeline::{analyze, DriftPipeline};
use crate::schema::Snapshot;
use crate::types::AnalysisResult;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller frees with `mediguard_free_string`
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Report `result` across the boundary: the string on success, NULL plus a
/// last-error message otherwise.
fn finish<E: std::fmt::Display>(result: Result<String, E>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn analyze_json(snapshot_json: &str, config_json: Option<&str>) -> Result<String, String> {
    let config = match config_json {
        Some(json) => PipelineConfig::from_json(json).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    let snapshot = Snapshot::from_json(snapshot_json).map_err(|e| e.to_string())?;
    let result = analyze(&snapshot, &config).map_err(|e| e.to_string())?;
    ResultEncoder::encode_to_json(&result).map_err(|e| e.to_string())
}

/// Accepts either an encoded envelope or a bare result
fn explain_json(result_json: &str) -> Result<String, String> {
    let result = match ResultEncoder::decode(result_json) {
        Ok(envelope) => envelope.result,
        Err(_) => serde_json::from_str::<AnalysisResult>(result_json).map_err(|e| e.to_string())?,
    };
    let explanation = explain_with_fallback(&RuleBasedExplainer, &result);
    serde_json::to_string(&explanation).map_err(|e| e.to_string())
}

// ============================================================================
// Stateless API
// ============================================================================

/// Analyze one snapshot and return the encoded result envelope.
///
/// # Safety
/// - `snapshot_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL to use the default configuration.
/// - Returns a newly allocated string that must be freed with `mediguard_free_string`.
/// - Returns NULL on error; call `mediguard_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mediguard_analyze_json(
    snapshot_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let snapshot_str = match cstr_to_string(snapshot_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid snapshot string pointer");
            return ptr::null_mut();
        }
    };
    let config_str = cstr_to_string(config_json);

    finish(analyze_json(&snapshot_str, config_str.as_deref()))
}

/// Render a result as user-facing text with the rule-based explainer.
///
/// # Safety
/// - `result_json` must be a valid null-terminated C string holding either an
///   envelope from `mediguard_analyze_json` or a bare result.
/// - Returns a newly allocated string that must be freed with `mediguard_free_string`.
/// - Returns NULL on error; call `mediguard_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mediguard_explain_json(result_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let result_str = match cstr_to_string(result_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid result string pointer");
            return ptr::null_mut();
        }
    };

    finish(explain_json(&result_str))
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a [`DriftPipeline`]
pub struct MediguardProcessorHandle {
    pipeline: DriftPipeline,
}

/// Create a processor that keeps baselines between calls.
///
/// A non-positive `baseline_min_samples` selects the default.
///
/// # Safety
/// - Returns a pointer that must be freed with `mediguard_processor_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn mediguard_processor_new(
    baseline_min_samples: i32,
) -> *mut MediguardProcessorHandle {
    clear_last_error();

    let samples = if baseline_min_samples <= 0 {
        DEFAULT_BASELINE_MIN_SAMPLES
    } else {
        baseline_min_samples as usize
    };

    match DriftPipeline::with_baseline_min_samples(samples) {
        Ok(pipeline) => Box::into_raw(Box::new(MediguardProcessorHandle { pipeline })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a pointer returned by `mediguard_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediguard_processor_free(processor: *mut MediguardProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Analyze a snapshot with a stateful processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `mediguard_processor_new`.
/// - `snapshot_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mediguard_free_string`.
/// - Returns NULL on error; call `mediguard_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mediguard_processor_process(
    processor: *mut MediguardProcessorHandle,
    snapshot_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let snapshot_str = match cstr_to_string(snapshot_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid snapshot string pointer");
            return ptr::null_mut();
        }
    };

    let encoded = Snapshot::from_json(&snapshot_str)
        .and_then(|snapshot| handle.pipeline.process(&snapshot))
        .map_err(|e| e.to_string())
        .and_then(|result| ResultEncoder::encode_to_json(&result).map_err(|e| e.to_string()));
    finish(encoded)
}

/// Save processor baselines to JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `mediguard_processor_new`.
/// - Returns a newly allocated string that must be freed with `mediguard_free_string`.
/// - Returns NULL on error; call `mediguard_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mediguard_processor_save_baselines(
    processor: *mut MediguardProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;

    finish(handle.pipeline.save_baselines())
}

/// Load processor baselines from JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `mediguard_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error; call `mediguard_last_error` for details.
#[no_mangle]
pub unsafe extern "C" fn mediguard_processor_load_baselines(
    processor: *mut MediguardProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match handle.pipeline.load_baselines(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a pointer returned by a `mediguard_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediguard_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next `mediguard_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn mediguard_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn mediguard_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
