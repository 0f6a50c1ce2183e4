//! FFI bindings for Synheart Gaze
//!
//! This module provides C-compatible functions for driving a gaze session
//! from a host UI written in another language. All strings are
//! null-terminated UTF-8. Returned strings are allocated and must be freed
//! by the caller using `gaze_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::config::GazeConfig;
use crate::encoder::SessionExporter;
use crate::error::GazeError;
use crate::pipeline::GazeSession;
use crate::schema::{InputEvent, InputEventAdapter};
use crate::types::{Direction, LandmarkFrame};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Allocated string on success, NULL plus last error on failure
fn string_result(result: Result<String, GazeError>) -> *mut c_char {
    match result {
        Ok(s) => string_to_cstr(&s),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// 0 on success, -1 plus last error on failure
fn status_result(result: Result<(), GazeError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

fn timestamp_from_millis(timestamp_ms: i64) -> Result<DateTime<Utc>, GazeError> {
    DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        GazeError::ParseError(format!("timestamp {timestamp_ms} ms is out of range"))
    })
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a GazeSession
pub struct GazeSessionHandle {
    session: GazeSession,
    exporter: SessionExporter,
}

/// Create a new session.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for the
///   default configuration.
/// - Returns a pointer that must be freed with `gaze_session_free`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_new(config_json: *const c_char) -> *mut GazeSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(GazeConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(json) => GazeConfig::from_json(&json),
            None => Err(GazeError::ParseError("config is not valid UTF-8".to_string())),
        }
    };

    match config.and_then(GazeSession::new) {
        Ok(session) => Box::into_raw(Box::new(GazeSessionHandle {
            session,
            exporter: SessionExporter::new(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_free(handle: *mut GazeSessionHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Process one landmark frame and return the frame outcome as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - `frame_json` must be a valid null-terminated C string holding a
///   landmark frame, or NULL when the detector found no face.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_process_frame(
    handle: *mut GazeSessionHandle,
    frame_json: *const c_char,
    timestamp_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let frame: Option<LandmarkFrame> = if frame_json.is_null() {
        None
    } else {
        let json = match cstr_to_string(frame_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid frame string pointer");
                return ptr::null_mut();
            }
        };
        match serde_json::from_str(&json) {
            Ok(frame) => frame,
            Err(e) => {
                set_last_error(&GazeError::InvalidLandmarkFrame(e.to_string()).to_string());
                return ptr::null_mut();
            }
        }
    };

    string_result(timestamp_from_millis(timestamp_ms).and_then(|ts| {
        let outcome = handle.session.process_frame(frame.as_ref(), ts);
        serde_json::to_string(&outcome).map_err(GazeError::JsonError)
    }))
}

/// Apply one gaze.input_event.v1 event. Returns the frame outcome JSON for
/// frame events and the string `null` for control events.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - `event_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_process_event(
    handle: *mut GazeSessionHandle,
    event_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let json = match cstr_to_string(event_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid event string pointer");
            return ptr::null_mut();
        }
    };

    string_result(
        serde_json::from_str::<InputEvent>(&json)
            .map_err(GazeError::JsonError)
            .and_then(|event| InputEventAdapter::apply(&mut handle.session, &event))
            .and_then(|outcome| serde_json::to_string(&outcome).map_err(GazeError::JsonError)),
    )
}

/// Start calibration.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - `sequence_json` must be a JSON array of pose names as a valid
///   null-terminated C string, or NULL for all five poses.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_start_calibration(
    handle: *mut GazeSessionHandle,
    sequence_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    let sequence: Vec<Direction> = if sequence_json.is_null() {
        Direction::POSES.to_vec()
    } else {
        let json = match cstr_to_string(sequence_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid sequence string pointer");
                return -1;
            }
        };
        match serde_json::from_str(&json) {
            Ok(sequence) => sequence,
            Err(e) => {
                set_last_error(&GazeError::JsonError(e).to_string());
                return -1;
            }
        }
    };

    status_result(handle.session.start_calibration(&sequence))
}

/// Abort the calibration in progress; the previous profile stays active.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_abort_calibration(handle: *mut GazeSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    status_result((*handle).session.abort_calibration())
}

/// Retake the calibration pose that ran out of time.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_retake_pose(handle: *mut GazeSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    status_result((*handle).session.retake_pose().map(|_| ()))
}

/// Current smoothed label, e.g. `left` or `unknown`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_current_label(handle: *const GazeSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    string_to_cstr((*handle).session.current_label().as_str())
}

/// Most recent live classification as JSON (`label`, `confidence`,
/// `timestamp`, `profile_epoch`), or `null` before the first live frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_latest_classification(
    handle: *const GazeSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let latest = (*handle).session.latest_classification();
    string_result(serde_json::to_string(&latest).map_err(GazeError::from))
}

/// Export the session log as a JSON document.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_export(handle: *const GazeSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;
    string_result(handle.exporter.encode_to_json(&handle.session))
}

/// Save the active calibration profile to JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - Returns a newly allocated string that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_save_profile(handle: *const GazeSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    string_result((*handle).session.save_profile())
}

/// Load a calibration profile from JSON and make it active.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `gaze_session_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_session_load_profile(
    handle: *mut GazeSessionHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    status_result(handle.session.load_profile(&json_str).map(|_| ()))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Gaze functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Gaze function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gaze_free_string(ptr: *mut c_char) {
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
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Gaze function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn gaze_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Gaze library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn gaze_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        gaze_free_string(ptr);
        s
    }

    unsafe fn feed(handle: *mut GazeSessionHandle, ms: i64, h: f64) -> serde_json::Value {
        let event = CString::new(format!(
            r#"{{"schema_version":"gaze.input_event.v1",
                "timestamp":"{}","type":"features",
                "features":{{"horizontal_eye_offset":{h},"vertical_eye_offset":0.0,
                             "horizontal_face_offset":0.0,"vertical_face_offset":0.0,
                             "eyelid_openness":0.3}}}}"#,
            DateTime::from_timestamp_millis(1_705_327_200_000 + ms)
                .unwrap()
                .to_rfc3339()
        ))
        .unwrap();
        let out = take_string(gaze_session_process_event(handle, event.as_ptr()));
        serde_json::from_str(&out).unwrap()
    }

    #[test]
    fn test_ffi_session_lifecycle() {
        unsafe {
            let config = CString::new(r#"{"samples_per_pose": 2, "debounce_threshold": 1}"#).unwrap();
            let handle = gaze_session_new(config.as_ptr());
            assert!(!handle.is_null());

            let sequence = CString::new(r#"["straight", "left"]"#).unwrap();
            assert_eq!(gaze_session_start_calibration(handle, sequence.as_ptr()), 0);
            for (i, h) in [0.0, 0.0, -0.3, -0.3].iter().enumerate() {
                feed(handle, i as i64 * 33, *h);
            }
            let outcome = feed(handle, 200, -0.4);
            assert_eq!(outcome["classification"]["label"], "left");
            assert_eq!(take_string(gaze_session_current_label(handle)), "left");

            let latest: serde_json::Value =
                serde_json::from_str(&take_string(gaze_session_latest_classification(handle)))
                    .unwrap();
            assert_eq!(latest, outcome["classification"]);
            assert_eq!(latest["profile_epoch"], 1);

            let profile = gaze_session_save_profile(handle);
            assert!(!profile.is_null());

            let export: serde_json::Value =
                serde_json::from_str(&take_string(gaze_session_export(handle))).unwrap();
            assert_eq!(export["records"].as_array().unwrap().len(), 5);
            assert_eq!(export["producer"]["name"], "synheart-gaze");

            let other = gaze_session_new(ptr::null());
            assert_eq!(gaze_session_load_profile(other, profile), 0);
            gaze_free_string(profile);

            gaze_session_free(handle);
            gaze_session_free(other);
        }
    }

    #[test]
    fn test_ffi_process_frame_without_face() {
        unsafe {
            let handle = gaze_session_new(ptr::null());
            assert_eq!(take_string(gaze_session_latest_classification(handle)), "null");
            let out = take_string(gaze_session_process_frame(handle, ptr::null(), 1_705_327_200_000));
            let outcome: serde_json::Value = serde_json::from_str(&out).unwrap();
            assert_eq!(outcome["no_signal"], "face_absent");
            assert_eq!(outcome["smoothed_label"], "unknown");

            let bad = CString::new("{not a frame").unwrap();
            assert!(gaze_session_process_frame(handle, bad.as_ptr(), 0).is_null());
            assert!(!gaze_last_error().is_null());
            gaze_session_free(handle);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let config = CString::new(r#"{"sensitivity": -1.0}"#).unwrap();
            assert!(gaze_session_new(config.as_ptr()).is_null());
            let error = CStr::from_ptr(gaze_last_error()).to_str().unwrap();
            assert!(error.contains("sensitivity"));

            let handle = gaze_session_new(ptr::null());
            assert_eq!(gaze_session_abort_calibration(handle), -1);
            assert_eq!(gaze_session_retake_pose(handle), -1);
            assert!(gaze_session_save_profile(handle).is_null());
            assert_eq!(gaze_session_start_calibration(ptr::null_mut(), ptr::null()), -1);
            gaze_session_free(handle);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = gaze_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
