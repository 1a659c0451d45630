#![forbid(unsafe_code)]

//! The C ABI a vendor engine library has to export.
//!
//! Two engine kinds exist, each with its own fixed set of symbols:
//!
//! * content screening (`csre_cs_*`): scans raw buffers and files and reports
//!   every detection through a [`RawScanSink`].
//! * web protection (`csre_wp_*`): rates URLs. Results are vendor-owned
//!   objects that must be released with `csre_wp_result_destroy`.
//!
//! All strings crossing the boundary are NUL-terminated UTF-8. Strings handed
//! out by the engine (engine info, detection fields) are owned by the engine;
//! detection strings are only valid for the duration of the callback, engine
//! info strings until the context is closed.
//!
//! Every function returns [`CSRE_ERROR_NONE`] on success or a negative code.
//! Codes below [`CSRE_ERROR_VENDOR_BASE`] are vendor specific and can be
//! described with the engine's `get_error_string` function.

use std::ffi::{c_char, c_int, c_void};

/// API version string a content screening engine must report.
pub const CS_API_VERSION: &str = "CSRE_CS_API_1.0";

/// API version string a web protection engine must report.
pub const WP_API_VERSION: &str = "CSRE_WP_API_1.0";

pub const CSRE_ERROR_NONE: c_int = 0;
pub const CSRE_ERROR_OUT_OF_MEMORY: c_int = -1;
pub const CSRE_ERROR_PERMISSION_DENIED: c_int = -2;
pub const CSRE_ERROR_FILE_NOT_FOUND: c_int = -3;
pub const CSRE_ERROR_ENGINE_NOT_ACTIVATED: c_int = -4;
/// The engine stopped because the sink reported cancellation.
pub const CSRE_ERROR_CANCELLED: c_int = -5;
pub const CSRE_ERROR_INVALID_PARAMETER: c_int = -6;
/// First vendor specific code. Vendors count downwards from here.
pub const CSRE_ERROR_VENDOR_BASE: c_int = -0x100;

pub const CSRE_SEVERITY_LOW: c_int = 1;
pub const CSRE_SEVERITY_MEDIUM: c_int = 2;
pub const CSRE_SEVERITY_HIGH: c_int = 3;

pub const CSRE_THREAT_UNKNOWN: c_int = 0;
pub const CSRE_THREAT_MALWARE: c_int = 1;
pub const CSRE_THREAT_RISKY_APP: c_int = 2;

pub const CSRE_WP_RISK_UNVERIFIED: c_int = 0;
pub const CSRE_WP_RISK_LOW: c_int = 1;
pub const CSRE_WP_RISK_MEDIUM: c_int = 2;
pub const CSRE_WP_RISK_HIGH: c_int = 3;

/// One detection, as reported by a content screening engine.
///
/// `variant` and `detail_url` may be null.
#[repr(C)]
#[derive(Debug)]
pub struct RawDetection {
    pub severity: c_int,
    pub threat_type: c_int,
    pub malware_name: *const c_char,
    pub variant: *const c_char,
    pub detail_url: *const c_char,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
}

/// Called for every detection. A negative return value asks the engine to
/// stop scanning.
pub type OnDetectedFn =
    unsafe extern "C" fn(user: *mut c_void, detected: *const RawDetection) -> c_int;

/// Polled by the engine between units of work. Non-zero means the scan was
/// cancelled and the engine should return [`CSRE_ERROR_CANCELLED`].
pub type IsCancelledFn = unsafe extern "C" fn(user: *mut c_void) -> c_int;

#[repr(C)]
#[derive(Debug)]
pub struct RawScanSink {
    pub user: *mut c_void,
    pub on_detected: OnDetectedFn,
    pub is_cancelled: IsCancelledFn,
}

/// Static description of a loaded engine. `logo` may be null.
#[repr(C)]
#[derive(Debug)]
pub struct RawEngineInfo {
    pub api_version: *const c_char,
    pub vendor: *const c_char,
    pub name: *const c_char,
    pub version: *const c_char,
    pub data_version: *const c_char,
    pub logo: *const u8,
    pub logo_len: usize,
    /// Seconds since the unix epoch.
    pub last_update: i64,
}

impl Default for RawEngineInfo {
    fn default() -> Self {
        Self {
            api_version: std::ptr::null(),
            vendor: std::ptr::null(),
            name: std::ptr::null(),
            version: std::ptr::null(),
            data_version: std::ptr::null(),
            logo: std::ptr::null(),
            logo_len: 0,
            last_update: 0,
        }
    }
}

/// Writes a description of `code` into `buf` (at most `cap` bytes including
/// the terminating NUL). Returns the untruncated length or a negative code.
pub type GetErrorStringFn = unsafe extern "C" fn(code: c_int, buf: *mut c_char, cap: usize) -> c_int;
pub type GetEngineInfoFn = unsafe extern "C" fn(ctx: *mut c_void, info: *mut RawEngineInfo) -> c_int;
pub type GetActivatedFn = unsafe extern "C" fn(ctx: *mut c_void, activated: *mut c_int) -> c_int;

pub type CsOpenFn = unsafe extern "C" fn(ctx: *mut *mut c_void) -> c_int;
pub type CsCloseFn = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;
pub type CsScanDataFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    data: *const u8,
    len: usize,
    sink: *const RawScanSink,
) -> c_int;
pub type CsScanFileFn =
    unsafe extern "C" fn(ctx: *mut c_void, path: *const c_char, sink: *const RawScanSink) -> c_int;

/// Content screening symbols, in the order the loader resolves them.
pub const CS_SYMBOLS: [&str; 7] = [
    "csre_cs_open",
    "csre_cs_close",
    "csre_cs_get_error_string",
    "csre_cs_scan_data",
    "csre_cs_scan_file",
    "csre_cs_get_engine_info",
    "csre_cs_get_activated",
];

pub type WpInitFn = unsafe extern "C" fn(ctx: *mut *mut c_void) -> c_int;
pub type WpUninitFn = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;
pub type WpSetConfigFn =
    unsafe extern "C" fn(ctx: *mut c_void, key: *const c_char, value: *const c_char) -> c_int;
pub type WpCheckUrlFn =
    unsafe extern "C" fn(ctx: *mut c_void, url: *const c_char, result: *mut *mut c_void) -> c_int;
pub type WpResultGetRiskLevelFn = unsafe extern "C" fn(result: *mut c_void, level: *mut c_int) -> c_int;
/// Same buffer contract as [`GetErrorStringFn`]. Returns 0 when the engine
/// has no detail page for the URL.
pub type WpResultGetDetailedUrlFn =
    unsafe extern "C" fn(result: *mut c_void, buf: *mut c_char, cap: usize) -> c_int;
pub type WpResultDestroyFn = unsafe extern "C" fn(result: *mut c_void) -> c_int;

/// Web protection symbols, in the order the loader resolves them.
pub const WP_SYMBOLS: [&str; 10] = [
    "csre_wp_init",
    "csre_wp_uninit",
    "csre_wp_set_config",
    "csre_wp_check_url",
    "csre_wp_result_get_risk_level",
    "csre_wp_result_get_detailed_url",
    "csre_wp_result_destroy",
    "csre_wp_get_error_string",
    "csre_wp_get_engine_info",
    "csre_wp_get_activated",
];
