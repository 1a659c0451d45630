//! A reference engine for tests and local development.
//!
//! Content screening looks for markers in the scanned bytes:
//!
//! | marker | effect |
//! |---|---|
//! | `MOCK-MALWARE-HIGH` | high severity malware detection |
//! | `MOCK-RISKY-MEDIUM` | medium severity risky app detection |
//! | `MOCK-VENDOR-ERROR` | fails with a vendor specific code |
//! | `MOCK-STALL` | keeps scanning until cancelled (10 s at most) |
//!
//! Web protection rates URLs by substring: `malware` is high risk, `risky`
//! medium, `unverified` unverified, anything else low. The `block_all`
//! option rates every URL high.
//!
//! Built as a `cdylib` the engine exports the C ABI. As an `rlib` it hands
//! out its symbol tables so tests can serve them without `dlopen`.

use csr_abi as abi;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const MARKER_MALWARE: &str = "MOCK-MALWARE-HIGH";
pub const MARKER_RISKY: &str = "MOCK-RISKY-MEDIUM";
pub const MARKER_VENDOR_ERROR: &str = "MOCK-VENDOR-ERROR";
pub const MARKER_STALL: &str = "MOCK-STALL";

/// Returned for [`MARKER_VENDOR_ERROR`].
pub const VENDOR_ERROR: c_int = abi::CSRE_ERROR_VENDOR_BASE - 1;
const VENDOR_ERROR_TEXT: &[u8] = b"mock signature database unavailable";

const STALL_LIMIT: Duration = Duration::from_secs(10);
const STALL_POLL: Duration = Duration::from_millis(5);

pub const LAST_UPDATE: i64 = 1_760_000_000;
static LOGO: &[u8] = b"\x89PNG mock logo";

/// Variations of the engine a test can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Standard,
    /// Reports itself as not activated.
    Inactive,
    /// Reports an API version nobody implements.
    LegacyApi,
}

struct CsContext;

struct WpContext {
    block_all: AtomicBool,
}

struct WpResult {
    level: c_int,
    detail: Option<Vec<u8>>,
}

fn copy_out(text: &[u8], buf: *mut c_char, cap: usize) -> c_int {
    if !buf.is_null() && cap > 0 {
        let copied = text.len().min(cap - 1);
        // SAFETY: the caller provides `cap` writable bytes at `buf`.
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), buf.cast::<u8>(), copied);
            *buf.add(copied) = 0;
        }
    }
    c_int::try_from(text.len()).unwrap_or(c_int::MAX)
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

fn error_text(code: c_int) -> &'static [u8] {
    match code {
        abi::CSRE_ERROR_NONE => b"no error",
        abi::CSRE_ERROR_OUT_OF_MEMORY => b"out of memory",
        abi::CSRE_ERROR_PERMISSION_DENIED => b"permission denied",
        abi::CSRE_ERROR_FILE_NOT_FOUND => b"file not found",
        abi::CSRE_ERROR_ENGINE_NOT_ACTIVATED => b"engine not activated",
        abi::CSRE_ERROR_CANCELLED => b"cancelled",
        abi::CSRE_ERROR_INVALID_PARAMETER => b"invalid parameter",
        VENDOR_ERROR => VENDOR_ERROR_TEXT,
        _ => b"unknown error",
    }
}

/// # Safety
///
/// `sink` must be a valid sink whose callbacks accept its user pointer.
unsafe fn report(sink: &abi::RawScanSink, severity: c_int, threat_type: c_int, name: &CStr) -> bool {
    let detection = abi::RawDetection {
        severity,
        threat_type,
        malware_name: name.as_ptr(),
        variant: c"mock".as_ptr(),
        detail_url: c"https://mock.example/threats".as_ptr(),
        timestamp: LAST_UPDATE,
    };
    // SAFETY: forwarded from the caller; `detection` outlives the call.
    unsafe { (sink.on_detected)(sink.user, &detection) >= 0 }
}

/// # Safety
///
/// As for [`report`].
unsafe fn cancelled(sink: &abi::RawScanSink) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { (sink.is_cancelled)(sink.user) != 0 }
}

/// # Safety
///
/// As for [`report`].
unsafe fn scan(data: &[u8], sink: &abi::RawScanSink) -> c_int {
    // SAFETY: forwarded from the caller for every sink call below.
    unsafe {
        if cancelled(sink) {
            return abi::CSRE_ERROR_CANCELLED;
        }
        if contains(data, MARKER_VENDOR_ERROR) {
            return VENDOR_ERROR;
        }
        if contains(data, MARKER_STALL) {
            let started = Instant::now();
            while started.elapsed() < STALL_LIMIT {
                if cancelled(sink) {
                    return abi::CSRE_ERROR_CANCELLED;
                }
                std::thread::sleep(STALL_POLL);
            }
        }
        if contains(data, MARKER_MALWARE)
            && !report(sink, abi::CSRE_SEVERITY_HIGH, abi::CSRE_THREAT_MALWARE, c"Mock.Malware.High")
        {
            return abi::CSRE_ERROR_CANCELLED;
        }
        if contains(data, MARKER_RISKY)
            && !report(sink, abi::CSRE_SEVERITY_MEDIUM, abi::CSRE_THREAT_RISKY_APP, c"Mock.Risky.Medium")
        {
            return abi::CSRE_ERROR_CANCELLED;
        }
        if cancelled(sink) {
            return abi::CSRE_ERROR_CANCELLED;
        }
    }
    abi::CSRE_ERROR_NONE
}

fn fill_info(info: &mut abi::RawEngineInfo, api_version: &'static CStr, name: &'static CStr) {
    *info = abi::RawEngineInfo {
        api_version: api_version.as_ptr(),
        vendor: c"Mock Security".as_ptr(),
        name: name.as_ptr(),
        version: c"1.0.0".as_ptr(),
        data_version: c"2026.10.19".as_ptr(),
        logo: LOGO.as_ptr(),
        logo_len: LOGO.len(),
        last_update: LAST_UPDATE,
    };
}

/// # Safety
///
/// `out` must be null or writable.
unsafe fn write_out(out: *mut c_int, value: c_int) -> c_int {
    // SAFETY: forwarded from the caller.
    match unsafe { out.as_mut() } {
        Some(out) => {
            *out = value;
            abi::CSRE_ERROR_NONE
        }
        None => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

// Content screening.

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_open(ctx: *mut *mut c_void) -> c_int {
    // SAFETY: `ctx` is null or writable per the ABI.
    match unsafe { ctx.as_mut() } {
        Some(ctx) => {
            *ctx = Box::into_raw(Box::new(CsContext)).cast();
            abi::CSRE_ERROR_NONE
        }
        None => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_close(ctx: *mut c_void) -> c_int {
    if ctx.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: `ctx` came from `csre_cs_open`.
    drop(unsafe { Box::from_raw(ctx.cast::<CsContext>()) });
    abi::CSRE_ERROR_NONE
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_get_error_string(code: c_int, buf: *mut c_char, cap: usize) -> c_int {
    copy_out(error_text(code), buf, cap)
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_scan_data(
    ctx: *mut c_void,
    data: *const u8,
    len: usize,
    sink: *const abi::RawScanSink,
) -> c_int {
    // SAFETY: the ABI requires a valid sink and `len` readable bytes.
    unsafe {
        let Some(sink) = sink.as_ref() else {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        };
        if ctx.is_null() || (data.is_null() && len > 0) {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        }
        let data = if len == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(data, len)
        };
        scan(data, sink)
    }
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_scan_file(
    ctx: *mut c_void,
    path: *const c_char,
    sink: *const abi::RawScanSink,
) -> c_int {
    // SAFETY: the ABI requires a valid sink and a NUL terminated path.
    unsafe {
        let Some(sink) = sink.as_ref() else {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        };
        if ctx.is_null() || path.is_null() {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        }
        let Ok(path) = CStr::from_ptr(path).to_str() else {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        };
        match std::fs::read(path) {
            Ok(data) => scan(&data, sink),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => abi::CSRE_ERROR_FILE_NOT_FOUND,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                abi::CSRE_ERROR_PERMISSION_DENIED
            }
            Err(_) => VENDOR_ERROR,
        }
    }
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_get_engine_info(ctx: *mut c_void, info: *mut abi::RawEngineInfo) -> c_int {
    // SAFETY: `info` is null or writable.
    match unsafe { info.as_mut() } {
        Some(info) if !ctx.is_null() => {
            fill_info(info, c"CSRE_CS_API_1.0", c"Mock Content Screening");
            abi::CSRE_ERROR_NONE
        }
        _ => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

/// # Safety
///
/// See the content screening ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_cs_get_activated(ctx: *mut c_void, activated: *mut c_int) -> c_int {
    if ctx.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: forwarded.
    unsafe { write_out(activated, 1) }
}

// Web protection.

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_init(ctx: *mut *mut c_void) -> c_int {
    // SAFETY: `ctx` is null or writable per the ABI.
    match unsafe { ctx.as_mut() } {
        Some(ctx) => {
            let context = WpContext {
                block_all: AtomicBool::new(false),
            };
            *ctx = Box::into_raw(Box::new(context)).cast();
            abi::CSRE_ERROR_NONE
        }
        None => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_uninit(ctx: *mut c_void) -> c_int {
    if ctx.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: `ctx` came from `csre_wp_init`.
    drop(unsafe { Box::from_raw(ctx.cast::<WpContext>()) });
    abi::CSRE_ERROR_NONE
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_set_config(
    ctx: *mut c_void,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    if ctx.is_null() || key.is_null() || value.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: non-null and NUL terminated per the ABI.
    let (context, key, value) = unsafe {
        (
            &*ctx.cast::<WpContext>(),
            CStr::from_ptr(key),
            CStr::from_ptr(value),
        )
    };
    match key.to_bytes() {
        b"block_all" => {
            context
                .block_all
                .store(value.to_bytes() == b"true", Ordering::Relaxed);
            abi::CSRE_ERROR_NONE
        }
        _ => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

fn rate(url: &str, block_all: bool) -> c_int {
    if block_all || url.contains("malware") {
        abi::CSRE_WP_RISK_HIGH
    } else if url.contains("risky") {
        abi::CSRE_WP_RISK_MEDIUM
    } else if url.contains("unverified") {
        abi::CSRE_WP_RISK_UNVERIFIED
    } else {
        abi::CSRE_WP_RISK_LOW
    }
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_check_url(
    ctx: *mut c_void,
    url: *const c_char,
    result: *mut *mut c_void,
) -> c_int {
    if ctx.is_null() || url.is_null() || result.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: non-null pointers valid per the ABI.
    unsafe {
        let context = &*ctx.cast::<WpContext>();
        let Ok(url) = CStr::from_ptr(url).to_str() else {
            return abi::CSRE_ERROR_INVALID_PARAMETER;
        };
        if url.contains(MARKER_VENDOR_ERROR) {
            return VENDOR_ERROR;
        }
        let level = rate(url, context.block_all.load(Ordering::Relaxed));
        let detail = (level >= abi::CSRE_WP_RISK_MEDIUM)
            .then(|| format!("https://mock.example/report?url={url}").into_bytes());
        *result = Box::into_raw(Box::new(WpResult { level, detail })).cast();
    }
    abi::CSRE_ERROR_NONE
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_result_get_risk_level(result: *mut c_void, level: *mut c_int) -> c_int {
    if result.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: `result` came from `csre_wp_check_url`.
    unsafe { write_out(level, (*result.cast::<WpResult>()).level) }
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_result_get_detailed_url(
    result: *mut c_void,
    buf: *mut c_char,
    cap: usize,
) -> c_int {
    if result.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: `result` came from `csre_wp_check_url`.
    let result = unsafe { &*result.cast::<WpResult>() };
    copy_out(result.detail.as_deref().unwrap_or_default(), buf, cap)
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_result_destroy(result: *mut c_void) -> c_int {
    if result.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: `result` came from `csre_wp_check_url` and is destroyed once.
    drop(unsafe { Box::from_raw(result.cast::<WpResult>()) });
    abi::CSRE_ERROR_NONE
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_get_error_string(code: c_int, buf: *mut c_char, cap: usize) -> c_int {
    copy_out(error_text(code), buf, cap)
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_get_engine_info(ctx: *mut c_void, info: *mut abi::RawEngineInfo) -> c_int {
    // SAFETY: `info` is null or writable.
    match unsafe { info.as_mut() } {
        Some(info) if !ctx.is_null() => {
            fill_info(info, c"CSRE_WP_API_1.0", c"Mock Web Protection");
            abi::CSRE_ERROR_NONE
        }
        _ => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

/// # Safety
///
/// See the web protection ABI.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn csre_wp_get_activated(ctx: *mut c_void, activated: *mut c_int) -> c_int {
    if ctx.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: forwarded.
    unsafe { write_out(activated, 1) }
}

// Profile variants, never exported.

unsafe extern "C" fn inactive_get_activated(ctx: *mut c_void, activated: *mut c_int) -> c_int {
    if ctx.is_null() {
        return abi::CSRE_ERROR_INVALID_PARAMETER;
    }
    // SAFETY: forwarded.
    unsafe { write_out(activated, 0) }
}

unsafe extern "C" fn legacy_get_engine_info(ctx: *mut c_void, info: *mut abi::RawEngineInfo) -> c_int {
    // SAFETY: `info` is null or writable.
    match unsafe { info.as_mut() } {
        Some(info) if !ctx.is_null() => {
            fill_info(info, c"CSRE_API_0.9", c"Mock Legacy");
            abi::CSRE_ERROR_NONE
        }
        _ => abi::CSRE_ERROR_INVALID_PARAMETER,
    }
}

/// Symbol table entry: exported name and address.
pub type Symbol = (&'static str, *const c_void);

fn apply(profile: Profile, symbols: &mut [Symbol], activated: &str, info: &str) {
    for (name, address) in symbols {
        match profile {
            Profile::Inactive if *name == activated => {
                *address = inactive_get_activated as abi::GetActivatedFn as *const c_void;
            }
            Profile::LegacyApi if *name == info => {
                *address = legacy_get_engine_info as abi::GetEngineInfoFn as *const c_void;
            }
            _ => {}
        }
    }
}

/// The content screening symbols this library exports.
pub fn cs_symbols(profile: Profile) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = vec![
        ("csre_cs_open", csre_cs_open as abi::CsOpenFn as *const c_void),
        ("csre_cs_close", csre_cs_close as abi::CsCloseFn as *const c_void),
        (
            "csre_cs_get_error_string",
            csre_cs_get_error_string as abi::GetErrorStringFn as *const c_void,
        ),
        ("csre_cs_scan_data", csre_cs_scan_data as abi::CsScanDataFn as *const c_void),
        ("csre_cs_scan_file", csre_cs_scan_file as abi::CsScanFileFn as *const c_void),
        (
            "csre_cs_get_engine_info",
            csre_cs_get_engine_info as abi::GetEngineInfoFn as *const c_void,
        ),
        (
            "csre_cs_get_activated",
            csre_cs_get_activated as abi::GetActivatedFn as *const c_void,
        ),
    ];
    apply(profile, &mut symbols, "csre_cs_get_activated", "csre_cs_get_engine_info");
    symbols
}

/// The web protection symbols this library exports.
pub fn wp_symbols(profile: Profile) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = vec![
        ("csre_wp_init", csre_wp_init as abi::WpInitFn as *const c_void),
        ("csre_wp_uninit", csre_wp_uninit as abi::WpUninitFn as *const c_void),
        ("csre_wp_set_config", csre_wp_set_config as abi::WpSetConfigFn as *const c_void),
        ("csre_wp_check_url", csre_wp_check_url as abi::WpCheckUrlFn as *const c_void),
        (
            "csre_wp_result_get_risk_level",
            csre_wp_result_get_risk_level as abi::WpResultGetRiskLevelFn as *const c_void,
        ),
        (
            "csre_wp_result_get_detailed_url",
            csre_wp_result_get_detailed_url as abi::WpResultGetDetailedUrlFn as *const c_void,
        ),
        (
            "csre_wp_result_destroy",
            csre_wp_result_destroy as abi::WpResultDestroyFn as *const c_void,
        ),
        (
            "csre_wp_get_error_string",
            csre_wp_get_error_string as abi::GetErrorStringFn as *const c_void,
        ),
        (
            "csre_wp_get_engine_info",
            csre_wp_get_engine_info as abi::GetEngineInfoFn as *const c_void,
        ),
        (
            "csre_wp_get_activated",
            csre_wp_get_activated as abi::GetActivatedFn as *const c_void,
        ),
    ];
    apply(profile, &mut symbols, "csre_wp_get_activated", "csre_wp_get_engine_info");
    symbols
}
