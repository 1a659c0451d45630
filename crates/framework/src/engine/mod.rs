#![deny(unsafe_code)]

//! Safe adapters over loaded vendor engines.
//!
//! Every native return code goes through [`translate`]. Strings and buffers
//! handed out by an engine are copied before the call that produced them
//! returns.

mod cs;
mod manager;
mod slot;
mod wp;

pub use cs::CsEngine;
pub use manager::EngineManager;
pub use slot::EngineSlot;
pub use wp::{RiskLevel, UrlRating, WpEngine};

use crate::error::Error;
use crate::plugin::{Plugin, VTable};
use crate::protocol::{Detection, EngineInfo, EngineKind, Severity, ThreatType};
use csr_abi as abi;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::ffi::{CStr, c_char, c_int, c_void};
use tracing::{error, warn};

/// Options an engine is opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Run every vendor call under one lock.
    pub serialize_calls: bool,
    /// Passed to the engine as key/value configuration where supported.
    pub options: BTreeMap<String, String>,
}

pub trait Engine: Send + Sync + Sized + 'static {
    type VTable: VTable;
    const KIND: EngineKind;
    const API_VERSION: &'static str;

    fn open(plugin: Plugin<Self::VTable>, settings: &EngineSettings) -> Result<Self, Error>;

    /// Current metadata, with the activation state queried live.
    fn info(&self) -> Result<EngineInfo, Error>;
}

/// Receives the findings of a running scan.
pub trait ScanSink {
    /// Returns `false` to ask the engine to stop.
    fn on_detected(&mut self, detection: Detection) -> bool;

    fn is_cancelled(&self) -> bool;
}

/// Map a native engine return code onto the framework taxonomy. `describe`
/// is only consulted for vendor specific codes.
pub fn translate(code: c_int, describe: impl FnOnce(c_int) -> Option<String>) -> Result<(), Error> {
    match code {
        abi::CSRE_ERROR_NONE => Ok(()),
        abi::CSRE_ERROR_OUT_OF_MEMORY => Err(Error::OutOfMemory),
        abi::CSRE_ERROR_PERMISSION_DENIED => Err(Error::PermissionDenied),
        abi::CSRE_ERROR_FILE_NOT_FOUND => Err(Error::FileNotFound),
        abi::CSRE_ERROR_ENGINE_NOT_ACTIVATED => Err(Error::EngineNotActivated),
        abi::CSRE_ERROR_CANCELLED => Err(Error::Cancelled),
        abi::CSRE_ERROR_INVALID_PARAMETER => {
            Err(Error::InvalidParameter("rejected by engine".into()))
        }
        vendor => Err(Error::EngineInternal {
            vendor_code: Some(vendor),
            description: describe(vendor),
        }),
    }
}

/// Vendor context pointer. Engines promise their contexts may be used from
/// any thread.
#[derive(Debug, Clone, Copy)]
struct Context(*mut c_void);

#[allow(unsafe_code)]
// SAFETY: the engine ABI requires contexts to be thread safe.
unsafe impl Send for Context {}
#[allow(unsafe_code)]
// SAFETY: see above.
unsafe impl Sync for Context {}

/// Optional global lock around vendor calls.
#[derive(Debug, Default)]
struct CallLock(Option<Mutex<()>>);

impl CallLock {
    fn new(serialize: bool) -> Self {
        Self(serialize.then(|| Mutex::new(())))
    }

    fn hold(&self) -> Option<MutexGuard<'_, ()>> {
        self.0.as_ref().map(Mutex::lock)
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL terminated string.
#[allow(unsafe_code)]
unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Drive a "fill this buffer" style engine call. The call returns the full
/// length of the string (without NUL) or a negative code; a truncated result
/// is retried once with a buffer of the reported size.
fn read_string(mut fill: impl FnMut(*mut c_char, usize) -> c_int) -> Result<Option<String>, c_int> {
    let mut buf = vec![0u8; 256];
    for _ in 0..2 {
        let len = fill(buf.as_mut_ptr().cast(), buf.len());
        let Ok(len) = usize::try_from(len) else {
            return Err(len);
        };
        if len < buf.len() {
            buf.truncate(len);
            return Ok((!buf.is_empty()).then(|| String::from_utf8_lossy(&buf).into_owned()));
        }
        buf.resize(len + 1, 0);
    }
    Err(abi::CSRE_ERROR_INVALID_PARAMETER)
}

fn describe_with(get_error_string: abi::GetErrorStringFn, code: c_int) -> Option<String> {
    #[allow(unsafe_code)]
    // SAFETY: the buffer pointer and capacity come from a live Vec.
    let text = read_string(|buf, cap| unsafe { get_error_string(code, buf, cap) });
    text.ok().flatten()
}

/// Query engine metadata and activation through the shared ABI functions.
fn query_info(
    ctx: Context,
    get_engine_info: abi::GetEngineInfoFn,
    get_activated: abi::GetActivatedFn,
    describe: impl Fn(c_int) -> Option<String>,
) -> Result<EngineInfo, Error> {
    let mut raw = abi::RawEngineInfo::default();
    #[allow(unsafe_code)]
    // SAFETY: `raw` is a valid out pointer for the duration of the call.
    let code = unsafe { get_engine_info(ctx.0, &mut raw) };
    translate(code, &describe)?;

    #[allow(unsafe_code)]
    // SAFETY: the engine keeps info strings and the logo alive until its
    // context is closed, which cannot happen while we hold `ctx`.
    let info = unsafe {
        EngineInfo {
            api_version: owned_string(raw.api_version).unwrap_or_default(),
            vendor: owned_string(raw.vendor).unwrap_or_default(),
            name: owned_string(raw.name).unwrap_or_default(),
            version: owned_string(raw.version).unwrap_or_default(),
            data_version: owned_string(raw.data_version).unwrap_or_default(),
            logo: if raw.logo.is_null() {
                Vec::new()
            } else {
                std::slice::from_raw_parts(raw.logo, raw.logo_len).to_vec()
            },
            activated: false,
            enabled: true,
            last_update: raw.last_update,
        }
    };
    Ok(EngineInfo {
        activated: query_activated(ctx, get_activated, describe)?,
        ..info
    })
}

fn query_activated(
    ctx: Context,
    get_activated: abi::GetActivatedFn,
    describe: impl FnOnce(c_int) -> Option<String>,
) -> Result<bool, Error> {
    let mut activated: c_int = 0;
    #[allow(unsafe_code)]
    // SAFETY: `activated` is a valid out pointer.
    let code = unsafe { get_activated(ctx.0, &mut activated) };
    translate(code, describe)?;
    Ok(activated != 0)
}

fn ensure_api_version<E: Engine>(info: &EngineInfo) -> Result<(), Error> {
    if info.api_version == E::API_VERSION {
        Ok(())
    } else {
        Err(crate::plugin::Unavailable::IncompatibleAbi {
            expected: E::API_VERSION,
            found: info.api_version.clone(),
        }
        .into())
    }
}

/// State shared with the detection trampolines for one scan call.
struct SinkState<'a, 'b> {
    sink: &'a mut dyn ScanSink,
    target: Option<&'b str>,
}

impl SinkState<'_, '_> {
    /// Build the native sink record pointing back at `self`.
    fn raw(&mut self) -> abi::RawScanSink {
        abi::RawScanSink {
            user: (self as *mut Self).cast(),
            on_detected: on_detected_trampoline,
            is_cancelled: is_cancelled_trampoline,
        }
    }
}

/// # Safety
///
/// `raw` must point to a valid detection whose strings are NUL terminated
/// or null.
#[allow(unsafe_code)]
unsafe fn detection_from_raw(raw: &abi::RawDetection, target: Option<&str>) -> Result<Detection, Error> {
    // SAFETY: forwarded from the caller.
    let (name, variant, detail_url) = unsafe {
        (
            owned_string(raw.malware_name),
            owned_string(raw.variant),
            owned_string(raw.detail_url),
        )
    };
    let threat_type = match raw.threat_type {
        abi::CSRE_THREAT_MALWARE => ThreatType::Malware,
        abi::CSRE_THREAT_RISKY_APP => ThreatType::RiskyApp,
        _ => ThreatType::Unknown,
    };
    Ok(Detection {
        severity: Severity::try_from(raw.severity)
            .map_err(|_| Error::InvalidParameter(format!("severity {}", raw.severity)))?,
        threat_type,
        malware_name: name.ok_or_else(|| Error::InvalidParameter("unnamed detection".into()))?,
        variant,
        detail_url,
        target: target.map(str::to_owned),
        timestamp: raw.timestamp,
    })
}

#[allow(unsafe_code)]
unsafe extern "C" fn on_detected_trampoline(user: *mut c_void, raw: *const abi::RawDetection) -> c_int {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: `user` is the SinkState installed by `SinkState::raw`,
        // alive for the whole scan call that invokes us.
        let state = unsafe { &mut *user.cast::<SinkState<'_, '_>>() };
        // SAFETY: the engine passes a detection valid for this callback.
        let Some(raw) = (unsafe { raw.as_ref() }) else {
            return abi::CSRE_ERROR_NONE;
        };
        // SAFETY: as above.
        match unsafe { detection_from_raw(raw, state.target) } {
            Ok(detection) => {
                if state.sink.on_detected(detection) {
                    abi::CSRE_ERROR_NONE
                } else {
                    abi::CSRE_ERROR_CANCELLED
                }
            }
            Err(err) => {
                warn!(%err, "Ignoring malformed detection");
                abi::CSRE_ERROR_NONE
            }
        }
    }));
    outcome.unwrap_or_else(|_| {
        error!("Detection handler panicked, stopping scan");
        abi::CSRE_ERROR_CANCELLED
    })
}

#[allow(unsafe_code)]
unsafe extern "C" fn is_cancelled_trampoline(user: *mut c_void) -> c_int {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: see `on_detected_trampoline`.
        let state = unsafe { &*user.cast::<SinkState<'_, '_>>() };
        c_int::from(state.sink.is_cancelled())
    }))
    .unwrap_or(1)
}
