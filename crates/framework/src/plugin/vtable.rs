#![deny(unsafe_code)]

use csr_abi as abi;
use std::ffi::c_void;

/// A table of engine entry points resolved from a library.
pub trait VTable: Sized + Send + Sync + 'static {
    /// Names of the symbols, in the order `from_symbols` expects them.
    const SYMBOLS: &'static [&'static str];

    /// # Safety
    ///
    /// `symbols` must hold one non-null address per entry of [`Self::SYMBOLS`],
    /// each pointing to a function with the signature the engine ABI assigns
    /// to that name.
    #[allow(unsafe_code)]
    unsafe fn from_symbols(symbols: &[*const c_void]) -> Self;
}

/// # Safety
///
/// `address` must point to a function of type `F`.
#[allow(unsafe_code)]
unsafe fn cast<F: Copy>(address: *const c_void) -> F {
    debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
    // SAFETY: function pointers and data pointers have the same size and
    // representation on every supported target.
    unsafe { std::mem::transmute_copy(&address) }
}

#[derive(Debug, Clone, Copy)]
pub struct CsVTable {
    pub open: abi::CsOpenFn,
    pub close: abi::CsCloseFn,
    pub get_error_string: abi::GetErrorStringFn,
    pub scan_data: abi::CsScanDataFn,
    pub scan_file: abi::CsScanFileFn,
    pub get_engine_info: abi::GetEngineInfoFn,
    pub get_activated: abi::GetActivatedFn,
}

impl VTable for CsVTable {
    const SYMBOLS: &'static [&'static str] = &abi::CS_SYMBOLS;

    #[allow(unsafe_code)]
    unsafe fn from_symbols(symbols: &[*const c_void]) -> Self {
        // SAFETY: forwarded from the caller, indices follow CS_SYMBOLS.
        unsafe {
            Self {
                open: cast(symbols[0]),
                close: cast(symbols[1]),
                get_error_string: cast(symbols[2]),
                scan_data: cast(symbols[3]),
                scan_file: cast(symbols[4]),
                get_engine_info: cast(symbols[5]),
                get_activated: cast(symbols[6]),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WpVTable {
    pub init: abi::WpInitFn,
    pub uninit: abi::WpUninitFn,
    pub set_config: abi::WpSetConfigFn,
    pub check_url: abi::WpCheckUrlFn,
    pub result_get_risk_level: abi::WpResultGetRiskLevelFn,
    pub result_get_detailed_url: abi::WpResultGetDetailedUrlFn,
    pub result_destroy: abi::WpResultDestroyFn,
    pub get_error_string: abi::GetErrorStringFn,
    pub get_engine_info: abi::GetEngineInfoFn,
    pub get_activated: abi::GetActivatedFn,
}

impl VTable for WpVTable {
    const SYMBOLS: &'static [&'static str] = &abi::WP_SYMBOLS;

    #[allow(unsafe_code)]
    unsafe fn from_symbols(symbols: &[*const c_void]) -> Self {
        // SAFETY: forwarded from the caller, indices follow WP_SYMBOLS.
        unsafe {
            Self {
                init: cast(symbols[0]),
                uninit: cast(symbols[1]),
                set_config: cast(symbols[2]),
                check_url: cast(symbols[3]),
                result_get_risk_level: cast(symbols[4]),
                result_get_detailed_url: cast(symbols[5]),
                result_destroy: cast(symbols[6]),
                get_error_string: cast(symbols[7]),
                get_engine_info: cast(symbols[8]),
                get_activated: cast(symbols[9]),
            }
        }
    }
}
