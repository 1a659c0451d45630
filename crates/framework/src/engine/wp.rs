#![deny(unsafe_code)]

use super::{
    CallLock, Context, Engine, EngineSettings, describe_with, ensure_api_version,
    query_activated, query_info, read_string, translate,
};
use crate::error::Error;
use crate::plugin::{Plugin, WpVTable};
use crate::protocol::{Detection, EngineInfo, EngineKind, Severity, ThreatType};
use csr_abi as abi;
use std::ffi::{CString, c_int, c_void};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Unverified,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn from_native(level: c_int) -> Option<Self> {
        match level {
            abi::CSRE_WP_RISK_UNVERIFIED => Some(Self::Unverified),
            abi::CSRE_WP_RISK_LOW => Some(Self::Low),
            abi::CSRE_WP_RISK_MEDIUM => Some(Self::Medium),
            abi::CSRE_WP_RISK_HIGH => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unverified => "unverified",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// An engine's opinion about one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRating {
    pub url: String,
    pub risk: RiskLevel,
    pub detail_url: Option<String>,
}

impl UrlRating {
    /// The finding reported to the client, if the URL should be flagged.
    ///
    /// Unverified URLs are let through; anything rated above low is flagged
    /// with a matching severity.
    pub fn detection(&self) -> Option<Detection> {
        let severity = match self.risk {
            RiskLevel::Unverified | RiskLevel::Low => return None,
            RiskLevel::Medium => Severity::Medium,
            RiskLevel::High => Severity::High,
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as i64);
        Some(Detection {
            severity,
            threat_type: ThreatType::RiskyUrl,
            malware_name: format!("{} risk url", self.risk),
            variant: None,
            detail_url: self.detail_url.clone(),
            target: Some(self.url.clone()),
            timestamp,
        })
    }
}

/// Vendor owned check result, destroyed on drop.
struct CheckResult<'a> {
    handle: *mut c_void,
    vtable: &'a WpVTable,
}

impl Drop for CheckResult<'_> {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        // SAFETY: the handle came from `check_url` and is destroyed once.
        let code = unsafe { (self.vtable.result_destroy)(self.handle) };
        if code != abi::CSRE_ERROR_NONE {
            debug!(code, "Failed to destroy url check result");
        }
    }
}

/// An opened web protection engine.
pub struct WpEngine {
    ctx: Context,
    calls: CallLock,
    plugin: Plugin<WpVTable>,
}

impl WpEngine {
    fn vtable(&self) -> &WpVTable {
        self.plugin.vtable()
    }

    fn describe(&self, code: c_int) -> Option<String> {
        describe_with(self.vtable().get_error_string, code)
    }

    fn check(&self, code: c_int) -> Result<(), Error> {
        translate(code, |code| self.describe(code))
    }

    fn ensure_activated(&self) -> Result<(), Error> {
        if query_activated(self.ctx, self.vtable().get_activated, |code| self.describe(code))? {
            Ok(())
        } else {
            Err(Error::EngineNotActivated)
        }
    }

    fn set_config(&self, key: &str, value: &str) -> Result<(), Error> {
        let invalid = |_| Error::InvalidParameter(format!("option {key:?} contains a NUL byte"));
        let c_key = CString::new(key).map_err(invalid)?;
        let c_value = CString::new(value).map_err(invalid)?;
        #[allow(unsafe_code)]
        // SAFETY: both strings are NUL terminated and outlive the call.
        let code = unsafe { (self.vtable().set_config)(self.ctx.0, c_key.as_ptr(), c_value.as_ptr()) };
        self.check(code)
    }

    pub fn check_url(&self, url: &str) -> Result<UrlRating, Error> {
        let c_url = CString::new(url)
            .map_err(|_| Error::InvalidParameter("url contains a NUL byte".into()))?;

        let _serial = self.calls.hold();
        self.ensure_activated()?;
        let mut handle = std::ptr::null_mut();
        #[allow(unsafe_code)]
        // SAFETY: `c_url` is NUL terminated, `handle` a valid out pointer.
        let code = unsafe { (self.vtable().check_url)(self.ctx.0, c_url.as_ptr(), &mut handle) };
        self.check(code)?;
        if handle.is_null() {
            return Err(Error::EngineInternal {
                vendor_code: None,
                description: Some("engine returned no result".into()),
            });
        }
        let result = CheckResult {
            handle,
            vtable: self.vtable(),
        };

        let mut level: c_int = 0;
        #[allow(unsafe_code)]
        // SAFETY: the handle is live until `result` drops.
        let code = unsafe { (self.vtable().result_get_risk_level)(result.handle, &mut level) };
        self.check(code)?;
        let risk = RiskLevel::from_native(level).ok_or_else(|| Error::EngineInternal {
            vendor_code: None,
            description: Some(format!("unknown risk level {level}")),
        })?;

        #[allow(unsafe_code)]
        // SAFETY: as above; the buffer comes from a live Vec.
        let detail_url = read_string(|buf, cap| unsafe {
            (self.vtable().result_get_detailed_url)(result.handle, buf, cap)
        });
        let detail_url = match detail_url {
            Ok(detail_url) => detail_url,
            Err(code) => {
                self.check(code)?;
                None
            }
        };

        Ok(UrlRating {
            url: url.to_owned(),
            risk,
            detail_url,
        })
    }
}

impl Engine for WpEngine {
    type VTable = WpVTable;
    const KIND: EngineKind = EngineKind::WebProtection;
    const API_VERSION: &'static str = abi::WP_API_VERSION;

    fn open(plugin: Plugin<WpVTable>, settings: &EngineSettings) -> Result<Self, Error> {
        let mut raw = std::ptr::null_mut();
        #[allow(unsafe_code)]
        // SAFETY: `raw` is a valid out pointer.
        let code = unsafe { (plugin.vtable().init)(&mut raw) };
        translate(code, |code| describe_with(plugin.vtable().get_error_string, code))?;
        if raw.is_null() {
            return Err(Error::EngineInternal {
                vendor_code: None,
                description: Some("engine returned a null context".into()),
            });
        }

        let engine = Self {
            ctx: Context(raw),
            calls: CallLock::new(settings.serialize_calls),
            plugin,
        };
        for (key, value) in &settings.options {
            engine.set_config(key, value)?;
        }
        ensure_api_version::<Self>(&engine.info()?)?;
        debug!(path = %engine.plugin.path().display(), "Opened web protection engine");
        Ok(engine)
    }

    fn info(&self) -> Result<EngineInfo, Error> {
        let _serial = self.calls.hold();
        let vtable = self.vtable();
        query_info(self.ctx, vtable.get_engine_info, vtable.get_activated, |code| {
            self.describe(code)
        })
    }
}

impl Drop for WpEngine {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        // SAFETY: the context came from `init` and is released exactly once.
        let code = unsafe { (self.vtable().uninit)(self.ctx.0) };
        if let Err(err) = self.check(code) {
            warn!(%err, "Failed to release web protection engine");
        }
    }
}

impl std::fmt::Debug for WpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WpEngine")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rating(risk: RiskLevel) -> UrlRating {
        UrlRating {
            url: "http://example.com/x".into(),
            risk,
            detail_url: Some("http://vendor.example/why".into()),
        }
    }

    #[test]
    fn low_and_unverified_urls_pass() {
        assert_eq!(rating(RiskLevel::Low).detection(), None);
        assert_eq!(rating(RiskLevel::Unverified).detection(), None);
    }

    #[test]
    fn risky_urls_are_flagged_with_matching_severity() {
        let medium = rating(RiskLevel::Medium).detection().unwrap();
        assert_eq!(medium.severity, Severity::Medium);
        assert_eq!(medium.threat_type, ThreatType::RiskyUrl);
        assert_eq!(medium.target.as_deref(), Some("http://example.com/x"));
        assert_eq!(medium.detail_url.as_deref(), Some("http://vendor.example/why"));

        let high = rating(RiskLevel::High).detection().unwrap();
        assert_eq!(high.severity, Severity::High);
    }

    #[test]
    fn native_levels_map_in_order() {
        assert_eq!(RiskLevel::from_native(abi::CSRE_WP_RISK_HIGH), Some(RiskLevel::High));
        assert_eq!(RiskLevel::from_native(42), None);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
