#![deny(unsafe_code)]

use super::{
    CallLock, Context, Engine, EngineSettings, ScanSink, SinkState, describe_with,
    ensure_api_version, query_activated, query_info, translate,
};
use crate::error::Error;
use crate::plugin::{CsVTable, Plugin};
use crate::protocol::{EngineInfo, EngineKind};
use csr_abi as abi;
use std::ffi::{CString, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// An opened content screening engine.
pub struct CsEngine {
    ctx: Context,
    calls: CallLock,
    plugin: Plugin<CsVTable>,
}

impl CsEngine {
    fn vtable(&self) -> &CsVTable {
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

    /// Scan an in-memory buffer, reporting findings to `sink`.
    pub fn scan_data(&self, data: &[u8], sink: &mut dyn ScanSink) -> Result<(), Error> {
        let _serial = self.calls.hold();
        self.ensure_activated()?;
        let mut state = SinkState { sink, target: None };
        let raw_sink = state.raw();
        #[allow(unsafe_code)]
        // SAFETY: `data` and `raw_sink` outlive the call; the sink's user
        // pointer refers to `state`, which is not touched until it returns.
        let code = unsafe {
            (self.vtable().scan_data)(self.ctx.0, data.as_ptr(), data.len(), &raw_sink)
        };
        self.check(code)
    }

    /// Scan the file at `path`. Findings carry the path as their target.
    pub fn scan_file(&self, path: &Path, sink: &mut dyn ScanSink) -> Result<(), Error> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::InvalidParameter("path contains a NUL byte".into()))?;
        let target = path.to_string_lossy().into_owned();

        let _serial = self.calls.hold();
        self.ensure_activated()?;
        let mut state = SinkState {
            sink,
            target: Some(target.as_str()),
        };
        let raw_sink = state.raw();
        #[allow(unsafe_code)]
        // SAFETY: as in `scan_data`; `c_path` is NUL terminated.
        let code = unsafe { (self.vtable().scan_file)(self.ctx.0, c_path.as_ptr(), &raw_sink) };
        self.check(code)
    }
}

impl Engine for CsEngine {
    type VTable = CsVTable;
    const KIND: EngineKind = EngineKind::ContentScreening;
    const API_VERSION: &'static str = abi::CS_API_VERSION;

    fn open(plugin: Plugin<CsVTable>, settings: &EngineSettings) -> Result<Self, Error> {
        let mut raw = std::ptr::null_mut();
        #[allow(unsafe_code)]
        // SAFETY: `raw` is a valid out pointer.
        let code = unsafe { (plugin.vtable().open)(&mut raw) };
        translate(code, |code| describe_with(plugin.vtable().get_error_string, code))?;
        if raw.is_null() {
            return Err(Error::EngineInternal {
                vendor_code: None,
                description: Some("engine returned a null context".into()),
            });
        }
        if !settings.options.is_empty() {
            warn!(
                path = %plugin.path().display(),
                "Content screening engines take no options, ignoring them"
            );
        }

        // From here on Drop closes the context.
        let engine = Self {
            ctx: Context(raw),
            calls: CallLock::new(settings.serialize_calls),
            plugin,
        };
        ensure_api_version::<Self>(&engine.info()?)?;
        debug!(path = %engine.plugin.path().display(), "Opened content screening engine");
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

impl Drop for CsEngine {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        // SAFETY: the context came from `open` and is closed exactly once.
        let code = unsafe { (self.vtable().close)(self.ctx.0) };
        if let Err(err) = self.check(code) {
            warn!(%err, "Failed to close content screening engine");
        }
    }
}

impl std::fmt::Debug for CsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsEngine")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}
