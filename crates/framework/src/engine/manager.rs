#![forbid(unsafe_code)]

use super::{CsEngine, EngineSettings, EngineSlot, WpEngine};
use crate::error::Error;
use crate::plugin::LibraryOpener;
use crate::protocol::{EngineInfo, EngineKind};
use std::sync::Arc;
use tracing::{info, warn};

/// Both engine slots plus the opener used to (re)load them.
pub struct EngineManager {
    opener: Arc<dyn LibraryOpener>,
    content: EngineSlot<CsEngine>,
    web: EngineSlot<WpEngine>,
    load_on_start: [(EngineKind, bool); 2],
}

macro_rules! with_slot {
    ($manager:expr, $kind:expr, |$slot:ident| $body:expr) => {
        match $kind {
            EngineKind::ContentScreening => {
                let $slot = &$manager.content;
                $body
            }
            EngineKind::WebProtection => {
                let $slot = &$manager.web;
                $body
            }
        }
    };
}

impl EngineManager {
    pub fn new(config: &config::Engines, opener: Arc<dyn LibraryOpener>) -> Self {
        let settings = |engine: &config::Engine| EngineSettings {
            serialize_calls: config.serialize_calls,
            options: engine.options.clone(),
        };
        Self {
            opener,
            content: EngineSlot::new(
                &config.content_screening.path,
                settings(&config.content_screening),
            ),
            web: EngineSlot::new(
                &config.web_protection.path,
                settings(&config.web_protection),
            ),
            load_on_start: [
                (
                    EngineKind::ContentScreening,
                    config.content_screening.load_on_start,
                ),
                (EngineKind::WebProtection, config.web_protection.load_on_start),
            ],
        }
    }

    pub fn content(&self) -> &EngineSlot<CsEngine> {
        &self.content
    }

    pub fn web(&self) -> &EngineSlot<WpEngine> {
        &self.web
    }

    pub fn open(&self, kind: EngineKind) -> Result<(), Error> {
        with_slot!(self, kind, |slot| slot.open(&*self.opener))
    }

    pub fn close(&self, kind: EngineKind) {
        with_slot!(self, kind, |slot| slot.close())
    }

    pub fn info(&self, kind: EngineKind) -> Result<EngineInfo, Error> {
        with_slot!(self, kind, |slot| slot.info())
    }

    pub fn set_enabled(&self, kind: EngineKind, enabled: bool) {
        with_slot!(self, kind, |slot| slot.set_enabled(enabled))
    }

    pub fn is_open(&self, kind: EngineKind) -> bool {
        with_slot!(self, kind, |slot| slot.is_open())
    }

    pub fn is_enabled(&self, kind: EngineKind) -> bool {
        with_slot!(self, kind, |slot| slot.is_enabled())
    }

    /// Open every engine configured to load on start. An engine that fails
    /// to open stays unavailable; the daemon keeps running without it.
    pub fn open_configured(&self) {
        for (kind, load) in self.load_on_start {
            if load && let Err(err) = self.open(kind) {
                warn!(%kind, %err, "Engine unavailable at start");
            }
        }
    }

    /// Reload every engine that is open or configured to load on start, e.g.
    /// after a vendor update replaced the libraries.
    pub fn reopen(&self) {
        for (kind, load) in self.load_on_start {
            if load || self.is_open(kind) {
                match self.open(kind) {
                    Ok(()) => info!(%kind, "Engine reopened"),
                    Err(Error::Busy) => warn!(%kind, "Engine busy, kept the loaded library"),
                    Err(err) => warn!(%kind, %err, "Engine unavailable after reopen"),
                }
            }
        }
    }

    pub fn dump_status(&self) {
        for kind in EngineKind::ALL {
            info!(
                %kind,
                open = self.is_open(kind),
                enabled = self.is_enabled(kind),
                "Engine status"
            );
        }
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("content", &self.content)
            .field("web", &self.web)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use crate::plugin::DlOpener;

    #[test]
    fn engines_failing_at_start_stay_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config::Engines::default();
        config.content_screening.path = dir.path().join("libcs.so");
        config.content_screening.load_on_start = true;
        config.web_protection.path = dir.path().join("libwp.so");
        config.web_protection.load_on_start = true;

        let manager = EngineManager::new(&config, Arc::new(DlOpener));
        manager.open_configured();
        for kind in EngineKind::ALL {
            assert!(!manager.is_open(kind));
            let err = manager.info(kind).unwrap_err();
            assert_eq!(err.code(), code::NOT_IMPLEMENTED);
        }
    }
}
