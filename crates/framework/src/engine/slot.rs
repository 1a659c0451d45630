#![forbid(unsafe_code)]

use super::{Engine, EngineSettings};
use crate::error::Error;
use crate::plugin::{self, LibraryOpener};
use crate::protocol::EngineInfo;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// The daemon's handle on the currently opened engine of one kind.
///
/// Scans hold an `Arc` to the engine they started with, so replacing or
/// closing the slot never pulls an engine out from under a running scan.
#[derive(Debug)]
pub struct EngineSlot<E> {
    path: PathBuf,
    settings: EngineSettings,
    current: RwLock<Option<Arc<E>>>,
    enabled: AtomicBool,
}

impl<E: Engine> EngineSlot<E> {
    pub fn new(path: impl Into<PathBuf>, settings: EngineSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            current: RwLock::new(None),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the library and open a fresh engine, replacing the current one.
    /// On failure the slot is left empty.
    ///
    /// The current engine is dropped before the library is loaded again; the
    /// dynamic loader hands back an object that is still mapped under the
    /// same path instead of reading the file. While running scans hold the
    /// current engine it cannot be unloaded, so the open fails with
    /// [`Error::Busy`] and the current engine stays in place.
    pub fn open(&self, opener: &dyn LibraryOpener) -> Result<(), Error> {
        let mut current = self.current.write();
        if let Some(engine) = current.as_ref()
            && Arc::strong_count(engine) > 1
        {
            warn!(
                kind = %E::KIND,
                scans = Arc::strong_count(engine) - 1,
                "Engine in use, not reloading"
            );
            return Err(Error::Busy);
        }
        let replaced = current.take().is_some();

        let opened = plugin::load::<E::VTable>(opener, &self.path)
            .and_then(plugin::PluginLoad::into_result)
            .and_then(|plugin| E::open(plugin, &self.settings));
        match opened {
            Ok(engine) => {
                *current = Some(Arc::new(engine));
                info!(kind = %E::KIND, path = %self.path.display(), replaced, "Engine opened");
                Ok(())
            }
            Err(err) => {
                warn!(
                    kind = %E::KIND,
                    path = %self.path.display(),
                    replaced,
                    %err,
                    "Failed to open engine"
                );
                Err(err)
            }
        }
    }

    pub fn close(&self) {
        if self.current.write().take().is_some() {
            info!(kind = %E::KIND, "Engine closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!(kind = %E::KIND, enabled, "Engine state changed");
    }

    fn loaded(&self) -> Result<Arc<E>, Error> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| Error::NotImplemented(format!("no {} engine is loaded", E::KIND)))
    }

    /// The engine to run a scan with.
    pub fn acquire(&self) -> Result<Arc<E>, Error> {
        let engine = self.loaded()?;
        if !self.is_enabled() {
            return Err(Error::EngineDisabled);
        }
        Ok(engine)
    }

    /// Metadata of the loaded engine. Works while the engine is disabled.
    pub fn info(&self) -> Result<EngineInfo, Error> {
        let info = self.loaded()?.info()?;
        Ok(EngineInfo {
            enabled: self.is_enabled(),
            ..info
        })
    }
}
