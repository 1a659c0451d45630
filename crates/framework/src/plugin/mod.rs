#![deny(unsafe_code)]

//! Loading vendor engine libraries.
//!
//! A library is opened through a [`LibraryOpener`], every symbol of a
//! [`VTable`] is resolved, and the result is kept together with the library
//! in a [`Plugin`]. Any reason the library cannot be used is reported as
//! [`PluginLoad::Unavailable`]; callers surface that as "not implemented".

mod vtable;

pub use vtable::{CsVTable, VTable, WpVTable};

use crate::error::Error;
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves exported symbols of an opened library.
pub trait SymbolSource: Send + Sync {
    /// Address of `name`, `None` when it is not exported.
    fn symbol(&self, name: &str) -> Option<*const c_void>;
}

pub trait LibraryOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, Unavailable>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unavailable {
    #[error("Engine library {0} does not exist")]
    NotFound(PathBuf),

    #[error("Failed to open engine library: {0}")]
    Open(String),

    #[error("Engine library does not export {0}")]
    MissingSymbol(&'static str),

    #[error("Engine reports API {found:?}, expected {expected:?}")]
    IncompatibleAbi {
        expected: &'static str,
        found: String,
    },
}

impl From<Unavailable> for Error {
    fn from(reason: Unavailable) -> Self {
        Error::NotImplemented(reason.to_string())
    }
}

/// Opens libraries with `dlopen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DlOpener;

struct DlLibrary(Library);

impl SymbolSource for DlLibrary {
    #[allow(unsafe_code)]
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as an opaque address and only turned
        // into a function pointer by `VTable::from_symbols`.
        unsafe { self.0.get::<*const c_void>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }
}

impl LibraryOpener for DlOpener {
    #[allow(unsafe_code)]
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, Unavailable> {
        // SAFETY: engine libraries are trusted system components; running
        // their initializers is part of loading them.
        let library = unsafe { Library::new(path) }.map_err(|err| Unavailable::Open(err.to_string()))?;
        Ok(Box::new(DlLibrary(library)))
    }
}

/// A library with its resolved function table. The library stays mapped for
/// as long as the plugin lives.
pub struct Plugin<V> {
    vtable: V,
    path: PathBuf,
    _library: Box<dyn SymbolSource>,
}

impl<V> Plugin<V> {
    pub fn vtable(&self) -> &V {
        &self.vtable
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<V> std::fmt::Debug for Plugin<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("path", &self.path).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum PluginLoad<V> {
    Loaded(Plugin<V>),
    Unavailable(Unavailable),
}

impl<V> PluginLoad<V> {
    /// Collapse into a result, reporting unavailability as not implemented.
    pub fn into_result(self) -> Result<Plugin<V>, Error> {
        match self {
            Self::Loaded(plugin) => Ok(plugin),
            Self::Unavailable(reason) => Err(reason.into()),
        }
    }
}

/// Open `path` and resolve every symbol of `V`.
///
/// Only allocation failure is an error; everything else that makes the
/// library unusable is [`PluginLoad::Unavailable`].
pub fn load<V: VTable>(opener: &dyn LibraryOpener, path: &Path) -> Result<PluginLoad<V>, Error> {
    if !path.exists() {
        return Ok(PluginLoad::Unavailable(Unavailable::NotFound(path.to_path_buf())));
    }
    let library = match opener.open(path) {
        Ok(library) => library,
        Err(reason) => return Ok(PluginLoad::Unavailable(reason)),
    };

    let mut symbols = Vec::new();
    if symbols.try_reserve_exact(V::SYMBOLS.len()).is_err() {
        drop(library);
        return Err(Error::OutOfMemory);
    }
    for &name in V::SYMBOLS {
        match library.symbol(name) {
            Some(address) if !address.is_null() => symbols.push(address),
            _ => {
                debug!(path = %path.display(), symbol = name, "Engine symbol missing");
                return Ok(PluginLoad::Unavailable(Unavailable::MissingSymbol(name)));
            }
        }
    }

    #[allow(unsafe_code)]
    // SAFETY: every address is non-null and was exported under the name the
    // engine ABI assigns to the matching function type.
    let vtable = unsafe { V::from_symbols(&symbols) };
    Ok(PluginLoad::Loaded(Plugin {
        vtable,
        path: path.to_path_buf(),
        _library: library,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Serves the in-process mock engine, dropping the listed symbols.
    struct Partial(Vec<&'static str>);

    struct Table(HashMap<&'static str, *const c_void>);

    // SAFETY: the table only holds addresses of functions.
    #[allow(unsafe_code)]
    unsafe impl Send for Table {}
    #[allow(unsafe_code)]
    unsafe impl Sync for Table {}

    impl SymbolSource for Table {
        fn symbol(&self, name: &str) -> Option<*const c_void> {
            self.0.get(name).copied()
        }
    }

    impl LibraryOpener for Partial {
        fn open(&self, _: &Path) -> Result<Box<dyn SymbolSource>, Unavailable> {
            let table = mock_engine::cs_symbols(mock_engine::Profile::Standard)
                .into_iter()
                .chain(mock_engine::wp_symbols(mock_engine::Profile::Standard))
                .filter(|(name, _)| !self.0.contains(name))
                .collect();
            Ok(Box::new(Table(table)))
        }
    }

    struct Refuse;

    impl LibraryOpener for Refuse {
        fn open(&self, _: &Path) -> Result<Box<dyn SymbolSource>, Unavailable> {
            Err(Unavailable::Open("bad ELF header".into()))
        }
    }

    fn plugin_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("libengine.so");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    #[test]
    fn complete_library_loads() {
        let (_dir, path) = plugin_file();
        let plugin = load::<CsVTable>(&Partial(vec![]), &path)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(plugin.path(), path);
        assert!(matches!(
            load::<WpVTable>(&Partial(vec![]), &path).unwrap(),
            PluginLoad::Loaded(_)
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.so");
        match load::<CsVTable>(&Partial(vec![]), &path).unwrap() {
            PluginLoad::Unavailable(Unavailable::NotFound(missing)) => assert_eq!(missing, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_symbol_is_unavailable() {
        let (_dir, path) = plugin_file();
        let load = load::<CsVTable>(&Partial(vec!["csre_cs_scan_file"]), &path).unwrap();
        assert!(matches!(
            load,
            PluginLoad::Unavailable(Unavailable::MissingSymbol("csre_cs_scan_file"))
        ));
        let err = load.into_result().unwrap_err();
        assert_eq!(err.code(), crate::error::code::NOT_IMPLEMENTED);
    }

    #[test]
    fn open_failure_is_unavailable() {
        let (_dir, path) = plugin_file();
        assert!(matches!(
            load::<WpVTable>(&Refuse, &path).unwrap(),
            PluginLoad::Unavailable(Unavailable::Open(_))
        ));
    }

    #[test]
    fn dlopen_of_garbage_is_unavailable() {
        let (_dir, path) = plugin_file();
        assert!(matches!(
            load::<CsVTable>(&DlOpener, &path).unwrap(),
            PluginLoad::Unavailable(Unavailable::Open(_))
        ));
    }
}
