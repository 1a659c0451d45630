#![allow(dead_code)]

use config::{Config, Sockets};
use csr_framework::engine::EngineManager;
use csr_framework::task::TaskRegistry;
use csr_framework::plugin::{LibraryOpener, SymbolSource, Unavailable};
use csr_framework::transport::{SockId, SocketTable};
use csr_framework::{Client, DispatcherHandle, Error};
use mock_engine::{Profile, cs_symbols, wp_symbols};
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;

/// Serves the mock engine linked into the test binary. The engine file only
/// has to exist; its contents pick the variant:
///
/// * empty: the standard engine
/// * `inactive`: reports not activated
/// * `legacy`: reports an unknown API version
/// * `missing <symbol>`: does not export `<symbol>`
pub struct MockOpener;

struct Symbols(HashMap<&'static str, usize>);

impl SymbolSource for Symbols {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        self.0.get(name).map(|&address| address as *const c_void)
    }
}

impl LibraryOpener for MockOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, Unavailable> {
        let variant =
            std::fs::read_to_string(path).map_err(|err| Unavailable::Open(err.to_string()))?;
        let variant = variant.trim();
        let profile = match variant {
            "inactive" => Profile::Inactive,
            "legacy" => Profile::LegacyApi,
            _ => Profile::Standard,
        };
        let missing = variant.strip_prefix("missing ");
        let symbols = cs_symbols(profile)
            .into_iter()
            .chain(wp_symbols(profile))
            .filter(|(name, _)| Some(*name) != missing)
            .map(|(name, address)| (name, address as usize))
            .collect();
        Ok(Box::new(Symbols(symbols)))
    }
}

/// A daemon serving sockets inside a temporary directory.
pub struct TestDaemon {
    pub dir: TempDir,
    pub sockets: SocketTable,
    pub engines: Arc<EngineManager>,
    pub tasks: Arc<TaskRegistry>,
    handle: DispatcherHandle,
    thread: Option<JoinHandle<Result<(), Error>>>,
}

impl TestDaemon {
    pub fn start() -> Self {
        Self::with(|_| {})
    }

    /// Start a daemon after `configure` adjusted the configuration and
    /// wrote any engine files it wants.
    pub fn with(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sockets = Sockets::in_dir(dir.path().join("run"));
        config.engines.content_screening.path = dir.path().join("libcs.so");
        config.engines.web_protection.path = dir.path().join("libwp.so");
        config.service.idle_timeout = Duration::ZERO;
        std::fs::write(&config.engines.content_screening.path, "").unwrap();
        std::fs::write(&config.engines.web_protection.path, "").unwrap();
        configure(&mut config);

        let daemon = csr_framework::Daemon::new(&config, Arc::new(MockOpener)).unwrap();
        let sockets = daemon.sockets().clone();
        let engines = Arc::clone(daemon.engines());
        let tasks = Arc::clone(daemon.tasks());
        let handle = daemon.handle();
        let thread = std::thread::spawn(move || daemon.run());
        Self {
            dir,
            sockets,
            engines,
            tasks,
            handle,
            thread: Some(thread),
        }
    }

    pub fn cs_path(&self) -> PathBuf {
        self.dir.path().join("libcs.so")
    }

    pub fn wp_path(&self) -> PathBuf {
        self.dir.path().join("libwp.so")
    }

    pub fn client(&self, sock: SockId) -> Client {
        Client::connect(sock, &self.sockets).unwrap()
    }

    /// Stop the dispatcher and return what `run` returned.
    pub fn stop(mut self) -> Result<(), Error> {
        self.handle.stop();
        self.thread.take().map_or(Ok(()), |thread| thread.join().unwrap())
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
