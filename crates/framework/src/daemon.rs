#![forbid(unsafe_code)]

//! Wiring of engines, services and sockets into a runnable daemon.

use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::engine::EngineManager;
use crate::error::Error;
use crate::plugin::LibraryOpener;
use crate::service::{AdminService, ScanService};
use crate::task::TaskRegistry;
use crate::transport::{GrantPolicy, SocketTable};
use config::Config;
use std::sync::Arc;
use tracing::info;

pub struct Daemon {
    dispatcher: Dispatcher,
    engines: Arc<EngineManager>,
    tasks: Arc<TaskRegistry>,
    sockets: SocketTable,
}

impl Daemon {
    /// Open the configured engines and bind every served socket.
    pub fn new(config: &Config, opener: Arc<dyn LibraryOpener>) -> Result<Self, Error> {
        let sockets = SocketTable::from_config(&config.sockets);
        let mut dispatcher = Dispatcher::new(
            &config.service,
            Arc::new(GrantPolicy::new(config.access.clone())),
        )?;

        let engines = Arc::new(EngineManager::new(&config.engines, opener));
        engines.open_configured();

        let tasks = Arc::new(TaskRegistry::new(
            dispatcher.signal(),
            config.service.max_tasks_per_connection,
        ));
        dispatcher.register(
            &sockets,
            Arc::new(ScanService::new(Arc::clone(&engines), Arc::clone(&tasks))),
        )?;
        dispatcher.register(&sockets, Arc::new(AdminService::new(Arc::clone(&engines))))?;

        info!(
            content_screening = engines.content().is_open(),
            web_protection = engines.web().is_open(),
            "Daemon ready"
        );
        Ok(Self {
            dispatcher,
            engines,
            tasks,
            sockets,
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    pub fn engines(&self) -> &Arc<EngineManager> {
        &self.engines
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    pub fn set_idle_checker(&mut self, checker: impl Fn() -> bool + Send + 'static) {
        self.dispatcher.set_idle_checker(checker);
    }

    /// Serve until stopped or idle. Blocks the calling thread.
    pub fn run(self) -> Result<(), Error> {
        self.dispatcher.run()
    }
}
