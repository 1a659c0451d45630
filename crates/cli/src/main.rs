use clap::Parser;
use config::Config;
use csr_daemon::{
    cli::Cli,
    signals::{SignalEvent, wait_for_signal},
};
use csr_framework::{Daemon, plugin::DlOpener};
use flume::bounded;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `CSR_LOG` can only refine levels per crate, e.g.
    // `CSR_LOG=csr_framework::transport=debug csrd -v`.
    let env_filter = EnvFilter::builder()
        .with_env_var("CSR_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let mut config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        _ => {
            let mut candidates = glob::glob("/etc/csr/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/csr/config.toml".into());
            trace!(?candidates, "config file candidates");
            Config::load_multiple(candidates)?
        }
    };
    cli.apply(&mut config);
    debug!(?config, ?cli);

    // install signal handlers
    let (signals_tx, signals_rx) = bounded(8);
    let mut signal_handle = tokio::spawn(async move { wait_for_signal(signals_tx).await });
    let mut signals_done = false;
    let mut signals_closed = false;

    let daemon = Daemon::new(&config, Arc::new(DlOpener))?;
    let handle = daemon.handle();
    let engines = Arc::clone(daemon.engines());
    let mut daemon_handle = tokio::task::spawn_blocking(move || daemon.run());

    loop {
        tokio::select! {
            // the dispatcher returns when stopped or idle
            res = &mut daemon_handle => {
                let res = res?;
                if let Err(err) = &res {
                    error!("error happened in dispatcher: {}", err);
                }
                res?;
                info!("daemon exited");
                return Ok(());
            }

            // bubble up any errors from the signal handlers
            res = &mut signal_handle, if !signals_done => {
                signals_done = true;
                let res = res?;
                if let Err(err) = &res {
                    error!("error happened during handling signals: {}", err);
                }
                res?;
            }

            // the sender goes away once a shutdown signal was forwarded
            event_res = signals_rx.recv_async(), if !signals_closed => {
                let Ok(event) = event_res else {
                    signals_closed = true;
                    continue;
                };
                debug!(?event, "Received signal event");

                match event {
                    SignalEvent::Shutdown => {
                        info!("shutdown requested");
                        handle.stop();
                    }
                    SignalEvent::ReopenEngines => {
                        let engines = Arc::clone(&engines);
                        tokio::task::spawn_blocking(move || engines.reopen()).await?;
                        info!("engines reopened");
                    }
                    SignalEvent::DumpStatus => handle.request_status(),
                }
            }
        }
    }
}
