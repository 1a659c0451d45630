use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// csrd: content screening and web protection daemon
///
/// csrd loads vendor scanning engines and serves scan, URL check and engine
/// administration requests over local sockets. It exits on its own after
/// being idle, so it is meant to be started on demand by socket activation.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/csr/config.toml` and `/etc/csr/config.d/*.toml`, where the latter
    /// being a glob pattern. If they don't exist, the default configuration
    /// is used.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Directory to create every socket in, overriding the configured paths.
    #[arg(short, long)]
    pub socket_dir: Option<PathBuf>,

    /// Seconds of idleness after which the daemon exits. Zero never exits.
    #[arg(short, long, value_parser = validate_idle_timeout)]
    pub idle_timeout: Option<Duration>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut config::Config) {
        if let Some(dir) = &self.socket_dir {
            config.sockets = config::Sockets {
                mode: config.sockets.mode,
                ..config::Sockets::in_dir(dir)
            };
        }
        if let Some(timeout) = self.idle_timeout {
            config.service.idle_timeout = timeout;
        }
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Validate the idle timeout in seconds.
#[inline(always)]
fn validate_idle_timeout(secs: &str) -> Result<Duration, String> {
    secs.parse::<u32>()
        .map(|secs| Duration::from_secs(secs.into()))
        .map_err(|_| format!("`{secs}` is not a valid number of seconds"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn timeout_candidates() -> impl Strategy<Value = String> {
        prop_oneof![
            2 => (0u32..3600).prop_map(|i| format!("{}", i)),
            1 => (-1000i64..=1000).prop_map(|i| format!("{}", i)),
            1 => ".*",
        ]
    }

    proptest! {
        #[test]
        fn test_validate_idle_timeout(secs in timeout_candidates()) {
            match validate_idle_timeout(&secs) {
                Ok(timeout) => prop_assert_eq!(Ok(timeout.as_secs()), secs.parse::<u64>()),
                Err(err) => {
                    let error_msg = format!("`{}` is not a valid number of seconds", secs);
                    prop_assert_eq!(err, error_msg);
                }
            }
        }
    }

    #[test]
    fn socket_dir_overrides_paths_but_keeps_mode() {
        let cli = Cli::parse_from(["csrd", "--socket-dir", "/tmp/csr-test", "--idle-timeout", "0"]);
        let mut config = config::Config::default();
        config.sockets.mode = 0o660;
        cli.apply(&mut config);
        assert_eq!(
            config.sockets.content_screening,
            PathBuf::from("/tmp/csr-test/cs.socket")
        );
        assert_eq!(config.sockets.admin, PathBuf::from("/tmp/csr-test/admin.socket"));
        assert_eq!(config.sockets.mode, 0o660);
        assert_eq!(config.service.idle_timeout, Duration::ZERO);
    }

    #[test]
    fn missing_conffile_is_rejected() {
        assert!(Cli::try_parse_from(["csrd", "--conffile", "/nonexistent/csr.toml"]).is_err());
    }
}
