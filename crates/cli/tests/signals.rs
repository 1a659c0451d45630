#![forbid(unsafe_code)]

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn write_config(path: &Path, engines: &Path) -> io::Result<()> {
    let contents = format!(
        "[engines.content_screening]\npath = \"{cs}\"\n\n\
[engines.web_protection]\npath = \"{wp}\"\n",
        cs = engines.join("libcs.so").display(),
        wp = engines.join("libwp.so").display(),
    );
    fs::write(path, contents)
}

fn spawn(config: &Path, sockets: &Path, idle_timeout: u32) -> io::Result<Child> {
    Command::new(env!("CARGO_BIN_EXE_csrd"))
        .arg("--conffile")
        .arg(config)
        .arg("--socket-dir")
        .arg(sockets)
        .arg("--idle-timeout")
        .arg(idle_timeout.to_string())
        .arg("-v")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

fn wait_for_socket(path: &Path) {
    let start = Instant::now();
    while !path.exists() && start.elapsed() < Duration::from_secs(10) {
        sleep(Duration::from_millis(20));
    }
}

fn wait_for_output(mut child: Child) -> io::Result<Output> {
    let start = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if start.elapsed() > Duration::from_secs(10) {
            let _ = child.kill();
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "csrd process did not exit",
            ));
        }
        sleep(Duration::from_millis(50));
    }
    child.wait_with_output()
}

fn combined(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

#[test]
fn signals_trigger_dump_reopen_and_shutdown() -> io::Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("config.toml");
    let sockets = dir.path().join("run");
    write_config(&config_path, dir.path())?;

    let child = spawn(&config_path, &sockets, 0)?;
    let pid = Pid::from_raw(child.id() as i32);
    wait_for_socket(&sockets.join("admin.socket"));
    sleep(Duration::from_millis(200));

    kill(pid, Signal::SIGUSR1).ok();
    sleep(Duration::from_millis(300));

    kill(pid, Signal::SIGHUP).ok();
    sleep(Duration::from_millis(300));

    kill(pid, Signal::SIGTERM).ok();
    let output = wait_for_output(child)?;
    let combined = combined(&output);

    assert!(output.status.success(), "{combined}");
    assert!(combined.contains("Dispatcher status"), "{combined}");
    assert!(combined.contains("Engine status"), "{combined}");
    assert!(combined.contains("engines reopened"), "{combined}");
    assert!(combined.contains("daemon exited"), "{combined}");
    assert!(!sockets.join("cs.socket").exists());
    assert!(!sockets.join("admin.socket").exists());

    Ok(())
}

#[test]
fn idle_daemon_exits_on_its_own() -> io::Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("config.toml");
    write_config(&config_path, dir.path())?;

    let child = spawn(&config_path, &dir.path().join("run"), 1)?;
    let output = wait_for_output(child)?;
    let combined = combined(&output);

    assert!(output.status.success(), "{combined}");
    assert!(combined.contains("Idle, shutting down"), "{combined}");

    Ok(())
}
