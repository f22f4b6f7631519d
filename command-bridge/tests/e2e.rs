use std::{
    io::{BufRead, BufReader},
    net::SocketAddr,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, unbounded};
use serde_json::{Value, json};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn cli_serve_and_send_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("command-bridge");

    let mut server = ServerProcess::spawn(&binary)?;
    let addr = server.read_addr()?;

    let pong = send(&binary, &addr, &["ping"])?;
    assert_eq!(pong, json!({"ok": true, "message": "pong"}));

    // State set by one client process is visible to the next.
    let tempo = send(&binary, &addr, &["set_tempo", "bpm=128"])?;
    assert_eq!(tempo["bpm"], json!(128.0));
    send(&binary, &addr, &["create_track", "name=Lead Synth"])?;
    let info = send(&binary, &addr, &["get_session_info"])?;
    assert_eq!(info["tempo"], json!(128.0));
    assert_eq!(info["num_tracks"], json!(1));

    // Failed commands still print the reply but exit non-zero.
    let output = assert_cmd::Command::new(&*binary)
        .args(["--log-level", "off", "send", "--server", &addr, "set_tempo", "bpm=5"])
        .output()
        .context("failed to run send")?;
    assert!(!output.status.success());
    let reply: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(reply["error"], json!("BPM must be between 20 and 999"));

    server.stop();
    Ok(())
}

#[cfg(unix)]
#[test]
fn interrupt_stops_the_host_and_exits_cleanly() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("command-bridge");

    let mut server = ServerProcess::spawn(&binary)?;
    let addr = server.read_addr()?;
    send(&binary, &addr, &["ping"])?;

    let status = server.interrupt()?;
    assert!(status.success(), "server exited with {status}");
    server.expect_line("host loop stopped")?;
    server.expect_line("bridge stopped")?;
    Ok(())
}

fn send(binary: &Path, addr: &str, args: &[&str]) -> Result<Value> {
    let assert = assert_cmd::Command::new(binary)
        .args(["--log-level", "off", "send", "--server", addr])
        .args(args)
        .assert()
        .success();
    let stdout = &assert.get_output().stdout;
    serde_json::from_slice(stdout).with_context(|| {
        format!(
            "send printed something other than a reply: {}",
            String::from_utf8_lossy(stdout)
        )
    })
}

/// The `serve` process; killed when dropped.
struct ServerProcess {
    child: Child,
    lines: Receiver<String>,
}

impl ServerProcess {
    fn spawn(binary: &Path) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["serve", "--listen", "127.0.0.1:0"])
            .env("RUST_LOG", "info")
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn server")?;
        let stdout = child
            .stdout
            .take()
            .context("server stdout missing after spawn")?;

        // Keep draining so the pipe never fills.
        let (line_tx, lines) = unbounded();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self { child, lines })
    }

    fn read_addr(&self) -> Result<String> {
        loop {
            let line = self
                .lines
                .recv_timeout(READ_TIMEOUT)
                .context("server did not emit its listening address")?;
            if !line.contains("listening on") {
                continue;
            }
            return line
                .split_whitespace()
                .filter_map(|token| token.parse::<SocketAddr>().ok())
                .last()
                .map(|addr| addr.to_string())
                .ok_or_else(|| anyhow!("server banner missing socket: {line}"));
        }
    }

    /// Waits for a log line containing `needle`.
    fn expect_line(&self, needle: &str) -> Result<String> {
        loop {
            let line = self
                .lines
                .recv_timeout(READ_TIMEOUT)
                .with_context(|| format!("server never logged '{needle}'"))?;
            if line.contains(needle) {
                return Ok(line);
            }
        }
    }

    /// Delivers SIGINT, as Ctrl-C in a terminal would, and waits for exit.
    #[cfg(unix)]
    fn interrupt(&mut self) -> Result<ExitStatus> {
        let status = Command::new("kill")
            .args(["-INT", &self.child.id().to_string()])
            .status()
            .context("failed to run kill")?;
        anyhow::ensure!(status.success(), "kill -INT failed: {status}");

        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            anyhow::ensure!(Instant::now() < deadline, "server ignored SIGINT");
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
