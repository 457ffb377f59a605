//! NetworkManager-backed radio plane
//!
//! The secondary radio and its network are read by polling `nmcli` into a
//! `watch` snapshot; the primary radio state is the BlueZ adapter power
//! flag kept current by the radio stack.

use super::{JoinCallback, JoinOutcome, RadioConfig, RadioPlane};
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Last observed state of the secondary radio
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioSnapshot {
    pub secondary_enabled: bool,
    /// Connection active on the configured interface
    pub joined_network: Option<String>,
}

async fn run_capture(args: &[&str]) -> Result<(bool, String)> {
    let out = Command::new("nmcli")
        .args(args)
        .output()
        .await
        .context("failed to spawn nmcli")?;

    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    Ok((out.status.success(), format!("{}{}", stdout, stderr)))
}

async fn run(args: &[&str]) -> Result<String> {
    let (ok, out) = run_capture(args).await?;
    if !ok {
        bail!("nmcli {} failed: {}", args.first().unwrap_or(&""), out.trim());
    }
    Ok(out)
}

/// Run nmcli with `input` written to its stdin, keeping secrets out of argv
async fn run_with_input(args: &[&str], input: &str) -> Result<String> {
    let mut child = Command::new("nmcli")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn nmcli")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(format!("{}\n", input).as_bytes())
            .await
            .context("failed to write to nmcli")?;
    }

    let out = child.wait_with_output().await.context("failed to wait for nmcli")?;
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    if !out.status.success() {
        bail!("nmcli {} failed: {}", args.first().unwrap_or(&""), text.trim());
    }
    Ok(text)
}

/// Arguments for a join; the password is answered on stdin via `--ask`
fn join_args<'a>(name: &'a str, interface: &'a str) -> [&'a str; 7] {
    ["--ask", "device", "wifi", "connect", name, "ifname", interface]
}

/// Split one line of `nmcli -t` output, undoing its `\:` and `\\` escapes
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f WIFI radio`
pub fn parse_radio_state(output: &str) -> bool {
    output.trim().lines().next().map(str::trim) == Some("enabled")
}

/// Parse `nmcli -t -f DEVICE,STATE,CONNECTION device` for one interface
pub fn parse_device_connection(output: &str, interface: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        let [device, state, connection] = fields.as_slice() else {
            return None;
        };
        let connection = connection.trim();
        if device == interface && state == "connected" && !connection.is_empty() {
            Some(connection.to_string())
        } else {
            None
        }
    })
}

async fn read_snapshot(interface: &str) -> Result<RadioSnapshot> {
    let radio = run(&["-t", "-f", "WIFI", "radio"]).await?;
    let devices = run(&["-t", "-f", "DEVICE,STATE,CONNECTION", "device"]).await?;
    Ok(RadioSnapshot {
        secondary_enabled: parse_radio_state(&radio),
        joined_network: parse_device_connection(&devices, interface),
    })
}

/// Radio plane over NetworkManager
pub struct NmcliRadioPlane {
    config: RadioConfig,
    primary_powered: Arc<AtomicBool>,
    snapshot_tx: Arc<watch::Sender<RadioSnapshot>>,
    snapshot: watch::Receiver<RadioSnapshot>,
    poll_task: JoinHandle<()>,
}

impl NmcliRadioPlane {
    /// Start polling; `primary_powered` is the adapter power flag
    pub fn start(config: RadioConfig, primary_powered: Arc<AtomicBool>) -> Self {
        let (tx, rx) = watch::channel(RadioSnapshot::default());
        let snapshot_tx = Arc::new(tx);

        let poll_tx = snapshot_tx.clone();
        let interface = config.interface.clone();
        let period = Duration::from_millis(config.poll_interval_ms.max(100));
        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match read_snapshot(&interface).await {
                    Ok(snapshot) => {
                        poll_tx.send_if_modified(|current| {
                            if *current != snapshot {
                                info!(
                                    "[RADIO] Secondary radio {} network {:?}",
                                    if snapshot.secondary_enabled { "on" } else { "off" },
                                    snapshot.joined_network
                                );
                                *current = snapshot;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Err(e) => debug!("[RADIO] Poll failed: {:#}", e),
                }
            }
        });

        Self {
            config,
            primary_powered,
            snapshot_tx,
            snapshot: rx,
            poll_task,
        }
    }

    /// Subscribe to snapshot changes
    pub fn watch(&self) -> watch::Receiver<RadioSnapshot> {
        self.snapshot.clone()
    }
}

impl RadioPlane for NmcliRadioPlane {
    fn is_primary_radio_enabled(&self) -> bool {
        self.primary_powered.load(Ordering::SeqCst)
    }

    fn is_secondary_radio_enabled(&self) -> bool {
        self.snapshot.borrow().secondary_enabled
    }

    fn is_secondary_network_joined(&self) -> bool {
        self.snapshot.borrow().joined_network.is_some()
    }

    fn join_network(&self, name: &str, secret: &str, on_result: JoinCallback) {
        let name = name.to_string();
        let secret = secret.to_string();
        let interface = self.config.interface.clone();
        let limit = Duration::from_millis(self.config.join_timeout_ms);
        let snapshot_tx = self.snapshot_tx.clone();

        info!("[RADIO] Joining network {} on {}", name, interface);
        tokio::spawn(async move {
            let args = join_args(&name, &interface);
            let result = timeout(limit, run_with_input(&args, &secret)).await;
            let outcome = match result {
                Ok(Ok(_)) => {
                    snapshot_tx.send_modify(|s| s.joined_network = Some(name.clone()));
                    JoinOutcome::Joined { network: name }
                }
                Ok(Err(e)) => JoinOutcome::Failed {
                    network: name,
                    reason: format!("{:#}", e),
                },
                Err(_) => JoinOutcome::Failed {
                    network: name,
                    reason: "timed out".into(),
                },
            };
            on_result(outcome);
        });
    }

    fn leave_network(&self) {
        let interface = self.config.interface.clone();
        let snapshot_tx = self.snapshot_tx.clone();

        info!("[RADIO] Leaving network on {}", interface);
        tokio::spawn(async move {
            match run(&["device", "disconnect", interface.as_str()]).await {
                Ok(_) => snapshot_tx.send_modify(|s| s.joined_network = None),
                Err(e) => warn!("[RADIO] Leave failed: {:#}", e),
            }
        });
    }
}

impl Drop for NmcliRadioPlane {
    fn drop(&mut self) {
        self.poll_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_radio_state() {
        assert!(parse_radio_state("enabled\n"));
        assert!(!parse_radio_state("disabled\n"));
        assert!(!parse_radio_state(""));
    }

    #[test]
    fn test_parse_device_connection() {
        let output = "wlan0:connected:FieldNet\neth0:unavailable:\nlo:connected (externally):lo\n";
        assert_eq!(
            parse_device_connection(output, "wlan0"),
            Some("FieldNet".to_string())
        );
        assert_eq!(parse_device_connection(output, "eth0"), None);

        let disconnected = "wlan0:disconnected:\n";
        assert_eq!(parse_device_connection(disconnected, "wlan0"), None);
    }

    #[test]
    fn test_connection_name_with_colon() {
        let output = "wlan0:connected:Cafe\\:Guest\n";
        assert_eq!(
            parse_device_connection(output, "wlan0"),
            Some("Cafe:Guest".to_string())
        );
    }

    #[test]
    fn test_split_terse_unescapes() {
        assert_eq!(split_terse("a:b\\:c:d\\\\e"), vec!["a", "b:c", "d\\e"]);
        assert_eq!(split_terse("wlan0:disconnected:"), vec!["wlan0", "disconnected", ""]);
    }

    #[test]
    fn test_join_args_keep_secret_out_of_argv() {
        let args = join_args("FieldNet", "wlan0");
        assert_eq!(args[0], "--ask");
        assert!(args.contains(&"FieldNet"));
        assert!(!args.contains(&"password"));
    }
}
