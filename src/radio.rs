/// Radio controller: owns the NIC's mode and current channel.
///
/// Mode and channel changes shell out to `ip` and `iw`; the sensor runs
/// as root for the capture socket anyway. While capture is running no
/// other component touches the interface.
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SensorError;

/// Bound on how long one `iw ... set channel` may block.
pub const CHANNEL_SET_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RadioController {
    interface: String,
    current_channel: AtomicU8,
}

impl RadioController {
    pub fn new(interface: String) -> Self {
        Self {
            interface,
            current_channel: AtomicU8::new(0),
        }
    }

    /// Advisory channel for the stats report. Beacons carry their own
    /// DS-parameter channel, which is the authoritative attribution.
    pub fn current_channel(&self) -> u8 {
        self.current_channel.load(Ordering::Relaxed)
    }

    /// Bring the interface down, switch it to monitor mode, bring it
    /// back up. Idempotent: an interface already in monitor mode is
    /// left alone.
    pub fn enable_monitor(&self) -> Result<(), SensorError> {
        if self.is_monitor() {
            log::info!("{} already in monitor mode", self.interface);
            return Ok(());
        }
        run_tool(&["ip", "link", "set", &self.interface, "down"])?;
        run_tool(&["iw", "dev", &self.interface, "set", "type", "monitor"])?;
        run_tool(&["ip", "link", "set", &self.interface, "up"])?;
        log::info!("{} switched to monitor mode", self.interface);
        Ok(())
    }

    /// Best-effort restore to managed mode. Never fails shutdown.
    pub fn disable_monitor(&self) {
        let steps: [&[&str]; 3] = [
            &["ip", "link", "set", &self.interface, "down"],
            &["iw", "dev", &self.interface, "set", "type", "managed"],
            &["ip", "link", "set", &self.interface, "up"],
        ];
        for step in steps {
            if let Err(err) = run_tool(step) {
                log::warn!("monitor mode restore: {}", err);
            }
        }
        log::info!("{} restored to managed mode", self.interface);
    }

    /// Retune the radio. Timeouts and errors are logged at debug and
    /// otherwise ignored; a stuck channel costs one hop slot, nothing
    /// more.
    pub fn set_channel(&self, channel: u8) {
        let channel_arg = channel.to_string();
        let argv = [
            "iw",
            "dev",
            self.interface.as_str(),
            "set",
            "channel",
            channel_arg.as_str(),
        ];
        match run_tool_with_timeout(&argv, CHANNEL_SET_TIMEOUT) {
            Ok(()) => {
                self.current_channel.store(channel, Ordering::Relaxed);
            }
            Err(err) => log::debug!("channel {} set failed: {}", channel, err),
        }
    }

    /// Cycle through the plan until the running flag clears. Checked at
    /// every hop so shutdown never waits for a full pass.
    pub fn hop_loop(&self, plan: &[u8], interval: Duration, running: &Arc<AtomicBool>) {
        log::info!(
            "channel hopper started: {} channels, {:?} dwell",
            plan.len(),
            interval
        );
        while running.load(Ordering::SeqCst) {
            for &channel in plan {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                self.set_channel(channel);
                thread::sleep(interval);
            }
        }
        log::info!("channel hopper stopped");
    }

    fn is_monitor(&self) -> bool {
        let output = Command::new("iw")
            .args(["dev", self.interface.as_str(), "info"])
            .output();
        match output {
            Ok(output) if output.status.success() => {
                interface_is_monitor(&String::from_utf8_lossy(&output.stdout))
            }
            _ => false,
        }
    }
}

/// Parse `iw dev <iface> info` output for the interface type line.
fn interface_is_monitor(info: &str) -> bool {
    info.lines()
        .any(|line| line.trim_start().starts_with("type ") && line.contains("monitor"))
}

fn run_tool(argv: &[&str]) -> Result<(), SensorError> {
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|err| SensorError::Interface(format!("{}: {}", argv.join(" "), err)))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SensorError::Interface(format!(
            "{}: {}",
            argv.join(" "),
            stderr.trim()
        )))
    }
}

/// Run a tool but give up (and kill it) after `timeout`. Channel setting
/// on a wedged driver can block in the kernel; the hop loop must not.
fn run_tool_with_timeout(argv: &[&str], timeout: Duration) -> Result<(), SensorError> {
    let mut child = Command::new(argv[0])
        .args(&argv[1..])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| SensorError::Interface(format!("{}: {}", argv.join(" "), err)))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                return Err(SensorError::Interface(format!(
                    "{}: exited with {}",
                    argv.join(" "),
                    status
                )))
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SensorError::Interface(format!(
                        "{}: timed out after {:?}",
                        argv.join(" "),
                        timeout
                    )));
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                return Err(SensorError::Interface(format!(
                    "{}: {}",
                    argv.join(" "),
                    err
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iw_info_type_line_detection() {
        let monitor = "Interface wlan0\n\tifindex 3\n\ttype monitor\n\tchannel 6\n";
        let managed = "Interface wlan0\n\tifindex 3\n\ttype managed\n";
        assert!(interface_is_monitor(monitor));
        assert!(!interface_is_monitor(managed));
        assert!(!interface_is_monitor(""));
    }

    #[test]
    fn hop_loop_exits_when_flag_clears() {
        let radio = RadioController::new("test0".into());
        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.store(false, Ordering::SeqCst);
        });
        // `iw` failures on a nonexistent interface are non-fatal, so the
        // loop spins harmlessly until the flag clears.
        radio.hop_loop(&[1, 6, 11], Duration::from_millis(1), &running);
        handle.join().unwrap();
    }

    #[test]
    fn timeout_runner_reports_missing_tool() {
        let result = run_tool_with_timeout(
            &["aircensus-no-such-tool", "arg"],
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(SensorError::Interface(_))));
    }
}
