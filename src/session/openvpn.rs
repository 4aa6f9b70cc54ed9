//! OpenVPN invocation
//!
//! Runs inside the tmux session:
//!
//! 1. Run the network command, if any
//! 2. Start `openvpn` (through `sudo` unless already root)
//! 3. Look up the public IP once the tunnel had time to come up
//! 4. Wait; Ctrl+C is a normal way to end the session
//!
//! SIGINT, SIGTERM and SIGHUP all go through [`Interrupt`]. Files
//! registered with it (the auth file) are removed as soon as a signal
//! arrives, even if the process is killed right after.

use super::iplookup;
use super::SessionError;
use crate::config::IpLookupConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const OPENVPN: &str = "openvpn";
const SUDO: &str = "sudo";

/// How long openvpn gets to shut down after an interrupt
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct InterruptState {
    triggered: AtomicBool,
    watched: AtomicBool,
    cleanup: Mutex<Vec<PathBuf>>,
    notify: Notify,
}

/// Signal state shared between the signal handler and the session
#[derive(Clone, Default)]
pub struct Interrupt {
    state: Arc<InterruptState>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT, SIGTERM and SIGHUP to a new handle
    ///
    /// Can only be called once per process. Until [`run`] starts waiting
    /// on openvpn, a signal cleans up and exits the process right away,
    /// so a blocked password prompt does not outlive Ctrl+C.
    pub fn install() -> Result<Self, SessionError> {
        let interrupt = Self::new();
        let handle = interrupt.clone();
        ctrlc::set_handler(move || {
            handle.trigger();
            if !handle.state.watched.load(Ordering::SeqCst) {
                println!("Disconnected.");
                std::process::exit(0);
            }
        })?;
        debug!("Signal handler installed");
        Ok(interrupt)
    }

    /// Record the signal, remove registered files and wake the session
    pub fn trigger(&self) {
        self.state.triggered.store(true, Ordering::SeqCst);

        let paths = std::mem::take(
            &mut *self
                .state
                .cleanup
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for path in paths {
            remove_quietly(&path);
        }

        self.state.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::SeqCst)
    }

    /// Delete `path` when a signal arrives
    pub fn remove_on_signal(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.is_triggered() {
            remove_quietly(&path);
            return;
        }
        self.state
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path);
    }

    /// From now on the session handles signals itself
    fn watch(&self) {
        self.state.watched.store(true, Ordering::SeqCst);
    }

    /// Resolves once a signal has arrived
    pub async fn triggered(&self) {
        if self.is_triggered() {
            return;
        }
        self.state.notify.notified().await;
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// How the openvpn process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// openvpn exited on its own with success
    Exited,
    /// The user pressed Ctrl+C
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub config_file: PathBuf,
    pub auth_file: Option<PathBuf>,
    pub netcmd: Option<String>,
    pub ip_lookup: Option<IpLookupConfig>,
}

/// Build the openvpn command line
///
/// Without an auth file openvpn asks for the credentials itself.
pub fn openvpn_command(config_file: &Path, auth_file: Option<&Path>, elevate: bool) -> Command {
    let mut cmd = if elevate {
        let mut cmd = Command::new(SUDO);
        cmd.arg(OPENVPN);
        cmd
    } else {
        Command::new(OPENVPN)
    };

    cmd.arg("--config").arg(config_file);
    if let Some(auth) = auth_file {
        cmd.arg("--auth-user-pass").arg(auth);
    }
    cmd
}

/// Whether we already run with root privileges
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Run the user's network command through `sh -c`
pub fn run_netcmd(command: &str) -> Result<(), SessionError> {
    info!("Running network command: {}", command);
    let output = Command::new("sh")
        .args(["-c", command])
        .output()
        .map_err(|e| SessionError::NetCmdFailed {
            command: command.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            output.status.to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(SessionError::NetCmdFailed {
            command: command.to_string(),
            message,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("Network command output: {}", stdout.trim());
    }
    Ok(())
}

/// Run openvpn in the foreground until it exits or the user interrupts it
pub async fn run(
    options: &SessionOptions,
    interrupt: &Interrupt,
) -> Result<SessionOutcome, SessionError> {
    if let Some(netcmd) = &options.netcmd {
        run_netcmd(netcmd)?;
    }

    interrupt.watch();
    if interrupt.is_triggered() {
        return Ok(SessionOutcome::Interrupted);
    }

    let cmd = openvpn_command(
        &options.config_file,
        options.auth_file.as_deref(),
        !is_root(),
    );
    info!(
        "Starting openvpn with {}",
        options
            .config_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    debug!("{:?}", cmd);

    let mut child = tokio::process::Command::from(cmd)
        .spawn()
        .map_err(|e| SessionError::OpenVpnSpawn(e.to_string()))?;

    let lookup_task = options.ip_lookup.clone().filter(|c| c.enabled).map(|config| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(config.delay_secs)).await;
            match iplookup::lookup(&config.url).await {
                Ok(ip) => info!("Public IP: {}", ip),
                Err(e) => warn!("IP lookup failed: {}", e),
            }
        })
    });

    // on Ctrl+C openvpn gets SIGINT from the terminal too and shuts down
    // by itself; SIGTERM or SIGHUP may only have reached us
    let status = tokio::select! {
        status = child.wait() => Some(status?),
        _ = interrupt.triggered() => None,
    };

    if let Some(task) = lookup_task {
        task.abort();
    }

    let Some(status) = status else {
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
            warn!("openvpn still running, stopping it");
            if let Err(e) = child.start_kill() {
                warn!("Failed to stop openvpn: {}", e);
            }
        }
        info!("Interrupted, VPN session ended");
        return Ok(SessionOutcome::Interrupted);
    };

    if interrupt.is_triggered() {
        info!("Interrupted, VPN session ended");
        return Ok(SessionOutcome::Interrupted);
    }

    if !status.success() {
        return Err(SessionError::OpenVpnFailed(status));
    }

    info!("openvpn exited");
    Ok(SessionOutcome::Exited)
}
