//! VPN session orchestration
//!
//! `connect` never runs openvpn itself. It starts a tmux session whose
//! command is `proton-connect session <config>`, then attaches to it:
//!
//! ```text
//! proton-connect connect de
//!   └─ tmux new-session -d -s proton-connect 'proton-connect session …/de-01….ovpn'
//!        └─ sudo openvpn --config …/de-01….ovpn --auth-user-pass …/.auth-XXXX
//! ```

pub mod iplookup;
pub mod openvpn;
pub mod tmux;

pub use openvpn::{Interrupt, SessionOptions, SessionOutcome};
pub use tmux::TmuxSession;

use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("tmux error: {0}")]
    TmuxError(String),
    #[error("Network command `{command}` failed: {message}")]
    NetCmdFailed { command: String, message: String },
    #[error("Failed to start openvpn: {0}")]
    OpenVpnSpawn(String),
    #[error("openvpn exited with {0}")]
    OpenVpnFailed(std::process::ExitStatus),
    #[error("Failed to install Ctrl+C handler: {0}")]
    SignalError(#[from] ctrlc::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What to run inside the tmux session
#[derive(Debug, Clone)]
pub struct SessionCommand {
    pub exe: PathBuf,
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub netcmd: Option<String>,
    pub debug: bool,
}

impl SessionCommand {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.exe.to_string_lossy().into_owned(),
            "--home".to_string(),
            self.home.to_string_lossy().into_owned(),
        ];
        if self.debug {
            argv.push("--debug".to_string());
        }
        argv.push("session".to_string());
        argv.push(self.config_file.to_string_lossy().into_owned());
        if let Some(netcmd) = &self.netcmd {
            argv.push("--netcmd".to_string());
            argv.push(netcmd.clone());
        }
        argv
    }
}

/// Result of [`start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    Started,
    /// A session with this name was already running; nothing new started
    AlreadyRunning,
}

/// Start the VPN in a detached tmux session, optionally attaching to it
pub fn start(
    tmux: &TmuxSession,
    command: &SessionCommand,
    attach: bool,
) -> Result<StartResult, SessionError> {
    let result = if tmux.exists()? {
        info!(
            "Session '{}' is already running, not starting another connection",
            tmux.name()
        );
        StartResult::AlreadyRunning
    } else {
        tmux.create(&command.argv())?;
        info!("Started tmux session '{}'", tmux.name());
        StartResult::Started
    };

    if attach {
        tmux.attach()?;
    } else {
        info!("Attach with: tmux attach -t {}", tmux.name());
    }

    Ok(result)
}
