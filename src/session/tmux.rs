//! tmux session management
//!
//! The VPN runs inside a named, detached tmux session so it survives the
//! terminal that started it. Reattach with `tmux attach -t <name>` or by
//! running `proton-connect connect` again.

use super::SessionError;
use std::process::Command;
use tracing::debug;

const TMUX: &str = "tmux";

pub struct TmuxSession {
    name: String,
}

impl TmuxSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `=` makes tmux match the session name exactly instead of by prefix
    fn target(&self) -> String {
        format!("={}", self.name)
    }

    pub fn exists(&self) -> Result<bool, SessionError> {
        let output = Command::new(TMUX)
            .args(["has-session", "-t", &self.target()])
            .output()
            .map_err(|e| SessionError::TmuxError(e.to_string()))?;
        Ok(output.status.success())
    }

    pub fn new_session_args(&self, command: &[String]) -> Vec<String> {
        let shell_command = command
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            self.name.clone(),
            shell_command,
        ]
    }

    /// Start a detached session running `command`
    pub fn create(&self, command: &[String]) -> Result<(), SessionError> {
        let args = self.new_session_args(command);
        debug!("tmux {:?}", args);

        let output = Command::new(TMUX)
            .args(&args)
            .output()
            .map_err(|e| SessionError::TmuxError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::TmuxError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Arguments for attaching; inside tmux the current client is switched instead
    pub fn attach_args(&self, inside_tmux: bool) -> Vec<String> {
        let verb = if inside_tmux {
            "switch-client"
        } else {
            "attach-session"
        };
        vec![verb.to_string(), "-t".to_string(), self.target()]
    }

    /// Attach the current terminal, blocking until the user detaches
    pub fn attach(&self) -> Result<(), SessionError> {
        let inside_tmux = std::env::var_os("TMUX").is_some();
        let status = Command::new(TMUX)
            .args(self.attach_args(inside_tmux))
            .status()
            .map_err(|e| SessionError::TmuxError(e.to_string()))?;

        if !status.success() {
            return Err(SessionError::TmuxError(format!(
                "could not attach to session {}: {}",
                self.name, status
            )));
        }

        Ok(())
    }
}

/// Quote a word for `sh`
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(
            shell_quote("de-01.protonvpn.com.udp1194.ovpn"),
            "de-01.protonvpn.com.udp1194.ovpn"
        );
        assert_eq!(shell_quote("/home/u/.proton-connect"), "/home/u/.proton-connect");
        assert_eq!(shell_quote("nmcli networking on"), "'nmcli networking on'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_new_session_args() {
        let session = TmuxSession::new("proton-connect");
        let command = vec![
            "/usr/bin/proton-connect".to_string(),
            "session".to_string(),
            "/home/my user/vpns/de-01.protonvpn.com.udp1194.ovpn".to_string(),
        ];

        let args = session.new_session_args(&command);

        assert_eq!(
            args,
            vec![
                "new-session",
                "-d",
                "-s",
                "proton-connect",
                "/usr/bin/proton-connect session '/home/my user/vpns/de-01.protonvpn.com.udp1194.ovpn'",
            ]
        );
    }

    #[test]
    fn test_attach_args() {
        let session = TmuxSession::new("vpn");
        assert_eq!(session.attach_args(false), vec!["attach-session", "-t", "=vpn"]);
        assert_eq!(session.attach_args(true), vec!["switch-client", "-t", "=vpn"]);
        assert_eq!(session.name(), "vpn");
    }
}
