//! VPN credential storage and retrieval
//!
//! The credential file holds one of:
//! - two lines: plaintext username and password
//! - one line: a secret store entry (`proton/vpn`) or a full command
//!   (`pass show proton/vpn`) that prints the credentials
//!
//! No file means the user is asked every time.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Secret store entry suggested by `init`
pub const DEFAULT_ENTRY: &str = "protonvpn/openvpn";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential file error: {0}")]
    IoError(#[from] io::Error),
    #[error(
        "Malformed credential file: expected 1 line (secret store entry) or 2 lines (username, password), found {0}"
    )]
    Malformed(usize),
    #[error("Secret store command `{command}` failed: {message}")]
    SecretStoreFailed { command: String, message: String },
    #[error("No password in secret store output")]
    MissingPassword,
    #[error("No username in secret store output (add a `login:` line)")]
    MissingUsername,
    #[error("Empty {0} entered")]
    EmptyInput(&'static str),
}

/// How credentials are obtained, chosen once during `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CredentialStrategy {
    /// Save username and password in plaintext
    Store,
    /// Delegate to a secret store such as `pass`
    Pass,
    /// Ask on every connect
    Prompt,
}

pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub enum CredentialSource {
    Plaintext(Credentials),
    SecretStore { entry: String },
    Prompt,
}

impl CredentialSource {
    /// Interpret credential file contents; blank lines are ignored
    ///
    /// Only line endings are stripped, so a password may start or end
    /// with spaces.
    pub fn parse(content: &str) -> Result<Self, CredentialError> {
        let lines: Vec<&str> = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .collect();

        match lines.as_slice() {
            [entry] => Ok(Self::SecretStore {
                entry: entry.trim().to_string(),
            }),
            [username, password] => Ok(Self::Plaintext(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })),
            other => Err(CredentialError::Malformed(other.len())),
        }
    }

    /// Read the credential file; a missing file means prompting
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        if !path.exists() {
            debug!("No credential file at {}, will prompt", path.display());
            return Ok(Self::Prompt);
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Persist this source; `Prompt` removes any saved file
    pub fn save(&self, path: &Path) -> Result<(), CredentialError> {
        let content = match self {
            Self::Plaintext(creds) => format!("{}\n{}\n", creds.username, creds.password),
            Self::SecretStore { entry } => format!("{}\n", entry),
            Self::Prompt => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
                return Ok(());
            }
        };
        write_private(path, content.as_bytes())?;
        Ok(())
    }

    pub fn strategy(&self) -> CredentialStrategy {
        match self {
            Self::Plaintext(_) => CredentialStrategy::Store,
            Self::SecretStore { .. } => CredentialStrategy::Pass,
            Self::Prompt => CredentialStrategy::Prompt,
        }
    }

    /// Produce a username/password pair, running the secret store or
    /// prompting as needed
    pub fn resolve(self, secret_store: &str) -> Result<Credentials, CredentialError> {
        match self {
            Self::Plaintext(creds) => Ok(creds),
            Self::SecretStore { entry } => {
                let output = run_secret_store(secret_store, &entry)?;
                parse_secret_output(&output)
            }
            Self::Prompt => prompt_credentials(),
        }
    }
}

/// Build the command for a secret store entry
///
/// An entry with whitespace is a full shell command, anything else is
/// passed to `<secret_store> show`.
pub fn secret_store_command(secret_store: &str, entry: &str) -> Command {
    if entry.split_whitespace().nth(1).is_some() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", entry]);
        cmd
    } else {
        let mut cmd = Command::new(secret_store);
        cmd.args(["show", entry]);
        cmd
    }
}

fn run_secret_store(secret_store: &str, entry: &str) -> Result<String, CredentialError> {
    let mut cmd = secret_store_command(secret_store, entry);
    let command_line = format!("{:?}", cmd);
    info!("Fetching credentials from secret store");
    debug!("Running {}", command_line);

    // stdin/stderr stay on the terminal so gpg can ask for a passphrase
    let output = cmd
        .stdin(Stdio::inherit())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| CredentialError::SecretStoreFailed {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CredentialError::SecretStoreFailed {
            command: command_line,
            message: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `pass`-style output
///
/// The first line is the password. The username comes from a `login:`,
/// `user:` or `username:` line, or else the second line.
pub fn parse_secret_output(output: &str) -> Result<Credentials, CredentialError> {
    let mut lines = output.lines();
    let password = lines
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(CredentialError::MissingPassword)?
        .to_string();

    let rest: Vec<&str> = lines.map(str::trim).filter(|l| !l.is_empty()).collect();

    let tagged = rest.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        match key.trim().to_ascii_lowercase().as_str() {
            "login" | "user" | "username" => Some(value.trim()),
            _ => None,
        }
    });

    let username = tagged
        .or_else(|| rest.first().copied())
        .filter(|u| !u.is_empty())
        .ok_or(CredentialError::MissingUsername)?
        .to_string();

    Ok(Credentials { username, password })
}

/// Ask for username and password on the terminal
pub fn prompt_credentials() -> Result<Credentials, CredentialError> {
    let username = prompt_line("OpenVPN username: ")?;
    let password = prompt_password("OpenVPN password: ")?;
    Ok(Credentials { username, password })
}

pub fn prompt_line(prompt: &str) -> Result<String, CredentialError> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        return Err(CredentialError::EmptyInput("input"));
    }
    Ok(line)
}

pub fn prompt_password(prompt: &str) -> Result<String, CredentialError> {
    let password = rpassword::prompt_password(prompt)?;
    if password.is_empty() {
        return Err(CredentialError::EmptyInput("password"));
    }
    Ok(password)
}

/// Write credentials in the `--auth-user-pass` format to a private temp file
///
/// The file is deleted when the returned handle is dropped.
pub fn write_auth_file(creds: &Credentials, dir: &Path) -> Result<NamedTempFile, CredentialError> {
    let mut file = tempfile::Builder::new()
        .prefix(".auth-")
        .tempfile_in(dir)?;
    writeln!(file, "{}", creds.username)?;
    writeln!(file, "{}", creds.password)?;
    file.flush()?;
    debug!("Wrote openvpn auth file {}", file.path().display());
    Ok(file)
}

fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    Ok(())
}

/// Human-readable summary of a strategy, shown by `init`
pub fn describe(strategy: CredentialStrategy, path: &Path) -> String {
    match strategy {
        CredentialStrategy::Store => format!("plaintext credentials in {}", path.display()),
        CredentialStrategy::Pass => format!("secret store entry in {}", path.display()),
        CredentialStrategy::Prompt => "prompt on every connect".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_one_line_is_secret_store() {
        let source = CredentialSource::parse("proton/vpn\n").unwrap();
        match source {
            CredentialSource::SecretStore { entry } => assert_eq!(entry, "proton/vpn"),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_parse_two_lines_is_plaintext() {
        let source = CredentialSource::parse("alice+pmp\nhunter2\n").unwrap();
        match source {
            CredentialSource::Plaintext(creds) => {
                assert_eq!(creds.username, "alice+pmp");
                assert_eq!(creds.password, "hunter2");
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keeps_password_spaces() {
        let source = CredentialSource::parse("alice\r\n  pass phrase \r\n").unwrap();
        match source {
            CredentialSource::Plaintext(creds) => {
                assert_eq!(creds.username, "alice");
                assert_eq!(creds.password, "  pass phrase ");
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_parse_trims_secret_store_entry() {
        match CredentialSource::parse("  proton/vpn \n").unwrap() {
            CredentialSource::SecretStore { entry } => assert_eq!(entry, "proton/vpn"),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignores_blank_lines() {
        let source = CredentialSource::parse("\nalice\n\nhunter2\n\n").unwrap();
        assert_eq!(source.strategy(), CredentialStrategy::Store);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            CredentialSource::parse("").unwrap_err(),
            CredentialError::Malformed(0)
        ));
        assert!(matches!(
            CredentialSource::parse("a\nb\nc\n").unwrap_err(),
            CredentialError::Malformed(3)
        ));
    }

    #[test]
    fn test_load_missing_file_prompts() {
        let temp_dir = TempDir::new().unwrap();
        let source = CredentialSource::load(&temp_dir.path().join("credentials")).unwrap();
        assert_eq!(source.strategy(), CredentialStrategy::Prompt);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials");

        let source = CredentialSource::Plaintext(Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        });
        source.save(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "alice\nhunter2\n");

        let loaded = CredentialSource::load(&path).unwrap();
        assert_eq!(loaded.strategy(), CredentialStrategy::Store);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials");
        CredentialSource::SecretStore {
            entry: "proton/vpn".to_string(),
        }
        .save(&path)
        .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_prompt_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials");
        fs::write(&path, "proton/vpn\n").unwrap();

        CredentialSource::Prompt.save(&path).unwrap();
        assert!(!path.exists());

        // nothing to remove is fine too
        CredentialSource::Prompt.save(&path).unwrap();
    }

    #[test]
    fn test_secret_output_login_line() {
        let creds = parse_secret_output("s3cret\nurl: https://account.proton.me\nlogin: alice\n")
            .unwrap();
        assert_eq!(creds.password, "s3cret");
        assert_eq!(creds.username, "alice");
    }

    #[test]
    fn test_secret_output_login_line_wins_over_second_line() {
        let creds = parse_secret_output("s3cret\nsomething else\nUser: bob\n").unwrap();
        assert_eq!(creds.username, "bob");
    }

    #[test]
    fn test_secret_output_second_line() {
        let creds = parse_secret_output("s3cret\nalice\n").unwrap();
        assert_eq!(creds.username, "alice");
    }

    #[test]
    fn test_secret_output_missing_parts() {
        assert!(matches!(
            parse_secret_output("").unwrap_err(),
            CredentialError::MissingPassword
        ));
        assert!(matches!(
            parse_secret_output("s3cret\n").unwrap_err(),
            CredentialError::MissingUsername
        ));
    }

    #[test]
    fn test_secret_store_command() {
        let cmd = secret_store_command("pass", "proton/vpn");
        assert_eq!(cmd.get_program(), "pass");
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["show", "proton/vpn"]);

        let cmd = secret_store_command("pass", "gopass show -o proton");
        assert_eq!(cmd.get_program(), "sh");
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec!["-c", "gopass show -o proton"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_via_command() {
        let source = CredentialSource::SecretStore {
            entry: "printf 's3cret\\nlogin: alice\\n'".to_string(),
        };
        let creds = source.resolve("pass").unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_failing_command() {
        let source = CredentialSource::SecretStore {
            entry: "exit 3".to_string(),
        };
        assert!(matches!(
            source.resolve("pass").unwrap_err(),
            CredentialError::SecretStoreFailed { .. }
        ));
    }

    #[test]
    fn test_write_auth_file() {
        let temp_dir = TempDir::new().unwrap();
        let creds = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };

        let file = write_auth_file(&creds, temp_dir.path()).unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(fs::read_to_string(&path).unwrap(), "alice\nhunter2\n");

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
