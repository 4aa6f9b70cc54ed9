//! ProtonVPN configuration bundle download
//!
//! `init` fetches the zip archive of `.ovpn` files and unpacks it flat into
//! the VPN directory, replacing whatever was there before.

use reqwest::Client;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const HTTP_TIMEOUT_SECS: u64 = 60;
const OVPN_EXT: &str = "ovpn";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Download failed: HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("Server returned an HTML page instead of an archive (is the bundle URL still valid?)")]
    HtmlContent,
    #[error("Invalid archive: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("Failed to write configs: {0}")]
    IoError(#[from] io::Error),
    #[error("Archive contains no .ovpn files")]
    NoConfigs,
}

/// Download the bundle from `url` and unpack it into `dest`
///
/// Returns the number of configuration files written.
pub async fn download(url: &str, dest: &Path) -> Result<usize, BundleError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    info!("Downloading configuration bundle from {}", url);
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(BundleError::BadStatus(response.status()));
    }

    if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        let ct = content_type.to_str().unwrap_or("").to_ascii_lowercase();
        if ct.contains("text/html") {
            return Err(BundleError::HtmlContent);
        }
    }

    let bytes = response.bytes().await?;
    debug!("Downloaded {} bytes", bytes.len());

    extract(&bytes, dest)
}

/// Unpack every `.ovpn` entry of a zip archive into `dest`
///
/// Directory structure inside the archive is dropped. Existing `.ovpn`
/// files in `dest` are removed first so the catalog matches the bundle.
pub fn extract(archive: &[u8], dest: &Path) -> Result<usize, BundleError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))?;

    let mut configs: Vec<(OsString, Vec<u8>)> = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let enclosed = file.enclosed_name();
        let Some(filename) = enclosed
            .as_ref()
            .filter(|p| p.extension().is_some_and(|ext| ext == OVPN_EXT))
            .and_then(|p| p.file_name())
            .map(|name| name.to_os_string())
        else {
            debug!("Skipping archive entry {}", file.name());
            continue;
        };

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        configs.push((filename, content));
    }

    if configs.is_empty() {
        return Err(BundleError::NoConfigs);
    }

    fs::create_dir_all(dest)?;
    let removed = clear_configs(dest)?;
    if removed > 0 {
        debug!("Removed {} old configuration files", removed);
    }

    for (filename, content) in &configs {
        fs::write(dest.join(filename), content)?;
    }

    info!("Extracted {} configuration files to {}", configs.len(), dest.display());
    Ok(configs.len())
}

fn clear_configs(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == OVPN_EXT) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn make_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_flattens_ovpn_files() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("vpns");
        let archive = make_archive(&[
            ("configs/de-01.protonvpn.com.udp1194.ovpn", "client\nremote de\n"),
            ("configs/nl-01-tor.protonvpn.com.udp1194.ovpn", "client\nremote nl\n"),
            ("README.txt", "hello"),
        ]);

        let count = extract(&archive, &dest).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(dest.join("de-01.protonvpn.com.udp1194.ovpn")).unwrap(),
            "client\nremote de\n"
        );
        assert!(dest.join("nl-01-tor.protonvpn.com.udp1194.ovpn").exists());
        assert!(!dest.join("README.txt").exists());
        assert!(!dest.join("configs").exists());
    }

    #[test]
    fn test_extract_replaces_old_configs() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        fs::write(dest.join("us-01.protonvpn.com.udp1194.ovpn"), "old").unwrap();
        fs::write(dest.join("keep.txt"), "keep").unwrap();

        let archive = make_archive(&[("de-01.protonvpn.com.udp1194.ovpn", "new")]);
        extract(&archive, dest).unwrap();

        assert!(!dest.join("us-01.protonvpn.com.udp1194.ovpn").exists());
        assert!(dest.join("de-01.protonvpn.com.udp1194.ovpn").exists());
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn test_extract_without_configs_keeps_existing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        fs::write(dest.join("de-01.protonvpn.com.udp1194.ovpn"), "old").unwrap();

        let archive = make_archive(&[("README.txt", "hello")]);
        let result = extract(&archive, dest);

        assert!(matches!(result.unwrap_err(), BundleError::NoConfigs));
        assert!(dest.join("de-01.protonvpn.com.udp1194.ovpn").exists());
    }

    #[test]
    fn test_extract_invalid_archive() {
        let temp_dir = TempDir::new().unwrap();
        let result = extract(b"<html>not a zip</html>", temp_dir.path());
        assert!(matches!(result.unwrap_err(), BundleError::ZipError(_)));
    }

    #[test]
    fn test_bundle_error_display() {
        let err = BundleError::BadStatus(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Download failed: HTTP 404 Not Found");
        assert_eq!(
            BundleError::NoConfigs.to_string(),
            "Archive contains no .ovpn files"
        );
    }
}
