//! Config catalog
//!
//! Scans the directory of `.ovpn` files and groups them by country. The
//! catalog is rebuilt on every command; nothing is cached between runs.

pub mod server;

pub use server::{ParseError, Protocol, ServerFile};

use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("VPN configurations not found in {}. Run `proton-connect init` first.", .dir.display())]
    Unavailable { dir: PathBuf },
    #[error("Failed to read {}: {source}", .dir.display())]
    ReadError {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("No VPN configurations in {}. Run `proton-connect init` to download them.", .dir.display())]
    Empty { dir: PathBuf },
    #[error("No servers match countries: {}", .countries.join(", "))]
    NoMatch { countries: Vec<String> },
    #[error("Unknown server: {0}")]
    UnknownServer(String),
}

/// Output options for `list`
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Print every server id instead of per-country counts
    pub verbose: bool,
}

/// Servers of one country, keyed by server id
pub type ServerGroup = BTreeMap<String, ServerFile>;

/// Servers grouped by country
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
    groups: BTreeMap<String, ServerGroup>,
    requested: Option<Vec<String>>,
}

impl Catalog {
    /// Scan `dir` for server files of the given protocol
    ///
    /// With `countries`, the result holds exactly those keys; a country
    /// without files maps to an empty group.
    pub fn list_servers(
        dir: &Path,
        protocol: Protocol,
        countries: Option<&[String]>,
    ) -> Result<Self, CatalogError> {
        if !dir.is_dir() {
            return Err(CatalogError::Unavailable {
                dir: dir.to_path_buf(),
            });
        }

        let read_error = |source| CatalogError::ReadError {
            dir: dir.to_path_buf(),
            source,
        };

        let mut filenames = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            if let Some(name) = entry.file_name().to_str() {
                filenames.push(name.to_string());
            }
        }

        let catalog = Self::from_filenames(dir, &filenames, protocol, countries);
        debug!(
            "Catalog of {}: {} countries, {} servers",
            dir.display(),
            catalog.groups.len(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Build a catalog from filenames without touching the filesystem
    ///
    /// Filenames are visited in sorted order. When two files map to the
    /// same server id the first one is kept.
    pub fn from_filenames<S: AsRef<str>>(
        dir: &Path,
        filenames: &[S],
        protocol: Protocol,
        countries: Option<&[String]>,
    ) -> Self {
        let mut sorted: Vec<&str> = filenames.iter().map(|name| name.as_ref()).collect();
        sorted.sort_unstable();

        let mut groups: BTreeMap<String, ServerGroup> = BTreeMap::new();
        for name in sorted {
            let server = match ServerFile::parse(name) {
                Ok(server) => server,
                Err(e) => {
                    debug!("Skipping {}: {}", name, e);
                    continue;
                }
            };
            if server.protocol != protocol {
                continue;
            }

            let group = groups.entry(server.country.clone()).or_default();
            match group.entry(server.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(server);
                }
                Entry::Occupied(existing) => {
                    warn!(
                        "{} and {} are both server {}, using {}",
                        existing.get().filename,
                        server.filename,
                        server.id,
                        existing.get().filename
                    );
                }
            }
        }

        let catalog = Self {
            dir: dir.to_path_buf(),
            groups,
            requested: None,
        };
        match countries {
            Some(countries) => catalog.restrict(countries),
            None => catalog,
        }
    }

    /// Keep only `countries`; each one gets a key even without servers
    pub fn restrict(&self, countries: &[String]) -> Self {
        let requested: Vec<String> = countries.iter().map(|c| c.to_ascii_lowercase()).collect();
        let groups = requested
            .iter()
            .map(|country| {
                let group = self.groups.get(country).cloned().unwrap_or_default();
                (country.clone(), group)
            })
            .collect();

        Self {
            dir: self.dir.clone(),
            groups,
            requested: Some(requested),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn servers(&self, country: &str) -> Option<&ServerGroup> {
        self.groups.get(&country.to_ascii_lowercase())
    }

    /// Total number of servers across all countries
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requested countries that have no servers
    pub fn empty_countries(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, servers)| servers.is_empty())
            .map(|(country, _)| country.as_str())
            .collect()
    }

    /// Look up a server by id (`de-01`) or by filename
    pub fn find(&self, name: &str) -> Option<&ServerFile> {
        let needle = name.to_ascii_lowercase();
        self.groups
            .values()
            .flat_map(BTreeMap::values)
            .find(|server| server.id == needle || server.filename.eq_ignore_ascii_case(name))
    }

    /// Like [`Catalog::find`], but a miss is an error
    pub fn get(&self, name: &str) -> Result<&ServerFile, CatalogError> {
        self.find(name)
            .ok_or_else(|| CatalogError::UnknownServer(name.to_string()))
    }

    pub fn path_of(&self, server: &ServerFile) -> PathBuf {
        self.dir.join(&server.filename)
    }

    /// Pick a country uniformly, then a server within it uniformly
    ///
    /// Countries without servers are never picked, so a country with one
    /// server is as likely as one with fifty.
    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&ServerFile, CatalogError> {
        let country = self
            .groups
            .values()
            .filter(|servers| !servers.is_empty())
            .choose(&mut *rng);

        country
            .and_then(|servers| servers.values().choose(&mut *rng))
            .ok_or_else(|| match &self.requested {
                Some(countries) => CatalogError::NoMatch {
                    countries: countries.clone(),
                },
                None => CatalogError::Empty {
                    dir: self.dir.clone(),
                },
            })
    }

    /// Choose the server for `connect`
    ///
    /// An explicit name is looked up in the whole catalog, `countries`
    /// only narrows the random pick.
    pub fn select<R: Rng + ?Sized>(
        &self,
        name: Option<&str>,
        countries: &[String],
        rng: &mut R,
    ) -> Result<ServerFile, CatalogError> {
        if let Some(name) = name {
            let server = self.get(name)?;
            if !countries.is_empty()
                && !countries
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&server.country))
            {
                warn!(
                    "{} is in '{}', outside the requested countries",
                    server.id, server.country
                );
            }
            return Ok(server.clone());
        }

        if countries.is_empty() {
            return self.pick_random(rng).cloned();
        }

        let subset = self.restrict(countries);
        for country in subset.empty_countries() {
            warn!("No servers for country '{}'", country);
        }
        subset.pick_random(rng).cloned()
    }

    pub fn render(&self, options: ListOptions) -> String {
        let mut out = String::new();
        for (country, servers) in &self.groups {
            if options.verbose {
                let _ = writeln!(out, "{}:", country);
                if servers.is_empty() {
                    let _ = writeln!(out, "  (none)");
                }
                for server in servers.values() {
                    if server.tor {
                        let _ = writeln!(out, "  {} (tor)", server.id);
                    } else {
                        let _ = writeln!(out, "  {}", server.id);
                    }
                }
            } else {
                let noun = if servers.len() == 1 { "server" } else { "servers" };
                let _ = writeln!(out, "{:<4}{} {}", country, servers.len(), noun);
            }
        }
        out
    }
}
