//! proton-connect - wrapper around the ProtonVPN OpenVPN bundle
//!
//! Picks a server from the downloaded `.ovpn` files and runs `openvpn`
//! inside a persistent tmux session.
//!
//! # Architecture
//!
//! - `catalog`: Server filename parsing, grouping by country, random pick
//! - `credentials`: Plaintext / secret store / prompt credential strategies
//! - `bundle`: Download and unpack the configuration bundle
//! - `session`: tmux session, openvpn invocation, public IP lookup
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! ```bash
//! proton-connect init --credentials pass --entry protonvpn/openvpn
//! proton-connect list de nl -v
//! proton-connect connect --countries de nl
//! ```

pub mod bundle;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod session;

pub use catalog::{Catalog, CatalogError, ListOptions, ServerFile};
pub use config::{Config, Paths};
pub use credentials::{CredentialSource, CredentialStrategy};
