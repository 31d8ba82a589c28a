//! # pbs-query
//!
//! A command-line monitoring probe for Proxmox Backup Server.
//!
//! ## Overview
//!
//! This crate queries the PBS REST API and prints filtered, reshaped JSON
//! views of server state for consumption by a monitoring system:
//!
//! - Datastore usage (`--mode datastores`)
//! - Backup groups with attached group notes (`--mode groups`)
//! - Snapshots with derived timestamps (`--mode snapshots`)
//! - Recent tasks on the local node (`--mode tasks`)
//!
//! Each invocation resolves connection settings from CLI flags, environment
//! variables and an optional dotenv-style file, runs exactly one query mode,
//! and writes a single JSON document to stdout. Diagnostics go to stderr.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pbs_query::{client::PbsClient, config::ConnectionConfig, modes::Mode};
//! use std::collections::HashSet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig {
//!         endpoint: "pbs.example.com".to_string(),
//!         port: 8007,
//!         username: Some("monitor@pbs".to_string()),
//!         password: None,
//!         token_name: Some("query".to_string()),
//!         token_value: Some("secret".to_string()),
//!         verify_tls: true,
//!     };
//!
//!     let client = PbsClient::connect(&config).await?;
//!     let document = Mode::Datastores.run(&client, &HashSet::new()).await?;
//!     println!("{}", serde_json::to_string(&document)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`client`] - PBS API client and typed API records
//! - [`config`] - CLI arguments and connection configuration resolution
//! - [`error`] - Error types and handling
//! - [`modes`] - Query modes and output shaping

pub mod client;
pub mod config;
pub mod error;
pub mod modes;

pub use error::{PbsError, Result};
