//! # Varpoint - a read-only federated genomic data node
//!
//! One on-disk corpus of columnar variant files, exposed through two
//! protocol surfaces over HTTP:
//!
//! - a GA4GH Beacon v2 endpoint family with two independent personalities
//!   (*aggregated* allele frequencies and *sensitive* individual counts);
//! - a FAIR Data Point publishing the same corpus as RDF metadata.
//!
//! A single data directory can be kept in sync with an S3-compatible object
//! store; on change, the node re-exposes the new contents without restart.
//!
//! ## Core Modules
//!
//! - [`registry`]: the in-memory index over the data directory
//! - [`monitor`]: the filesystem observer and the object-store synchroniser
//! - [`beacon`]: the Beacon query engine and its HTTP routes
//! - [`fdp`]: the RDF template engine and the FDP routes
//! - [`oidc`]: OIDC bearer verification with GA4GH passports
//! - [`api`]: router assembly, the status page and `/health`

pub mod api;
pub mod beacon;
pub mod config;
pub mod context;
pub mod error;
pub mod fdp;
pub mod logging;
pub mod monitor;
pub mod oidc;
pub mod registry;
