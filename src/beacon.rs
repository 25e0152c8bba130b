//! GA4GH Beacon v2 endpoint family.
//!
//! Two personalities share this implementation: the *aggregated* Beacon
//! serves datasets and allele-frequency lookups from public aggregate
//! files, the *sensitive* Beacon serves censored individual counts and is
//! normally protected by OIDC with GA4GH passports. Each personality is
//! configured by its own YAML file and mounted under its own base path;
//! omitting the file disables the personality.

pub mod allele_freq;
pub mod config;
pub mod datasets;
pub mod duration;
pub mod error;
pub mod framework;
pub mod individuals;
pub mod model;
pub mod parquet;
pub mod request;
pub mod router;
pub mod setup;

pub use router::{BeaconState, beacon_router};
pub use setup::BeaconSetup;
