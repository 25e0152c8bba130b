//! Process-wide service state.
//!
//! Everything the handlers and the monitor share is constructed once at
//! startup and owned here; the rest of the crate borrows it through
//! `Arc<ServiceContext>`. There are no hidden globals.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context as _;

use crate::beacon::BeaconSetup;
use crate::beacon::config::{BeaconCommonConfig, BeaconConfig, BeaconContext};
use crate::config::{AppConfig, S3StorageConfig, load_config_yaml};
use crate::error::{NodeError, Result};
use crate::fdp::FdpSetup;
use crate::fdp::config::FdpConfig;
use crate::registry::DataRegistry;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ServiceContext {
    pub version: &'static str,
    pub data_dir: PathBuf,
    pub registry: Arc<RwLock<DataRegistry>>,
    pub s3_sync: Option<S3StorageConfig>,
    pub info_page_credentials: Option<String>,
    pub aggregated: Option<Arc<BeaconSetup>>,
    pub sensitive: Option<Arc<BeaconSetup>>,
    pub fdp: Option<Arc<FdpSetup>>,
}

impl ServiceContext {
    /// Builds the full service state from the configuration directory. Any
    /// failure here is fatal (exit code 1).
    pub async fn load(app_config: &AppConfig, config_dir: &Path) -> Result<Self> {
        let fdp_config: Option<FdpConfig> = load_config_yaml(config_dir, "fdp.yaml")?;
        let fdp = match fdp_config {
            Some(config) => Some(Arc::new(
                FdpSetup::new(config).map_err(|e| NodeError::Config(e.to_string()))?,
            )),
            None => None,
        };

        let catalogs = fdp
            .as_ref()
            .map(|setup| setup.config.catalogs.clone())
            .unwrap_or_default();
        let registry = Arc::new(RwLock::new(DataRegistry::new(catalogs)));

        let common: Option<BeaconCommonConfig> =
            load_config_yaml(config_dir, "beacon-common.yaml")?;
        let aggregated_config: Option<BeaconConfig> =
            load_config_yaml(config_dir, "beacon-aggregated.yaml")?;
        let sensitive_config: Option<BeaconConfig> =
            load_config_yaml(config_dir, "beacon-sensitive.yaml")?;

        let mut aggregated = None;
        let mut sensitive = None;
        if aggregated_config.is_some() || sensitive_config.is_some() {
            let common = Arc::new(common.ok_or_else(|| {
                NodeError::Config(
                    "beacon-common.yaml is required when a Beacon personality is enabled"
                        .to_owned(),
                )
            })?);

            if let Some(service) = aggregated_config {
                let context = BeaconContext::new(Arc::clone(&common), service, true);
                let setup = BeaconSetup::new(context, APP_VERSION)
                    .await
                    .context("Cannot initialise the aggregated Beacon")
                    .map_err(|e| NodeError::Config(format!("{e:#}")))?;
                aggregated = Some(Arc::new(setup));
            }
            if let Some(service) = sensitive_config {
                let context = BeaconContext::new(Arc::clone(&common), service, false);
                let setup = BeaconSetup::new(context, APP_VERSION)
                    .await
                    .context("Cannot initialise the sensitive Beacon")
                    .map_err(|e| NodeError::Config(format!("{e:#}")))?;
                sensitive = Some(Arc::new(setup));
            }
        }

        Ok(Self {
            version: APP_VERSION,
            data_dir: app_config.data_dir.clone(),
            registry,
            s3_sync: app_config.sync_from_s3.clone(),
            info_page_credentials: app_config.info_page_credentials(),
            aggregated,
            sensitive,
            fdp,
        })
    }
}
