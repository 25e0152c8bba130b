//! Data-directory monitoring.
//!
//! A single monitor thread owns all registry writes. Exactly one of two
//! back-ends runs: the object-store synchroniser when `sync_from_s3` is
//! enabled, otherwise the local filesystem observer. Both report changes
//! through the common [`RegistryUpdater`], which enforces the data-directory
//! path grammar before touching the registry.

pub mod fs;
pub mod s3;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::S3StorageConfig;
use crate::registry::{BeaconAssembly, DataRegistry, load_dataset_metadata, scan_data_directory};

/// Entry point for the monitor thread. Performs the blocking initial pass
/// (directory scan, plus a full bucket reconcile when S3 is configured) and
/// then streams change events until the stop flag is raised.
pub fn monitor_files(
    data_dir: &Path,
    registry: Arc<RwLock<DataRegistry>>,
    s3_config: Option<&S3StorageConfig>,
    stop: &AtomicBool,
) {
    if let Ok(mut guard) = registry.write() {
        scan_data_directory(&mut guard, data_dir);
    }

    if let Some(config) = s3_config.filter(|config| config.is_enabled()) {
        match s3::S3DataSync::new(config, data_dir, Arc::clone(&registry)) {
            Ok(sync) => {
                if let Err(e) = sync.sync() {
                    tracing::error!("Initial S3 synchronisation failed: {e:#}");
                }
                log_registry_status(&registry);
                sync.observe(stop);
            }
            Err(e) => {
                tracing::error!("Cannot initialise the S3 synchroniser: {e:#}");
            }
        }
        return;
    }

    log_registry_status(&registry);
    let observer = fs::DataDirectoryObserver::new(data_dir, registry);
    observer.observe(stop);
}

fn log_registry_status(registry: &Arc<RwLock<DataRegistry>>) {
    if let Ok(guard) = registry.read() {
        guard.log_status();
    }
}

/// Sleeps in slices of at most 1.5 s so the stop flag is honoured promptly.
/// Returns `true` when the stop flag was raised during the wait.
pub(crate) fn sleep_checking_stop(total: Duration, stop: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(1500);
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    stop.load(Ordering::Relaxed)
}

/// Registers file-system changes in the data registry. Paths that do not
/// conform to the data-directory structure are ignored with a warning.
pub struct RegistryUpdater {
    data_dir: PathBuf,
    registry: Arc<RwLock<DataRegistry>>,
}

impl RegistryUpdater {
    pub fn new(data_dir: &Path, registry: Arc<RwLock<DataRegistry>>) -> Self {
        let data_dir = data_dir.canonicalize().unwrap_or_else(|_| data_dir.to_path_buf());
        Self { data_dir, registry }
    }

    pub fn on_new_file(&self, file_path: &Path) {
        if is_named(file_path, "metadata.yaml") {
            self.on_new_metadata(file_path);
        } else if has_parquet_suffix(file_path) {
            self.on_new_parquet(file_path);
        }
    }

    pub fn on_removed_file(&self, file_path: &Path) {
        if is_named(file_path, "metadata.yaml") {
            self.on_removed_metadata(file_path);
        } else if has_parquet_suffix(file_path) {
            self.on_removed_parquet(file_path);
        }
    }

    fn on_new_metadata(&self, file_path: &Path) {
        let Some(dataset_id) = self.resolve_dataset(file_path) else {
            return;
        };

        match load_dataset_metadata(file_path) {
            Ok(props) => {
                if let Ok(mut registry) = self.registry.write() {
                    registry.forget_issue(file_path);
                    registry.add_dataset(&dataset_id, props);
                }
            }
            Err(e) => {
                if let Ok(registry) = self.registry.read() {
                    registry.record_issue(file_path, &e.to_string());
                }
            }
        }
    }

    fn on_removed_metadata(&self, file_path: &Path) {
        let Some(dataset_id) = self.resolve_dataset(file_path) else {
            return;
        };

        if let Ok(mut registry) = self.registry.write() {
            registry.forget_issue(file_path);
            registry.remove_dataset(&dataset_id, false);
        }
    }

    fn on_new_parquet(&self, file_path: &Path) {
        let Some((dataset_id, assembly)) = self.resolve_dataset_assembly(file_path) else {
            return;
        };

        if let Ok(mut registry) = self.registry.write() {
            registry.add_parquet(&dataset_id, assembly, file_path);
        }
    }

    fn on_removed_parquet(&self, file_path: &Path) {
        let Some((dataset_id, _)) = self.resolve_dataset_assembly(file_path) else {
            return;
        };

        if let Ok(mut registry) = self.registry.write() {
            registry.forget_issue(file_path);
            registry.remove_parquet(&dataset_id, file_path);
        }
    }

    /// Handles the disappearance of a directory: a dataset directory purges
    /// the dataset everywhere, an assembly directory removes the Beacon side
    /// for that dataset and assembly.
    pub fn on_removed_dir(&self, dir_path: &Path) {
        if dir_path.parent() == Some(self.data_dir.as_path()) {
            if let Some(dataset_id) = dir_name(dir_path)
                && let Ok(mut registry) = self.registry.write()
            {
                registry.remove_dataset(&dataset_id, true);
            }
        } else if let Some(assembly) = dir_name(dir_path).and_then(|name| name.parse::<BeaconAssembly>().ok())
            && let Some(dataset_id) = dir_path.parent().and_then(dir_name)
            && let Ok(mut registry) = self.registry.write()
        {
            registry.remove_beacon_dataset(&dataset_id, assembly);
        }

        if let Ok(registry) = self.registry.read() {
            registry.forget_issues_in_dir(dir_path);
        }
    }

    /// Handles a directory rename: the source side is removed, then any
    /// contained metadata and parquet files under the destination are
    /// materialised.
    pub fn on_moved_dir(&self, src_path: &Path, dest_path: &Path) {
        self.on_removed_dir(src_path);
        self.materialise_dir(dest_path);
    }

    /// Registers the contents of a directory that appeared (a renamed-in
    /// dataset directory or assembly directory).
    pub fn materialise_dir(&self, dest_path: &Path) {
        if dest_path.parent() == Some(self.data_dir.as_path()) {
            let metadata = dest_path.join("metadata.yaml");
            if metadata.exists() {
                self.on_new_metadata(&metadata);
            }

            let Some(dataset_id) = dir_name(dest_path) else {
                return;
            };
            for assembly in BeaconAssembly::ALL {
                let assembly_dir = dest_path.join(assembly.as_str());
                if assembly_dir.is_dir() {
                    self.include_assembly_dir(&dataset_id, &assembly_dir, assembly);
                }
            }
        } else if let Some(assembly) = dir_name(dest_path).and_then(|name| name.parse::<BeaconAssembly>().ok())
            && let Some(dataset_id) = dest_path.parent().and_then(dir_name)
        {
            self.include_assembly_dir(&dataset_id, dest_path, assembly);
        }
    }

    fn include_assembly_dir(&self, dataset_id: &str, assembly_dir: &Path, assembly: BeaconAssembly) {
        let Ok(entries) = std::fs::read_dir(assembly_dir) else {
            return;
        };
        if let Ok(mut registry) = self.registry.write() {
            for entry in entries.flatten() {
                let path = entry.path();
                if has_parquet_suffix(&path) {
                    registry.add_parquet(dataset_id, assembly, &path);
                }
            }
        }
    }

    fn resolve_dataset(&self, file_path: &Path) -> Option<String> {
        let dataset_dir = file_path.parent()?;

        if dataset_dir.parent() != Some(self.data_dir.as_path()) {
            tracing::warn!(
                "Ignoring metadata file as its parent-directory is not a sub-directory of the \
                 data-directory: {}",
                file_path.display()
            );
            return None;
        }

        dir_name(dataset_dir)
    }

    fn resolve_dataset_assembly(&self, file_path: &Path) -> Option<(String, BeaconAssembly)> {
        let assembly_dir = file_path.parent()?;
        let Some(assembly) = dir_name(assembly_dir).and_then(|name| name.parse::<BeaconAssembly>().ok())
        else {
            tracing::warn!(
                "Ignoring Parquet file as its parent-directory does not specify a valid assembly \
                 (GRCh37, GRCh38): {}",
                file_path.display()
            );
            return None;
        };

        let dataset_dir = assembly_dir.parent()?;
        if dataset_dir.parent() != Some(self.data_dir.as_path()) {
            tracing::warn!(
                "Ignoring Parquet file as its dataset-directory is not a sub-directory of the \
                 data-directory: {}",
                file_path.display()
            );
            return None;
        }

        Some((dir_name(dataset_dir)?, assembly))
    }
}

fn is_named(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|file_name| file_name == name)
}

fn has_parquet_suffix(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "parquet")
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DataRegistry;
    use std::collections::BTreeMap;

    fn updater(data_dir: &Path) -> (RegistryUpdater, Arc<RwLock<DataRegistry>>) {
        let registry = Arc::new(RwLock::new(DataRegistry::new(BTreeMap::new())));
        (RegistryUpdater::new(data_dir, Arc::clone(&registry)), registry)
    }

    #[test]
    fn test_parquet_outside_assembly_dir_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (updater, registry) = updater(&root);

        updater.on_new_file(&root.join("ds/stray.parquet"));
        let guard = registry.read().unwrap();
        assert!(guard.aggregated_beacon.get_dataset_ids().is_empty());
        assert!(guard.sensitive_beacon.get_dataset_ids().is_empty());
    }

    #[test]
    fn test_parquet_event_registers_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (updater, registry) = updater(&root);
        let path = root.join("ds/GRCh38/allele-freq-chr2.1.parquet");

        updater.on_new_file(&path);
        assert_eq!(
            registry.read().unwrap().aggregated_beacon.get_dataset_ids(),
            ["ds"]
        );

        updater.on_removed_file(&path);
        assert!(
            registry
                .read()
                .unwrap()
                .aggregated_beacon
                .get_dataset_ids()
                .is_empty()
        );
    }

    #[test]
    fn test_broken_metadata_recorded_as_problematic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let dataset_dir = root.join("ds");
        std::fs::create_dir_all(&dataset_dir).unwrap();
        let metadata = dataset_dir.join("metadata.yaml");
        std::fs::write(&metadata, "title: [unclosed").unwrap();

        let (updater, registry) = updater(&root);
        updater.on_new_file(&metadata);

        let guard = registry.read().unwrap();
        assert_eq!(guard.problematic_files().len(), 1);
        assert!(guard.fdp.datasets.is_empty());
    }

    #[test]
    fn test_dataset_dir_removal_purges_beacon_data() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (updater, registry) = updater(&root);
        let parquet = root.join("ds/GRCh37/individuals.parquet");

        updater.on_new_file(&parquet);
        assert_eq!(
            registry.read().unwrap().sensitive_beacon.get_dataset_ids(),
            ["ds"]
        );

        updater.on_removed_dir(&root.join("ds"));
        assert!(
            registry
                .read()
                .unwrap()
                .sensitive_beacon
                .get_dataset_ids()
                .is_empty()
        );
    }
}
