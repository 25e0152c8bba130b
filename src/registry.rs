//! The in-memory data registry.
//!
//! A process-wide index over the hierarchically structured data directory:
//! the FAIR Data Point side (catalogs, datasets, catalog membership) and one
//! [`BeaconData`] per Beacon personality mapping assemblies to datasets and
//! their position-group files. The registry performs no I/O of its own; the
//! monitor feeds it events and the HTTP handlers read it under a shared lock.
//!
//! The registry relies on the data-directory layout:
//!
//! ```text
//! <data-dir>/DATASET_ID/
//!   metadata.yaml  - FDP properties about the dataset
//!   ASSEMBLY/      - either GRCh37 or GRCh38
//!     {allele-freq|individuals}-chr{C}.{G}.parquet
//!     individuals.parquet
//! ```
//!
//! Paths not matching the layout are ignored with a warning.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::fdp::config::{FdpCatalog, FdpDataset};

/// Positions are partitioned into groups of ten million per chromosome.
pub const POS_DIVIDER: u64 = 10_000_000;

/// Assembly values that we support (case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BeaconAssembly {
    GRCh37,
    GRCh38,
}

impl BeaconAssembly {
    pub const ALL: [Self; 2] = [Self::GRCh37, Self::GRCh38];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GRCh37 => "GRCh37",
            Self::GRCh38 => "GRCh38",
        }
    }
}

impl fmt::Display for BeaconAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BeaconAssembly {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRCh37" => Ok(Self::GRCh37),
            "GRCh38" => Ok(Self::GRCh38),
            other => Err(anyhow!("Not a supported assembly: {other}")),
        }
    }
}

/// Computes the position-group key (`"{CHROM}.{G}"`) for a 0-based position.
pub fn chr_group_for(chrom: &str, pos: u64) -> String {
    format!("{chrom}.{}", pos / POS_DIVIDER)
}

/// A dataset in one Beacon personality.
#[derive(Debug, Clone, Default)]
pub struct BeaconDataset {
    pub dataset_id: String,
    pub individuals_parquet: Option<PathBuf>,
    pub chr_group_files: BTreeMap<String, PathBuf>,
}

impl BeaconDataset {
    fn new(dataset_id: &str) -> Self {
        Self {
            dataset_id: dataset_id.to_owned(),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.individuals_parquet.is_none() && self.chr_group_files.is_empty()
    }
}

/// Per-personality Beacon data: assemblies and their datasets, in
/// registration order.
#[derive(Debug, Default)]
pub struct BeaconData {
    pub assemblies: BTreeMap<BeaconAssembly, Vec<BeaconDataset>>,
}

impl BeaconData {
    /// Sorted, de-duplicated dataset ids across all assemblies.
    pub fn get_dataset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .assemblies
            .values()
            .flatten()
            .map(|dataset| dataset.dataset_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Maps dataset ids to their allele-frequency file for the position
    /// group of `pos` in the given assembly.
    pub fn get_dataset_files(
        &self,
        assembly: BeaconAssembly,
        chrom: &str,
        pos: u64,
    ) -> HashMap<String, PathBuf> {
        let mut datasets = HashMap::new();
        let Some(entries) = self.assemblies.get(&assembly) else {
            return datasets;
        };

        let chr_group = chr_group_for(chrom, pos);
        for dataset in entries {
            if let Some(file_path) = dataset.chr_group_files.get(&chr_group) {
                datasets.insert(dataset.dataset_id.clone(), file_path.clone());
            }
        }

        tracing::debug!(
            "get_dataset_files('{assembly}', ({chrom}, {pos}) -> {chr_group}) -> {} datasets",
            datasets.len()
        );
        datasets
    }

    /// Maps dataset ids to `(individuals.parquet, chr-group file)`.
    ///
    /// `individuals.parquet` is always mandatory. When an assembly, a
    /// chromosome and a position are all supplied, the per-chr-group file is
    /// mandatory too and datasets missing it are skipped. When they are
    /// omitted, all datasets with an individuals file are returned.
    pub fn get_dataset_individuals(
        &self,
        assembly: Option<BeaconAssembly>,
        chrom: Option<&str>,
        pos: Option<u64>,
    ) -> HashMap<String, (PathBuf, Option<PathBuf>)> {
        let mut datasets = HashMap::new();
        if let Some(wanted) = assembly
            && !self.assemblies.contains_key(&wanted)
        {
            return datasets;
        }

        let chr_group = match (assembly, chrom, pos) {
            (Some(_), Some(chrom), Some(pos)) => Some(chr_group_for(chrom, pos)),
            _ => None,
        };

        for entries in self.assemblies.values() {
            for dataset in entries {
                let Some(individuals) = &dataset.individuals_parquet else {
                    tracing::warn!(
                        "Dataset {} is missing its individuals.parquet file",
                        dataset.dataset_id
                    );
                    continue;
                };

                let mut group_file = None;
                if let Some(group) = &chr_group {
                    group_file = dataset.chr_group_files.get(group).cloned();
                    if group_file.is_none() {
                        continue;
                    }
                }

                datasets.insert(dataset.dataset_id.clone(), (individuals.clone(), group_file));
            }
        }

        datasets
    }
}

/// FAIR Data Point instance data.
#[derive(Debug, Default)]
pub struct FdpData {
    pub catalogs: BTreeMap<String, FdpCatalog>,
    pub datasets: HashMap<String, FdpDataset>,
    pub catalog_datasets: HashMap<String, Vec<String>>,
}

/// The process-wide registry. The single monitor thread is the only writer
/// of the structural maps; the problematic-file ledger has its own lock so
/// that read-path parquet failures can be recorded without a write guard.
#[derive(Debug, Default)]
pub struct DataRegistry {
    pub fdp: FdpData,
    pub aggregated_beacon: BeaconData,
    pub sensitive_beacon: BeaconData,
    problematic_files: Mutex<BTreeMap<String, String>>,
}

impl DataRegistry {
    pub fn new(catalogs: BTreeMap<String, FdpCatalog>) -> Self {
        Self {
            fdp: FdpData {
                catalogs,
                ..FdpData::default()
            },
            ..Self::default()
        }
    }

    // ---------------------------------------------------------------- //
    // Problematic files
    // ---------------------------------------------------------------- //

    pub fn record_issue(&self, file_path: &Path, issue: &str) {
        let key = file_path.to_string_lossy().into_owned();
        tracing::warn!("Problematic file [{key}]: {issue}");
        if let Ok(mut files) = self.problematic_files.lock() {
            files.insert(key, issue.to_owned());
        }
    }

    pub fn forget_issue(&self, file_path: &Path) {
        if let Ok(mut files) = self.problematic_files.lock() {
            files.remove(&file_path.to_string_lossy().into_owned());
        }
    }

    pub fn forget_issues_in_dir(&self, dir_path: &Path) {
        let prefix = dir_path.to_string_lossy().into_owned();
        if let Ok(mut files) = self.problematic_files.lock() {
            files.retain(|path, _| !path.starts_with(&prefix));
        }
    }

    pub fn problematic_files(&self) -> BTreeMap<String, String> {
        self.problematic_files
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------- //
    // FDP datasets
    // ---------------------------------------------------------------- //

    pub fn add_dataset(&mut self, dataset_id: &str, props: FdpDataset) {
        let catalog_id = props.catalog_id.clone();
        self.fdp.datasets.insert(dataset_id.to_owned(), props);

        // Make sure it's not already included in another catalog:
        for dataset_ids in self.fdp.catalog_datasets.values_mut() {
            dataset_ids.retain(|id| id != dataset_id);
        }

        // Register the dataset to the catalog:
        self.fdp
            .catalog_datasets
            .entry(catalog_id.clone())
            .or_default()
            .push(dataset_id.to_owned());
        tracing::debug!("[add_dataset] {dataset_id} to catalog {catalog_id}");

        if !self.fdp.catalogs.contains_key(&catalog_id) {
            tracing::warn!(
                "[add_dataset] {dataset_id} references catalog_id [{catalog_id}], which is not \
                 defined in FDP configuration, thus the dataset is not visible."
            );
        }
    }

    /// Removes the dataset from the FDP side. The Beacon data is not
    /// modified unless `also_beacon_data` is set, as the metadata file might
    /// be added back shortly (temporary delete and update); in that case the
    /// Beacon data does not have to be scanned again.
    pub fn remove_dataset(&mut self, dataset_id: &str, also_beacon_data: bool) {
        let mut found_in_catalog = false;
        for (catalog_id, dataset_ids) in &mut self.fdp.catalog_datasets {
            if dataset_ids.iter().any(|id| id == dataset_id) {
                dataset_ids.retain(|id| id != dataset_id);
                tracing::debug!("[remove_dataset] {dataset_id} from catalog {catalog_id}");
                found_in_catalog = true;
            }
        }

        self.fdp.datasets.remove(dataset_id);

        if !found_in_catalog {
            tracing::debug!("[remove_dataset] {dataset_id} from FDP");
        }

        if !also_beacon_data {
            return;
        }

        for beacon_data in [&mut self.aggregated_beacon, &mut self.sensitive_beacon] {
            for (assembly, datasets) in &mut beacon_data.assemblies {
                let before = datasets.len();
                datasets.retain(|dataset| dataset.dataset_id != dataset_id);
                if datasets.len() < before {
                    tracing::debug!("[remove_dataset] {dataset_id} from assembly {assembly}");
                }
            }
        }
    }

    /// Removes one dataset's entry for one assembly from both personalities.
    pub fn remove_beacon_dataset(&mut self, dataset_id: &str, assembly: BeaconAssembly) {
        for beacon_data in [&mut self.aggregated_beacon, &mut self.sensitive_beacon] {
            let Some(datasets) = beacon_data.assemblies.get_mut(&assembly) else {
                continue;
            };
            let before = datasets.len();
            datasets.retain(|dataset| dataset.dataset_id != dataset_id);
            if datasets.len() < before {
                tracing::debug!("[remove_beacon_dataset] {dataset_id} from assembly {assembly}");
            }
        }
    }

    // ---------------------------------------------------------------- //
    // Beacon parquet files
    // ---------------------------------------------------------------- //

    pub fn add_parquet(&mut self, dataset_id: &str, assembly: BeaconAssembly, file_path: &Path) {
        let Some(filename) = file_name_of(file_path) else {
            return;
        };

        let Some(target) = self.resolve_beacon_dataset(&filename, Some(assembly), dataset_id) else {
            tracing::warn!(
                "[add_parquet] Ignoring Parquet file due unsupported prefix [{}]",
                file_path.display()
            );
            return;
        };

        if filename == "individuals.parquet" {
            target.individuals_parquet = Some(file_path.to_path_buf());
            tracing::debug!("[add_parquet] {dataset_id} file {}", file_path.display());
            return;
        }

        let Some(chr_group) = resolve_chr_group(&filename) else {
            tracing::warn!(
                "[add_parquet] Ignoring Parquet file due bad chr-group [{}]",
                file_path.display()
            );
            return;
        };

        target.chr_group_files.insert(chr_group, file_path.to_path_buf());
        tracing::debug!(
            "[add_parquet] {dataset_id} file {} to assembly {assembly}",
            file_path.display()
        );
    }

    pub fn remove_parquet(&mut self, dataset_id: &str, file_path: &Path) {
        let Some(filename) = file_name_of(file_path) else {
            return;
        };
        let Some(assembly) = file_path
            .parent()
            .and_then(file_name_of)
            .and_then(|name| name.parse::<BeaconAssembly>().ok())
        else {
            return;
        };

        let Some(target) = self.resolve_beacon_dataset(&filename, Some(assembly), dataset_id) else {
            return;
        };

        if filename == "individuals.parquet" {
            tracing::debug!("[remove_parquet] {dataset_id} file {}", file_path.display());
            target.individuals_parquet = None;
        } else if let Some(chr_group) = resolve_chr_group(&filename) {
            target.chr_group_files.remove(&chr_group);
            tracing::debug!(
                "[remove_parquet] {dataset_id} file {} from assembly {assembly}",
                file_path.display()
            );
        } else {
            tracing::warn!(
                "[remove_parquet] Ignoring Parquet file due bad chr-group [{}]",
                file_path.display()
            );
        }

        if target.is_empty() {
            self.remove_beacon_dataset(dataset_id, assembly);
        }
    }

    /// Resolves the target personality from the file basename and returns the
    /// (upserted) Beacon dataset entry. When `assembly` is given, the dataset
    /// is added under it if missing.
    fn resolve_beacon_dataset(
        &mut self,
        filename: &str,
        assembly: Option<BeaconAssembly>,
        dataset_id: &str,
    ) -> Option<&mut BeaconDataset> {
        let beacon_data = if filename.starts_with("allele-freq-") {
            &mut self.aggregated_beacon
        } else if filename.starts_with("individuals-") || filename == "individuals.parquet" {
            &mut self.sensitive_beacon
        } else {
            tracing::warn!("Ignoring Parquet file due to non-standard name [{filename}]");
            return None;
        };

        if let Some(assembly) = assembly {
            let datasets = beacon_data.assemblies.entry(assembly).or_default();
            let position = datasets.iter().position(|dataset| dataset.dataset_id == dataset_id);
            let index = match position {
                Some(index) => index,
                None => {
                    datasets.push(BeaconDataset::new(dataset_id));
                    datasets.len() - 1
                }
            };
            return datasets.get_mut(index);
        }

        beacon_data
            .assemblies
            .values_mut()
            .flatten()
            .find(|dataset| dataset.dataset_id == dataset_id)
    }

    /// Logs a summary of the registry state after the initial scan.
    pub fn log_status(&self) {
        tracing::info!(
            "Data scanning completed: {} datasets in total",
            self.fdp.datasets.len()
        );
        tracing::info!(
            "Aggregated Beacon: {} datasets",
            self.aggregated_beacon.get_dataset_ids().len()
        );
        tracing::info!(
            "Sensitive Beacon: {} datasets",
            self.sensitive_beacon.get_dataset_ids().len()
        );
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// Extracts the chr-group key from a parquet filename: the substring between
/// the final `chr` and the final `.` (e.g. `allele-freq-chr1.0.parquet`
/// yields `1.0`). Returns `None` when the pattern is absent.
pub fn resolve_chr_group(filename: &str) -> Option<String> {
    let start = filename.rfind("chr")? + 3;
    let end = filename.rfind('.')?;
    (start < end).then(|| filename[start..end].to_owned())
}

/// Performs the initial scan of the data directory, registering every
/// metadata file and parquet file found under the recognised layout.
pub fn scan_data_directory(registry: &mut DataRegistry, data_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        tracing::warn!("Cannot list the data directory: {}", data_dir.display());
        return;
    };

    for entry in entries.flatten() {
        let dataset_dir = entry.path();
        let Some(dataset_id) = file_name_of(&dataset_dir) else {
            continue;
        };

        let metadata_file = dataset_dir.join("metadata.yaml");
        if metadata_file.is_file() {
            registry.forget_issue(&metadata_file);
            match load_dataset_metadata(&metadata_file) {
                Ok(props) => registry.add_dataset(&dataset_id, props),
                Err(e) => {
                    registry.record_issue(&metadata_file, &e.to_string());
                    tracing::error!(
                        "Error parsing metadata from {}: {e}",
                        metadata_file.display()
                    );
                }
            }
        }

        for assembly in BeaconAssembly::ALL {
            let assembly_dir = dataset_dir.join(assembly.as_str());
            let Ok(files) = std::fs::read_dir(&assembly_dir) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().is_some_and(|ext| ext == "parquet") {
                    registry.add_parquet(&dataset_id, assembly, &path);
                }
            }
        }
    }
}

/// Parses a dataset `metadata.yaml` file.
pub fn load_dataset_metadata(path: &Path) -> anyhow::Result<FdpDataset> {
    let contents = std::fs::read_to_string(path)?;
    let props: FdpDataset = serde_yaml::from_str(&contents)?;
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_meta(catalog_id: &str) -> FdpDataset {
        serde_yaml::from_str(&format!(
            "title: T\ndescription: D\ncatalog_id: {catalog_id}\n\
             since: 2023-01-01T00:00:00Z\nupdated: 2023-06-01T00:00:00Z\n\
             record_count: 10\ndata_provider_name: P\n"
        ))
        .unwrap()
    }

    fn registry_with_catalog(catalog_id: &str) -> DataRegistry {
        let catalog: FdpCatalog =
            serde_yaml::from_str("title: C\ndescription: C desc\n").unwrap();
        DataRegistry::new(BTreeMap::from([(catalog_id.to_owned(), catalog)]))
    }

    #[test]
    fn test_chr_group_extraction() {
        assert_eq!(resolve_chr_group("allele-freq-chr1.0.parquet").as_deref(), Some("1.0"));
        assert_eq!(resolve_chr_group("individuals-chrX.12.parquet").as_deref(), Some("X.12"));
        assert_eq!(resolve_chr_group("individuals.parquet"), None);
        assert_eq!(resolve_chr_group("allele-freq-chr.parquet"), None);
    }

    #[test]
    fn test_chr_group_round_trip() {
        let group = chr_group_for("7", 123_456_789);
        assert_eq!(group, "7.12");
        let filename = format!("allele-freq-chr{group}.parquet");
        assert_eq!(resolve_chr_group(&filename).as_deref(), Some(group.as_str()));
    }

    #[test]
    fn test_basename_routing() {
        let mut registry = registry_with_catalog("c1");
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh38,
            Path::new("/data/ds/GRCh38/allele-freq-chr1.0.parquet"),
        );
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh38,
            Path::new("/data/ds/GRCh38/individuals-chr1.0.parquet"),
        );
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh38,
            Path::new("/data/ds/GRCh38/individuals.parquet"),
        );
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh38,
            Path::new("/data/ds/GRCh38/something-else.parquet"),
        );

        assert_eq!(registry.aggregated_beacon.get_dataset_ids(), ["ds"]);
        assert_eq!(registry.sensitive_beacon.get_dataset_ids(), ["ds"]);

        let aggregated = &registry.aggregated_beacon.assemblies[&BeaconAssembly::GRCh38][0];
        assert!(aggregated.individuals_parquet.is_none());
        assert_eq!(aggregated.chr_group_files.len(), 1);

        let sensitive = &registry.sensitive_beacon.assemblies[&BeaconAssembly::GRCh38][0];
        assert!(sensitive.individuals_parquet.is_some());
        assert_eq!(sensitive.chr_group_files.len(), 1);
    }

    #[test]
    fn test_dataset_belongs_to_one_catalog() {
        let mut registry = registry_with_catalog("c1");
        registry.add_dataset("ds", dataset_meta("c1"));
        registry.add_dataset("ds", dataset_meta("c2"));

        assert!(registry.fdp.catalog_datasets["c1"].is_empty());
        assert_eq!(registry.fdp.catalog_datasets["c2"], ["ds"]);
        assert_eq!(registry.fdp.datasets["ds"].catalog_id, "c2");
    }

    #[test]
    fn test_remove_dataset_keeps_beacon_by_default() {
        let mut registry = registry_with_catalog("c1");
        registry.add_dataset("ds", dataset_meta("c1"));
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh37,
            Path::new("/data/ds/GRCh37/allele-freq-chr1.0.parquet"),
        );

        registry.remove_dataset("ds", false);
        assert!(registry.fdp.datasets.is_empty());
        assert_eq!(registry.aggregated_beacon.get_dataset_ids(), ["ds"]);

        registry.remove_dataset("ds", true);
        assert!(registry.aggregated_beacon.get_dataset_ids().is_empty());
    }

    #[test]
    fn test_remove_parquet_drops_empty_dataset() {
        let mut registry = registry_with_catalog("c1");
        let path = Path::new("/data/ds/GRCh37/allele-freq-chr1.0.parquet");
        registry.add_parquet("ds", BeaconAssembly::GRCh37, path);
        assert_eq!(registry.aggregated_beacon.get_dataset_ids(), ["ds"]);

        registry.remove_parquet("ds", path);
        assert!(registry.aggregated_beacon.get_dataset_ids().is_empty());
    }

    #[test]
    fn test_get_dataset_files_selects_by_chr_group() {
        let mut registry = registry_with_catalog("c1");
        registry.add_parquet(
            "ds",
            BeaconAssembly::GRCh37,
            Path::new("/data/ds/GRCh37/allele-freq-chr1.0.parquet"),
        );

        let hit = registry
            .aggregated_beacon
            .get_dataset_files(BeaconAssembly::GRCh37, "1", 12_344);
        assert_eq!(hit.len(), 1);

        let other_group = registry
            .aggregated_beacon
            .get_dataset_files(BeaconAssembly::GRCh37, "1", 10_000_001);
        assert!(other_group.is_empty());

        let other_assembly = registry
            .aggregated_beacon
            .get_dataset_files(BeaconAssembly::GRCh38, "1", 12_344);
        assert!(other_assembly.is_empty());
    }

    #[test]
    fn test_get_dataset_individuals_requires_both_files() {
        let mut registry = registry_with_catalog("c1");
        registry.add_parquet(
            "only-group",
            BeaconAssembly::GRCh37,
            Path::new("/data/only-group/GRCh37/individuals-chr1.0.parquet"),
        );
        registry.add_parquet(
            "complete",
            BeaconAssembly::GRCh37,
            Path::new("/data/complete/GRCh37/individuals-chr1.0.parquet"),
        );
        registry.add_parquet(
            "complete",
            BeaconAssembly::GRCh37,
            Path::new("/data/complete/GRCh37/individuals.parquet"),
        );

        let with_variant = registry.sensitive_beacon.get_dataset_individuals(
            Some(BeaconAssembly::GRCh37),
            Some("1"),
            Some(999),
        );
        assert_eq!(with_variant.len(), 1);
        assert!(with_variant.contains_key("complete"));
        assert!(with_variant["complete"].1.is_some());

        let without_variant = registry.sensitive_beacon.get_dataset_individuals(None, None, None);
        assert_eq!(without_variant.len(), 1);
        assert!(without_variant["complete"].1.is_none());
    }

    #[test]
    fn test_problematic_files_ledger() {
        let registry = registry_with_catalog("c1");
        let path = Path::new("/data/ds/metadata.yaml");
        registry.record_issue(path, "bad yaml");
        assert_eq!(registry.problematic_files().len(), 1);

        registry.forget_issue(path);
        assert!(registry.problematic_files().is_empty());

        registry.record_issue(Path::new("/data/ds/GRCh37/a.parquet"), "x");
        registry.record_issue(Path::new("/data/other/GRCh37/b.parquet"), "y");
        registry.forget_issues_in_dir(Path::new("/data/ds"));
        let remaining = registry.problematic_files();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.keys().next().unwrap().contains("other"));
    }
}
