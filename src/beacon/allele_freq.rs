//! Variant lookup for the aggregated Beacon (`/g_variants`).
//!
//! Searches for matching variants in the registry's allele-frequency files
//! and returns the matching frequencies per dataset. Only the following
//! request parameters are served: pagination (skip, limit), `assemblyId`,
//! `referenceName`, `start`, `referenceBases`, `alternateBases` and
//! `variantType` (defaults to `SNP`). File readings run in a single thread.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use uuid::Uuid;

use crate::beacon::model::{BeaconRequest, VariantQueryParameters};
use crate::beacon::parquet::{f64_column, i32_column, read_filtered, str_column, variant_predicate};
use crate::registry::{BeaconAssembly, DataRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct Identifiers {
    #[serde(rename = "genomicHGVSId")]
    pub genomic_hgvs_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Number {
    #[serde(rename = "type")]
    pub value_type: &'static str,
    pub value: i64,
}

impl Number {
    fn new(value: i64) -> Self {
        Self { value_type: "Number", value }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceInterval {
    #[serde(rename = "type")]
    pub value_type: &'static str,
    pub start: Number,
    pub end: Number,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceLocation {
    #[serde(rename = "type")]
    pub value_type: &'static str,
    pub sequence_id: String,
    pub interval: SequenceInterval,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyVariation {
    pub location: SequenceLocation,
    pub reference_bases: String,
    pub alternate_bases: String,
    pub variant_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationFrequency {
    pub population: String,
    pub allele_frequency: f64,
    pub allele_count: Option<i64>,
    pub allele_count_homozygous: Option<i64>,
    pub allele_count_heterozygous: Option<i64>,
    pub allele_count_hemizygous: Option<i64>,
    pub allele_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyInPopulations {
    pub source: &'static str,
    pub source_reference: &'static str,
    pub number_of_populations: usize,
    pub populations: Vec<PopulationFrequency>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlleleFreqResult {
    pub identifiers: Identifiers,
    pub variant_internal_id: String,
    pub variation: LegacyVariation,
    pub frequency_in_populations: Vec<FrequencyInPopulations>,
}

#[derive(Debug, Clone)]
struct AfVariant {
    assembly: BeaconAssembly,
    chrom: String,
    pos: i64,
    reference: String,
    alternate: String,
    variant_type: String,
}

#[derive(Debug, Clone)]
struct AfRow {
    population: String,
    af: f64,
    ac: Option<i64>,
    ac_het: Option<i64>,
    ac_hom: Option<i64>,
    ac_hemi: Option<i64>,
    an: Option<i64>,
}

/// Searches for matching variants in the Parquet files and returns a map of
/// dataset ids to their matching allele frequencies (per cohort).
pub fn find_datasets_allele_frequencies(
    registry: &Arc<RwLock<DataRegistry>>,
    request: &BeaconRequest,
) -> HashMap<String, AlleleFreqResult> {
    let query = request.query();
    let Some(params) = query.request_parameters.as_ref().and_then(|p| p.first()) else {
        return HashMap::new();
    };
    if params.is_not_sufficient() {
        return HashMap::new();
    }

    let (Some(assembly), Some(chrom), Some(pos)) =
        (params.assembly(), params.reference_name.as_deref(), params.start0())
    else {
        return HashMap::new();
    };

    let dataset_files = match registry.read() {
        Ok(guard) => guard.aggregated_beacon.get_dataset_files(assembly, chrom, pos),
        Err(_) => return HashMap::new(),
    };

    let (skip, limit) = query.page();

    let mut results = HashMap::new();
    let mut dataset_match_count: u64 = 0;

    let mut dataset_ids: Vec<&String> = dataset_files.keys().collect();
    dataset_ids.sort();

    for dataset_id in dataset_ids {
        let parquet_file = &dataset_files[dataset_id];
        let skip_details = dataset_match_count < skip;

        match find_af(registry, params, parquet_file, skip_details, assembly, chrom) {
            AfLookup::NoMatch => {}
            AfLookup::Skipped => {
                dataset_match_count += 1;
            }
            AfLookup::Found(result) => {
                dataset_match_count += 1;
                results.insert(dataset_id.clone(), *result);
                if results.len() as u64 >= limit {
                    break;
                }
            }
        }
    }

    results
}

enum AfLookup {
    /// The file had no matching rows (or was unreadable).
    NoMatch,
    /// Rows matched but the dataset falls into the skipped page.
    Skipped,
    Found(Box<AlleleFreqResult>),
}

impl AfLookup {
    fn found(result: AlleleFreqResult) -> Self {
        Self::Found(Box::new(result))
    }
}

fn find_af(
    registry: &Arc<RwLock<DataRegistry>>,
    params: &VariantQueryParameters,
    parquet_file: &Path,
    skip_details: bool,
    assembly: BeaconAssembly,
    chrom: &str,
) -> AfLookup {
    let Some(frame) = read_filtered(registry, parquet_file, Some(variant_predicate(params)), None)
    else {
        return AfLookup::NoMatch;
    };

    if frame.height() == 0 {
        tracing::debug!(
            "No matching Parquet rows in [{}] for allele-freq query",
            parquet_file.display()
        );
        return AfLookup::NoMatch;
    }

    tracing::info!(
        "Found {} matching row(s) in [{}] for allele-freq query",
        frame.height(),
        parquet_file.display()
    );

    if skip_details {
        tracing::debug!("Skip details requested");
        return AfLookup::Skipped;
    }

    let columns = (
        i32_column(&frame, "POS"),
        str_column(&frame, "REF"),
        str_column(&frame, "ALT"),
        str_column(&frame, "VT"),
        str_column(&frame, "POPULATION"),
        f64_column(&frame, "AF"),
        i32_column(&frame, "AC"),
        i32_column(&frame, "AC_HET"),
        i32_column(&frame, "AC_HOM"),
        i32_column(&frame, "AC_HEMI"),
        i32_column(&frame, "AN"),
    );
    let (Ok(pos), Ok(reference), Ok(alternate), Ok(vt), Ok(population), Ok(af), Ok(ac), Ok(ac_het), Ok(ac_hom), Ok(ac_hemi), Ok(an)) =
        columns
    else {
        let guard = registry.read();
        if let Ok(guard) = guard {
            guard.record_issue(parquet_file, "file does not match the allele-freq schema");
        }
        return AfLookup::NoMatch;
    };

    let mut af_variant: Option<AfVariant> = None;
    let mut af_rows = Vec::with_capacity(frame.height());

    for row in 0..frame.height() {
        if af_variant.is_none() {
            af_variant = Some(AfVariant {
                assembly,
                chrom: chrom.to_owned(),
                pos: pos[row].unwrap_or_default() as i64,
                reference: reference[row].unwrap_or_default().to_owned(),
                alternate: alternate[row].unwrap_or_default().to_owned(),
                variant_type: vt[row].unwrap_or_default().to_owned(),
            });
        }
        af_rows.push(AfRow {
            population: population[row].unwrap_or_default().to_owned(),
            af: af[row].unwrap_or_default(),
            ac: ac[row].map(i64::from),
            ac_het: ac_het[row].map(i64::from),
            ac_hom: ac_hom[row].map(i64::from),
            ac_hemi: ac_hemi[row].map(i64::from),
            an: an[row].map(i64::from),
        });
    }

    tracing::debug!("af rows: {}", af_rows.len());
    match af_variant {
        Some(variant) => AfLookup::found(build_result(&variant, af_rows)),
        None => AfLookup::NoMatch,
    }
}

fn build_result(variant: &AfVariant, af_rows: Vec<AfRow>) -> AlleleFreqResult {
    AlleleFreqResult {
        identifiers: identifiers(variant),
        variant_internal_id: variant_internal_id(&variant.reference, &variant.alternate),
        variation: legacy_variation(variant),
        frequency_in_populations: frequencies(af_rows),
    }
}

fn identifiers(variant: &AfVariant) -> Identifiers {
    let ref_seq_id = ref_seq_id(variant.assembly, &variant.chrom).unwrap_or("");
    let hgvs_id = format!(
        "{ref_seq_id}:g.{}{}>{}",
        variant.pos + 1,
        variant.reference,
        variant.alternate
    );
    Identifiers { genomic_hgvs_id: hgvs_id }
}

fn variant_internal_id(reference: &str, alternate: &str) -> String {
    // Follows the internal ID format used in beacon2-ri-tools-v2:
    format!("{}:{reference}:{alternate}", Uuid::new_v4())
}

fn legacy_variation(variant: &AfVariant) -> LegacyVariation {
    // The position in the Parquet file is 0-based.
    let seq_pos = variant.pos + 1;
    let sequence_id = format!(
        "HGVSid:{}:g.{seq_pos}{}>{}",
        variant.chrom, variant.reference, variant.alternate
    );

    LegacyVariation {
        location: SequenceLocation {
            value_type: "SequenceLocation",
            sequence_id,
            interval: SequenceInterval {
                value_type: "SequenceInterval",
                start: Number::new(variant.pos),
                end: Number::new(variant.pos + variant.reference.len() as i64),
            },
        },
        reference_bases: variant.reference.clone(),
        alternate_bases: variant.alternate.clone(),
        variant_type: variant.variant_type.clone(),
    }
}

fn frequencies(af_rows: Vec<AfRow>) -> Vec<FrequencyInPopulations> {
    let populations: Vec<PopulationFrequency> = af_rows
        .into_iter()
        .map(|row| PopulationFrequency {
            population: row.population,
            allele_frequency: row.af,
            allele_count: row.ac,
            allele_count_homozygous: row.ac_hom,
            allele_count_heterozygous: row.ac_het,
            allele_count_hemizygous: row.ac_hemi,
            allele_number: row.an,
        })
        .collect();

    vec![FrequencyInPopulations {
        source: "The Genome of Europe",
        source_reference: "https://genomeofeurope.eu/",
        number_of_populations: populations.len(),
        populations,
    }]
}

/// RefSeq accession for a chromosome in the given assembly, used for
/// building genomic HGVS identifiers.
///
/// GRCh37: <https://www.ncbi.nlm.nih.gov/datasets/genome/GCA_000001405.14/>
/// GRCh38: <https://www.ncbi.nlm.nih.gov/datasets/genome/GCF_000001405.40/>
pub fn ref_seq_id(assembly: BeaconAssembly, chrom: &str) -> Option<&'static str> {
    let table: &[(&str, &str)] = match assembly {
        BeaconAssembly::GRCh37 => &[
            ("1", "NC_000001.10"),
            ("2", "NC_000002.11"),
            ("3", "NC_000003.11"),
            ("4", "NC_000004.11"),
            ("5", "NC_000005.9"),
            ("6", "NC_000006.11"),
            ("7", "NC_000007.13"),
            ("8", "NC_000008.10"),
            ("9", "NC_000009.11"),
            ("10", "NC_000010.10"),
            ("11", "NC_000011.9"),
            ("12", "NC_000012.11"),
            ("13", "NC_000013.10"),
            ("14", "NC_000014.8"),
            ("15", "NC_000015.9"),
            ("16", "NC_000016.9"),
            ("17", "NC_000017.10"),
            ("18", "NC_000018.9"),
            ("19", "NC_000019.9"),
            ("20", "NC_000020.10"),
            ("21", "NC_000021.8"),
            ("22", "NC_000022.10"),
            ("X", "NC_000023.10"),
            ("Y", "NC_000024.9"),
            ("M", "NC_001807.4"),
        ],
        BeaconAssembly::GRCh38 => &[
            ("1", "NC_000001.11"),
            ("2", "NC_000002.12"),
            ("3", "NC_000003.12"),
            ("4", "NC_000004.12"),
            ("5", "NC_000005.10"),
            ("6", "NC_000006.12"),
            ("7", "NC_000007.14"),
            ("8", "NC_000008.11"),
            ("9", "NC_000009.12"),
            ("10", "NC_000010.11"),
            ("11", "NC_000011.10"),
            ("12", "NC_000012.12"),
            ("13", "NC_000013.11"),
            ("14", "NC_000014.9"),
            ("15", "NC_000015.10"),
            ("16", "NC_000016.10"),
            ("17", "NC_000017.11"),
            ("18", "NC_000018.10"),
            ("19", "NC_000019.10"),
            ("20", "NC_000020.11"),
            ("21", "NC_000021.9"),
            ("22", "NC_000022.11"),
            ("X", "NC_000023.11"),
            ("Y", "NC_000024.10"),
            ("M", "NC_012920.1"),
        ],
    };
    table
        .iter()
        .find(|(name, _)| *name == chrom)
        .map(|(_, accession)| *accession)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_seq_tables() {
        assert_eq!(ref_seq_id(BeaconAssembly::GRCh37, "1"), Some("NC_000001.10"));
        assert_eq!(ref_seq_id(BeaconAssembly::GRCh38, "M"), Some("NC_012920.1"));
        assert_eq!(ref_seq_id(BeaconAssembly::GRCh38, "chr1"), None);
    }

    #[test]
    fn test_hgvs_identifier_is_one_based() {
        let variant = AfVariant {
            assembly: BeaconAssembly::GRCh37,
            chrom: "1".to_owned(),
            pos: 12344,
            reference: "A".to_owned(),
            alternate: "G".to_owned(),
            variant_type: "SNP".to_owned(),
        };
        let ids = identifiers(&variant);
        assert_eq!(ids.genomic_hgvs_id, "NC_000001.10:g.12345A>G");
    }

    #[test]
    fn test_interval_is_zero_based_and_ref_length_wide() {
        let variant = AfVariant {
            assembly: BeaconAssembly::GRCh38,
            chrom: "2".to_owned(),
            pos: 100,
            reference: "AT".to_owned(),
            alternate: "A".to_owned(),
            variant_type: "INDEL".to_owned(),
        };
        let variation = legacy_variation(&variant);
        assert_eq!(variation.location.interval.start.value, 100);
        assert_eq!(variation.location.interval.end.value, 102);
    }

    #[test]
    fn test_internal_id_shape() {
        let id = variant_internal_id("A", "G");
        assert!(id.ends_with(":A:G"));
        assert_eq!(id.split(':').count(), 3);
    }
}
