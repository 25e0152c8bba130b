//! The columnar reader adapter.
//!
//! A narrow interface over the Parquet files the registry points at: scan a
//! file lazily, push the row predicate down, project only the requested
//! columns and collect the matching rows. Read failures are recorded in the
//! registry's problematic-file ledger and the affected file is simply
//! omitted from results; a successful read clears a previous issue.

use std::path::Path;
use std::sync::{Arc, RwLock};

use polars::prelude::*;

use crate::beacon::model::VariantQueryParameters;
use crate::registry::DataRegistry;

/// Row predicate for variant lookups. The position in the Parquet files is
/// already 0-based (VCF POS - 1); a missing variant type defaults to `SNP`.
pub fn variant_predicate(params: &VariantQueryParameters) -> Expr {
    let pos = params.start0().unwrap_or(0);
    let variant_type = params.variant_type.as_deref().unwrap_or("SNP");

    col("POS")
        .eq(lit(pos as i64))
        .and(col("REF").eq(lit(params.reference_bases.clone().unwrap_or_default())))
        .and(col("ALT").eq(lit(params.alternate_bases.clone().unwrap_or_default())))
        .and(col("VT").eq(lit(variant_type.to_owned())))
}

/// Loads the pre-filtered rows from the given Parquet file, projecting only
/// `columns` when provided. Returns `None` on failure (recorded as a
/// problematic file).
pub fn read_filtered(
    registry: &Arc<RwLock<DataRegistry>>,
    parquet_file: &Path,
    predicate: Option<Expr>,
    columns: Option<&[&str]>,
) -> Option<DataFrame> {
    tracing::debug!("Reading Parquet file: {}", parquet_file.display());

    let result = scan_and_collect(parquet_file, predicate, columns);
    match result {
        Ok(frame) => {
            if let Ok(guard) = registry.read() {
                guard.forget_issue(parquet_file);
            }
            Some(frame)
        }
        Err(e) => {
            if let Ok(guard) = registry.read() {
                guard.record_issue(parquet_file, &e.to_string());
            }
            tracing::error!("Failed to read Parquet file {}: {e}", parquet_file.display());
            None
        }
    }
}

fn scan_and_collect(
    parquet_file: &Path,
    predicate: Option<Expr>,
    columns: Option<&[&str]>,
) -> PolarsResult<DataFrame> {
    let mut frame = LazyFrame::scan_parquet(parquet_file, ScanArgsParquet::default())?;

    if let Some(predicate) = predicate {
        frame = frame.filter(predicate);
    }
    if let Some(columns) = columns {
        let projection: Vec<Expr> = columns.iter().map(|name| col(*name)).collect();
        frame = frame.select(projection);
    }

    frame.collect()
}

/// Column readout helpers; the schemas are a contract, so a missing or
/// mistyped column is a data-file error reported to the caller.
pub fn str_column<'a>(frame: &'a DataFrame, name: &str) -> PolarsResult<Vec<Option<&'a str>>> {
    Ok(frame.column(name)?.as_materialized_series().str()?.iter().collect())
}

pub fn i32_column(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i32>>> {
    Ok(frame.column(name)?.as_materialized_series().i32()?.iter().collect())
}

pub fn f64_column(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    Ok(frame.column(name)?.as_materialized_series().f64()?.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn write_af_fixture(path: &Path) {
        let mut frame = df!(
            "POS" => [12344i32, 12344, 99],
            "REF" => ["A", "A", "C"],
            "ALT" => ["G", "G", "T"],
            "VT" => ["SNP", "SNP", "SNP"],
            "POPULATION" => ["FI", "SE", "FI"],
            "AF" => [0.1f64, 0.2, 0.5],
            "AC" => [1i32, 2, 5],
            "AC_HET" => [1i32, 2, 3],
            "AC_HOM" => [0i32, 0, 1],
            "AC_HEMI" => [0i32, 0, 0],
            "AN" => [10i32, 10, 10],
        )
        .unwrap();

        let file = std::fs::File::create(path).unwrap();
        ParquetWriter::new(file).finish(&mut frame).unwrap();
    }

    fn test_registry() -> Arc<RwLock<DataRegistry>> {
        Arc::new(RwLock::new(DataRegistry::new(BTreeMap::new())))
    }

    #[test]
    fn test_predicate_pushdown_selects_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allele-freq-chr1.0.parquet");
        write_af_fixture(&path);

        let params: VariantQueryParameters = serde_json::from_str(
            r#"{"assemblyId": "GRCh37", "referenceName": "1", "referenceBases": "A",
                "alternateBases": "G", "start": [12344]}"#,
        )
        .unwrap();

        let registry = test_registry();
        let frame =
            read_filtered(&registry, &path, Some(variant_predicate(&params)), None).unwrap();
        assert_eq!(frame.height(), 2);

        let populations = str_column(&frame, "POPULATION").unwrap();
        assert_eq!(populations, [Some("FI"), Some("SE")]);
    }

    #[test]
    fn test_projection_limits_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allele-freq-chr1.0.parquet");
        write_af_fixture(&path);

        let registry = test_registry();
        let frame = read_filtered(&registry, &path, None, Some(&["POPULATION"])).unwrap();
        assert_eq!(frame.width(), 1);
        assert_eq!(frame.height(), 3);
    }

    #[test]
    fn test_unreadable_file_recorded_as_problematic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allele-freq-chr1.0.parquet");
        std::fs::write(&path, b"this is not parquet").unwrap();

        let registry = test_registry();
        let frame = read_filtered(&registry, &path, None, None);
        assert!(frame.is_none());
        assert_eq!(registry.read().unwrap().problematic_files().len(), 1);

        // A successful replacement clears the issue:
        write_af_fixture(&path);
        let frame = read_filtered(&registry, &path, None, None);
        assert!(frame.is_some());
        assert!(registry.read().unwrap().problematic_files().is_empty());
    }
}
