//! Calibration sample CSV.
//!
//! Expected headers:
//! raw_speed,reference_speed,run_id
//!
//! Example:
//! raw_speed,reference_speed,run_id
//! 8.0,7.72,1
//! 10.0,9.61,1
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct SampleRow {
    pub raw_speed: f64,
    pub reference_speed: f64,
    pub run_id: u64,
}

const HEADERS: [&str; 3] = ["raw_speed", "reference_speed", "run_id"];

pub fn load_samples_csv(path: &Path) -> eyre::Result<Vec<SampleRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open samples CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != HEADERS {
        eyre::bail!(
            "samples CSV must have headers 'raw_speed,reference_speed,run_id', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<SampleRow>().enumerate() {
        match rec {
            Ok(row) => {
                if !(row.raw_speed.is_finite() && row.reference_speed.is_finite()) {
                    eyre::bail!("invalid CSV row {}: speeds must be finite", idx + 2);
                }
                if row.raw_speed < 0.0 || row.reference_speed < 0.0 {
                    eyre::bail!("invalid CSV row {}: speeds must be >= 0", idx + 2);
                }
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

pub fn write_samples_csv(path: &Path, rows: &[SampleRow]) -> eyre::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| eyre::eyre!("create samples CSV {:?}: {}", path, e))?;
    for row in rows {
        wtr.serialize(row)
            .map_err(|e| eyre::eyre!("write samples CSV {:?}: {}", path, e))?;
    }
    wtr.flush()
        .map_err(|e| eyre::eyre!("flush samples CSV {:?}: {}", path, e))?;
    Ok(())
}
