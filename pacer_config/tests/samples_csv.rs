use pacer_config::{SampleRow, load_samples_csv, write_samples_csv};
use std::fs;
use tempfile::tempdir;

#[test]
fn loads_well_formed_samples() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    fs::write(
        &path,
        "raw_speed,reference_speed,run_id\n8.0,7.7,1\n10.0, 9.6 ,1\n12.0,11.5,2\n",
    )
    .unwrap();
    let rows = load_samples_csv(&path).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].reference_speed, 9.6);
    assert_eq!(rows[2].run_id, 2);
}

#[test]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    fs::write(&path, "raw,grams\n1,2\n").unwrap();
    let err = load_samples_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("must have headers"));
}

#[test]
fn rejects_bad_rows_with_line_numbers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    fs::write(
        &path,
        "raw_speed,reference_speed,run_id\n8.0,7.7,1\nfast,9.6,1\n",
    )
    .unwrap();
    let err = load_samples_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("row 3"), "{err}");
}

#[test]
fn rejects_negative_speeds() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    fs::write(&path, "raw_speed,reference_speed,run_id\n-1.0,7.7,1\n").unwrap();
    let err = load_samples_csv(&path).unwrap_err();
    assert!(format!("{err}").contains(">= 0"));
}

#[test]
fn written_samples_load_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let rows = vec![
        SampleRow {
            raw_speed: 9.0,
            reference_speed: 8.8,
            run_id: 7,
        },
        SampleRow {
            raw_speed: 11.0,
            reference_speed: 10.7,
            run_id: 7,
        },
    ];
    write_samples_csv(&path, &rows).unwrap();
    assert_eq!(load_samples_csv(&path).unwrap(), rows);
}
