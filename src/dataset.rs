use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One establishment as extracted from a regional PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstablishmentRecord {
    pub code: String,
    pub name: String,
    pub address: String,
    pub region: String,
    pub categories: Vec<String>,
}

/// CSV shape of a record. `ramq_id` mirrors `code` for downstream joins.
#[derive(Debug, Serialize, Deserialize)]
struct DatasetRow {
    code: String,
    ramq_id: String,
    name: String,
    address: String,
    region: String,
    categories: String,
}

impl From<&EstablishmentRecord> for DatasetRow {
    fn from(r: &EstablishmentRecord) -> Self {
        DatasetRow {
            code: r.code.clone(),
            ramq_id: r.code.clone(),
            name: r.name.clone(),
            address: r.address.clone(),
            region: r.region.clone(),
            categories: r.categories.join(","),
        }
    }
}

impl From<DatasetRow> for EstablishmentRecord {
    fn from(row: DatasetRow) -> Self {
        EstablishmentRecord {
            code: row.code,
            name: row.name,
            address: row.address,
            region: row.region,
            categories: row
                .categories
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

pub fn records_to_csv(records: &[EstablishmentRecord]) -> Result<Vec<u8>> {
    let mut wtr = csv_writer();
    if records.is_empty() {
        wtr.write_record(DATASET_COLUMNS)?;
    }
    for r in records {
        wtr.serialize(DatasetRow::from(r))?;
    }
    finish(wtr)
}

pub const DATASET_COLUMNS: [&str; 6] = ["code", "ramq_id", "name", "address", "region", "categories"];

pub fn write_records(path: &Path, records: &[EstablishmentRecord]) -> Result<()> {
    let bytes = records_to_csv(records)?;
    write_atomic(path, &bytes)
}

pub fn read_records(path: &Path) -> Result<Vec<EstablishmentRecord>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    let mut out = Vec::new();
    for row in rdr.deserialize::<DatasetRow>() {
        out.push(row?.into());
    }
    Ok(out)
}

/// Header-addressed CSV table for the later stages, which only ever append
/// columns to what the previous stage wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let headers = rdr.headers()?.iter().map(String::from).collect::<Vec<_>>();
        let mut rows = Vec::new();
        for rec in rdr.records() {
            let rec = rec?;
            let mut row: Vec<String> = rec.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Table { headers, rows })
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut wtr = csv_writer();
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        finish(wtr)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_csv()?)
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of `name`, appending an empty column when missing.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn get<'a>(&'a self, row: &'a [String], name: &str) -> &'a str {
        self.column(name)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {}", e.error()))
}

/// Write through a temp file so an interrupted run never leaves half a CSV.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<EstablishmentRecord> {
        vec![
            EstablishmentRecord {
                code: "10002".into(),
                name: "Hôpital \"Test\", Laval".into(),
                address: "50 Boul Test".into(),
                region: "Laval".into(),
                categories: vec!["Urgence".into(), "Pédiatrie".into()],
            },
            EstablishmentRecord {
                code: "10003".into(),
                name: "CLSC".into(),
                region: "Laval".into(),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn csv_layout_matches_downstream_contract() {
        let csv = String::from_utf8(records_to_csv(&sample()).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("code,ramq_id,name,address,region,categories"));
        assert_eq!(
            lines.next(),
            Some("10002,10002,\"Hôpital \"\"Test\"\", Laval\",50 Boul Test,Laval,\"Urgence,Pédiatrie\"")
        );
        assert_eq!(lines.next(), Some("10003,10003,CLSC,,Laval,"));
    }

    #[test]
    fn empty_dataset_still_has_header() {
        let csv = String::from_utf8(records_to_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv, "code,ramq_id,name,address,region,categories\n");
    }

    #[test]
    fn file_read_back_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/laval.csv");
        write_records(&path, &sample()).unwrap();
        assert_eq!(read_records(&path).unwrap(), sample());
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn table_appends_columns_without_touching_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.csv");
        write_records(&path, &sample()).unwrap();

        let mut t = Table::read(&path).unwrap();
        let fax = t.ensure_column("fax_number");
        assert_eq!(t.ensure_column("fax_number"), fax);
        t.rows[0][fax] = "514-555-0000".into();

        assert_eq!(&t.headers[..6], &DATASET_COLUMNS);
        assert_eq!(t.get(&t.rows[0], "name"), "Hôpital \"Test\", Laval");
        assert_eq!(t.get(&t.rows[1], "fax_number"), "");
        assert_eq!(t.get(&t.rows[1], "missing"), "");
    }
}
