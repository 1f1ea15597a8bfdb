use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::dataset::Table;
use crate::db::{LookupStatus, PlaceRow};

/// Columns appended after the dataset's own, in output order.
pub const ENRICHED_COLUMNS: &[&str] = &[
    "id",
    "place_name",
    "formatted_address",
    "locality",
    "country",
    "administrative_area_level_1",
    "administrative_area_level_2",
    "international_phone_number",
    "fax_number",
    "type",
    "website",
    "latitude",
    "longitude",
    "added_time",
    "place_type",
    "is_fax_enabled",
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub rows: usize,
    pub matched: usize,
}

fn opt(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn coord(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn enriched_values(place: Option<&PlaceRow>, added_time: i64) -> Vec<String> {
    let Some(p) = place.filter(|p| p.status == LookupStatus::Found) else {
        let mut empty = vec![String::new(); ENRICHED_COLUMNS.len()];
        empty[ENRICHED_COLUMNS.len() - 1] = "0".to_string();
        return empty;
    };
    vec![
        opt(&p.place_id),
        opt(&p.place_name),
        opt(&p.formatted_address),
        opt(&p.locality),
        opt(&p.country),
        opt(&p.administrative_area_level_1),
        opt(&p.administrative_area_level_2),
        opt(&p.international_phone_number),
        String::new(),
        opt(&p.place_type),
        opt(&p.website),
        coord(p.latitude),
        coord(p.longitude),
        added_time.to_string(),
        opt(&p.place_type),
        "0".to_string(),
    ]
}

/// Append enrichment columns to every dataset row, matched on `code`.
/// Existing columns are left untouched and no row is dropped.
pub fn merge_places(
    dataset: &Table,
    places: &HashMap<String, PlaceRow>,
    added_time: i64,
) -> Result<(Table, MergeStats)> {
    let Some(code_idx) = dataset.column("code") else {
        bail!("dataset has no `code` column");
    };
    if let Some(clash) = ENRICHED_COLUMNS.iter().find(|c| dataset.column(c).is_some()) {
        bail!("dataset already has enrichment column `{}`", clash);
    }

    let mut headers = dataset.headers.clone();
    headers.extend(ENRICHED_COLUMNS.iter().map(|c| c.to_string()));

    let mut stats = MergeStats::default();
    let mut rows = Vec::with_capacity(dataset.rows.len());
    for row in &dataset.rows {
        let place = row.get(code_idx).and_then(|code| places.get(code));
        if place.is_some_and(|p| p.status == LookupStatus::Found) {
            stats.matched += 1;
        }
        let mut merged = row.clone();
        merged.extend(enriched_values(place, added_time));
        rows.push(merged);
        stats.rows += 1;
    }

    Ok((Table { headers, rows }, stats))
}
