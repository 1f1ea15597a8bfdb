use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::dataset::EstablishmentRecord;
use crate::db::{self, LookupStatus, PlaceRow};
use crate::places::{AddressComponent, PlaceDetails, PlaceLookup};
use crate::retry::{with_backoff, Backoff};

const HOSPITAL_TYPES: &[&str] = &["hospital", "health"];
const CLINIC_TYPES: &[&str] = &["doctor", "medical_clinic", "health"];
const CLINIC_TERMS: &[&str] = &["CLINIQUE", "CLSC", "CENTRE", "MEDICAL"];

pub struct EnrichOptions {
    pub limit: Option<usize>,
    pub pause: Duration,
    pub backoff: Backoff,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        EnrichOptions {
            limit: None,
            pause: Duration::from_millis(200),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EnrichStats {
    fn count(&mut self, status: LookupStatus) {
        self.total += 1;
        match status {
            LookupStatus::Found => self.found += 1,
            LookupStatus::NotFound => self.not_found += 1,
            LookupStatus::Skipped => self.skipped += 1,
            LookupStatus::Failed => self.failed += 1,
        }
    }
}

/// `hospital`, `clinic`, or `pharmacy` from the place types and the RAMQ name.
pub fn determine_place_type(types: &[String], ramq_name: &str) -> &'static str {
    let name = ramq_name.to_uppercase();
    let has = |wanted: &[&str]| types.iter().any(|t| wanted.contains(&t.as_str()));

    if has(HOSPITAL_TYPES) || name.contains("HOPITAL") || name.contains("HÔPITAL") {
        "hospital"
    } else if has(CLINIC_TYPES) || CLINIC_TERMS.iter().any(|t| name.contains(t)) {
        "clinic"
    } else {
        "pharmacy"
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub locality: String,
    pub country: String,
    pub admin_area_1: String,
    /// Holds the postal code; the downstream schema names it this way.
    pub admin_area_2: String,
}

pub fn address_parts(components: &[AddressComponent]) -> AddressParts {
    let mut out = AddressParts::default();
    for c in components {
        let is = |t: &str| c.types.iter().any(|x| x == t);
        if is("locality") {
            out.locality = c.long_name.clone();
        } else if is("country") {
            out.country = c.short_name.clone();
        } else if is("administrative_area_level_1") {
            out.admin_area_1 = c.short_name.clone();
        } else if is("postal_code") {
            out.admin_area_2 = c.long_name.clone();
        }
    }
    out
}

fn search_query(r: &EstablishmentRecord) -> String {
    format!("{}, {}, {}, Quebec, Canada", r.name, r.address, r.region)
}

fn found_row(code: &str, place_id: String, details: PlaceDetails, ramq_name: &str) -> PlaceRow {
    let parts = address_parts(&details.address_components);
    let location = details.geometry.location;
    let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

    PlaceRow {
        code: code.to_string(),
        status: LookupStatus::Found,
        place_type: Some(determine_place_type(&details.types, ramq_name).to_string()),
        place_id: Some(place_id),
        place_name: non_empty(details.name),
        formatted_address: non_empty(details.formatted_address),
        locality: non_empty(parts.locality),
        country: non_empty(parts.country),
        administrative_area_level_1: non_empty(parts.admin_area_1),
        administrative_area_level_2: non_empty(parts.admin_area_2),
        international_phone_number: non_empty(details.international_phone_number),
        website: non_empty(details.website),
        latitude: location.map(|l| l.lat),
        longitude: location.map(|l| l.lng),
        error: None,
    }
}

/// Look one record up. API failures that survive the backoff become a
/// `failed` row, so they never abort the run.
pub async fn lookup_record(
    places: &dyn PlaceLookup,
    record: &EstablishmentRecord,
    backoff: Backoff,
) -> PlaceRow {
    if record.address.is_empty() {
        return PlaceRow::empty(&record.code, LookupStatus::Skipped, None);
    }

    let query = search_query(record);
    let place_id = match with_backoff(&record.code, backoff, || places.search(&query)).await {
        Ok(Some(id)) => id,
        Ok(None) => return PlaceRow::empty(&record.code, LookupStatus::NotFound, None),
        Err(e) => {
            warn!("Search failed for {}: {}", record.code, e);
            return PlaceRow::empty(&record.code, LookupStatus::Failed, Some(e.to_string()));
        }
    };

    match with_backoff(&record.code, backoff, || places.details(&place_id)).await {
        Ok(Some(details)) => found_row(&record.code, place_id, details, &record.name),
        Ok(None) => PlaceRow::empty(&record.code, LookupStatus::NotFound, None),
        Err(e) => {
            warn!("Details failed for {} ({}): {}", record.code, place_id, e);
            PlaceRow::empty(&record.code, LookupStatus::Failed, Some(e.to_string()))
        }
    }
}

/// Enrich every record not yet settled in the ledger, one at a time.
pub async fn run_enrich(
    conn: &Connection,
    places: &dyn PlaceLookup,
    records: &[EstablishmentRecord],
    opts: &EnrichOptions,
) -> Result<EnrichStats> {
    let settled: HashSet<String> = db::settled_place_codes(conn)?;
    let pending: Vec<&EstablishmentRecord> = records
        .iter()
        .filter(|r| !settled.contains(&r.code))
        .take(opts.limit.unwrap_or(usize::MAX))
        .collect();

    info!(
        "{} of {} establishments pending enrichment",
        pending.len(),
        records.len()
    );

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = EnrichStats::default();
    for (i, record) in pending.iter().enumerate() {
        let row = lookup_record(places, record, opts.backoff).await;
        stats.count(row.status);
        db::save_place(conn, &row)?;
        pb.inc(1);

        if row.status != LookupStatus::Skipped && i + 1 < pending.len() {
            tokio::time::sleep(opts.pause).await;
        }
    }

    pb.finish_and_clear();
    info!(
        "Enriched {} ({} found, {} not found, {} skipped, {} failed)",
        stats.total, stats.found, stats.not_found, stats.skipped, stats.failed
    );
    Ok(stats)
}
