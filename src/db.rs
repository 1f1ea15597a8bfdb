use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS places (
            code                        TEXT PRIMARY KEY,
            status                      TEXT NOT NULL CHECK(status IN ('found','not_found','skipped','failed')),
            place_id                    TEXT,
            place_name                  TEXT,
            formatted_address           TEXT,
            locality                    TEXT,
            country                     TEXT,
            administrative_area_level_1 TEXT,
            administrative_area_level_2 TEXT,
            international_phone_number  TEXT,
            website                     TEXT,
            latitude                    REAL,
            longitude                   REAL,
            place_type                  TEXT,
            error                       TEXT,
            looked_up_at                TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_places_status ON places(status);

        CREATE TABLE IF NOT EXISTS fax_lookups (
            code          TEXT PRIMARY KEY,
            fax_numbers   TEXT NOT NULL,
            fax_keywords  TEXT NOT NULL,
            searched_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Places ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    Found,
    NotFound,
    Skipped,
    Failed,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Found => "found",
            LookupStatus::NotFound => "not_found",
            LookupStatus::Skipped => "skipped",
            LookupStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "found" => Some(LookupStatus::Found),
            "not_found" => Some(LookupStatus::NotFound),
            "skipped" => Some(LookupStatus::Skipped),
            "failed" => Some(LookupStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRow {
    pub code: String,
    pub status: LookupStatus,
    pub place_id: Option<String>,
    pub place_name: Option<String>,
    pub formatted_address: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
    pub administrative_area_level_1: Option<String>,
    pub administrative_area_level_2: Option<String>,
    pub international_phone_number: Option<String>,
    pub website: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place_type: Option<String>,
    pub error: Option<String>,
}

impl PlaceRow {
    /// Ledger row for a lookup that produced no place.
    pub fn empty(code: &str, status: LookupStatus, error: Option<String>) -> Self {
        PlaceRow {
            code: code.to_string(),
            status,
            place_id: None,
            place_name: None,
            formatted_address: None,
            locality: None,
            country: None,
            administrative_area_level_1: None,
            administrative_area_level_2: None,
            international_phone_number: None,
            website: None,
            latitude: None,
            longitude: None,
            place_type: None,
            error,
        }
    }
}

pub fn save_place(conn: &Connection, r: &PlaceRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO places
         (code, status, place_id, place_name, formatted_address, locality, country,
          administrative_area_level_1, administrative_area_level_2,
          international_phone_number, website, latitude, longitude, place_type, error)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        rusqlite::params![
            r.code, r.status.as_str(), r.place_id, r.place_name, r.formatted_address,
            r.locality, r.country, r.administrative_area_level_1,
            r.administrative_area_level_2, r.international_phone_number, r.website,
            r.latitude, r.longitude, r.place_type, r.error,
        ],
    )?;
    Ok(())
}

/// Codes already settled in the ledger. Failed lookups are left out so the
/// next run retries them.
pub fn settled_place_codes(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT code FROM places WHERE status != 'failed'")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

pub fn fetch_places(conn: &Connection) -> Result<HashMap<String, PlaceRow>> {
    let mut stmt = conn.prepare(
        "SELECT code, status, place_id, place_name, formatted_address, locality, country,
                administrative_area_level_1, administrative_area_level_2,
                international_phone_number, website, latitude, longitude, place_type, error
         FROM places",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let status: String = row.get(1)?;
            Ok(PlaceRow {
                code: row.get(0)?,
                status: LookupStatus::parse(&status).unwrap_or(LookupStatus::Failed),
                place_id: row.get(2)?,
                place_name: row.get(3)?,
                formatted_address: row.get(4)?,
                locality: row.get(5)?,
                country: row.get(6)?,
                administrative_area_level_1: row.get(7)?,
                administrative_area_level_2: row.get(8)?,
                international_phone_number: row.get(9)?,
                website: row.get(10)?,
                latitude: row.get(11)?,
                longitude: row.get(12)?,
                place_type: row.get(13)?,
                error: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|r| (r.code.clone(), r)).collect())
}

// ── Fax ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxRow {
    pub code: String,
    /// JSON array of `XXX-XXX-XXXX` numbers.
    pub fax_numbers: String,
    /// JSON object, number → keyword.
    pub fax_keywords: String,
}

pub fn save_fax(conn: &Connection, r: &FaxRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO fax_lookups (code, fax_numbers, fax_keywords)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![r.code, r.fax_numbers, r.fax_keywords],
    )?;
    Ok(())
}

pub fn fetch_fax(conn: &Connection, code: &str) -> Result<Option<FaxRow>> {
    let row = conn
        .query_row(
            "SELECT code, fax_numbers, fax_keywords FROM fax_lookups WHERE code = ?1",
            [code],
            |row| {
                Ok(FaxRow {
                    code: row.get(0)?,
                    fax_numbers: row.get(1)?,
                    fax_keywords: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ── Stats ──

#[derive(Debug, Default)]
pub struct LedgerStats {
    pub found: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fax_searched: usize,
    pub fax_with_numbers: usize,
}

pub fn get_stats(conn: &Connection) -> Result<LedgerStats> {
    let mut stats = LedgerStats::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM places GROUP BY status")?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (status, n) in counts {
        let n = n as usize;
        match LookupStatus::parse(&status) {
            Some(LookupStatus::Found) => stats.found = n,
            Some(LookupStatus::NotFound) => stats.not_found = n,
            Some(LookupStatus::Skipped) => stats.skipped = n,
            Some(LookupStatus::Failed) | None => stats.failed += n,
        }
    }

    let (searched, with_numbers): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(fax_numbers != '[]'), 0) FROM fax_lookups",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    stats.fax_searched = searched as usize;
    stats.fax_with_numbers = with_numbers as usize;
    Ok(stats)
}

#[cfg(test)]
pub(crate) fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_lookups_are_not_settled() {
        let conn = memory();
        save_place(&conn, &PlaceRow::empty("10001", LookupStatus::NotFound, None)).unwrap();
        save_place(&conn, &PlaceRow::empty("10002", LookupStatus::Failed, Some("HTTP 503".into())))
            .unwrap();
        save_place(&conn, &PlaceRow::empty("10003", LookupStatus::Skipped, None)).unwrap();

        let settled = settled_place_codes(&conn).unwrap();
        assert!(settled.contains("10001"));
        assert!(!settled.contains("10002"));
        assert!(settled.contains("10003"));
    }

    #[test]
    fn replace_overwrites_previous_attempt() {
        let conn = memory();
        save_place(&conn, &PlaceRow::empty("10002", LookupStatus::Failed, Some("x".into()))).unwrap();
        let mut found = PlaceRow::empty("10002", LookupStatus::Found, None);
        found.place_id = Some("ChIJ123".into());
        found.latitude = Some(45.5);
        save_place(&conn, &found).unwrap();

        let all = fetch_places(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["10002"], found);
    }

    #[test]
    fn fax_round_trip_and_stats() {
        let conn = memory();
        save_fax(&conn, &FaxRow {
            code: "10001".into(),
            fax_numbers: r#"["514-555-0101"]"#.into(),
            fax_keywords: r#"{"514-555-0101":"general"}"#.into(),
        })
        .unwrap();
        save_fax(&conn, &FaxRow {
            code: "10002".into(),
            fax_numbers: "[]".into(),
            fax_keywords: "{}".into(),
        })
        .unwrap();
        save_place(&conn, &PlaceRow::empty("10001", LookupStatus::Found, None)).unwrap();

        assert_eq!(fetch_fax(&conn, "10001").unwrap().unwrap().fax_numbers, r#"["514-555-0101"]"#);
        assert!(fetch_fax(&conn, "99999").unwrap().is_none());

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.found, 1);
        assert_eq!(s.fax_searched, 2);
        assert_eq!(s.fax_with_numbers, 1);
    }
}
