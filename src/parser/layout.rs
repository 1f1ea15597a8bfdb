use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

static CATEGORY_CODES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}(?:\s+\d{1,2})*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Name,
    Address,
    Locality,
    Categories,
    Ignore,
}

/// Column convention of one region document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Minimum run of whitespace that separates two columns.
    pub min_gap: usize,
    pub columns: Vec<Column>,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            min_gap: 2,
            columns: vec![
                Column::Name,
                Column::Address,
                Column::Locality,
                Column::Categories,
            ],
        }
    }
}

/// Fields of one entry line after column assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFields {
    pub name: String,
    pub address: String,
    pub locality: String,
    pub categories: Vec<String>,
}

/// The line carried more columns than the layout declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMismatch {
    pub expected: usize,
    pub found: usize,
    pub fields: EntryFields,
}

impl Layout {
    /// Split the text after the code into columns and map them onto this layout.
    pub fn assign(&self, rest: &str) -> Result<EntryFields, LayoutMismatch> {
        let all = split_columns(rest, self.min_gap);
        let mut out = EntryFields::default();
        let mut columns: &[Column] = &self.columns;
        let mut fields: &[&str] = &all;

        if columns.last() == Some(&Column::Categories) {
            // Category codes are often spaced out over several gaps
            let tail = (1..fields.len())
                .find(|&k| fields[k..].iter().all(|f| CATEGORY_CODES_RE.is_match(f)));
            if let Some(k) = tail {
                for cell in &fields[k..] {
                    for code in split_categories(cell) {
                        push_unique(&mut out.categories, &code);
                    }
                }
                fields = &fields[..k];
                columns = &columns[..columns.len() - 1];
            } else if fields.len() < columns.len() {
                // Short line: a text label fills columns left to right
                columns = &columns[..columns.len() - 1];
            }
        }

        if fields.len() > columns.len() {
            // Only the leading name column is trusted on an unknown layout.
            let partial = EntryFields {
                name: fields.first().map(|s| s.to_string()).unwrap_or_default(),
                ..Default::default()
            };
            return Err(LayoutMismatch {
                expected: self.columns.len(),
                found: all.len(),
                fields: partial,
            });
        }

        for (column, value) in columns.iter().zip(fields) {
            match column {
                Column::Name => out.name = value.to_string(),
                Column::Address => out.address = value.to_string(),
                Column::Locality => out.locality = value.to_string(),
                Column::Categories => out.categories = split_categories(value),
                Column::Ignore => {}
            }
        }

        Ok(out)
    }
}

/// Split on runs of at least `min_gap` whitespace characters.
///
/// Tabs count as a full gap on their own since `pdftotext -layout`
/// never emits them inside a cell.
pub fn split_columns(text: &str, min_gap: usize) -> Vec<&str> {
    let min_gap = min_gap.max(1);
    let mut fields = Vec::new();
    let mut start: Option<usize> = None;
    let mut gap_start = 0;
    let mut gap_len = 0;
    let mut gap_has_tab = false;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if gap_len == 0 {
                gap_start = idx;
                gap_has_tab = false;
            }
            gap_len += 1;
            gap_has_tab |= ch == '\t';
            continue;
        }

        if let Some(s) = start {
            if gap_len >= min_gap || gap_has_tab {
                fields.push(&text[s..gap_start]);
                start = Some(idx);
            }
        } else {
            start = Some(idx);
        }
        gap_len = 0;
    }

    if let Some(s) = start {
        let end = if gap_len > 0 { gap_start } else { text.len() };
        fields.push(&text[s..end]);
    }

    fields
}

/// Split a categories cell into labels.
///
/// `Urgence, Pédiatrie` → two labels; `1 2 3` → three numeric codes.
pub fn split_categories(cell: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for piece in cell.split([',', ';']) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if CATEGORY_CODES_RE.is_match(piece) {
            for code in piece.split_whitespace() {
                push_unique(&mut out, code);
            }
        } else {
            push_unique(&mut out, &collapse_ws(piece));
        }
    }
    out
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

pub(crate) fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-region layouts, loaded from TOML:
///
/// ```toml
/// [default]
/// columns = ["name", "address", "locality", "categories"]
///
/// [regions.nunavik]
/// min_gap = 3
/// columns = ["name", "categories"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LayoutBook {
    pub default: Layout,
    pub regions: HashMap<String, Layout>,
}

impl LayoutBook {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layouts from {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid layouts file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn for_region(&self, slug: &str) -> &Layout {
        self.regions.get(slug).unwrap_or(&self.default)
    }
}

// ── Tests ──
