use std::sync::LazyLock;

use regex::Regex;

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}[0-9X])(?:\s+(.*))?$").unwrap());
static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{1,2}\s+\p{L}+\s+\d{4}\s+Page\s+\d+\s+sur\s+\d+").unwrap()
});
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Numéro\s+Nom\s+et\s+adresse").unwrap()
});

/// One classified line of a `pdftotext -layout` rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// `10001  CLSC Example  123 Rue Test ...`
    Entry { code: &'a str, rest: &'a str },
    /// Column header repeated on every page.
    Header,
    /// `22 avril 2025   Page 3 sur 10`
    PageFooter,
    /// Any other text (wrapped addresses, titles, noise).
    Continuation(&'a str),
    Empty,
}

/// A line together with its 1-based position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedLine<'a> {
    pub line_no: usize,
    pub line: Line<'a>,
}

/// Lazily classify every line of the document.
pub fn classify_lines(text: &str) -> impl Iterator<Item = NumberedLine<'_>> {
    text.lines().enumerate().map(|(i, raw)| NumberedLine {
        line_no: i + 1,
        line: classify(raw),
    })
}

pub fn classify(raw: &str) -> Line<'_> {
    // Also drops the form feeds pdftotext puts between pages
    let line = raw.trim();

    if line.is_empty() {
        return Line::Empty;
    }

    if let Some(caps) = ENTRY_RE.captures(line) {
        let code = caps.get(1).map_or("", |m| m.as_str());
        let rest = caps.get(2).map_or("", |m| m.as_str());
        return Line::Entry { code, rest };
    }

    if HEADER_RE.is_match(line) {
        return Line::Header;
    }

    if FOOTER_RE.is_match(line) {
        return Line::PageFooter;
    }

    Line::Continuation(line)
}

/// Strip page-footer and column-header text that bled into a name cell.
pub fn strip_boilerplate(name: &str) -> &str {
    let mut end = name.len();
    if let Some(m) = FOOTER_RE.find(name) {
        end = end.min(m.start());
    }
    if let Some(m) = HEADER_RE.find(name) {
        end = end.min(m.start());
    }
    name[..end].trim()
}

// ── Tests ──
