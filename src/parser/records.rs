use std::collections::HashMap;

use super::layout::{collapse_ws, push_unique, EntryFields, Layout};
use super::lines::{strip_boilerplate, Line, NumberedLine};
use crate::dataset::EstablishmentRecord;
use crate::diagnostics::{Diagnostic, DiagnosticKind};

/// Records and diagnostics from one document scan.
#[derive(Debug, Default)]
pub struct DocumentExtraction {
    pub records: Vec<EstablishmentRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// In-progress state of one document scan. Records stay here, keyed by
/// code, until `finish` is called at end of document.
struct Scan<'l> {
    region: &'l str,
    layout: &'l Layout,
    order: Vec<String>,
    by_code: HashMap<String, EstablishmentRecord>,
    diagnostics: Vec<Diagnostic>,
    /// Code of the previous non-empty line when that line was an entry.
    awaiting_address: Option<String>,
    entries_seen: usize,
    lines_seen: usize,
}

impl<'l> Scan<'l> {
    fn new(region: &'l str, layout: &'l Layout) -> Self {
        Scan {
            region,
            layout,
            order: Vec::new(),
            by_code: HashMap::new(),
            diagnostics: Vec::new(),
            awaiting_address: None,
            entries_seen: 0,
            lines_seen: 0,
        }
    }

    fn feed(&mut self, numbered: NumberedLine<'_>) {
        let NumberedLine { line_no, line } = numbered;
        match line {
            Line::Empty => {}
            Line::Header | Line::PageFooter => {
                self.lines_seen += 1;
                self.awaiting_address = None;
            }
            Line::Entry { code, rest } => {
                self.lines_seen += 1;
                self.entries_seen += 1;
                self.entry(line_no, code, rest);
            }
            Line::Continuation(text) => {
                self.lines_seen += 1;
                self.continuation(line_no, text);
            }
        }
    }

    fn entry(&mut self, line_no: usize, code: &str, rest: &str) {
        let fields = match self.layout.assign(rest) {
            Ok(f) => f,
            Err(mismatch) => {
                self.diagnostics.push(Diagnostic::line(
                    self.region,
                    line_no,
                    DiagnosticKind::LayoutMismatch,
                    format!(
                        "code {} has {} columns, layout expects {}: {:?}",
                        code, mismatch.found, mismatch.expected, rest
                    ),
                ));
                mismatch.fields
            }
        };

        let name = collapse_ws(strip_boilerplate(&fields.name));
        if name.is_empty() {
            self.diagnostics.push(Diagnostic::line(
                self.region,
                line_no,
                DiagnosticKind::EmptyName,
                format!("code {} has no name: {:?}", code, rest),
            ));
        }

        let fields = EntryFields {
            name,
            address: collapse_ws(&fields.address),
            ..fields
        };
        self.merge(code, fields);
        self.awaiting_address = Some(code.to_string());
    }

    /// Union into an existing record or start a new one. Filled fields
    /// are never overwritten.
    fn merge(&mut self, code: &str, fields: EntryFields) {
        let record = self.by_code.entry(code.to_string()).or_insert_with(|| {
            self.order.push(code.to_string());
            EstablishmentRecord {
                code: code.to_string(),
                region: self.region.to_string(),
                ..Default::default()
            }
        });

        if record.name.is_empty() {
            record.name = fields.name;
        }
        if record.address.is_empty() {
            record.address = fields.address;
        }
        for category in &fields.categories {
            push_unique(&mut record.categories, category);
        }
    }

    fn continuation(&mut self, line_no: usize, text: &str) {
        let waiting = self
            .awaiting_address
            .take()
            .and_then(|code| self.by_code.get_mut(&code))
            .filter(|r| r.address.is_empty());

        match waiting {
            Some(record) => record.address = collapse_ws(text),
            None => {
                let kind = if self.entries_seen > 0 {
                    DiagnosticKind::OrphanContinuation
                } else {
                    DiagnosticKind::UnmatchedLine
                };
                self.diagnostics.push(Diagnostic::line(
                    self.region,
                    line_no,
                    kind,
                    format!("{:?}", text),
                ));
            }
        }
    }

    fn finish(mut self) -> DocumentExtraction {
        let mut records = Vec::with_capacity(self.order.len());
        for code in &self.order {
            if let Some(r) = self.by_code.remove(code) {
                records.push(r);
            }
        }

        // Nothing recognised: one document-level entry instead of a line flood
        if records.is_empty() {
            let detail = if self.lines_seen == 0 {
                "document text is empty".to_string()
            } else {
                format!("no establishment entries in {} non-empty lines", self.lines_seen)
            };
            self.diagnostics = vec![Diagnostic::document(
                self.region,
                DiagnosticKind::NoRecords,
                detail,
            )];
        }

        DocumentExtraction {
            records,
            diagnostics: self.diagnostics,
        }
    }
}

/// Scan classified lines and merge them into records by code.
pub fn collect_records<'a>(
    lines: impl Iterator<Item = NumberedLine<'a>>,
    region: &str,
    layout: &Layout,
) -> DocumentExtraction {
    let mut scan = Scan::new(region, layout);
    for line in lines {
        scan.feed(line);
    }
    scan.finish()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lines::classify_lines;

    fn run(text: &str) -> DocumentExtraction {
        collect_records(classify_lines(text), "Montreal", &Layout::default())
    }

    #[test]
    fn repeated_code_unions_categories() {
        let out = run(
            "10002  Hopital Test  50 Boul Test  Laval  Urgence\n\
             10002  Hopital Test  50 Boul Test  Laval  Pédiatrie\n\
             10002  Hopital Test  50 Boul Test  Laval  Urgence\n",
        );
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].categories, vec!["Urgence", "Pédiatrie"]);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn later_line_fills_missing_fields_only() {
        let out = run(
            "10004  CLSC Est\n\
             10004  Autre Nom  9 Rue Neuve  Laval  Urgence\n",
        );
        let r = &out.records[0];
        assert_eq!(r.name, "CLSC Est");
        assert_eq!(r.address, "9 Rue Neuve");
        assert_eq!(r.categories, vec!["Urgence"]);
    }

    #[test]
    fn wrapped_address_is_picked_up() {
        let out = run("10005  HOPITAL DU NORD  1 2\n        1200 RUE PRINCIPALE, LAVAL\n");
        let r = &out.records[0];
        assert_eq!(r.address, "1200 RUE PRINCIPALE, LAVAL");
        assert_eq!(r.categories, vec!["1", "2"]);
    }

    #[test]
    fn second_continuation_is_orphaned() {
        let out = run("10005  HOPITAL  1\n  1200 RUE A\n  SUITE 4\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::OrphanContinuation);
        assert_eq!(out.diagnostics[0].line_no, Some(3));
    }

    #[test]
    fn footer_breaks_address_wait() {
        let out = run("10006  CLSC A\n22 avril 2025   Page 1 sur 2\n  1 RUE X\n");
        assert!(out.records[0].address.is_empty());
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::OrphanContinuation);
    }

    #[test]
    fn records_keep_first_appearance_order() {
        let out = run("20002  B\n10001  A\n20002  B  1 Rue\n");
        let codes: Vec<_> = out.records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["20002", "10001"]);
    }

    #[test]
    fn mismatch_keeps_code_and_name() {
        let out = run("10007  Nom  Adresse  Ville  Urgence  Extra\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].name, "Nom");
        assert!(out.records[0].address.is_empty());
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::LayoutMismatch);
    }

    #[test]
    fn bare_code_reports_empty_name() {
        let out = run("10008\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::EmptyName);
    }

    #[test]
    fn garbage_collapses_to_one_diagnostic() {
        let out = run("%PDF-1.7 garbage\n\u{0}\u{1}binary\nmore noise\n");
        assert!(out.records.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::NoRecords);
    }

    #[test]
    fn empty_text_is_one_diagnostic() {
        let out = run("");
        assert!(out.records.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].detail, "document text is empty");
    }
}
