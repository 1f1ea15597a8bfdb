pub mod layout;
pub mod lines;
pub mod records;

use layout::Layout;
pub use records::DocumentExtraction;

/// Two-pass pipeline: text → classified lines → merged records.
pub fn extract_document(text: &str, region: &str, layout: &Layout) -> DocumentExtraction {
    records::collect_records(lines::classify_lines(text), region, layout)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.txt", name)).unwrap()
    }

    #[test]
    fn single_line_example() {
        let out = extract_document(
            "10001  CLSC Example  123 Rue Test  Montreal  Urgence",
            "Montreal",
            &Layout::default(),
        );
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.code, "10001");
        assert_eq!(r.name, "CLSC Example");
        assert_eq!(r.address, "123 Rue Test");
        assert_eq!(r.region, "Montreal");
        assert_eq!(r.categories, vec!["Urgence"]);
    }

    #[test]
    fn montreal_fixture() {
        let out = extract_document(&fixture("montreal_06"), "Montreal", &Layout::default());
        let codes: Vec<_> = out.records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["10001", "10002", "10003", "1004X", "10005"]);

        let hospital = &out.records[1];
        assert_eq!(hospital.categories, vec!["Urgence", "Pédiatrie"]);

        let truncated = &out.records[2];
        assert_eq!(truncated.name, "CLINIQUE SANS ADRESSE");
        assert!(truncated.address.is_empty());
        assert!(truncated.categories.is_empty());

        // Name cell polluted by the page footer on a page break
        assert_eq!(out.records[3].name, "CENTRE MEDICAL DU PARC");
        assert_eq!(out.records[4].address, "4500 BOUL. SAINT-LAURENT, MONTREAL");

        // Only the document title is reported
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::UnmatchedLine);
    }

    #[test]
    fn garbage_fixture_is_non_fatal() {
        let out = extract_document(&fixture("garbage"), "Laval", &Layout::default());
        assert!(out.records.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::NoRecords);
    }

    #[test]
    fn rescanning_is_deterministic() {
        let text = fixture("montreal_06");
        let a = extract_document(&text, "Montreal", &Layout::default());
        let b = extract_document(&text, "Montreal", &Layout::default());
        assert_eq!(a.records, b.records);
        assert_eq!(a.diagnostics, b.diagnostics);
    }
}
