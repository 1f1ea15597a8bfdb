const PDF_URL_TEMPLATE: &str = "https://www.ramq.gouv.qc.ca/SiteCollectionDocuments/professionnels/facturation/liste-etablissements/liste_des_numeros_etablissements_{slug}_{code}.pdf";

/// Quebec administrative health regions, as published by the RAMQ.
pub const REGIONS: &[(&str, &str)] = &[
    ("bas-saint-laurent", "01"),
    ("saguenay-lac-saint-jean", "02"),
    ("capitale-nationale", "03"),
    ("mauricie-et-centre-du-quebec", "04"),
    ("estrie", "05"),
    ("montreal", "06"),
    ("outaouais", "07"),
    ("abitibi-temiscamingue", "08"),
    ("cote-nord", "09"),
    ("nord-du-quebec", "10"),
    ("gaspesie-iles-de-la-madeleine", "11"),
    ("chaudiere-appalaches", "12"),
    ("laval", "13"),
    ("lanaudiere", "14"),
    ("laurentides", "15"),
    ("monteregie", "16"),
    ("nunavik", "17"),
    ("terres-cries-de-la-baie-james", "18"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub slug: String,
    pub code: String,
}

impl Region {
    pub fn all() -> Vec<Region> {
        REGIONS
            .iter()
            .map(|(slug, code)| Region {
                slug: slug.to_string(),
                code: code.to_string(),
            })
            .collect()
    }

    /// Parse `montreal_06` (or a bare `montreal`) from a file stem.
    pub fn from_stem(stem: &str) -> Region {
        let (slug, code) = match stem.split_once('_') {
            Some((slug, code)) => (slug, code.to_string()),
            None => (
                stem,
                REGIONS
                    .iter()
                    .find(|(s, _)| *s == stem)
                    .map(|(_, c)| c.to_string())
                    .unwrap_or_default(),
            ),
        };
        Region {
            slug: slug.to_string(),
            code,
        }
    }

    /// Slug and code name one of the published regions.
    pub fn is_known(&self) -> bool {
        REGIONS
            .iter()
            .any(|(slug, code)| *slug == self.slug && *code == self.code)
    }

    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.slug, self.code)
    }

    pub fn pdf_url(&self) -> String {
        PDF_URL_TEMPLATE
            .replace("{slug}", &self.slug)
            .replace("{code}", &self.code)
    }

    /// Label written to the `region` column: `bas-saint-laurent` → `Bas Saint Laurent`.
    pub fn label(&self) -> String {
        self.slug
            .split('-')
            .filter(|w| !w.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eighteen_regions() {
        let all = Region::all();
        assert_eq!(all.len(), 18);
        assert!(all.iter().any(|r| r.slug == "montreal" && r.code == "06"));
    }

    #[test]
    fn stem_round_trip_and_label() {
        let r = Region::from_stem("bas-saint-laurent_01");
        assert_eq!(r.code, "01");
        assert_eq!(r.file_stem(), "bas-saint-laurent_01");
        assert_eq!(r.label(), "Bas Saint Laurent");
    }

    #[test]
    fn bare_slug_resolves_code() {
        let r = Region::from_stem("montreal");
        assert_eq!(r.code, "06");
        assert_eq!(r.label(), "Montreal");
        assert!(Region::from_stem("ailleurs").code.is_empty());
        assert!(Region::from_stem("montreal").is_known());
        assert!(!Region::from_stem("notes").is_known());
        assert!(!Region::from_stem("laval_06").is_known());
    }

    #[test]
    fn pdf_url_uses_slug_and_code() {
        let r = Region::from_stem("laval_13");
        assert!(r
            .pdf_url()
            .ends_with("/liste_des_numeros_etablissements_laval_13.pdf"));
    }
}
