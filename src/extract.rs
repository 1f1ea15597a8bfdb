use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::convert::TextConverter;
use crate::dataset::{self, EstablishmentRecord};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog};
use crate::parser::{self, layout::LayoutBook};
use crate::regions::Region;

/// One regional source document found in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub region: Region,
    pub path: PathBuf,
    pub is_pdf: bool,
}

#[derive(Debug, Default)]
pub struct ExtractStats {
    pub documents: usize,
    pub failed_documents: usize,
    pub records: usize,
    pub diagnostics: usize,
}

impl ExtractStats {
    pub fn print(&self) {
        println!(
            "Extracted {} establishments from {} documents ({} unreadable, {} diagnostics).",
            self.records, self.documents, self.failed_documents, self.diagnostics,
        );
    }
}

/// List regional documents, one per region stem. A `.txt` rendering next
/// to the PDF wins so conversion only happens once.
pub fn discover_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut docs: Vec<SourceDocument> = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let is_pdf = match ext.as_deref() {
            Some("pdf") => true,
            Some("txt") => false,
            _ => continue,
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let region = Region::from_stem(stem);
        if !region.is_known() {
            warn!("Skipping {}: not a region document", path.display());
            continue;
        }

        match docs.iter_mut().find(|d| d.region == region) {
            Some(existing) if existing.is_pdf && !is_pdf => {
                existing.path = path;
                existing.is_pdf = false;
            }
            Some(_) => {}
            None => docs.push(SourceDocument { region, path, is_pdf }),
        }
    }

    docs.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(docs)
}

/// Turn a document into text, caching PDF conversions as `<stem>.txt`.
fn load_text(doc: &SourceDocument, converter: &dyn TextConverter) -> Result<String> {
    if !doc.is_pdf {
        let bytes = fs::read(&doc.path)
            .with_context(|| format!("Failed to read {}", doc.path.display()))?;
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }

    let text = converter.convert(&doc.path)?;
    let cache = doc.path.with_extension("txt");
    if let Err(e) = fs::write(&cache, &text) {
        warn!("Could not cache text for {}: {}", doc.path.display(), e);
    }
    Ok(text)
}

/// Drop a region CSV left by an earlier run of a document that now fails.
fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Extract every document in `input_dir`, writing one CSV per region and
/// the combined dataset. Document failures never abort the run.
pub fn run_extract(
    input_dir: &Path,
    output_dir: &Path,
    dataset_path: &Path,
    layouts: &LayoutBook,
    converter: &dyn TextConverter,
    log: &DiagnosticLog,
) -> Result<ExtractStats> {
    let docs = discover_documents(input_dir)?;
    let mut stats = ExtractStats::default();
    let mut combined: Vec<EstablishmentRecord> = Vec::new();
    let mut seen_codes: HashSet<String> = HashSet::new();

    for doc in &docs {
        stats.documents += 1;
        let label = doc.region.label();
        info!("Processing {} from {}", label, doc.path.display());

        let text = match load_text(doc, converter) {
            Ok(t) => t,
            Err(e) => {
                stats.failed_documents += 1;
                stats.diagnostics += 1;
                remove_stale(&output_dir.join(format!("{}.csv", doc.region.file_stem())))?;
                log.append(&[Diagnostic::document(
                    &label,
                    DiagnosticKind::UnreadableDocument,
                    format!("{} ({}): {:#}", doc.path.display(), converter.backend_name(), e),
                )])?;
                continue;
            }
        };

        let layout = layouts.for_region(&doc.region.slug);
        let mut extraction = parser::extract_document(&text, &label, layout);

        for record in &extraction.records {
            if seen_codes.insert(record.code.clone()) {
                combined.push(record.clone());
            } else {
                extraction.diagnostics.push(Diagnostic::document(
                    &label,
                    DiagnosticKind::DuplicateCode,
                    format!("code {} already extracted from another region", record.code),
                ));
            }
        }

        let region_csv = output_dir.join(format!("{}.csv", doc.region.file_stem()));
        dataset::write_records(&region_csv, &extraction.records)?;
        debug!("Wrote {}", region_csv.display());

        info!(
            "Extracted {} establishments from {}",
            extraction.records.len(),
            label
        );
        stats.records += extraction.records.len();
        stats.diagnostics += extraction.diagnostics.len();
        log.append(&extraction.diagnostics)?;
    }

    dataset::write_records(dataset_path, &combined)?;
    info!("Dataset written to {}", dataset_path.display());
    Ok(stats)
}
