use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Text line that is neither an entry nor a recognised continuation.
    UnmatchedLine,
    /// Continuation line with no entry waiting for an address.
    OrphanContinuation,
    /// Entry line with more columns than the region layout declares.
    LayoutMismatch,
    /// Entry whose name cell was empty after cleanup.
    EmptyName,
    /// Document text contained no establishment entries at all.
    NoRecords,
    /// PDF could not be read or converted.
    UnreadableDocument,
    /// Same code already emitted by an earlier region.
    DuplicateCode,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::UnmatchedLine => "unmatched_line",
            DiagnosticKind::OrphanContinuation => "orphan_continuation",
            DiagnosticKind::LayoutMismatch => "layout_mismatch",
            DiagnosticKind::EmptyName => "empty_name",
            DiagnosticKind::NoRecords => "no_records",
            DiagnosticKind::UnreadableDocument => "unreadable_document",
            DiagnosticKind::DuplicateCode => "duplicate_code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub region: String,
    pub line_no: Option<usize>,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl Diagnostic {
    pub fn line(region: &str, line_no: usize, kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Diagnostic {
            region: region.to_string(),
            line_no: Some(line_no),
            kind,
            detail: detail.into(),
        }
    }

    pub fn document(region: &str, kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Diagnostic {
            region: region.to_string(),
            line_no: None,
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} region={:?}", self.kind.as_str(), self.region)?;
        if let Some(n) = self.line_no {
            write!(f, " line={}", n)?;
        }
        write!(f, " {}", self.detail)
    }
}

/// Append-only diagnostic log. One timestamped entry per line.
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DiagnosticLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entries: &[Diagnostic]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open diagnostic log {}", self.path.display()))?;

        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        for d in entries {
            if d.line_no.is_none() {
                warn!("{}", d);
            }
            writeln!(file, "{} {}", ts, d)?;
        }
        Ok(())
    }
}
