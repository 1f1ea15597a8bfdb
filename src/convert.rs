use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// PDF → plain text backend.
pub trait TextConverter {
    fn convert(&self, pdf: &Path) -> Result<String>;

    /// Backend name, for diagnostics.
    fn backend_name(&self) -> &str;
}

/// Poppler's `pdftotext -layout`, which keeps the column alignment the
/// extractor splits on.
pub struct Pdftotext {
    program: String,
}

impl Default for Pdftotext {
    fn default() -> Self {
        Pdftotext {
            program: "pdftotext".to_string(),
        }
    }
}

impl Pdftotext {
    pub fn with_program(program: impl Into<String>) -> Self {
        Pdftotext {
            program: program.into(),
        }
    }
}

impl TextConverter for Pdftotext {
    fn convert(&self, pdf: &Path) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-layout")
            .arg(pdf)
            .arg("-")
            .output()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn backend_name(&self) -> &str {
        &self.program
    }
}
