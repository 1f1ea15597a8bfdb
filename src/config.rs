use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MODEL: &str = "gpt-4.1";

/// Paths and credentials for one pipeline run, read from the environment
/// (optionally seeded from `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub layouts_path: Option<PathBuf>,
    pub places_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

impl Config {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Config {
            data_dir: var("RAMQ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            layouts_path: var("RAMQ_LAYOUTS").map(PathBuf::from),
            places_api_key: var("GOOGLE_PLACES_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            layouts_path: None,
            places_api_key: None,
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.data_dir.join("pdfs")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.data_dir.join("extracted")
    }

    pub fn dataset_csv(&self) -> PathBuf {
        self.data_dir.join("ramq_establishments.csv")
    }

    pub fn merged_csv(&self) -> PathBuf {
        self.data_dir.join("ramq_establishments_merged.csv")
    }

    pub fn final_csv(&self) -> PathBuf {
        self.data_dir.join("ramq_establishments_with_fax.csv")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ramq.sqlite")
    }

    pub fn diagnostics_log(&self) -> PathBuf {
        self.data_dir.join("diagnostics.log")
    }

    pub fn require_places_key(&self) -> Result<&str> {
        self.places_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("GOOGLE_PLACES_API_KEY environment variable must be set"))
    }

    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable must be set"))
    }
}
