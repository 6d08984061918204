use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::payload::BuildPayload;

pub struct PayloadLoader;

impl PayloadLoader {
    /// Read and parse one JSON report.
    pub fn load_file(path: &Path) -> Result<BuildPayload> {
        let bytes = fs::read(path)
            .with_context(|| format!("Json file {} does not exist or cannot be read", path.display()))?;
        BuildPayload::from_slice(&bytes)
            .with_context(|| format!("Failed to parse report {}", path.display()))
    }

    /// Expand files and directories into the list of report files to import.
    /// Directories contribute every `*.json` file below them, sorted by path.
    pub fn collect_reports(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            if input.is_dir() {
                let mut found = Vec::new();
                Self::collect_json_recursive(input, &mut found)?;
                found.sort();
                files.extend(found);
            } else {
                files.push(input.clone());
            }
        }
        Ok(files)
    }

    fn collect_json_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        if dir.ends_with(".git") {
            return Ok(());
        }

        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();

            if path.is_dir() {
                Self::collect_json_recursive(&path, out)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                out.push(path);
            }
        }
        Ok(())
    }
}
