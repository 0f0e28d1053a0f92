//! Sequential batch processing of a directory tree of PDFs.

use crate::db::ClassificationStore;
use crate::error::ProcessError;
use crate::ocr::TextExtractor;
use crate::services::classifier::Classifier;
use crate::types::{BatchScanResult, FailedScan, FileResult, NewRecord};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Removes `prefix` from the start of `name` when present.
pub fn normalize_file_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return name;
    }
    name.strip_prefix(prefix).unwrap_or(name)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, ProcessError> {
    let entries = fs::read_dir(dir).map_err(|e| ProcessError::InputDir {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    Ok(paths)
}

/// Immediate subdirectories of `root`, lexicographic.
pub fn list_subdirs(root: &Path) -> Result<Vec<PathBuf>, ProcessError> {
    Ok(read_dir_sorted(root)?.into_iter().filter(|p| p.is_dir()).collect())
}

/// `*.pdf` files directly inside `dir`, lexicographic.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, ProcessError> {
    Ok(read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("pdf"))
        .collect())
}

/// Extract → classify → persist → write JSON, one file at a time.
pub struct BatchRunner<'a> {
    extractor: &'a dyn TextExtractor,
    classifier: &'a dyn Classifier,
    store: &'a ClassificationStore,
    output_dir: PathBuf,
    strip_prefix: String,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        extractor: &'a dyn TextExtractor,
        classifier: &'a dyn Classifier,
        store: &'a ClassificationStore,
        output_dir: impl Into<PathBuf>,
        strip_prefix: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            classifier,
            store,
            output_dir: output_dir.into(),
            strip_prefix: strip_prefix.into(),
        }
    }

    /// Processes every PDF in every subdirectory of `root`. A failing file is
    /// logged and recorded in `failures`; it never stops the batch.
    pub fn run(&self, root: &Path) -> Result<BatchScanResult, ProcessError> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ProcessError::Output(format!("{}: {}", self.output_dir.display(), e)))?;

        let subdirs = list_subdirs(root)?;
        info!("found {} subdirectories to process", subdirs.len());

        let mut result = BatchScanResult::default();
        for subdir in subdirs {
            let pdfs = match list_pdfs(&subdir) {
                Ok(p) => p,
                Err(e) => {
                    warn!("skipping {}: {}", subdir.display(), e);
                    continue;
                }
            };
            info!("{}: {} PDF file(s)", subdir.display(), pdfs.len());

            for pdf in pdfs {
                match self.process_file(&pdf) {
                    Ok(r) => result.successes.push(r),
                    Err(e) => {
                        error!("error processing {}: {}", pdf.display(), e);
                        result.failures.push(FailedScan {
                            file_path: pdf.display().to_string(),
                            file_name: pdf
                                .file_name()
                                .and_then(|n| n.to_str())
                                .unwrap_or("")
                                .to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        info!(
            "batch finished: {} classified, {} failed",
            result.successes.len(),
            result.failures.len()
        );
        Ok(result)
    }

    pub fn process_file(&self, pdf: &Path) -> Result<FileResult, ProcessError> {
        info!("processing {}", pdf.display());
        let extraction = self.extractor.extract(pdf)?;
        let classification = self.classifier.classify(&extraction.combined_text())?;

        let base_name = pdf.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let file_name = normalize_file_name(base_name, &self.strip_prefix);
        let file_result = FileResult::new(file_name, &classification);

        self.store.insert(&NewRecord {
            file_name: file_name.to_string(),
            file_path: pdf.display().to_string(),
            category: classification.category,
            confidence: classification.confidence,
            tokens_in: classification.tokens_in,
            tokens_out: classification.tokens_out,
        })?;

        let json_path = self.output_dir.join(Path::new(file_name).with_extension("json"));
        let json = serde_json::to_string_pretty(&file_result)
            .map_err(|e| ProcessError::Output(e.to_string()))?;
        fs::write(&json_path, json)
            .map_err(|e| ProcessError::Output(format!("{}: {}", json_path.display(), e)))?;

        info!(
            "{} -> {} ({:.2}), tokens in/out {}/{}",
            file_name,
            classification.category,
            classification.confidence,
            classification.tokens_in,
            classification.tokens_out
        );
        Ok(file_result)
    }
}
