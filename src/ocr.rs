//! Page text extraction: rasterized OCR (pdftoppm + tesseract) merged with the
//! PDF's embedded vector text (lopdf).

use crate::config::{ArtifactDirs, OcrSettings, Settings};
use crate::error::ExtractError;
use crate::types::PageText;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Pages produced by one extraction path, plus the page count that path saw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    pub page_count: u32,
    pub pages: Vec<PageText>,
}

/// One way of turning a PDF into per-page text.
pub trait PageSource {
    fn name(&self) -> &'static str;
    fn read_pages(&self, pdf_path: &Path) -> Result<PassOutput, ExtractError>;
}

/// Anything the batch runner can extract documents with.
pub trait TextExtractor {
    fn extract(&self, pdf_path: &Path) -> Result<Extraction, ExtractError>;
}

/// Merged page text for one document, ascending by page number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub pages: Vec<PageText>,
    /// Pages in the document as reported by either path (the larger of the two).
    pub page_count: u32,
}

impl Extraction {
    /// Page numbers that neither path recovered text for.
    pub fn missing_pages(&self) -> Vec<u32> {
        let mut present = self.pages.iter().map(|p| p.page_number).peekable();
        let mut missing = Vec::new();
        for n in 1..=self.page_count {
            while present.peek().is_some_and(|p| *p < n) {
                present.next();
            }
            if present.peek() != Some(&n) {
                missing.push(n);
            }
        }
        missing
    }

    /// Page texts joined by newlines, as sent to the single-label classifier.
    pub fn combined_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Union of both mappings keyed by page number; vector text wins on collisions.
pub fn merge_pages(ocr: Vec<PageText>, vector: Vec<PageText>) -> Vec<PageText> {
    let mut by_page: BTreeMap<u32, String> = BTreeMap::new();
    for page in ocr.into_iter().chain(vector) {
        by_page.insert(page.page_number, page.text);
    }
    by_page
        .into_iter()
        .map(|(page_number, text)| PageText { page_number, text })
        .collect()
}

/// Fails with `FileAccess` when the file is missing, unreadable or not a PDF.
pub fn validate_pdf(path: &Path) -> Result<(), ExtractError> {
    let access = |reason: String| ExtractError::FileAccess {
        path: path.to_path_buf(),
        reason,
    };
    let mut f = fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            access("file not found".to_string())
        } else {
            access(e.to_string())
        }
    })?;
    let mut header = [0u8; 5];
    if f.read_exact(&mut header).is_err() {
        return Err(access("not a valid PDF (could not read header)".to_string()));
    }
    if &header != b"%PDF-" {
        return Err(access("not a valid PDF file".to_string()));
    }
    Ok(())
}

/// Per-document artifact directory: `<base>/<parent dir name>/<file stem>`.
/// Same-named files in different input folders get separate directories.
fn artifact_dir(base: &Path, pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("documento");
    match pdf_path.parent().and_then(|p| p.file_name()) {
        Some(parent) => base.join(parent).join(stem),
        None => base.join(stem),
    }
}

fn write_artifact(path: &Path, text: &str) {
    if let Err(e) = fs::write(path, text) {
        warn!("could not write {}: {}", path.display(), e);
    }
}

/// Renders pages with `pdftoppm` and reads them with `tesseract`.
pub struct TesseractSource {
    ocr: OcrSettings,
    artifacts: ArtifactDirs,
}

impl TesseractSource {
    pub fn new(ocr: OcrSettings, artifacts: ArtifactDirs) -> Self {
        Self { ocr, artifacts }
    }

    /// Render every page to `<dir>/render-N.png`; returns (page, path) ascending.
    fn render_pages(&self, pdf_path: &Path, dir: &Path) -> Result<Vec<(u32, PathBuf)>, ExtractError> {
        fs::create_dir_all(dir)?;
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &self.ocr.dpi.to_string()])
            .arg(pdf_path)
            .arg(dir.join("render"))
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(_) => {
                return Err(ExtractError::Failed(format!(
                    "pdftoppm could not render {}",
                    pdf_path.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::ToolNotFound(
                    "pdftoppm (install poppler-utils)".to_string(),
                ))
            }
            Err(e) => return Err(ExtractError::Io(e)),
        }

        // pdftoppm zero-pads to the width of the page count: render-1.png, render-01.png, ...
        let re = Regex::new(r"^render-(\d+)\.png$").map_err(|e| ExtractError::Failed(e.to_string()))?;
        let mut rendered = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(num) = re
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            {
                let target = dir.join(format!("pagina_{}.png", num));
                fs::rename(entry.path(), &target)?;
                rendered.push((num, target));
            }
        }
        rendered.sort_by_key(|(n, _)| *n);
        Ok(rendered)
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, ExtractError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.ocr.language])
            .output();
        match output {
            Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).to_string()),
            Ok(out) => Err(ExtractError::Failed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&out.stderr)
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractError::ToolNotFound(
                "tesseract (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(ExtractError::Io(e)),
        }
    }
}

impl PageSource for TesseractSource {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn read_pages(&self, pdf_path: &Path) -> Result<PassOutput, ExtractError> {
        let image_dir = artifact_dir(&self.artifacts.images_dir, pdf_path);
        let text_dir = artifact_dir(&self.artifacts.texts_dir, pdf_path);
        fs::create_dir_all(&text_dir)?;

        let rendered = self.render_pages(pdf_path, &image_dir)?;
        let mut pages = Vec::with_capacity(rendered.len());
        for (num, image) in &rendered {
            let text = self.run_tesseract(image)?;
            write_artifact(&text_dir.join(format!("pagina_{}.txt", num)), &text);
            debug!("[OCR] page {} extracted", num);
            pages.push(PageText::new(*num, text));
        }
        Ok(PassOutput {
            page_count: rendered.len() as u32,
            pages,
        })
    }
}

/// Reads text embedded in the PDF content streams.
pub struct VectorTextSource {
    artifacts: ArtifactDirs,
}

impl VectorTextSource {
    pub fn new(artifacts: ArtifactDirs) -> Self {
        Self { artifacts }
    }
}

impl PageSource for VectorTextSource {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn read_pages(&self, pdf_path: &Path) -> Result<PassOutput, ExtractError> {
        let doc = lopdf::Document::load(pdf_path)
            .map_err(|e| ExtractError::Failed(format!("could not parse PDF: {}", e)))?;
        let text_dir = artifact_dir(&self.artifacts.texts_dir, pdf_path);
        fs::create_dir_all(&text_dir)?;

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let mut pages = Vec::new();
        for num in &page_numbers {
            // Unsupported fonts/encodings leave the page to the OCR path.
            let text = match doc.extract_text(&[*num]) {
                Ok(t) => t.trim().to_string(),
                Err(e) => {
                    debug!("[Vector] page {} has no decodable text: {}", num, e);
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }
            write_artifact(&text_dir.join(format!("vetorial_pagina_{}.txt", num)), &text);
            debug!("[Vector] page {} extracted", num);
            pages.push(PageText::new(*num, text));
        }
        Ok(PassOutput {
            page_count: page_numbers.len() as u32,
            pages,
        })
    }
}

/// Runs the OCR path and then the vector path and merges them.
pub struct PdfTextExtractor<O, V> {
    ocr: O,
    vector: V,
}

impl PdfTextExtractor<TesseractSource, VectorTextSource> {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            TesseractSource::new(settings.ocr.clone(), settings.artifacts.clone()),
            VectorTextSource::new(settings.artifacts.clone()),
        )
    }
}

impl<O: PageSource, V: PageSource> PdfTextExtractor<O, V> {
    pub fn new(ocr: O, vector: V) -> Self {
        Self { ocr, vector }
    }
}

impl<O: PageSource, V: PageSource> TextExtractor for PdfTextExtractor<O, V> {
    fn extract(&self, pdf_path: &Path) -> Result<Extraction, ExtractError> {
        validate_pdf(pdf_path)?;

        let ocr = self.ocr.read_pages(pdf_path)?;
        let vector = self.vector.read_pages(pdf_path)?;
        info!(
            "{}: {} page(s) via {}, {} via {}",
            pdf_path.display(),
            ocr.pages.len(),
            self.ocr.name(),
            vector.pages.len(),
            self.vector.name()
        );

        let extraction = Extraction {
            page_count: ocr.page_count.max(vector.page_count),
            pages: merge_pages(ocr.pages, vector.pages),
        };
        let missing = extraction.missing_pages();
        if !missing.is_empty() {
            warn!(
                "{}: no text recovered for page(s) {:?}",
                pdf_path.display(),
                missing
            );
        }
        Ok(extraction)
    }
}
