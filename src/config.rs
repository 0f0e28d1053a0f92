//! Runtime settings. Defaults are relative to the working directory and can be
//! overridden by `DOC_CLASSIFIER_*` environment variables (a `.env` file is
//! honoured) and then by CLI flags.

use std::path::PathBuf;

pub const DEFAULT_DB_FILE: &str = "classificacoes.db";
pub const DEFAULT_OUTPUT_DIR: &str = "amostragem/OUTPUT";
pub const DEFAULT_IMAGES_DIR: &str = "imagens_paginas";
pub const DEFAULT_TEXTS_DIR: &str = "textos_paginas";
pub const DEFAULT_STRIP_PREFIX: &str = "page_";

/// Where rendered page images and per-page text files are written.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDirs {
    pub images_dir: PathBuf,
    pub texts_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrSettings {
    pub dpi: u32,
    pub language: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            dpi: 300,
            language: "por".to_string(),
        }
    }
}

/// Chat-completions endpoint used by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub artifacts: ArtifactDirs,
    /// Literal prefix removed from file names before they are persisted.
    pub strip_prefix: String,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            artifacts: ArtifactDirs {
                images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
                texts_dir: PathBuf::from(DEFAULT_TEXTS_DIR),
            },
            strip_prefix: DEFAULT_STRIP_PREFIX.to_string(),
            ocr: OcrSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with the process environment. `.env` is loaded once
    /// by the binary before this runs.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("DOC_CLASSIFIER_DB") {
            s.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("DOC_CLASSIFIER_OUTPUT_DIR") {
            s.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOC_CLASSIFIER_IMAGES_DIR") {
            s.artifacts.images_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOC_CLASSIFIER_TEXTS_DIR") {
            s.artifacts.texts_dir = PathBuf::from(v);
        }
        // An explicitly empty prefix disables stripping.
        if let Some(v) = lookup("DOC_CLASSIFIER_STRIP_PREFIX") {
            s.strip_prefix = v;
        }
        if let Some(dpi) = get("DOC_CLASSIFIER_OCR_DPI").and_then(|v| v.parse().ok()) {
            s.ocr.dpi = dpi;
        }
        if let Some(v) = get("DOC_CLASSIFIER_OCR_LANG") {
            s.ocr.language = v;
        }
        if let Some(v) = get("DOC_CLASSIFIER_LLM_ENDPOINT") {
            s.llm.endpoint = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("DOC_CLASSIFIER_LLM_MODEL") {
            s.llm.model = v;
        }
        if let Some(t) = get("DOC_CLASSIFIER_LLM_TEMPERATURE").and_then(|v| v.parse().ok()) {
            s.llm.temperature = t;
        }
        if let Some(t) = get("DOC_CLASSIFIER_LLM_TIMEOUT").and_then(|v| v.parse().ok()) {
            s.llm.timeout_secs = t;
        }
        s.llm.api_key = get("OPENAI_API_KEY");
        s
    }
}
