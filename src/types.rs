use serde::{Deserialize, Serialize};
use std::fmt;

/// Text recovered for one PDF page (1-based page number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// Document category assigned by the classifier.
///
/// `Unknown` is the error marker used when the model response could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Voucher,
    Boleto,
    NotaFiscal,
    Descarte,
    #[serde(rename = "desconhecido")]
    Unknown,
}

impl Category {
    /// The four real labels, in report order.
    pub const LABELS: [Category; 4] = [
        Category::Voucher,
        Category::Boleto,
        Category::NotaFiscal,
        Category::Descarte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Voucher => "voucher",
            Category::Boleto => "boleto",
            Category::NotaFiscal => "nota_fiscal",
            Category::Descarte => "descarte",
            Category::Unknown => "desconhecido",
        }
    }

    /// Lenient label parsing: case and surrounding whitespace are ignored,
    /// "nota fiscal" / "nota-fiscal" are accepted. Anything else is `None`.
    pub fn parse_label(s: &str) -> Option<Category> {
        let norm = s.trim().to_lowercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "voucher" => Some(Category::Voucher),
            "boleto" => Some(Category::Boleto),
            "nota_fiscal" => Some(Category::NotaFiscal),
            "descarte" => Some(Category::Descarte),
            "desconhecido" | "error" | "erro" | "unknown" => Some(Category::Unknown),
            _ => None,
        }
    }

    /// Stored values that are not recognised map to `Unknown`.
    pub fn from_stored(s: &str) -> Category {
        Category::parse_label(s).unwrap_or(Category::Unknown)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Category::Unknown)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Raw model output, kept only when it could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl Classification {
    pub fn unparsed(raw: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            category: Category::Unknown,
            confidence: 0.0,
            tokens_in,
            tokens_out,
            raw_response: Some(raw.into()),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.raw_response.is_some()
    }
}

/// Row of the `classificacoes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub category: Category,
    pub confidence: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// SQLite `CURRENT_TIMESTAMP` text (UTC, `YYYY-MM-DD HH:MM:SS`).
    pub processed_at: String,
}

/// Fields supplied on insert; `id` and `processed_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub file_name: String,
    pub file_path: String,
    pub category: Category,
    pub confidence: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Optional filters for `ClassificationStore::query`. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub category: Option<Category>,
    pub confidence_min: Option<f64>,
    pub confidence_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultClassification {
    pub tipo: Category,
    pub indice_certeza: f64,
}

/// Per-file JSON written next to the batch output and returned by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub nome_arquivo: String,
    pub classificacao: ResultClassification,
    pub tokens_entrada: u64,
    pub tokens_saida: u64,
}

impl FileResult {
    pub fn new(file_name: &str, classification: &Classification) -> Self {
        Self {
            nome_arquivo: file_name.to_string(),
            classificacao: ResultClassification {
                tipo: classification.category,
                indice_certeza: classification.confidence,
            },
            tokens_entrada: classification.tokens_in,
            tokens_saida: classification.tokens_out,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedScan {
    pub file_path: String,
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchScanResult {
    pub successes: Vec<FileResult>,
    pub failures: Vec<FailedScan>,
}
