use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed confidence ranges used for the distribution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceBand {
    /// [0.9, 1.0]
    Alta,
    /// [0.7, 0.9)
    MediaAlta,
    /// [0.5, 0.7)
    Media,
    /// [0.3, 0.5)
    Baixa,
    /// [0.0, 0.3)
    MuitoBaixa,
}

impl ConfidenceBand {
    /// Highest band first.
    pub const ALL: [ConfidenceBand; 5] = [
        ConfidenceBand::Alta,
        ConfidenceBand::MediaAlta,
        ConfidenceBand::Media,
        ConfidenceBand::Baixa,
        ConfidenceBand::MuitoBaixa,
    ];

    /// Inclusive lower bound; the upper bound is the next band's lower bound.
    pub fn lower_bound(&self) -> f64 {
        match self {
            ConfidenceBand::Alta => 0.9,
            ConfidenceBand::MediaAlta => 0.7,
            ConfidenceBand::Media => 0.5,
            ConfidenceBand::Baixa => 0.3,
            ConfidenceBand::MuitoBaixa => 0.0,
        }
    }

    /// Key stored by the SQL CASE expression.
    pub fn key(&self) -> &'static str {
        match self {
            ConfidenceBand::Alta => "alta",
            ConfidenceBand::MediaAlta => "media_alta",
            ConfidenceBand::Media => "media",
            ConfidenceBand::Baixa => "baixa",
            ConfidenceBand::MuitoBaixa => "muito_baixa",
        }
    }

    pub fn from_key(key: &str) -> Option<ConfidenceBand> {
        ConfidenceBand::ALL.into_iter().find(|b| b.key() == key)
    }

    pub fn short_label(&self) -> &'static str {
        match self {
            ConfidenceBand::Alta => "Alta",
            ConfidenceBand::MediaAlta => "Média-Alta",
            ConfidenceBand::Media => "Média",
            ConfidenceBand::Baixa => "Baixa",
            ConfidenceBand::MuitoBaixa => "Muito Baixa",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceBand::Alta => "Alta (0.9-1.0)",
            ConfidenceBand::MediaAlta => "Média-Alta (0.7-0.9)",
            ConfidenceBand::Media => "Média (0.5-0.7)",
            ConfidenceBand::Baixa => "Baixa (0.3-0.5)",
            ConfidenceBand::MuitoBaixa => "Muito Baixa (0.0-0.3)",
        }
    }
}

/// Output of `ClassificationStore::aggregate`. All means are 0 on an empty store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    #[serde(rename = "total_classificacoes")]
    pub total: u64,
    #[serde(rename = "classificacoes_por_tipo")]
    pub by_category: BTreeMap<Category, u64>,
    #[serde(rename = "tokens_entrada_total")]
    pub tokens_in_total: u64,
    #[serde(rename = "tokens_saida_total")]
    pub tokens_out_total: u64,
    #[serde(rename = "media_tokens_entrada")]
    pub tokens_in_mean: f64,
    #[serde(rename = "media_tokens_saida")]
    pub tokens_out_mean: f64,
    #[serde(rename = "media_certeza")]
    pub confidence_mean: f64,
    /// `sorted[len / 2]`, no interpolation for even counts.
    #[serde(rename = "mediana_certeza")]
    pub confidence_median: f64,
    #[serde(rename = "min_certeza")]
    pub confidence_min: f64,
    #[serde(rename = "max_certeza")]
    pub confidence_max: f64,
    /// Always holds all five bands, zero-filled.
    #[serde(rename = "classificacoes_por_faixa_certeza")]
    pub by_band: BTreeMap<ConfidenceBand, u64>,
}

impl ClassificationStats {
    pub fn empty() -> Self {
        Self {
            total: 0,
            by_category: BTreeMap::new(),
            tokens_in_total: 0,
            tokens_out_total: 0,
            tokens_in_mean: 0.0,
            tokens_out_mean: 0.0,
            confidence_mean: 0.0,
            confidence_median: 0.0,
            confidence_min: 0.0,
            confidence_max: 0.0,
            by_band: ConfidenceBand::ALL.into_iter().map(|b| (b, 0)).collect(),
        }
    }

    pub fn category_count(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn band_count(&self, band: ConfidenceBand) -> u64 {
        self.by_band.get(&band).copied().unwrap_or(0)
    }

    /// count / total * 100, or 0 when the store is empty.
    pub fn percent(&self, count: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }

    pub fn tokens_total(&self) -> u64 {
        self.tokens_in_total + self.tokens_out_total
    }
}

/// Mean, plain middle-index median, min and max of ascending-sorted values.
pub(crate) fn confidence_summary(sorted: &[f64]) -> (f64, f64, f64, f64) {
    if sorted.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let median = sorted[sorted.len() / 2];
    (mean, median, sorted[0], sorted[sorted.len() - 1])
}
