//! Text reports, CSV and XLSX exports over the classification store.

use crate::db::ClassificationStore;
use crate::error::ReportError;
use crate::models::{ClassificationStats, ConfidenceBand};
use crate::types::{Category, ClassificationRecord, FileResult};
use rust_xlsxwriter::{Format, FormatAlign, Workbook};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// CSV/XLSX column order.
pub const EXPORT_HEADERS: [&str; 6] = [
    "nome_arquivo",
    "tipo_classificacao",
    "indice_certeza",
    "tokens_entrada",
    "tokens_saida",
    "data_processamento",
];

/// Integer with comma thousands separators (1234567 → "1,234,567").
fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn summary_report(stats: &ClassificationStats) -> String {
    let mut out = vec![
        "RELATÓRIO RESUMIDO DE CLASSIFICAÇÕES".to_string(),
        "=".repeat(50),
        format!("Total de documentos processados: {}", stats.total),
        format!("Total de tokens de entrada: {}", stats.tokens_in_total),
        format!("Total de tokens de saída: {}", stats.tokens_out_total),
        format!(
            "Média de tokens por documento - Entrada: {:.2}",
            stats.tokens_in_mean
        ),
        format!(
            "Média de tokens por documento - Saída: {:.2}",
            stats.tokens_out_mean
        ),
        format!("Índice médio de certeza: {:.2}", stats.confidence_mean),
        format!("Índice mediano de certeza: {:.2}", stats.confidence_median),
        String::new(),
        "DISTRIBUIÇÃO POR TIPO DE DOCUMENTO:".to_string(),
    ];
    for (category, count) in &stats.by_category {
        out.push(format!(
            "  {}: {} ({:.1}%)",
            category,
            count,
            stats.percent(*count)
        ));
    }
    out.push(String::new());
    out.push("DISTRIBUIÇÃO POR FAIXA DE CERTEZA:".to_string());
    for band in ConfidenceBand::ALL {
        let count = stats.band_count(band);
        out.push(format!(
            "  {}: {} ({:.1}%)",
            band.label(),
            count,
            stats.percent(count)
        ));
    }
    out.join("\n")
}

pub fn control_dashboard(stats: &ClassificationStats) -> String {
    let mut out = vec![
        "DASHBOARD DE CONTROLE - CLASSIFICAÇÃO DE DOCUMENTOS".to_string(),
        "=".repeat(60),
        String::new(),
        "MÉTRICAS PRINCIPAIS:".to_string(),
        "-".repeat(20),
        format!("Total de documentos processados: {}", stats.total),
    ];
    let failed = stats.category_count(Category::Unknown);
    let success_rate = if stats.total == 0 {
        0.0
    } else {
        (stats.total - failed) as f64 / stats.total as f64 * 100.0
    };
    out.push(format!(
        "Taxa de sucesso: {:.1}% ({} sem classificação)",
        success_rate, failed
    ));
    out.push(format!(
        "Custo estimado (tokens): {}",
        format_thousands(stats.tokens_total())
    ));
    out.push(String::new());

    out.push("DISTRIBUIÇÃO POR TIPO DE DOCUMENTO:".to_string());
    out.push("-".repeat(40));
    for category in Category::LABELS {
        let count = stats.category_count(category);
        out.push(format!(
            "  {}: {} ({:.1}%)",
            capitalize(category.as_str()),
            count,
            stats.percent(count)
        ));
    }
    out.push(String::new());

    out.push("QUALIDADE DAS CLASSIFICAÇÕES:".to_string());
    out.push("-".repeat(30));
    out.push(format!("Índice médio de certeza: {:.2}", stats.confidence_mean));
    out.push(format!("Índice mediano de certeza: {:.2}", stats.confidence_median));
    out.push(format!("Índice máximo de certeza: {:.2}", stats.confidence_max));
    out.push(format!("Índice mínimo de certeza: {:.2}", stats.confidence_min));
    out.push(String::new());

    out.push("DISTRIBUIÇÃO POR FAIXA DE CERTEZA:".to_string());
    out.push("-".repeat(35));
    for band in ConfidenceBand::ALL {
        let count = stats.band_count(band);
        out.push(format!(
            "  {}: {} ({:.1}%)",
            band.short_label(),
            count,
            stats.percent(count)
        ));
    }
    out.push(String::new());

    out.push("EFICIÊNCIA:".to_string());
    out.push("-".repeat(12));
    out.push(format!(
        "Média de tokens por documento - Entrada: {:.2}",
        stats.tokens_in_mean
    ));
    out.push(format!(
        "Média de tokens por documento - Saída: {:.2}",
        stats.tokens_out_mean
    ));
    out.push(format!(
        "Total de tokens processados: {}",
        format_thousands(stats.tokens_total())
    ));
    out.join("\n")
}

/// Console summary of the results returned by a batch run.
pub fn batch_summary(results: &[FileResult]) -> String {
    let mut by_category: BTreeMap<Category, u64> = BTreeMap::new();
    let mut tokens_in = 0u64;
    let mut tokens_out = 0u64;
    for r in results {
        *by_category.entry(r.classificacao.tipo).or_insert(0) += 1;
        tokens_in += r.tokens_entrada;
        tokens_out += r.tokens_saida;
    }
    let mut out = vec![
        "Resumo final:".to_string(),
        format!("Total de arquivos processados: {}", results.len()),
        format!("Total de tokens de entrada: {}", tokens_in),
        format!("Total de tokens de saída: {}", tokens_out),
        "Classificações por tipo:".to_string(),
    ];
    for (category, count) in by_category {
        out.push(format!("  {}: {}", category, count));
    }
    out.join("\n")
}

/// Writes records as CSV (header + one row per record) to any writer.
pub fn write_csv<W: Write>(records: &[ClassificationRecord], writer: W) -> Result<(), ReportError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(EXPORT_HEADERS)?;
    for r in records {
        w.write_record([
            r.file_name.clone(),
            r.category.as_str().to_string(),
            r.confidence.to_string(),
            r.tokens_in.to_string(),
            r.tokens_out.to_string(),
            r.processed_at.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Exports the whole store, ordered by processing time, to `path`.
pub fn export_csv(store: &ClassificationStore, path: &Path) -> Result<usize, ReportError> {
    let records = store.all_by_processing_time()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv(&records, file)?;
    info!("exported {} record(s) to {}", records.len(), path.display());
    Ok(records.len())
}

/// Column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

/// Same rows as the CSV export in a single worksheet.
pub fn export_xlsx(store: &ClassificationStore, path: &Path) -> Result<usize, ReportError> {
    let records = store.all_by_processing_time()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Classificacoes")?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(rust_xlsxwriter::Color::RGB(0x2563EB))
        .set_font_color(rust_xlsxwriter::Color::RGB(0xFFFFFF));
    let confidence_format = Format::new()
        .set_num_format("0.00")
        .set_align(FormatAlign::Right);
    let count_format = Format::new().set_num_format("#,##0");

    let mut widths: Vec<f64> = EXPORT_HEADERS.iter().map(|h| estimate_text_width(h)).collect();
    widths[0] = records
        .iter()
        .map(|r| estimate_text_width(&r.file_name))
        .fold(widths[0], f64::max);
    for (col, w) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *w)?;
    }
    for (col, header) in EXPORT_HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    for (idx, r) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        worksheet.write_string(row, 0, &r.file_name)?;
        worksheet.write_string(row, 1, r.category.as_str())?;
        worksheet.write_number_with_format(row, 2, r.confidence, &confidence_format)?;
        worksheet.write_number_with_format(row, 3, r.tokens_in as f64, &count_format)?;
        worksheet.write_number_with_format(row, 4, r.tokens_out as f64, &count_format)?;
        worksheet.write_string(row, 5, &r.processed_at)?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(path)?;
    info!("exported {} record(s) to {}", records.len(), path.display());
    Ok(records.len())
}
