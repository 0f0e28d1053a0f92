//! CLI parser and command handlers.

use crate::config::Settings;
use crate::db::ClassificationStore;
use crate::error::StoreError;
use crate::models::ClassificationStats;
use crate::ocr::{PdfTextExtractor, TextExtractor};
use crate::report;
use crate::services::batch::{normalize_file_name, BatchRunner};
use crate::services::classifier::{Classifier, OpenAiClient, PageAssignment, PageClassifier};
use crate::types::{Category, ClassificationRecord, FileResult, RecordFilter};
use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

/// Default export file names, placed in the output directory.
const CSV_EXPORT_FILE: &str = "classificacoes.csv";
const XLSX_EXPORT_FILE: &str = "classificacoes.xlsx";

#[derive(Parser)]
#[command(name = "doc-classifier")]
#[command(about = "Classify scanned PDF documents and report on the results")]
#[command(version)]
pub struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "DOC_CLASSIFIER_DB")]
    db: Option<PathBuf>,

    /// Directory for per-file JSON results and exports
    #[arg(long, global = true, env = "DOC_CLASSIFIER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory for rendered page images
    #[arg(long, global = true, env = "DOC_CLASSIFIER_IMAGES_DIR")]
    images_dir: Option<PathBuf>,

    /// Directory for per-page text files
    #[arg(long, global = true, env = "DOC_CLASSIFIER_TEXTS_DIR")]
    texts_dir: Option<PathBuf>,

    /// Prefix removed from file names before persisting (empty disables)
    #[arg(long, global = true)]
    strip_prefix: Option<String>,

    /// Chat model name
    #[arg(long, global = true, env = "DOC_CLASSIFIER_LLM_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, global = true, env = "DOC_CLASSIFIER_LLM_ENDPOINT")]
    endpoint: Option<String>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if quiet mode is enabled (for early logging setup).
pub fn is_quiet() -> bool {
    std::env::args().any(|arg| arg == "-q" || arg == "--quiet")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Classify every PDF in the subdirectories of ROOT
    Run {
        root: PathBuf,
    },

    /// Extract and classify one PDF without saving it
    Classify {
        pdf: PathBuf,
    },

    /// Assign each page of one PDF to a category
    Pages {
        pdf: PathBuf,
    },

    /// Print aggregate statistics as JSON
    Stats,

    /// Print the summary report
    Report,

    /// Print the control dashboard
    Dashboard,

    /// Export all classifications to CSV
    ExportCsv {
        path: Option<PathBuf>,
    },

    /// Export all classifications to XLSX
    ExportXlsx {
        path: Option<PathBuf>,
    },

    /// List classifications, highest confidence first
    Browse {
        /// Only this category (voucher, boleto, nota_fiscal, descarte, desconhecido)
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
        /// Minimum confidence (inclusive)
        #[arg(long, value_parser = parse_confidence)]
        min: Option<f64>,
        /// Maximum confidence (inclusive)
        #[arg(long, value_parser = parse_confidence)]
        max: Option<f64>,
    },

    /// Show one classification
    Show {
        file_name: String,
        /// Open the original PDF in the system viewer
        #[arg(long)]
        open: bool,
        /// Print the PDF as a base64 data URI
        #[arg(long)]
        data_uri: bool,
    },

    /// Delete the classification of one file
    Delete {
        file_name: String,
    },

    /// Delete every classification
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::parse_label(s).ok_or_else(|| format!("unknown category '{}'", s))
}

fn parse_confidence(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("confidence must be between 0 and 1, got {}", v))
    }
}

impl Cli {
    /// Environment settings with command-line overrides applied.
    fn settings(&self) -> Settings {
        let mut s = Settings::from_env();
        if let Some(v) = &self.db {
            s.db_path = v.clone();
        }
        if let Some(v) = &self.output_dir {
            s.output_dir = v.clone();
        }
        if let Some(v) = &self.images_dir {
            s.artifacts.images_dir = v.clone();
        }
        if let Some(v) = &self.texts_dir {
            s.artifacts.texts_dir = v.clone();
        }
        if let Some(v) = &self.strip_prefix {
            s.strip_prefix = v.clone();
        }
        if let Some(v) = &self.model {
            s.llm.model = v.clone();
        }
        if let Some(v) = &self.endpoint {
            s.llm.endpoint = v.trim_end_matches('/').to_string();
        }
        s
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings();
    let store = ClassificationStore::new(&settings.db_path);

    match cli.command {
        Commands::Init => {
            store.initialize()?;
            println!("Database ready at {}", store.path().display());
            Ok(())
        }
        Commands::Run { root } => cmd_run(&settings, &store, &root),
        Commands::Classify { pdf } => cmd_classify(&settings, &pdf),
        Commands::Pages { pdf } => cmd_pages(&settings, &pdf),
        Commands::Stats => {
            println!("{}", stats_view(&store, stats_json));
            Ok(())
        }
        Commands::Report => {
            println!("{}", stats_view(&store, report::summary_report));
            Ok(())
        }
        Commands::Dashboard => {
            println!("{}", dashboard_view(&store));
            Ok(())
        }
        Commands::ExportCsv { path } => {
            let path = path.unwrap_or_else(|| settings.output_dir.join(CSV_EXPORT_FILE));
            let n = report::export_csv(&store, &path)?;
            println!("Exported {} record(s) to {}", n, path.display());
            Ok(())
        }
        Commands::ExportXlsx { path } => {
            let path = path.unwrap_or_else(|| settings.output_dir.join(XLSX_EXPORT_FILE));
            let n = report::export_xlsx(&store, &path)?;
            println!("Exported {} record(s) to {}", n, path.display());
            Ok(())
        }
        Commands::Browse { category, min, max } => {
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    bail!("--min ({}) is greater than --max ({})", lo, hi);
                }
            }
            cmd_browse(
                &store,
                &RecordFilter {
                    category,
                    confidence_min: min,
                    confidence_max: max,
                },
            );
            Ok(())
        }
        Commands::Show {
            file_name,
            open,
            data_uri,
        } => cmd_show(&store, &file_name, open, data_uri),
        Commands::Delete { file_name } => {
            if store.delete(&file_name)? {
                println!("Deleted {}", file_name);
            } else {
                println!("No classification found for {}", file_name);
            }
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to delete all classifications without --yes");
            }
            let n = store.clear()?;
            println!("Deleted {} classification(s)", n);
            Ok(())
        }
    }
}

fn build_classifier(settings: &Settings) -> anyhow::Result<PageClassifier<OpenAiClient>> {
    let client = OpenAiClient::new(settings.llm.clone())?;
    Ok(PageClassifier::new(client))
}

fn cmd_run(settings: &Settings, store: &ClassificationStore, root: &Path) -> anyhow::Result<()> {
    store.initialize()?;
    let extractor = PdfTextExtractor::from_settings(settings);
    let classifier = build_classifier(settings)?;
    let runner = BatchRunner::new(
        &extractor,
        &classifier,
        store,
        &settings.output_dir,
        settings.strip_prefix.as_str(),
    );
    let result = runner.run(root)?;

    println!("{}", report::batch_summary(&result.successes));
    if !result.failures.is_empty() {
        println!("Arquivos com erro: {}", result.failures.len());
        for f in &result.failures {
            println!("  {}: {}", f.file_path, f.error);
        }
    }

    let stats = store.aggregate()?;
    println!();
    println!("Estatísticas do banco de dados:");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let csv_path = settings.output_dir.join(CSV_EXPORT_FILE);
    report::export_csv(store, &csv_path)?;
    println!("Dados exportados para {}", csv_path.display());

    println!();
    println!("{}", report::summary_report(&stats));
    println!();
    println!("{}", report::control_dashboard(&stats));
    Ok(())
}

fn cmd_classify(settings: &Settings, pdf: &Path) -> anyhow::Result<()> {
    let extractor = PdfTextExtractor::from_settings(settings);
    let classifier = build_classifier(settings)?;
    let extraction = extractor.extract(pdf)?;
    let classification = classifier.classify(&extraction.combined_text())?;

    let base_name = pdf.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let result = FileResult::new(
        normalize_file_name(base_name, &settings.strip_prefix),
        &classification,
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_pages(settings: &Settings, pdf: &Path) -> anyhow::Result<()> {
    let extractor = PdfTextExtractor::from_settings(settings);
    let classifier = build_classifier(settings)?;
    let extraction = extractor.extract(pdf)?;
    let missing = extraction.missing_pages();

    let output = match classifier.classify_pages(&extraction.pages)? {
        PageAssignment::Assigned {
            pages,
            tokens_in,
            tokens_out,
        } => serde_json::json!({
            "paginas": pages,
            "paginas_sem_texto": missing,
            "tokens_entrada": tokens_in,
            "tokens_saida": tokens_out,
        }),
        PageAssignment::Unparsed {
            raw,
            tokens_in,
            tokens_out,
        } => serde_json::json!({
            "erro": "resposta não reconhecida",
            "resposta_bruta": raw,
            "paginas_sem_texto": missing,
            "tokens_entrada": tokens_in,
            "tokens_saida": tokens_out,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn store_error_message(e: &StoreError) -> String {
    format!("Erro ao carregar dados do banco: {}", e)
}

fn stats_json(stats: &ClassificationStats) -> String {
    serde_json::to_string_pretty(stats).unwrap_or_else(|e| e.to_string())
}

/// Renders the aggregate, or a readable error line when the store cannot be read.
fn stats_view(store: &ClassificationStore, render: fn(&ClassificationStats) -> String) -> String {
    match store.aggregate() {
        Ok(stats) => render(&stats),
        Err(e) => store_error_message(&e),
    }
}

fn dashboard_view(store: &ClassificationStore) -> String {
    match store.aggregate() {
        Ok(stats) if stats.total == 0 => {
            "Nenhuma classificação encontrada no banco de dados.".to_string()
        }
        Ok(stats) => report::control_dashboard(&stats),
        Err(e) => store_error_message(&e),
    }
}

fn print_table(records: &[ClassificationRecord]) {
    println!(
        "{:<40} {:<14} {:>8} {:>10} {:>8}  {}",
        "Arquivo", "Tipo", "Certeza", "Tok. ent.", "Tok. saí", "Processado em"
    );
    println!("{}", "-".repeat(108));
    for r in records {
        println!(
            "{:<40} {:<14} {:>8.2} {:>10} {:>8}  {}",
            r.file_name, r.category.as_str(), r.confidence, r.tokens_in, r.tokens_out, r.processed_at
        );
    }
    println!("{} documento(s)", records.len());
}

fn cmd_browse(store: &ClassificationStore, filter: &RecordFilter) {
    match store.query(filter) {
        Ok(records) if records.is_empty() => {
            println!("Nenhum documento encontrado com os filtros selecionados.");
        }
        Ok(records) => print_table(&records),
        Err(e) => println!("{}", store_error_message(&e)),
    }
}

fn cmd_show(
    store: &ClassificationStore,
    file_name: &str,
    open: bool,
    data_uri: bool,
) -> anyhow::Result<()> {
    let record = match store.get(file_name) {
        Ok(Some(r)) => r,
        Ok(None) => {
            println!("Nenhuma classificação encontrada para {}", file_name);
            return Ok(());
        }
        Err(e) => {
            println!("{}", store_error_message(&e));
            return Ok(());
        }
    };

    println!("Arquivo:        {}", record.file_name);
    println!("Caminho:        {}", record.file_path);
    println!("Tipo:           {}", record.category);
    println!("Certeza:        {:.2}", record.confidence);
    println!("Tokens entrada: {}", record.tokens_in);
    println!("Tokens saída:   {}", record.tokens_out);
    println!("Processado em:  {}", record.processed_at);

    let path = Path::new(&record.file_path);
    if open {
        if !path.exists() {
            bail!("Arquivo PDF não encontrado: {}", path.display());
        }
        opener::open(path).with_context(|| format!("could not open {}", path.display()))?;
    }
    if data_uri {
        println!("{}", pdf_data_uri(path)?);
    }
    Ok(())
}

/// `data:application/pdf;base64,...` for inline embedding.
fn pdf_data_uri(path: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    Ok(format!("data:application/pdf;base64,{}", BASE64.encode(&bytes)))
}
