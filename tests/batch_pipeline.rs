//! End-to-end batch runs with scripted page sources and a scripted model.

use doc_classifier_lib::db::ClassificationStore;
use doc_classifier_lib::error::{ClassifierError, ExtractError};
use doc_classifier_lib::ocr::{PageSource, PassOutput, PdfTextExtractor};
use doc_classifier_lib::report;
use doc_classifier_lib::services::batch::BatchRunner;
use doc_classifier_lib::services::classifier::{Completion, CompletionService, PageClassifier};
use doc_classifier_lib::types::{Category, FileResult, PageText, RecordFilter};
use std::fs;
use std::path::Path;

/// Returns one page of text derived from the file stem.
struct StemSource;

impl PageSource for StemSource {
    fn name(&self) -> &'static str {
        "stem"
    }

    fn read_pages(&self, pdf_path: &Path) -> Result<PassOutput, ExtractError> {
        let stem = pdf_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        Ok(PassOutput {
            page_count: 1,
            pages: vec![PageText::new(1, format!("documento {}", stem))],
        })
    }
}

struct EmptySource;

impl PageSource for EmptySource {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn read_pages(&self, _pdf_path: &Path) -> Result<PassOutput, ExtractError> {
        Ok(PassOutput::default())
    }
}

/// Answers "boleto" for files whose stem ends in `_boleto`, "voucher" otherwise.
struct KeywordModel;

impl CompletionService for KeywordModel {
    fn complete(&self, prompt: &str) -> Result<Completion, ClassifierError> {
        let text = if prompt.contains("_boleto") {
            r#"{"tipo": "boleto", "indice_certeza": 0.72}"#
        } else {
            r#"```json
{"tipo": "voucher", "indice_certeza": 0.95}
```"#
        };
        Ok(Completion {
            text: text.to_string(),
            prompt_tokens: 100,
            completion_tokens: 10,
        })
    }
}

/// Fails the call for `_offline` files and answers free text for `_ilegivel` files.
struct FlakyModel;

impl CompletionService for FlakyModel {
    fn complete(&self, prompt: &str) -> Result<Completion, ClassifierError> {
        if prompt.contains("_offline") {
            return Err(ClassifierError::ExternalService(
                "request failed (503 Service Unavailable)".to_string(),
            ));
        }
        let text = if prompt.contains("_ilegivel") {
            "Não consegui identificar o tipo deste documento."
        } else {
            r#"{"tipo": "nota_fiscal", "indice_certeza": 0.88}"#
        };
        Ok(Completion {
            text: text.to_string(),
            prompt_tokens: 321,
            completion_tokens: 17,
        })
    }
}

fn write_pdf(path: &Path) {
    fs::write(path, b"%PDF-1.4\n%fake\n").unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    output: std::path::PathBuf,
    store: ClassificationStore,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("input");
    let output = dir.path().join("output");
    fs::create_dir_all(&root).unwrap();
    let store = ClassificationStore::new(dir.path().join("classificacoes.db"));
    store.initialize().unwrap();
    Fixture {
        root,
        output,
        store,
        _dir: dir,
    }
}

#[test]
fn corrupt_file_is_isolated_and_others_are_persisted() {
    let fx = fixture();
    let sub = fx.root.join("lote1");
    fs::create_dir(&sub).unwrap();
    write_pdf(&sub.join("page_001_boleto.pdf"));
    fs::write(sub.join("page_002_corrompido.pdf"), b"not a pdf").unwrap();
    write_pdf(&sub.join("page_003_recibo.pdf"));

    let extractor = PdfTextExtractor::new(EmptySource, StemSource);
    let classifier = PageClassifier::new(KeywordModel);
    let runner = BatchRunner::new(&extractor, &classifier, &fx.store, &fx.output, "page_");
    let result = runner.run(&fx.root).unwrap();

    assert_eq!(result.successes.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].file_name, "page_002_corrompido.pdf");
    assert_eq!(fx.store.count().unwrap(), 2);

    let names: Vec<&str> = result.successes.iter().map(|r| r.nome_arquivo.as_str()).collect();
    assert_eq!(names, vec!["001_boleto.pdf", "003_recibo.pdf"]);

    let json = fs::read_to_string(fx.output.join("001_boleto.json")).unwrap();
    let parsed: FileResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.classificacao.tipo, Category::Boleto);
    assert_eq!(parsed.classificacao.indice_certeza, 0.72);
    assert_eq!(parsed.tokens_entrada, 100);
    assert!(fx.output.join("003_recibo.json").exists());

    let stored = fx.store.get("003_recibo.pdf").unwrap().unwrap();
    assert_eq!(stored.category, Category::Voucher);
    assert!(stored.file_path.ends_with("page_003_recibo.pdf"));
}

#[test]
fn duplicate_name_across_subdirectories_fails_only_that_file() {
    let fx = fixture();
    for sub in ["a", "b"] {
        let dir = fx.root.join(sub);
        fs::create_dir(&dir).unwrap();
        write_pdf(&dir.join("page_010.pdf"));
    }
    write_pdf(&fx.root.join("b").join("page_011.pdf"));

    let extractor = PdfTextExtractor::new(EmptySource, StemSource);
    let classifier = PageClassifier::new(KeywordModel);
    let runner = BatchRunner::new(&extractor, &classifier, &fx.store, &fx.output, "page_");
    let result = runner.run(&fx.root).unwrap();

    assert_eq!(result.successes.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].file_path.contains("/b/"));
    assert!(result.failures[0].error.contains("010.pdf"));
    assert_eq!(fx.store.count().unwrap(), 2);
}

#[test]
fn classification_failures_are_isolated_and_unparsed_answers_are_kept() {
    let fx = fixture();
    let sub = fx.root.join("lote");
    fs::create_dir(&sub).unwrap();
    for name in ["a_ok.pdf", "b_offline.pdf", "c_ilegivel.pdf", "d_ok.pdf"] {
        write_pdf(&sub.join(name));
    }

    let extractor = PdfTextExtractor::new(EmptySource, StemSource);
    let classifier = PageClassifier::new(FlakyModel);
    let runner = BatchRunner::new(&extractor, &classifier, &fx.store, &fx.output, "");
    let result = runner.run(&fx.root).unwrap();

    let names: Vec<&str> = result.successes.iter().map(|r| r.nome_arquivo.as_str()).collect();
    assert_eq!(names, vec!["a_ok.pdf", "c_ilegivel.pdf", "d_ok.pdf"]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].file_name, "b_offline.pdf");
    assert!(result.failures[0].error.contains("503"));

    assert_eq!(fx.store.count().unwrap(), 3);
    assert!(fx.store.get("b_offline.pdf").unwrap().is_none());
    assert!(!fx.output.join("b_offline.json").exists());

    let unparsed = fx.store.get("c_ilegivel.pdf").unwrap().unwrap();
    assert_eq!(unparsed.category, Category::Unknown);
    assert_eq!(unparsed.confidence, 0.0);
    assert_eq!(unparsed.tokens_in, 321);
    assert_eq!(unparsed.tokens_out, 17);

    let json = fs::read_to_string(fx.output.join("c_ilegivel.json")).unwrap();
    let parsed: FileResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.classificacao.tipo, Category::Unknown);
    assert_eq!(parsed.tokens_saida, 17);

    let ok = fx.store.get("d_ok.pdf").unwrap().unwrap();
    assert_eq!(ok.category, Category::NotaFiscal);
}

#[test]
fn loose_files_in_root_are_ignored() {
    let fx = fixture();
    write_pdf(&fx.root.join("solto.pdf"));

    let extractor = PdfTextExtractor::new(EmptySource, StemSource);
    let classifier = PageClassifier::new(KeywordModel);
    let runner = BatchRunner::new(&extractor, &classifier, &fx.store, &fx.output, "");
    let result = runner.run(&fx.root).unwrap();

    assert!(result.successes.is_empty());
    assert!(result.failures.is_empty());
    assert_eq!(fx.store.count().unwrap(), 0);
}

#[test]
fn batch_results_feed_reports_and_filters() {
    let fx = fixture();
    let sub = fx.root.join("lote");
    fs::create_dir(&sub).unwrap();
    for name in ["x_boleto.pdf", "y.pdf", "z.pdf"] {
        write_pdf(&sub.join(name));
    }

    let extractor = PdfTextExtractor::new(EmptySource, StemSource);
    let classifier = PageClassifier::new(KeywordModel);
    let runner = BatchRunner::new(&extractor, &classifier, &fx.store, &fx.output, "");
    let result = runner.run(&fx.root).unwrap();
    assert_eq!(result.successes.len(), 3);

    let stats = fx.store.aggregate().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.category_count(Category::Voucher), 2);
    assert_eq!(stats.tokens_in_total, 300);
    assert_eq!(stats.confidence_median, 0.95);

    let boletos = fx
        .store
        .query(&RecordFilter {
            category: Some(Category::Boleto),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(boletos.len(), 1);
    assert_eq!(boletos[0].file_name, "x_boleto.pdf");

    let csv_path = fx.output.join("classificacoes.csv");
    assert_eq!(report::export_csv(&fx.store, &csv_path).unwrap(), 3);
    let csv = fs::read_to_string(csv_path).unwrap();
    assert_eq!(csv.lines().count(), 4);

    let summary = report::batch_summary(&result.successes);
    assert!(summary.contains("  voucher: 2"));
}
