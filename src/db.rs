use crate::error::StoreError;
use crate::models::stats::confidence_summary;
use crate::models::{ClassificationStats, ConfidenceBand};
use crate::types::{Category, ClassificationRecord, NewRecord, RecordFilter};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RECORD_COLUMNS: &str = "id, nome_arquivo, caminho_arquivo, tipo_classificacao, indice_certeza, tokens_entrada, tokens_saida, data_processamento";

/// SQL CASE mapping `indice_certeza` to a `ConfidenceBand::key`, highest band first.
fn band_case_sql() -> String {
    let mut sql = String::from("CASE");
    for (i, band) in ConfidenceBand::ALL.iter().enumerate() {
        if i + 1 == ConfidenceBand::ALL.len() {
            sql.push_str(&format!(" ELSE '{}'", band.key()));
        } else {
            sql.push_str(&format!(
                " WHEN indice_certeza >= {:?} THEN '{}'",
                band.lower_bound(),
                band.key()
            ));
        }
    }
    sql.push_str(" END");
    sql
}

/// File-backed `classificacoes` table. A connection is opened per operation;
/// nothing is held between calls.
#[derive(Debug, Clone)]
pub struct ClassificationStore {
    db_path: PathBuf,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ClassificationRecord> {
    let category: String = row.get(3)?;
    Ok(ClassificationRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        category: Category::from_stored(&category),
        confidence: row.get(4)?,
        tokens_in: row.get::<_, i64>(5)?.max(0) as u64,
        tokens_out: row.get::<_, i64>(6)?.max(0) as u64,
        processed_at: row.get(7)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn to_sql_count(n: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(n).map_err(|_| StoreError::InvalidRecord(format!("{} out of range: {}", field, n)))
}

impl ClassificationStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Read-write connection; creates the file and its parent directory.
    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Connection::open(&self.db_path).map_err(|source| StoreError::Unavailable {
            path: self.db_path.clone(),
            source,
        })
    }

    /// Read-only connection; a missing database file is `Unavailable`.
    fn connect_read(&self) -> Result<Connection, StoreError> {
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Unavailable {
            path: self.db_path.clone(),
            source,
        })
    }

    /// Creates the table and its indexes if absent. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS classificacoes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nome_arquivo TEXT NOT NULL UNIQUE,
                caminho_arquivo TEXT NOT NULL,
                tipo_classificacao TEXT NOT NULL,
                indice_certeza REAL NOT NULL,
                tokens_entrada INTEGER NOT NULL,
                tokens_saida INTEGER NOT NULL,
                data_processamento TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_nome_arquivo ON classificacoes(nome_arquivo);
            CREATE INDEX IF NOT EXISTS idx_tipo_classificacao ON classificacoes(tipo_classificacao);
            CREATE INDEX IF NOT EXISTS idx_data_processamento ON classificacoes(data_processamento);
            ",
        )?;
        info!("database initialized: {}", self.db_path.display());
        Ok(())
    }

    /// Inserts a record; an existing `file_name` is a `UniqueConstraintViolation`.
    pub fn insert(&self, record: &NewRecord) -> Result<i64, StoreError> {
        if record.file_name.trim().is_empty() {
            return Err(StoreError::InvalidRecord("file_name is empty".to_string()));
        }
        if !record.confidence.is_finite() || !(0.0..=1.0).contains(&record.confidence) {
            return Err(StoreError::InvalidRecord(format!(
                "confidence {} outside [0, 1]",
                record.confidence
            )));
        }
        let tokens_in = to_sql_count(record.tokens_in, "tokens_in")?;
        let tokens_out = to_sql_count(record.tokens_out, "tokens_out")?;

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO classificacoes
             (nome_arquivo, caminho_arquivo, tipo_classificacao, indice_certeza, tokens_entrada, tokens_saida)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.file_name,
                record.file_path,
                record.category.as_str(),
                record.confidence,
                tokens_in,
                tokens_out,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::UniqueConstraintViolation(record.file_name.clone())
            } else {
                StoreError::Query(e)
            }
        })?;
        let id = conn.last_insert_rowid();
        debug!("inserted {} as id {}", record.file_name, id);
        Ok(id)
    }

    /// Matching records by descending confidence (ties by insertion order).
    pub fn query(&self, filter: &RecordFilter) -> Result<Vec<ClassificationRecord>, StoreError> {
        let conn = self.connect_read()?;
        let mut sql = format!("SELECT {} FROM classificacoes WHERE 1=1", RECORD_COLUMNS);
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(category) = filter.category {
            args.push(Box::new(category.as_str()));
            sql.push_str(&format!(" AND tipo_classificacao = ?{}", args.len()));
        }
        if let Some(min) = filter.confidence_min {
            args.push(Box::new(min));
            sql.push_str(&format!(" AND indice_certeza >= ?{}", args.len()));
        }
        if let Some(max) = filter.confidence_max {
            args.push(Box::new(max));
            sql.push_str(&format!(" AND indice_certeza <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY indice_certeza DESC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(param_refs), record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every record ordered by processing time ascending (ties by id).
    pub fn all_by_processing_time(&self) -> Result<Vec<ClassificationRecord>, StoreError> {
        let conn = self.connect_read()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM classificacoes ORDER BY data_processamento ASC, id ASC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get(&self, file_name: &str) -> Result<Option<ClassificationRecord>, StoreError> {
        let conn = self.connect_read()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM classificacoes WHERE nome_arquivo = ?1", RECORD_COLUMNS),
                params![file_name],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.connect_read()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM classificacoes", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Removes one record so the file can be re-processed. Returns whether it existed.
    pub fn delete(&self, file_name: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let n = conn.execute("DELETE FROM classificacoes WHERE nome_arquivo = ?1", params![file_name])?;
        Ok(n > 0)
    }

    pub fn clear(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let n = conn.execute("DELETE FROM classificacoes", [])?;
        info!("cleared {} classification(s)", n);
        Ok(n as u64)
    }

    pub fn aggregate(&self) -> Result<ClassificationStats, StoreError> {
        let conn = self.connect_read()?;
        let mut stats = ClassificationStats::empty();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM classificacoes", [], |r| r.get(0))?;
        stats.total = total.max(0) as u64;

        let mut stmt = conn.prepare(
            "SELECT tipo_classificacao, COUNT(*) FROM classificacoes GROUP BY tipo_classificacao",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (category, n) = row?;
            *stats
                .by_category
                .entry(Category::from_stored(&category))
                .or_insert(0) += n.max(0) as u64;
        }

        let (tokens_in, tokens_out): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT SUM(tokens_entrada), SUM(tokens_saida) FROM classificacoes",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        stats.tokens_in_total = tokens_in.unwrap_or(0).max(0) as u64;
        stats.tokens_out_total = tokens_out.unwrap_or(0).max(0) as u64;
        if stats.total > 0 {
            stats.tokens_in_mean = stats.tokens_in_total as f64 / stats.total as f64;
            stats.tokens_out_mean = stats.tokens_out_total as f64 / stats.total as f64;
        }

        let mut stmt = conn.prepare("SELECT indice_certeza FROM classificacoes ORDER BY indice_certeza")?;
        let confidences = stmt
            .query_map([], |r| r.get::<_, f64>(0))?
            .collect::<Result<Vec<f64>, _>>()?;
        let (mean, median, min, max) = confidence_summary(&confidences);
        stats.confidence_mean = mean;
        stats.confidence_median = median;
        stats.confidence_min = min;
        stats.confidence_max = max;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} AS faixa, COUNT(*) FROM classificacoes GROUP BY faixa",
            band_case_sql()
        ))?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (key, n) = row?;
            if let Some(band) = ConfidenceBand::from_key(&key) {
                stats.by_band.insert(band, n.max(0) as u64);
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ClassificationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ClassificationStore::new(dir.path().join("db").join("classificacoes.db"));
        store.initialize().unwrap();
        (dir, store)
    }

    fn record(name: &str, category: Category, confidence: f64) -> NewRecord {
        NewRecord {
            file_name: name.to_string(),
            file_path: format!("/in/01/page_{}", name),
            category,
            confidence,
            tokens_in: 1000,
            tokens_out: 20,
        }
    }

    #[test]
    fn initialize_is_idempotent_and_creates_indexes() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let conn = store.connect_read().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'classificacoes' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for idx in ["idx_data_processamento", "idx_nome_arquivo", "idx_tipo_classificacao"] {
            assert!(names.iter().any(|n| n == idx), "missing {}", idx);
        }
    }

    #[test]
    fn insert_then_query_round_trips_fields() {
        let (_dir, store) = store();
        let new = NewRecord {
            file_name: "a.pdf".to_string(),
            file_path: "/in/01/page_a.pdf".to_string(),
            category: Category::NotaFiscal,
            confidence: 0.8312345,
            tokens_in: 1523,
            tokens_out: 17,
        };
        store.insert(&new).unwrap();
        let rows = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.file_name, new.file_name);
        assert_eq!(r.file_path, new.file_path);
        assert_eq!(r.category, new.category);
        assert!((r.confidence - new.confidence).abs() < 1e-6);
        assert_eq!((r.tokens_in, r.tokens_out), (1523, 17));
        assert!(!r.processed_at.is_empty());
    }

    #[test]
    fn duplicate_file_name_is_rejected_and_count_unchanged() {
        let (_dir, store) = store();
        store.insert(&record("a.pdf", Category::Boleto, 0.9)).unwrap();
        let err = store.insert(&record("a.pdf", Category::Voucher, 0.5)).unwrap_err();
        assert!(matches!(err, StoreError::UniqueConstraintViolation(ref n) if n == "a.pdf"));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("a.pdf").unwrap().unwrap().category, Category::Boleto);
    }

    #[test]
    fn delete_allows_reinsertion() {
        let (_dir, store) = store();
        store.insert(&record("a.pdf", Category::Boleto, 0.9)).unwrap();
        assert!(store.delete("a.pdf").unwrap());
        assert!(!store.delete("a.pdf").unwrap());
        store.insert(&record("a.pdf", Category::Voucher, 0.6)).unwrap();
        assert_eq!(store.get("a.pdf").unwrap().unwrap().category, Category::Voucher);
    }

    #[test]
    fn invalid_records_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.insert(&record(" ", Category::Boleto, 0.5)),
            Err(StoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.insert(&record("x.pdf", Category::Boleto, 1.5)),
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn query_filters_and_orders_by_confidence_desc() {
        let (_dir, store) = store();
        store.insert(&record("a.pdf", Category::Boleto, 0.55)).unwrap();
        store.insert(&record("b.pdf", Category::Voucher, 0.95)).unwrap();
        store.insert(&record("c.pdf", Category::Boleto, 0.91)).unwrap();
        store.insert(&record("d.pdf", Category::Boleto, 0.20)).unwrap();

        let all = store.query(&RecordFilter::default()).unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "c.pdf", "a.pdf", "d.pdf"]);

        let boletos = store
            .query(&RecordFilter {
                category: Some(Category::Boleto),
                confidence_min: Some(0.5),
                confidence_max: Some(0.91),
            })
            .unwrap();
        let names: Vec<&str> = boletos.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["c.pdf", "a.pdf"]);

        let none = store
            .query(&RecordFilter {
                category: Some(Category::NotaFiscal),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn aggregate_matches_reference_scenario() {
        let (_dir, store) = store();
        store.insert(&record("a.pdf", Category::Voucher, 0.95)).unwrap();
        store.insert(&record("b.pdf", Category::Boleto, 0.72)).unwrap();
        store.insert(&record("c.pdf", Category::Voucher, 0.40)).unwrap();

        let s = store.aggregate().unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.category_count(Category::Voucher), 2);
        assert_eq!(s.category_count(Category::Boleto), 1);
        assert_eq!(s.band_count(ConfidenceBand::Alta), 1);
        assert_eq!(s.band_count(ConfidenceBand::MediaAlta), 1);
        assert_eq!(s.band_count(ConfidenceBand::Media), 0);
        assert_eq!(s.band_count(ConfidenceBand::Baixa), 1);
        assert_eq!(s.band_count(ConfidenceBand::MuitoBaixa), 0);
        assert!((s.confidence_mean - 0.69).abs() < 1e-6);
        assert!((s.confidence_median - 0.72).abs() < 1e-9);
        assert!((s.confidence_min - 0.40).abs() < 1e-9);
        assert!((s.confidence_max - 0.95).abs() < 1e-9);
        assert_eq!(s.tokens_in_total, 3000);
        assert_eq!(s.tokens_out_total, 60);
        assert!((s.tokens_in_mean - 1000.0).abs() < 1e-9);
        assert_eq!(s.by_band.values().sum::<u64>(), s.total);
    }

    #[test]
    fn aggregate_on_empty_store_is_zeroed() {
        let (_dir, store) = store();
        let s = store.aggregate().unwrap();
        assert_eq!(s, ClassificationStats::empty());
    }

    #[test]
    fn missing_database_is_unavailable_for_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClassificationStore::new(dir.path().join("absent.db"));
        assert!(matches!(store.aggregate(), Err(StoreError::Unavailable { .. })));
        assert!(matches!(
            store.query(&RecordFilter::default()),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn clear_empties_store() {
        let (_dir, store) = store();
        store.insert(&record("a.pdf", Category::Boleto, 0.9)).unwrap();
        store.insert(&record("b.pdf", Category::Boleto, 0.9)).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn unknown_category_is_persisted_as_marker() {
        let (_dir, store) = store();
        store.insert(&record("x.pdf", Category::Unknown, 0.0)).unwrap();
        let r = store.get("x.pdf").unwrap().unwrap();
        assert_eq!(r.category, Category::Unknown);
        let s = store.aggregate().unwrap();
        assert_eq!(s.category_count(Category::Unknown), 1);
        assert_eq!(s.band_count(ConfidenceBand::MuitoBaixa), 1);
    }

    #[test]
    fn band_edges_count_in_the_higher_band() {
        let (_dir, store) = store();
        for (i, c) in [1.0, 0.9, 0.8999, 0.7, 0.5, 0.3, 0.2999, 0.0].iter().enumerate() {
            store
                .insert(&record(&format!("{}.pdf", i), Category::Voucher, *c))
                .unwrap();
        }
        let s = store.aggregate().unwrap();
        assert_eq!(s.band_count(ConfidenceBand::Alta), 2);
        assert_eq!(s.band_count(ConfidenceBand::MediaAlta), 2);
        assert_eq!(s.band_count(ConfidenceBand::Media), 1);
        assert_eq!(s.band_count(ConfidenceBand::Baixa), 1);
        assert_eq!(s.band_count(ConfidenceBand::MuitoBaixa), 2);
        assert_eq!(s.by_band.values().sum::<u64>(), s.total);
    }

    #[test]
    fn band_case_lists_every_band_once() {
        let sql = band_case_sql();
        assert!(sql.starts_with("CASE WHEN indice_certeza >= 0.9 THEN 'alta'"));
        assert!(sql.ends_with("ELSE 'muito_baixa' END"));
        for band in ConfidenceBand::ALL {
            assert_eq!(sql.matches(&format!("'{}'", band.key())).count(), 1);
        }
    }
}
