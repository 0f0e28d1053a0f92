//! Classifies scanned PDF documents (voucher, boleto, nota fiscal, descarte)
//! from OCR and embedded text, stores the results in SQLite and reports on them.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod ocr;
pub mod report;
pub mod services;
pub mod types;

pub use commands::run;
