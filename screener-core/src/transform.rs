use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::ContractSection;
use crate::error::ConfigError;
use crate::publish::TIMESTAMP_FORMAT;
use crate::table::Table;

pub const DOWNLOAD_COLUMN: &str = "download_datetime";

pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("export file {path} has no rows")]
    Empty { path: PathBuf },
    #[error("schema mismatch in column `{column}`: {detail}")]
    SchemaMismatch { column: String, detail: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Date,
}

/// The declarative schema the raw export must conform to: column names with
/// their semantic types, plus the columns whose `NN%` strings are normalized
/// to fractions. Loaded once per run, read-only.
#[derive(Debug, Clone)]
pub struct ColumnContract {
    pub types: BTreeMap<String, ColumnType>,
    pub percent_columns: BTreeSet<String>,
}

impl ColumnContract {
    pub fn load(section: &ContractSection) -> crate::error::Result<Self> {
        let types = read_json(&section.column_types)?;
        let percent_columns = read_json(&section.percent_columns)?;
        Ok(Self {
            types,
            percent_columns,
        })
    }

    pub fn from_parts(
        types: impl IntoIterator<Item = (String, ColumnType)>,
        percent_columns: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            types: types.into_iter().collect(),
            percent_columns: percent_columns.into_iter().collect(),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> crate::error::Result<T> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Contract {
        source,
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub path: PathBuf,
    pub rows: usize,
}

/// Casts the raw export against the contract, normalizes percent columns,
/// stamps every row with the extraction instant, and writes the result next
/// to the raw file. The raw input is never overwritten, and no output file
/// exists unless the whole transform succeeded.
#[derive(Debug, Clone)]
pub struct SchemaTransformer {
    contract: ColumnContract,
}

impl SchemaTransformer {
    pub fn new(contract: ColumnContract) -> Self {
        Self { contract }
    }

    pub fn apply(
        &self,
        raw_path: &Path,
        stamp: DateTime<FixedOffset>,
    ) -> TransformResult<TransformOutcome> {
        let text = fs::read_to_string(raw_path)?;
        let mut table = Table::parse(&text).ok_or_else(|| TransformError::Empty {
            path: raw_path.to_path_buf(),
        })?;

        for (column, ty) in &self.contract.types {
            let idx = table
                .column_index(column)
                .ok_or_else(|| TransformError::SchemaMismatch {
                    column: column.clone(),
                    detail: "column missing from export".to_string(),
                })?;
            if self.contract.percent_columns.contains(column) {
                normalize_percent_column(&mut table, idx, column)?;
            } else {
                cast_column(&mut table, idx, column, *ty)?;
            }
        }

        table.push_column(
            DOWNLOAD_COLUMN,
            &stamp.format(TIMESTAMP_FORMAT).to_string(),
        );

        let file_name = raw_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export.csv".to_string());
        let out_path = raw_path.with_file_name(format!("modified_{file_name}"));
        fs::write(&out_path, table.to_csv())?;
        info!(
            file = %out_path.display(),
            rows = table.rows.len(),
            "transformed export written"
        );
        Ok(TransformOutcome {
            path: out_path,
            rows: table.rows.len(),
        })
    }
}

fn cast_column(
    table: &mut Table,
    idx: usize,
    column: &str,
    ty: ColumnType,
) -> TransformResult<()> {
    for (row_no, row) in table.rows.iter_mut().enumerate() {
        let Some(cell) = row.get_mut(idx) else {
            continue;
        };
        let trimmed = cell.trim();
        // Empty cells pass through for every type (null tolerance).
        if trimmed.is_empty() {
            continue;
        }
        match ty {
            ColumnType::String => {}
            ColumnType::Int => {
                let digits = trimmed.replace(',', "");
                let value: i64 = digits
                    .parse()
                    .map_err(|_| mismatch(column, row_no, trimmed, "int"))?;
                *cell = value.to_string();
            }
            ColumnType::Float => {
                let digits = trimmed.replace(',', "");
                let value: f64 = digits
                    .parse()
                    .map_err(|_| mismatch(column, row_no, trimmed, "float"))?;
                *cell = value.to_string();
            }
            ColumnType::Date => {
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map_err(|_| mismatch(column, row_no, trimmed, "date"))?;
            }
        }
    }
    Ok(())
}

fn normalize_percent_column(table: &mut Table, idx: usize, column: &str) -> TransformResult<()> {
    for (row_no, row) in table.rows.iter_mut().enumerate() {
        let Some(cell) = row.get_mut(idx) else {
            continue;
        };
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            continue;
        }
        let stripped = trimmed.strip_suffix('%').unwrap_or(trimmed);
        let digits = stripped.replace(',', "");
        let value: f64 = digits
            .parse()
            .map_err(|_| mismatch(column, row_no, trimmed, "percent"))?;
        // Fractions outside [0,1] pass through unchecked.
        *cell = (value / 100.0).to_string();
    }
    Ok(())
}

fn mismatch(column: &str, row_no: usize, cell: &str, kind: &str) -> TransformError {
    TransformError::SchemaMismatch {
        column: column.to_string(),
        detail: format!("row {}: cannot cast `{}` as {}", row_no + 1, cell, kind),
    }
}
