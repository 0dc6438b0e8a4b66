//! Report generators: turn a job's params into columns and rows.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod payroll;
pub mod source;
pub mod transactions;

pub use payroll::PayrollReport;
pub use source::{DataSource, PgDataSource, StaticDataSource};
pub use transactions::TransactionsReport;

/// One result row, keyed by column name. Rows may omit columns.
pub type Row = Map<String, Value>;

/// Every report type a worker can be started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Transactions,
    Payroll,
}

impl ReportType {
    pub const ALL: [ReportType; 2] = [ReportType::Transactions, ReportType::Payroll];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Transactions => "transactions",
            ReportType::Payroll => "payroll",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| s.to_string())
    }
}

/// A rendered column: the header text and the row key it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub header: String,
    pub key: String,
}

impl Column {
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportData {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("invalid report params: {0}")]
    BadParams(String),
    #[error("report query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for GeneratorError {
    fn from(e: sqlx::Error) -> Self {
        GeneratorError::Query(e.to_string())
    }
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(
        &self,
        params: &Value,
        source: &dyn DataSource,
    ) -> Result<ReportData, GeneratorError>;
}

/// Params are usually a JSON object, but older enqueuers stored them as a
/// JSON-encoded string.
pub(crate) fn params_object(params: &Value) -> Result<Map<String, Value>, GeneratorError> {
    match params {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GeneratorError::BadParams("params must be an object".into())),
            Err(e) => Err(GeneratorError::BadParams(format!("params are not JSON: {e}"))),
        },
        Value::Null => Ok(Map::new()),
        _ => Err(GeneratorError::BadParams("params must be an object".into())),
    }
}
