use async_trait::async_trait;
use serde_json::Value;

use super::{params_object, Column, DataSource, GeneratorError, ReportData, ReportGenerator};

/// Ad hoc report: the job carries both the query and the column layout.
///
/// Params:
/// - `query`: the SELECT to run.
/// - `columnNames`: `"ID,Name$id,name"` (headers, then row keys) or just
///   `"id,name"` when headers and keys are the same.
#[derive(Debug, Default, Clone)]
pub struct TransactionsReport;

impl TransactionsReport {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn parse_columns(column_names: &str) -> Result<Vec<Column>, GeneratorError> {
    let split = |part: &str| -> Vec<String> { part.split(',').map(|s| s.trim().to_string()).collect() };

    let (headers, keys) = match column_names.split_once('$') {
        Some((headers, keys)) => (split(headers), split(keys)),
        None => (split(column_names), split(column_names)),
    };

    if headers.iter().all(|h| h.is_empty()) {
        return Err(GeneratorError::BadParams("columnNames is empty".into()));
    }
    if headers.len() != keys.len() {
        return Err(GeneratorError::BadParams(format!(
            "columnNames has {} headers but {} keys",
            headers.len(),
            keys.len()
        )));
    }

    Ok(headers
        .into_iter()
        .zip(keys)
        .map(|(header, key)| Column { header, key })
        .collect())
}

#[async_trait]
impl ReportGenerator for TransactionsReport {
    async fn generate(
        &self,
        params: &Value,
        source: &dyn DataSource,
    ) -> Result<ReportData, GeneratorError> {
        let params = params_object(params)?;

        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| GeneratorError::BadParams("missing query".into()))?;
        let column_spec = params
            .get("columnNames")
            .and_then(Value::as_str)
            .ok_or_else(|| GeneratorError::BadParams("missing columnNames".into()))?;

        let columns = parse_columns(column_spec)?;
        let rows = source.fetch_rows(query).await?;

        Ok(ReportData { columns, rows })
    }
}
