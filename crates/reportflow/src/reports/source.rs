use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;

use super::{GeneratorError, Row};

/// Read access to the relational data a report is built from.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Row>, GeneratorError>;
}

/// Runs report queries against Postgres inside a read-only transaction and
/// hands every row back as a JSON object keyed by column name.
#[derive(Clone)]
pub struct PgDataSource {
    pool: PgPool,
}

impl PgDataSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Wraps a report query so each row comes back as one JSON object. The
/// inner query sits on its own lines so a trailing `--` comment cannot
/// swallow the closing parenthesis. `None` for an empty query.
fn wrap_query(query: &str) -> Option<String> {
    let inner = query.trim().trim_end_matches(';').trim();
    if inner.is_empty() {
        return None;
    }
    Some(format!(
        "SELECT to_jsonb(report_row) FROM (\n{inner}\n) AS report_row"
    ))
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Row>, GeneratorError> {
        let wrapped =
            wrap_query(query).ok_or_else(|| GeneratorError::BadParams("empty report query".into()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;

        let values: Vec<Value> = sqlx::query_scalar(&wrapped).fetch_all(&mut *tx).await?;
        tx.commit().await?;

        values
            .into_iter()
            .map(|v| match v {
                Value::Object(row) => Ok(row),
                other => Err(GeneratorError::Query(format!(
                    "query produced a non-row value: {other}"
                ))),
            })
            .collect()
    }
}

/// Canned results keyed by exact query text. Unknown queries fail like a
/// missing table would.
#[derive(Default, Clone)]
pub struct StaticDataSource {
    results: HashMap<String, Result<Vec<Row>, String>>,
}

impl StaticDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, query: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect();
        self.results.insert(query.into(), Ok(rows));
        self
    }

    pub fn with_error(mut self, query: impl Into<String>, error: impl Into<String>) -> Self {
        self.results.insert(query.into(), Err(error.into()));
        self
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Row>, GeneratorError> {
        match self.results.get(query) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(e)) => Err(GeneratorError::Query(e.clone())),
            None => Err(GeneratorError::Query(format!("no such relation for query: {query}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_line_comment_stays_inside_the_subquery() {
        let wrapped = wrap_query("SELECT id FROM tx -- newest first").unwrap();
        assert_eq!(
            wrapped,
            "SELECT to_jsonb(report_row) FROM (\nSELECT id FROM tx -- newest first\n) AS report_row"
        );
        assert!(wrapped.lines().last().unwrap().starts_with(')'));
    }

    #[test]
    fn trailing_semicolons_are_dropped() {
        assert_eq!(
            wrap_query("  SELECT 1 ;; ").unwrap(),
            "SELECT to_jsonb(report_row) FROM (\nSELECT 1\n) AS report_row"
        );
    }

    #[test]
    fn blank_query_is_rejected() {
        assert_eq!(wrap_query(" ; "), None);
    }
}
