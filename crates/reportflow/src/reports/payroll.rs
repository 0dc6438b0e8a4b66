use async_trait::async_trait;
use serde_json::Value;

use super::{params_object, Column, DataSource, GeneratorError, ReportData, ReportGenerator};

/// Monthly salary: basic pay pro-rated over 21 working days.
pub const PAYROLL_QUERY: &str = "SELECT t766.c4822, t766.c4823, t766.c4824, t767.c4826, \
     ROUND((t766.c4824 / 21) * t767.c4826, 2) AS monthly_salary \
     FROM t766 JOIN t767 ON t766.c4823 = t767.c4827";

const PAYROLL_COLUMNS: [(&str, &str); 5] = [
    ("ID", "c4822"),
    ("Name", "c4823"),
    ("Basic", "c4824"),
    ("Worked Days", "c4826"),
    ("Monthly Salary", "monthly_salary"),
];

/// Fixed-layout payroll report. A `query` param may replace the default
/// query as long as it yields the same columns.
#[derive(Debug, Default, Clone)]
pub struct PayrollReport;

impl PayrollReport {
    pub fn new() -> Self {
        Self
    }

    pub fn columns() -> Vec<Column> {
        PAYROLL_COLUMNS
            .iter()
            .map(|(header, key)| Column::new(*header, *key))
            .collect()
    }
}

#[async_trait]
impl ReportGenerator for PayrollReport {
    async fn generate(
        &self,
        params: &Value,
        source: &dyn DataSource,
    ) -> Result<ReportData, GeneratorError> {
        let params = params_object(params)?;
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or(PAYROLL_QUERY);

        let rows = source.fetch_rows(query).await?;
        Ok(ReportData {
            columns: Self::columns(),
            rows,
        })
    }
}
