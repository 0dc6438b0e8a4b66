use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::time::timeout;

use crate::artifacts::{Artifact, ArtifactPublisher, PublishError};
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::{JobId, JobStore, JobStoreError};
use crate::reports::{
    DataSource, GeneratorError, PayrollReport, ReportGenerator, ReportType, TransactionsReport,
};

/// Why a handler gave up on a job. Stored on the job as `"<CODE>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Text written to `report_jobs.error`; never empty.
    pub fn to_stored(&self) -> String {
        if self.message.trim().is_empty() {
            self.code.as_str().to_string()
        } else {
            format!("{}: {}", self.code, self.message)
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<JobStoreError> for JobError {
    fn from(e: JobStoreError) -> Self {
        let code = match e {
            JobStoreError::NotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::StoreError,
        };
        JobError::new(code, e.to_string())
    }
}

impl From<GeneratorError> for JobError {
    fn from(e: GeneratorError) -> Self {
        let code = match e {
            GeneratorError::BadParams(_) => ErrorCode::BadPayload,
            GeneratorError::Query(_) => ErrorCode::QueryFailed,
        };
        JobError::new(code, e.to_string())
    }
}

impl From<PublishError> for JobError {
    fn from(e: PublishError) -> Self {
        JobError::new(ErrorCode::PublishFailed, e.to_string())
    }
}

/// Everything a handler may touch, built once at startup.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub source: Arc<dyn DataSource>,
    pub publisher: ArtifactPublisher,
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

/// The pipeline for one report type: load params, generate rows, publish.
#[derive(Clone)]
pub struct Handler {
    report_type: ReportType,
    generator: Arc<dyn ReportGenerator>,
    timeout: Option<Duration>,
}

impl Handler {
    pub fn report_type(&self) -> ReportType {
        self.report_type
    }

    pub async fn run(&self, job_id: JobId, ctx: &JobContext) -> Result<Artifact, JobError> {
        let fut = self.produce(job_id, ctx);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(JobError::new(
                    ErrorCode::Timeout,
                    format!("handler timeout after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }

    async fn produce(&self, job_id: JobId, ctx: &JobContext) -> Result<Artifact, JobError> {
        let params = ctx.store.load_params(job_id).await?;
        let data = self
            .generator
            .generate(&params, ctx.source.as_ref())
            .await?;
        let artifact = ctx
            .publisher
            .publish(job_id, &data.columns, data.rows)
            .await?;
        Ok(artifact)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown worker type: {0:?}")]
    UnknownReportType(String),
    #[error("no handler registered for report type {0}")]
    NoHandler(ReportType),
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ReportType, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G>(&mut self, report_type: ReportType, generator: G)
    where
        G: ReportGenerator + 'static,
    {
        self.register_with_options(report_type, generator, HandlerOptions::new());
    }

    pub fn register_with_options<G>(
        &mut self,
        report_type: ReportType,
        generator: G,
        opts: HandlerOptions,
    ) where
        G: ReportGenerator + 'static,
    {
        self.handlers.insert(
            report_type,
            Handler {
                report_type,
                generator: Arc::new(generator),
                timeout: opts.timeout,
            },
        );
    }

    pub fn handler_for(&self, report_type: ReportType) -> Option<Handler> {
        self.handlers.get(&report_type).cloned()
    }

    /// Maps the configured worker type to its handler. Called once before
    /// the poll loop; an error here is a configuration error.
    pub fn resolve(&self, worker_type: &str) -> Result<Handler, RegistryError> {
        let report_type = worker_type
            .parse::<ReportType>()
            .map_err(RegistryError::UnknownReportType)?;
        self.handler_for(report_type)
            .ok_or(RegistryError::NoHandler(report_type))
    }
}

pub fn build_registry(opts: HandlerOptions) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_with_options(
        ReportType::Transactions,
        TransactionsReport::new(),
        opts.clone(),
    );
    registry.register_with_options(ReportType::Payroll, PayrollReport::new(), opts);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactConfig;
    use crate::jobs::{MemoryJobStore, NewJob};
    use crate::reports::{ReportData, StaticDataSource};
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use serde_json::{json, Value};

    struct SlowReport;

    #[async_trait]
    impl ReportGenerator for SlowReport {
        async fn generate(
            &self,
            _params: &Value,
            _source: &dyn DataSource,
        ) -> Result<ReportData, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ReportData {
                columns: vec![],
                rows: vec![],
            })
        }
    }

    fn context(
        store: Arc<MemoryJobStore>,
        source: StaticDataSource,
        scratch: &std::path::Path,
    ) -> JobContext {
        JobContext {
            store,
            source: Arc::new(source),
            publisher: ArtifactPublisher::new(
                Arc::new(InMemory::new()),
                ArtifactConfig::new(scratch),
            ),
        }
    }

    #[test]
    fn resolve_fails_fast_on_unknown_types() {
        let registry = build_registry(HandlerOptions::new());

        assert_eq!(
            registry.resolve("payroll").unwrap().report_type(),
            ReportType::Payroll
        );
        assert!(matches!(
            registry.resolve("cleanup"),
            Err(RegistryError::UnknownReportType(t)) if t == "cleanup"
        ));
    }

    #[test]
    fn known_type_without_handler_is_a_config_error() {
        let mut registry = HandlerRegistry::new();
        registry.register(ReportType::Payroll, PayrollReport::new());

        assert!(matches!(
            registry.resolve("transactions"),
            Err(RegistryError::NoHandler(ReportType::Transactions))
        ));
    }

    #[tokio::test]
    async fn handler_generates_and_publishes() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        store.insert_with_id(
            42,
            NewJob {
                job_type: "transactions".into(),
                params: json!({"query": "SELECT * FROM tx", "columnNames": "ID,Name$id,name"}),
            },
        );
        let source = StaticDataSource::new().with_rows(
            "SELECT * FROM tx",
            vec![json!({"id": 1, "name": "A"}), json!({"id": 2, "name": "B"})],
        );
        let ctx = context(store, source, scratch.path());

        let handler = build_registry(HandlerOptions::new())
            .resolve("transactions")
            .unwrap();
        let artifact = handler.run(42, &ctx).await.unwrap();

        assert!(artifact.key.starts_with("reports/report-42-"));
        assert_eq!(artifact.row_count, 2);
    }

    #[tokio::test]
    async fn errors_carry_their_code() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        store.insert_with_id(
            7,
            NewJob {
                job_type: "transactions".into(),
                params: json!({"query": "SELECT broken", "columnNames": "a"}),
            },
        );
        let source = StaticDataSource::new()
            .with_error("SELECT broken", "syntax error at or near \"broken\"");
        let ctx = context(store, source, scratch.path());
        let handler = build_registry(HandlerOptions::new())
            .resolve("transactions")
            .unwrap();

        let err = handler.run(7, &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryFailed);
        assert!(err.to_stored().starts_with("QUERY_FAILED: "));
        assert!(err.to_stored().contains("syntax error"));

        let missing = handler.run(99, &ctx).await.unwrap_err();
        assert_eq!(missing.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn timeout_option_bounds_the_run() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        store.insert_with_id(
            1,
            NewJob {
                job_type: "payroll".into(),
                params: json!({}),
            },
        );
        let ctx = context(store, StaticDataSource::new(), scratch.path());

        let mut registry = HandlerRegistry::new();
        registry.register_with_options(
            ReportType::Payroll,
            SlowReport,
            HandlerOptions::new().timeout(Duration::from_millis(20)),
        );

        let err = registry
            .resolve("payroll")
            .unwrap()
            .run(1, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[test]
    fn stored_error_is_never_empty() {
        assert_eq!(
            JobError::new(ErrorCode::Unknown, "  ").to_stored(),
            "UNKNOWN"
        );
    }
}
