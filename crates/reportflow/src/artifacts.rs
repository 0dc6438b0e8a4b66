//! Artifact publication: render report rows as delimited text, stage the
//! file locally, upload it, hand back the object key.

use chrono::Utc;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde_json::Value;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::jobs::JobId;
use crate::reports::{Column, Row};

pub const CONTENT_TYPE: &str = "text/csv";
const DELIMITER: char = ',';

/// How field values that contain the delimiter, quotes or newlines are
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvQuoting {
    /// Quote such fields and double embedded quotes.
    Rfc4180,
    /// Write every value verbatim, as older reports did.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// `reports/report-{job_id}-{unix_millis}.csv`; each run is a new object.
    Timestamped,
    /// `reports/report-{job_id}.csv`; reruns overwrite the same object.
    Deterministic,
}

#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub scratch_dir: PathBuf,
    pub quoting: CsvQuoting,
    pub key_strategy: KeyStrategy,
}

impl ArtifactConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            quoting: CsvQuoting::Rfc4180,
            key_strategy: KeyStrategy::Timestamped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub size_bytes: usize,
    pub row_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("staging artifact failed: {0}")]
    Staging(#[from] std::io::Error),
    #[error("artifact upload failed: {0}")]
    Upload(#[from] object_store::Error),
}

pub fn object_key(job_id: JobId, generated_at_millis: i64, strategy: KeyStrategy) -> String {
    match strategy {
        KeyStrategy::Timestamped => format!("reports/report-{job_id}-{generated_at_millis}.csv"),
        KeyStrategy::Deterministic => format!("reports/report-{job_id}.csv"),
    }
}

/// Header line, then one line per row with values in column order. A column
/// missing from a row renders as an empty field. Lines are joined with `\n`
/// and there is no trailing newline. Returns the text and the row count.
pub fn render_csv<I>(columns: &[Column], rows: I, quoting: CsvQuoting) -> (String, usize)
where
    I: IntoIterator<Item = Row>,
{
    let mut out = String::new();
    push_line(
        &mut out,
        columns.iter().map(|c| Cow::Borrowed(c.header.as_str())),
        quoting,
    );

    let mut count = 0;
    for row in rows {
        out.push('\n');
        push_line(
            &mut out,
            columns.iter().map(|c| field_text(row.get(&c.key))),
            quoting,
        );
        count += 1;
    }
    (out, count)
}

fn push_line<'a>(
    out: &mut String,
    fields: impl Iterator<Item = Cow<'a, str>>,
    quoting: CsvQuoting,
) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(&quote(&field, quoting));
    }
}

fn field_text(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
        Some(Value::Number(n)) => Cow::Owned(n.to_string()),
        Some(Value::Bool(b)) => Cow::Owned(b.to_string()),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

fn quote(field: &str, quoting: CsvQuoting) -> Cow<'_, str> {
    let needs_quotes = quoting == CsvQuoting::Rfc4180
        && field.contains(|c: char| c == DELIMITER || c == '"' || c == '\n' || c == '\r');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Writes report output to durable storage.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    cfg: ArtifactConfig,
    tag_content_type: bool,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, cfg: ArtifactConfig) -> Self {
        Self {
            store,
            cfg,
            tag_content_type: true,
        }
    }

    /// Whether uploads carry a `text/csv` content type. Backends without
    /// object attributes (local disk) reject tagged uploads.
    pub fn tag_content_type(mut self, enabled: bool) -> Self {
        self.tag_content_type = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Renders, stages, uploads. The staging file is removed after the
    /// upload; after a failure removal is attempted but not guaranteed.
    pub async fn publish<I>(
        &self,
        job_id: JobId,
        columns: &[Column],
        rows: I,
    ) -> Result<Artifact, PublishError>
    where
        I: IntoIterator<Item = Row>,
    {
        let generated_at = Utc::now().timestamp_millis();
        let key = object_key(job_id, generated_at, self.cfg.key_strategy);
        let (content, row_count) = render_csv(columns, rows, self.cfg.quoting);

        tokio::fs::create_dir_all(&self.cfg.scratch_dir).await?;
        let staging = self
            .cfg
            .scratch_dir
            .join(format!("report-{job_id}-{generated_at}.csv"));

        let result = self.stage_and_upload(&staging, &key, content).await;
        match &result {
            Ok(_) => {
                if let Err(e) = tokio::fs::remove_file(&staging).await {
                    tracing::warn!(path = %staging.display(), error = %e, "could not remove staged artifact");
                }
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&staging).await;
            }
        }

        let size_bytes = result?;
        Ok(Artifact {
            key,
            size_bytes,
            row_count,
        })
    }

    async fn stage_and_upload(
        &self,
        staging: &Path,
        key: &str,
        content: String,
    ) -> Result<usize, PublishError> {
        tokio::fs::write(staging, content).await?;
        let bytes = tokio::fs::read(staging).await?;
        let size = bytes.len();

        let mut attributes = Attributes::new();
        if self.tag_content_type {
            attributes.insert(Attribute::ContentType, CONTENT_TYPE.into());
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&ObjectPath::from(key), PutPayload::from(bytes), opts)
            .await?;

        tracing::debug!(key, size, "artifact uploaded");
        Ok(size)
    }
}
