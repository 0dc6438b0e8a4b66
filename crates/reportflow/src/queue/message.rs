use serde_json::Value;

use crate::jobs::JobId;

/// Body of a queue message: which job to run and which worker type it is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMessage {
    pub job_id: JobId,
    pub report_type: String,
}

impl ReportMessage {
    pub fn new(job_id: JobId, report_type: impl Into<String>) -> Self {
        Self {
            job_id,
            report_type: report_type.into(),
        }
    }

    pub fn to_body(&self) -> String {
        serde_json::json!({
            "job_id": self.job_id,
            "report_type": self.report_type,
        })
        .to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message body is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("malformed message: {reason}")]
    Malformed {
        /// Set when the body still named a usable job id.
        job_id: Option<JobId>,
        reason: String,
    },
}

impl DecodeError {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DecodeError::NotJson(_) => None,
            DecodeError::Malformed { job_id, .. } => *job_id,
        }
    }
}

/// Decodes a message body. `job_id` may be a JSON number or a numeric
/// string, since enqueuers differ.
pub fn decode(body: &str) -> Result<ReportMessage, DecodeError> {
    let value: Value = serde_json::from_str(body)?;

    let Value::Object(map) = value else {
        return Err(DecodeError::Malformed {
            job_id: None,
            reason: "body is not a JSON object".into(),
        });
    };

    let job_id = match map.get("job_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let Some(job_id) = job_id else {
        return Err(DecodeError::Malformed {
            job_id: None,
            reason: "missing or non-integer job_id".into(),
        });
    };

    match map.get("report_type") {
        Some(Value::String(t)) if !t.trim().is_empty() => {
            Ok(ReportMessage::new(job_id, t.trim()))
        }
        _ => Err(DecodeError::Malformed {
            job_id: Some(job_id),
            reason: "missing report_type".into(),
        }),
    }
}
