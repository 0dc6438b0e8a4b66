/// Closed set of failure codes a handler can report. The code is stored as
/// the prefix of `report_jobs.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadPayload,
    NotFound,
    QueryFailed,
    PublishFailed,
    Timeout,
    StoreError,
    Unknown,
}

impl std::str::FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BAD_PAYLOAD" => Ok(Self::BadPayload),
            "NOT_FOUND" => Ok(Self::NotFound),
            "QUERY_FAILED" => Ok(Self::QueryFailed),
            "PUBLISH_FAILED" => Ok(Self::PublishFailed),
            "TIMEOUT" => Ok(Self::Timeout),
            "STORE_ERROR" => Ok(Self::StoreError),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadPayload => "BAD_PAYLOAD",
            Self::NotFound => "NOT_FOUND",
            Self::QueryFailed => "QUERY_FAILED",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::StoreError => "STORE_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator hint for a failed job, keyed by the stored error text.
pub fn suggested_action(error: &str) -> &'static str {
    let code = error.split(':').next().unwrap_or_default();
    match code.parse::<ErrorCode>().unwrap_or(ErrorCode::Unknown) {
        ErrorCode::BadPayload => "Non-retryable. Fix the message producer or the job params.",
        ErrorCode::NotFound => "The job row is missing. Check the enqueuer wrote it before sending.",
        ErrorCode::QueryFailed => "Check the report query and data source health; redelivery retries it.",
        ErrorCode::PublishFailed => "Check object storage credentials, bucket and scratch disk.",
        ErrorCode::Timeout => "Report took longer than the handler deadline. Narrow the query.",
        ErrorCode::StoreError => "Job table unavailable. Redelivery retries once it recovers.",
        ErrorCode::Unknown => "Inspect the error text and worker logs.",
    }
}
