use std::path::PathBuf;
use std::time::Duration;

use crate::artifacts::{ArtifactConfig, CsvQuoting, KeyStrategy};
use crate::consumer::backoff::BackoffConfig;
use crate::storage::StorageConfig;

// Config is the single place runtime settings are read. Every key has a
// REPORTFLOW_ name and most accept the older bare name as a fallback.
#[derive(Clone, Debug)]
pub struct Config {
    pub worker_type: String,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub artifacts: ArtifactConfig,
    pub backoff: BackoffConfig,
    pub handler_timeout: Option<Duration>,
    pub admin_addr: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub name: String,
    pub wait: Duration,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (the process env in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let worker_type = env
            .first(&["REPORTFLOW_WORKER_TYPE", "WORKER_TYPE"])
            .ok_or_else(|| anyhow::anyhow!("WORKER_TYPE is missing"))?;

        let database = DatabaseConfig::from_env_lookup(&env);
        let queue = QueueConfig::from_env_lookup(&env);

        let storage = match env
            .first(&["REPORTFLOW_STORAGE", "STORAGE_BACKEND"])
            .unwrap_or_else(|| "s3".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StorageConfig::S3 {
                bucket: env
                    .first(&["REPORTFLOW_S3_BUCKET", "S3_BUCKET"])
                    .ok_or_else(|| anyhow::anyhow!("S3_BUCKET is missing"))?,
            },
            "local" => StorageConfig::Local {
                root: env
                    .first(&["REPORTFLOW_STORAGE_ROOT"])
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./artifacts")),
            },
            "memory" => StorageConfig::Memory,
            other => anyhow::bail!("unknown storage backend: {other}"),
        };

        let quoting = match env.first(&["REPORTFLOW_CSV_QUOTING"]).as_deref() {
            None | Some("rfc4180") => CsvQuoting::Rfc4180,
            Some("none") => CsvQuoting::None,
            Some(other) => anyhow::bail!("unknown csv quoting mode: {other}"),
        };

        let key_strategy = match env.first(&["REPORTFLOW_ARTIFACT_KEYS"]).as_deref() {
            None | Some("timestamped") => KeyStrategy::Timestamped,
            Some("deterministic") => KeyStrategy::Deterministic,
            Some(other) => anyhow::bail!("unknown artifact key strategy: {other}"),
        };

        let artifacts = ArtifactConfig {
            scratch_dir: env
                .first(&["REPORTFLOW_SCRATCH_DIR"])
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            quoting,
            key_strategy,
        };

        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            base_ms: env
                .parsed(&["REPORTFLOW_BACKOFF_BASE_MS"])
                .unwrap_or(defaults.base_ms),
            max_ms: env
                .parsed(&["REPORTFLOW_BACKOFF_MAX_MS"])
                .unwrap_or(defaults.max_ms),
            jitter_pct: defaults.jitter_pct,
        };

        let handler_timeout = env
            .parsed::<u64>(&["REPORTFLOW_HANDLER_TIMEOUT_SECS"])
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let admin_addr = env
            .first(&["REPORTFLOW_ADMIN_ADDR", "ADMIN_ADDR"])
            .and_then(|s| normalize_optional_addr(&s));

        Ok(Self {
            worker_type,
            database,
            queue,
            storage,
            artifacts,
            backoff,
            handler_timeout,
            admin_addr,
        })
    }
}

impl DatabaseConfig {
    fn from_env_lookup<F>(env: &Env<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            url: env
                .first(&["REPORTFLOW_DATABASE_URL", "DATABASE_URL"])
                .unwrap_or_else(|| database_url_from_parts(env)),
            pool_size: env
                .parsed(&["REPORTFLOW_DB_POOL_SIZE", "DB_POOL_SIZE"])
                .unwrap_or(5)
                .clamp(1, 32),
            acquire_timeout: Duration::from_secs(
                env.parsed(&["REPORTFLOW_DB_ACQUIRE_TIMEOUT_SECS"])
                    .unwrap_or(10)
                    .clamp(1, 60),
            ),
        }
    }
}

impl QueueConfig {
    fn from_env_lookup<F>(env: &Env<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            name: env
                .first(&["REPORTFLOW_QUEUE", "QUEUE_NAME"])
                .unwrap_or_else(|| "reports".to_string()),
            wait: Duration::from_secs(env.parsed(&["REPORTFLOW_QUEUE_WAIT_SECONDS"]).unwrap_or(20)),
            visibility_timeout: Duration::from_secs(
                env.parsed(&["REPORTFLOW_VISIBILITY_TIMEOUT_SECONDS"])
                    .unwrap_or(300),
            ),
            poll_interval: Duration::from_millis(
                env.parsed(&["REPORTFLOW_QUEUE_POLL_INTERVAL_MS"])
                    .unwrap_or(250),
            ),
        }
    }
}

/// Database and queue settings only, for tools that enqueue or inspect jobs
/// without running a worker.
pub fn ctl_from_env() -> (DatabaseConfig, QueueConfig) {
    dotenvy::dotenv().ok();
    let env = Env {
        lookup: |key: &str| std::env::var(key).ok(),
    };
    (
        DatabaseConfig::from_env_lookup(&env),
        QueueConfig::from_env_lookup(&env),
    )
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| (self.lookup)(k).filter(|v| !v.trim().is_empty()))
            .map(|v| v.trim().to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, keys: &[&str]) -> Option<T> {
        self.first(keys).and_then(|s| s.parse().ok())
    }
}

fn database_url_from_parts<F>(env: &Env<F>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let host = env.first(&["DB_HOST"]).unwrap_or_else(|| "localhost".into());
    let port: u16 = env.parsed(&["DB_PORT"]).unwrap_or(5432);
    let user = env.first(&["DB_USER"]).unwrap_or_else(|| "postgres".into());
    let password = env.first(&["DB_PASS"]).unwrap_or_default();
    let name = env.first(&["DB_NAME"]).unwrap_or_else(|| "reports".into());

    if password.is_empty() {
        format!("postgres://{user}@{host}:{port}/{name}")
    } else {
        format!("postgres://{user}:{password}@{host}:{port}/{name}")
    }
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
