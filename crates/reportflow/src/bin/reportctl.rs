use reportflow::config;
use reportflow::db;
use reportflow::jobs::{JobStore, NewJob, PgJobStore};
use reportflow::queue::{MessageQueue, PgMessageQueue, ReportMessage};
use reportflow::reports::ReportType;
use serde_json::Value;
use sqlx::PgPool;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "reportctl <command>\n\
             Commands:\n\
             - init                          apply schema.sql\n\
             - enqueue <type> [params-json]  insert a queued job and send its message\n\
             - show <job_id>\n\
             - list\n\
             - reset                         truncate jobs and queue\n\
             \n\
             Uses REPORTFLOW_DATABASE_URL / DATABASE_URL or the DB_* parts.\n"
        );
        std::process::exit(2);
    }

    let (db_cfg, queue_cfg) = config::ctl_from_env();
    let pool = db::make_pool(&db_cfg).await?;
    let jobs = PgJobStore::new(pool.clone());

    match args[1].as_str() {
        "init" => {
            db::apply_schema(&pool).await?;
            println!("schema OK");
        }
        "enqueue" => {
            let Some(raw_type) = args.get(2) else {
                anyhow::bail!("usage: reportctl enqueue <type> [params-json]");
            };
            let report_type: ReportType = raw_type.parse().map_err(anyhow::Error::msg)?;
            let params: Value = match args.get(3) {
                Some(raw) => serde_json::from_str(raw)?,
                None => Value::Object(Default::default()),
            };

            let job_id = jobs
                .insert(NewJob {
                    job_type: report_type.as_str().to_string(),
                    params,
                })
                .await?;

            let queue = PgMessageQueue::new(pool.clone(), &queue_cfg.name, queue_cfg.poll_interval);
            let message_id = queue
                .send(&ReportMessage::new(job_id, report_type.as_str()).to_body())
                .await?;
            println!("+ enqueued {report_type} job id={job_id} message={message_id}");
        }
        "show" => {
            let job_id: i64 = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: reportctl show <job_id>"))?
                .parse()?;
            match jobs.get(job_id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => {
                    eprintln!("job {job_id} not found");
                    std::process::exit(1);
                }
            }
        }
        "list" => {
            for job in jobs.list_recent(20).await? {
                println!(
                    "{:>8}  {:<13} {:<10} {}  {}",
                    job.id,
                    job.job_type,
                    job.status.as_str(),
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.artifact_key.or(job.error).unwrap_or_default()
                );
            }
        }
        "reset" => reset(&pool).await?,
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE queue_messages, report_jobs RESTART IDENTITY")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}
