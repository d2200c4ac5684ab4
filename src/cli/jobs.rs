use crate::cli::args::{JobsCliArgs, JobsCommand};
use crate::config::Config;
use crate::db;
use crate::queue::JobQueue;
use anyhow::{anyhow, Context, Result};

pub async fn handle_jobs_command(args: JobsCliArgs) -> Result<()> {
    let config = Config::load()?;
    let db_path = config.database.resolve_path()?;
    let conn = db::init_db(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let queue = JobQueue::new(db::shared(conn)).with_retention(config.queue.retention());

    match args.command {
        JobsCommand::Stats => {
            let counts = queue.count_by_status().await?;
            if counts.is_empty() {
                println!("Queue is empty.");
            }
            for (status, count) in counts {
                println!("{:<10} {}", status, count);
            }
        }
        JobsCommand::Dead { limit } => {
            let jobs = queue.list_dead(limit).await?;
            if jobs.is_empty() {
                println!("No dead jobs.");
                return Ok(());
            }

            println!("Found {} dead job(s):\n", jobs.len());
            for job in jobs {
                println!("ID: {}", job.id);
                println!("Type: {}", job.job_type);
                println!("Key: {}", job.idempotency_key);
                println!("Attempts: {}/{}", job.attempts, job.max_attempts);
                println!("Error: {}", job.last_error.as_deref().unwrap_or("-"));
                println!("---");
            }
            println!("\nTo requeue a job, use: minutehook jobs retry <ID>");
        }
        JobsCommand::Retry { id } => {
            if !queue.retry_dead(id).await? {
                return Err(anyhow!("Job {} is not in the dead-letter state", id));
            }
            println!("Job {} requeued.", id);
        }
        JobsCommand::Prune => {
            let deleted = queue.prune_completed().await?;
            println!("Pruned {} completed job(s).", deleted);
        }
    }

    Ok(())
}
