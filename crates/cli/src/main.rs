//! Jobpool CLI - enqueue and inspect jobs directly in the SQLite database

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use jobpool_core::application::{HealthInspector, JobService};
use jobpool_core::domain::job::DEFAULT_MAX_ATTEMPTS;
use jobpool_core::domain::{Job, JobFilter, JobStatus, NewJob};
use jobpool_core::port::id_provider::UuidProvider;
use jobpool_core::port::time_provider::SystemTimeProvider;
use jobpool_core::port::JobStore;
use jobpool_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use std::sync::Arc;
use tabled::{Table, Tabled};

const DEFAULT_DB_PATH: &str = "~/.jobpool/jobs.db";
const DEFAULT_HANDLED_TYPES: &str = "noop,echo,sleep,fail";

#[derive(Parser)]
#[command(name = "jobpool")]
#[command(about = "Jobpool CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path
    #[arg(long, env = "JOBPOOL_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db_path: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// Job type (must match a registered handler to run)
        #[arg(short = 't', long = "type")]
        job_type: String,

        /// Payload as JSON string
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Priority (higher = more urgent)
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        priority: i32,

        /// Attempts before the job fails permanently
        #[arg(short = 'm', long, env = "JOBPOOL_MAX_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: i32,
    },

    /// Show one job
    Get {
        /// Job ID
        job_id: String,
    },

    /// List jobs, oldest first
    List {
        /// Filter by status (pending, running, completed, failed)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Filter by job type
        #[arg(short = 't', long = "type")]
        job_type: Option<String>,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Show queue health
    Health {
        /// Job types the daemon has handlers for (comma separated)
        #[arg(long, value_delimiter = ',', default_value = DEFAULT_HANDLED_TYPES)]
        handled: Vec<String>,
    },
}

#[derive(Tabled)]
struct JobRowView {
    id: String,
    #[tabled(rename = "type")]
    job_type: String,
    status: String,
    priority: i32,
    attempts: String,
    error: String,
}

impl From<&Job> for JobRowView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            status: colored_status(job.status),
            priority: job.priority,
            attempts: format!("{}/{}", job.attempts, job.max_attempts),
            error: job.error.clone().unwrap_or_default(),
        }
    }
}

fn colored_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => status.as_str().yellow().to_string(),
        JobStatus::Running => status.as_str().cyan().to_string(),
        JobStatus::Completed => status.as_str().green().to_string(),
        JobStatus::Failed => status.as_str().red().to_string(),
    }
}

async fn open_store(db_path: &str) -> Result<Arc<SqliteJobStore>> {
    let db_path = shellexpand::tilde(db_path).into_owned();
    let pool = create_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path))?;
    run_migrations(&pool).await.context("Migration failed")?;
    Ok(Arc::new(SqliteJobStore::new(
        pool,
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = open_store(&cli.db_path).await?;

    match cli.command {
        Commands::Enqueue {
            job_type,
            data,
            priority,
            max_attempts,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("Invalid JSON payload")?;
            let service = JobService::new(store.clone(), max_attempts);
            let job = service
                .enqueue(NewJob::new(job_type, data).with_priority(priority))
                .await?;

            println!("{}", "✓ Job enqueued successfully".green().bold());
            println!();
            println!("{}", Table::new(vec![JobRowView::from(&job)]));
        }

        Commands::Get { job_id } => {
            let job = store
                .get_job(&job_id)
                .await?
                .with_context(|| format!("Job {} not found", job_id))?;

            println!("{}", Table::new(vec![JobRowView::from(&job)]));
            println!();
            println!("  {} {}", "Data:".bold(), job.data.as_value());
            if let Some(result) = &job.result {
                println!("  {} {}", "Result:".bold(), result);
            }
            println!("  {} {}", "Created:".bold(), job.created_at);
            if let Some(started_at) = job.started_at {
                println!("  {} {}", "Started:".bold(), started_at);
            }
            if let Some(completed_at) = job.completed_at {
                println!("  {} {}", "Completed:".bold(), completed_at);
            }
        }

        Commands::List {
            status,
            job_type,
            limit,
        } => {
            let mut filter = JobFilter::all().with_limit(limit);
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(job_type) = job_type {
                filter = filter.with_job_type(job_type);
            }

            let jobs = store.list_jobs(&filter).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs found".yellow());
            } else {
                let rows: Vec<JobRowView> = jobs.iter().map(JobRowView::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Health { handled } => {
            let inspector = HealthInspector::new(store.clone(), Arc::new(SystemTimeProvider));
            let health = inspector.inspect(&handled).await?;

            println!("{}", "Queue Health".cyan().bold());
            println!();
            for count in &health.counts {
                println!("  {:<10} {}", colored_status(count.status), count.count);
            }
            println!();

            if health.is_healthy() {
                println!("  {} {}", "Status:".bold(), "HEALTHY".green());
                return Ok(());
            }
            println!("  {} {}", "Status:".bold(), "ATTENTION".red());
            for unhandled in &health.unhandled {
                println!(
                    "  {} {} pending job(s) of type '{}' have no handler",
                    "✗".red(),
                    unhandled.pending,
                    unhandled.job_type
                );
            }
            for job in &health.long_running {
                println!(
                    "  {} job {} ({}) running for {} ms",
                    "⚠".yellow(),
                    job.id,
                    job.job_type,
                    job.running_for_ms
                );
            }
        }
    }

    Ok(())
}
