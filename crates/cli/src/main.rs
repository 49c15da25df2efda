//! jobworker CLI - runs job graphs pulled from an intake queue.

mod definition;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jobworker_core::{validate_graph, JobId, JobStatus, ServiceId, SystemParams};
use jobworker_execution::{JobRunner, MemoryQueue, QueueHandle, WorkerConfig, WorkerPool};
use jobworker_storage::{JsonStorage, MemoryStorage, Storage};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use crate::definition::JobDefinition;

#[derive(Parser)]
#[command(name = "jobworker")]
#[command(about = "Distributed job-execution worker", long_about = None)]
struct Cli {
    /// Storage backend: memory, json:<dir> or sqlite:<path>
    #[arg(long, global = true, default_value = "json:.jobworker")]
    store: String,

    /// JSON file with system params (flat string map)
    #[arg(long, global = true)]
    system_params: Option<PathBuf>,

    /// Extra system param, repeatable
    #[arg(long = "param", global = true, value_parser = parse_key_val)]
    params: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker and process job ids
    Run {
        /// Worker instance name
        #[arg(long, default_value = "Job")]
        name: String,
        /// Number of jobs run concurrently
        #[arg(long, default_value = "3")]
        jobs: usize,
        /// Number of task workers per job
        #[arg(long, default_value = "3")]
        tasks: usize,
        /// Heartbeat interval in seconds
        #[arg(long, default_value = "10")]
        heartbeat: u64,
        /// Job id to run, repeatable
        #[arg(long = "job")]
        job_ids: Vec<String>,
        /// Job definition file to store and run, repeatable
        #[arg(long)]
        load: Vec<PathBuf>,
        /// Read job ids from stdin, one per line, until EOF or Ctrl-C
        #[arg(long)]
        stdin: bool,
    },
    /// Store a job definition and print its id
    Submit {
        /// Definition file
        file: PathBuf,
    },
    /// Show a job and its tasks
    Show {
        /// Job ID
        id: String,
    },
    /// List stored jobs
    Jobs,
    /// Check a definition file for graph defects
    Validate {
        /// Definition file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let def = JobDefinition::load(&file).await?;
            let issues = validate_graph(&def.tasks);
            if issues.is_empty() {
                println!("{}: {} tasks, no issues", def.job.id, def.tasks.len());
                return Ok(());
            }
            for issue in &issues {
                println!("  {}", issue);
            }
            bail!("{} graph issues found in {}", issues.len(), file.display());
        }
        Commands::Submit { file } => {
            let storage = open_store(&cli.store).await?;
            let id = submit(storage.as_ref(), &file).await?;
            println!("{}", id);
        }
        Commands::Show { id } => {
            let storage = open_store(&cli.store).await?;
            let job_id = JobId::from(id);
            let Some(job) = storage.load_job(&job_id).await? else {
                println!("Job not found");
                return Ok(());
            };
            let tasks = storage.load_tasks(&job_id).await?;

            println!("Job: {}", job.id);
            println!("  Status: {}", format_job_status(job.status));
            if let Some(service) = &job.service_id {
                println!("  Service: {}", service);
            }
            if let Some(start) = job.start_at {
                println!("  Started: {}", start);
            }
            if let Some(finish) = job.finish_at {
                println!("  Finished: {}", finish);
            }
            println!("Tasks ({})", tasks.len());
            for task in tasks {
                println!(
                    "  {} | {} | parent={} seq={} | {} | {}",
                    task.id,
                    task.code,
                    if task.parent_id.is_empty() { "-" } else { task.parent_id.as_str() },
                    task.sequence,
                    task.action.as_str(),
                    task.status,
                );
            }
        }
        Commands::Jobs => {
            let storage = open_store(&cli.store).await?;
            let jobs = storage.list_jobs().await?;
            println!("Jobs ({})", jobs.len());
            for job in jobs {
                println!("  {} | {}", job.id, format_job_status(job.status));
            }
        }
        Commands::Run { name, jobs, tasks, heartbeat, job_ids, load, stdin } => {
            let storage = open_store(&cli.store).await?;
            let system = load_system_params(cli.system_params.as_deref(), cli.params).await?;
            let config = WorkerConfig::new()
                .with_instance_name(name)
                .with_job_workers(jobs)
                .with_task_workers(tasks)
                .with_heartbeat_interval(Duration::from_secs(heartbeat.max(1)));

            let service = storage.register_service(&config.instance_name).await?;
            info!("Service {} registered as {}", config.instance_name, service.id);
            let beat = spawn_heartbeat(storage.clone(), service.id.clone(), config.heartbeat_interval);

            let (queue, handle) = MemoryQueue::channel();
            for file in &load {
                handle.push(submit(storage.as_ref(), file).await?);
            }
            for id in job_ids {
                handle.push(id);
            }

            let runner = JobRunner::new(storage.clone(), system)
                .with_config(config)
                .with_service_id(service.id.clone());
            let pool = WorkerPool::start(runner, Arc::new(queue));

            if stdin {
                tokio::select! {
                    result = feed_stdin(&handle) => result?,
                    _ = tokio::signal::ctrl_c() => info!("Interrupted, draining"),
                }
            }
            handle.close();

            let active = pool.active_counter();
            if active.get() > 0 {
                info!("Waiting for {} active jobs", active.get());
            }
            let total = pool.join().await;

            beat.abort();
            storage.service_down(&service.id).await?;
            info!("Processed {} jobs", total);
        }
    }

    Ok(())
}

async fn open_store(spec: &str) -> Result<Arc<dyn Storage>> {
    let (kind, location) = spec.split_once(':').unwrap_or((spec, ""));
    match kind {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "json" => {
            let dir = if location.is_empty() { ".jobworker" } else { location };
            Ok(Arc::new(JsonStorage::new(dir).await?))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let storage = jobworker_storage::SqliteStorage::new(location)
                .await
                .with_context(|| format!("opening {}", location))?;
            Ok(Arc::new(storage))
        }
        other => bail!("unknown store kind: {}", other),
    }
}

async fn load_system_params(
    file: Option<&std::path::Path>,
    overrides: Vec<(String, String)>,
) -> Result<SystemParams> {
    let base = match file {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            SystemParams::from_json(&json).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SystemParams::new(),
    };
    Ok(base.with_overrides(overrides))
}

async fn submit(storage: &dyn Storage, file: &std::path::Path) -> Result<JobId> {
    let def = JobDefinition::load(file).await?;
    for issue in validate_graph(&def.tasks) {
        warn!("{}: {}", file.display(), issue);
    }
    let mut job = def.job;
    job.status = JobStatus::Queued;
    storage.insert_job(&job, &def.tasks).await?;
    info!("Stored job {} with {} tasks", job.id, def.tasks.len());
    Ok(job.id)
}

fn spawn_heartbeat(
    storage: Arc<dyn Storage>,
    id: ServiceId,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = storage.heartbeat(&id, chrono::Utc::now()).await {
                warn!("Heartbeat for {} failed: {}", id, e);
            }
        }
    })
}

async fn feed_stdin(handle: &QueueHandle) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let id = line.trim();
        if id.is_empty() {
            continue;
        }
        if !handle.push(id) {
            break;
        }
    }
    Ok(())
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{}`", s))
}

fn format_job_status(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Creating => "CREATING",
        JobStatus::Created => "CREATED",
        JobStatus::Queued => "QUEUED",
        JobStatus::Processing => "PROCESSING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Fail => "FAIL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("api_host=http://x=y").unwrap(), ("api_host".into(), "http://x=y".into()));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=v").is_err());
    }

    #[tokio::test]
    async fn test_open_store_kinds() {
        assert!(open_store("memory").await.is_ok());
        let dir = tempfile::tempdir().unwrap();
        let spec = format!("json:{}", dir.path().display());
        assert!(open_store(&spec).await.is_ok());
        assert!(open_store("redis:localhost").await.is_err());
    }

    #[tokio::test]
    async fn test_system_params_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");
        tokio::fs::write(&path, r#"{"api_host":"http://a","default_language":"en"}"#)
            .await
            .unwrap();
        let params = load_system_params(Some(&path), vec![("api_host".into(), "http://b".into())])
            .await
            .unwrap();
        assert_eq!(params.get("api_host"), Some("http://b"));
        assert_eq!(params.get("default_language"), Some("en"));
    }
}
