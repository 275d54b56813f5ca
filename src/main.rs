mod browser;
mod config;
mod db;
mod decode;
mod error;
mod font;
mod models;
mod orchestrator;
mod pool;
mod sites;
mod tasks;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use browser::ChromeLauncher;
use config::Config;
use db::{Database, JobStore, TaskStore};
use font::FontResolver;
use models::{now_local, CrawlTask, TaskStatus};
use orchestrator::{CrawlOrchestrator, CrawlOutcome};
use pool::CrawlPool;
use sites::{CrawlContext, CrawlerRegistry};
use tasks::TaskService;

#[derive(Parser)]
#[command(name = "jobcrawl")]
#[command(about = "Crawl job listing sites, decode their obfuscated text, and keep the results")]
struct Cli {
    /// Config file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Crawl one source now and save what it finds
    Crawl {
        /// Source name or domain (see `jobcrawl sources`)
        source: String,

        /// Search keyword
        keyword: String,

        /// City to search in
        #[arg(short, long)]
        city: Option<String>,
    },

    /// Manage scheduled crawl tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Run every task that is due
    Schedule {
        /// Keep running, checking for due tasks every N seconds
        #[arg(short, long)]
        watch: Option<u64>,
    },

    /// Browse stored postings
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show crawl statistics
    Stats,

    /// List the sources that can be crawled
    Sources,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a task and run it once right away
    Add {
        /// Source name or domain
        source: String,

        /// Search keyword
        query: String,

        /// How often to repeat ("Hourly", "Daily", "Weekly", "Every 6 Hours", ...)
        #[arg(short, long, default_value = "Daily")]
        frequency: String,

        /// City to search in
        #[arg(short, long)]
        city: Option<String>,
    },

    /// List tasks
    List,

    /// Delete a task
    Remove {
        /// Task ID (or a unique prefix)
        id: String,
    },

    /// Stop a task from being scheduled
    Pause {
        /// Task ID (or a unique prefix)
        id: String,
    },

    /// Let a paused task be scheduled again
    Resume {
        /// Task ID (or a unique prefix)
        id: String,
    },

    /// Run a task now, ignoring its schedule
    Run {
        /// Task ID (or a unique prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Search postings
    Search {
        /// Match against title, company and description
        #[arg(short, long)]
        keywords: Option<String>,

        /// Match against location
        #[arg(short, long)]
        city: Option<String>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Postings per page
        #[arg(long, default_value = "20")]
        page_size: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show posting details
    Show {
        /// Posting ID
        id: i64,
    },

    /// Delete a posting
    Remove {
        /// Posting ID
        id: i64,
    },
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobcrawl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_registry(config: &Config) -> Result<CrawlerRegistry> {
    let launcher = Arc::new(ChromeLauncher::new(config.clone()));
    let glyphs = Arc::new(FontResolver::new(config)?);
    let ctx = Arc::new(CrawlContext::new(launcher, glyphs, config.clone()));
    Ok(CrawlerRegistry::with_default_sites(ctx))
}

fn build_orchestrator(config: &Config, db: &Arc<Database>) -> Result<CrawlOrchestrator> {
    let registry = Arc::new(build_registry(config)?);
    Ok(CrawlOrchestrator::new(registry, db.clone(), db.clone()))
}

fn build_task_service(config: &Config, db: &Arc<Database>) -> Result<TaskService> {
    let orchestrator = Arc::new(build_orchestrator(config, db)?);
    let pool = Arc::new(CrawlPool::new(orchestrator, config.workers)?);
    Ok(TaskService::new(db.clone(), pool, config.default_city.clone()))
}

/// Resolves a full task id or a prefix that matches exactly one task.
fn match_task_id(tasks: &[CrawlTask], needle: &str) -> Result<String> {
    if let Some(task) = tasks.iter().find(|t| t.id == needle) {
        return Ok(task.id.clone());
    }
    let matches: Vec<&CrawlTask> = tasks.iter().filter(|t| t.id.starts_with(needle)).collect();
    match matches.as_slice() {
        [task] => Ok(task.id.clone()),
        [] => Err(anyhow!("Task '{}' not found", needle)),
        _ => Err(anyhow!("Task prefix '{}' is ambiguous ({} matches)", needle, matches.len())),
    }
}

fn print_task_summary(task: &CrawlTask) {
    println!("Task {}", task.id);
    println!("  {} on {} ({})", task.query, task.source, task.frequency);
    println!("  Status:   {}", task.status);
    if let Some(last_run) = &task.last_run {
        println!("  Last run: {} ({} saved)", last_run, task.last_result_count);
    }
    println!("  Next run: {}", task.next_run);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load(cli.config.as_deref())?;
    let db_path = cli.db.clone().or_else(|| config.database.clone());
    let db = Arc::new(Database::open(db_path.as_deref())?);

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Crawl { source, keyword, city } => {
            db.ensure_initialized()?;
            let orchestrator = build_orchestrator(&config, &db)?;
            let city = city.unwrap_or_else(|| config.default_city.clone());

            println!("Crawling {} for '{}' in {}...", source, keyword, city);
            match orchestrator.run_crawl(None, &source, &keyword, &city) {
                CrawlOutcome::Completed { saved } => println!("Saved {} posting(s).", saved),
                CrawlOutcome::Failed { reason } => println!("Crawl failed: {}", reason),
                CrawlOutcome::Skipped => println!(
                    "Unknown source '{}'. Known sources: {}",
                    source,
                    orchestrator.registry().names().join(", ")
                ),
            }
        }

        Commands::Task { command } => {
            db.ensure_initialized()?;
            let service = build_task_service(&config, &db)?;
            match command {
                TaskCommands::Add { source, query, frequency, city } => {
                    let task = service.create_task(&query, &source, &frequency, city.as_deref())?;
                    println!("Created task {}", task.id);
                    println!("Running first crawl...");
                    service.pool().wait_idle();
                    if let Some(task) = service.find_task(&task.id)? {
                        print_task_summary(&task);
                    }
                }

                TaskCommands::List => {
                    let tasks = service.list_tasks()?;
                    if tasks.is_empty() {
                        println!("No tasks found.");
                    } else {
                        println!(
                            "{:<10} {:<10} {:<10} {:<18} {:<14} {:<20} {:>6}",
                            "ID", "STATUS", "SOURCE", "QUERY", "FREQUENCY", "NEXT RUN", "LAST"
                        );
                        println!("{}", "-".repeat(94));
                        for task in tasks {
                            println!(
                                "{:<10} {:<10} {:<10} {:<18} {:<14} {:<20} {:>6}",
                                truncate(&task.id, 8),
                                task.status,
                                truncate(&task.source, 10),
                                truncate(&task.query, 16),
                                truncate(&task.frequency, 14),
                                task.next_run,
                                task.last_result_count
                            );
                        }
                    }
                }

                TaskCommands::Remove { id } => {
                    let id = match_task_id(&service.list_tasks()?, &id)?;
                    service.delete_task(&id)?;
                    println!("Removed task {}.", id);
                }

                TaskCommands::Pause { id } => {
                    let id = match_task_id(&service.list_tasks()?, &id)?;
                    service.set_task_status(&id, TaskStatus::Paused)?;
                    println!("Paused task {}.", id);
                }

                TaskCommands::Resume { id } => {
                    let id = match_task_id(&service.list_tasks()?, &id)?;
                    service.set_task_status(&id, TaskStatus::Active)?;
                    println!("Resumed task {}.", id);
                }

                TaskCommands::Run { id } => {
                    let id = match_task_id(&service.list_tasks()?, &id)?;
                    service.run_task(&id)?;
                    println!("Running task {}...", id);
                    service.pool().wait_idle();
                    if let Some(task) = service.find_task(&id)? {
                        print_task_summary(&task);
                    }
                }
            }
        }

        Commands::Schedule { watch } => {
            db.ensure_initialized()?;
            let service = build_task_service(&config, &db)?;
            loop {
                let started = service.run_due(now_local())?;
                if started.is_empty() {
                    println!("No tasks due.");
                } else {
                    println!("Started {} task(s):", started.len());
                    for id in &started {
                        println!("  {}", id);
                    }
                    service.pool().wait_idle();
                    println!("Done.");
                }

                match watch {
                    Some(secs) => std::thread::sleep(Duration::from_secs(secs.max(1))),
                    None => break,
                }
            }
        }

        Commands::Jobs { command } => {
            db.ensure_initialized()?;
            match command {
                JobCommands::Search { keywords, city, page, page_size, json } => {
                    if page == 0 || page_size == 0 {
                        bail!("--page and --page-size start at 1");
                    }
                    let offset = (page - 1) * page_size;
                    let total = db.count_jobs(keywords.as_deref(), city.as_deref())?;
                    let jobs = if keywords.is_none() && city.is_none() {
                        db.list_jobs(offset, page_size)?
                    } else {
                        db.search_jobs(keywords.as_deref(), city.as_deref(), offset, page_size)?
                    };

                    if json {
                        let body = serde_json::json!({
                            "total": total,
                            "page": page,
                            "page_size": page_size,
                            "jobs": jobs,
                        });
                        println!("{}", serde_json::to_string_pretty(&body)?);
                    } else if jobs.is_empty() {
                        println!("No postings found.");
                    } else {
                        println!("{:<6} {:<28} {:<20} {:<14} {:<14}", "ID", "TITLE", "COMPANY", "LOCATION", "SALARY");
                        println!("{}", "-".repeat(86));
                        for job in jobs {
                            println!(
                                "{:<6} {:<28} {:<20} {:<14} {:<14}",
                                job.id,
                                truncate(&job.title, 26),
                                truncate(&job.company, 18),
                                truncate(&job.location, 12),
                                truncate(&job.salary, 12)
                            );
                        }
                        let pages = total.div_ceil(page_size);
                        println!("\nPage {} of {} ({} posting(s))", page, pages.max(1), total);
                    }
                }

                JobCommands::Show { id } => match db.get_job(id)? {
                    Some(job) => {
                        println!("Posting #{}", job.id);
                        println!("Title: {}", job.title);
                        println!("Company: {}", job.company);
                        println!("Location: {}", job.location);
                        println!("Salary: {}", job.salary);
                        if let Some(url) = &job.source_url {
                            println!("URL: {}", url);
                        }
                        println!("Crawled: {}", job.crawl_time);
                        if let Some(description) = &job.description {
                            println!("\n--- Description ---\n{}", description);
                        }
                    }
                    None => {
                        println!("Posting #{} not found.", id);
                    }
                },

                JobCommands::Remove { id } => {
                    if db.delete_job(id)? {
                        println!("Removed posting #{}.", id);
                    } else {
                        println!("Posting #{} not found.", id);
                    }
                }
            }
        }

        Commands::Stats => {
            db.ensure_initialized()?;
            let total = db.count_jobs(None, None)?;
            let tasks = db.list_tasks()?;

            println!("Postings: {}", total);
            println!("Tasks:    {}", tasks.len());
            for status in [TaskStatus::Active, TaskStatus::Paused, TaskStatus::Completed, TaskStatus::Failed] {
                let n = tasks.iter().filter(|t| t.status == status).count();
                if n > 0 {
                    println!("  {:<10} {}", status, n);
                }
            }

            println!("\nLast 7 days:");
            for (day, count) in db.crawl_trend(now_local().date())? {
                println!("  {}  {:>5}", day.format("%m-%d"), count);
            }

            let sources = db.source_distribution()?;
            if !sources.is_empty() {
                println!("\nTop sources:");
                for (host, count) in sources {
                    println!("  {:<30} {:>5}", host, count);
                }
            }
        }

        Commands::Sources => {
            let registry = build_registry(&config)?;
            for name in registry.names() {
                let aliases = registry
                    .get(name)
                    .map(|c| c.aliases().join(", "))
                    .unwrap_or_default();
                if aliases.is_empty() {
                    println!("{}", name);
                } else {
                    println!("{:<12} ({})", name, aliases);
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
