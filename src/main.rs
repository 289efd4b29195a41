mod agents;
mod ai;
mod config;
mod db;
mod dispatcher;
mod error;
mod models;
mod reconciler;
mod recruiters;
mod registry;
mod scheduler;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agents::{default_behaviors, InvocationContext};
use ai::HttpCompletionClient;
use config::Config;
use db::{Database, ScheduleFilter};
use dispatcher::{AgentDispatcher, DispatchPolicy};
use models::{
    AgentRecord, AgentType, ApiBinding, NewSchedule, OutreachStatus, Recruiter, ScheduleSpec,
    SearchCriteria, DEFAULT_AGENT,
};
use reconciler::{Classification, ScheduleReconciler};
use recruiters::RecruiterMatchEngine;
use registry::AgentRegistry;
use scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Recurring job discovery agents and recruiter search")]
struct Cli {
    /// Database path (overrides SCOUT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Concurrent schedule workers (overrides SCOUT_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Manage resumes
    Resume {
        #[command(subcommand)]
        command: ResumeCommands,
    },

    /// Manage recurring searches
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Run due searches
    Run {
        /// Keep running on an interval until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between runs in watch mode (overrides SCOUT_TICK_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Remove legacy searches (daily frequency or deprecated sources)
    Reconcile {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,

        /// Confirm the permanent deletion
        #[arg(long)]
        yes: bool,
    },

    /// Search recruiters and track outreach
    Recruiters {
        #[command(subcommand)]
        command: RecruiterCommands,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Register a new agent
    Register {
        /// Unique agent name
        name: String,

        /// Agent type (resume_analysis, job_matching, content_generation, job_discovery)
        #[arg(short = 't', long = "type")]
        agent_type: String,

        /// Completion endpoint URL
        #[arg(short, long, default_value = "https://api.openai.com/v1/chat/completions")]
        endpoint: String,

        /// Model name
        #[arg(short, long, default_value = "gpt-4o-mini")]
        model: String,

        /// Environment variable holding the API key
        #[arg(long)]
        credential_env: Option<String>,

        /// Agent config as a JSON object
        #[arg(long)]
        config: Option<String>,

        /// Extra request parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// List agents
    List,

    /// Show agent details
    Show {
        name: String,
    },

    /// Enable an agent
    Enable {
        name: String,
    },

    /// Disable an agent
    Disable {
        name: String,
    },

    /// Remove an agent that no search uses
    Remove {
        name: String,
    },

    /// Invoke an agent once with a JSON payload
    Invoke {
        name: String,

        /// Input payload as JSON
        input: String,

        /// Acting user
        #[arg(short, long)]
        user: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ResumeCommands {
    /// Add a resume
    Add {
        /// Owning user
        #[arg(short, long)]
        user: i64,

        /// Name for this resume
        name: String,

        /// Path to resume file
        file: PathBuf,
    },

    /// Show a resume
    Show {
        id: i64,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Create a weekly search
    Add {
        /// Owning user
        #[arg(short, long)]
        user: i64,

        /// Comma-separated keywords
        #[arg(short, long)]
        keywords: String,

        /// Location filter
        #[arg(short, long)]
        location: Option<String>,

        /// Resume to tailor results to
        #[arg(short, long)]
        resume: Option<i64>,

        /// Agent that runs the search
        #[arg(short, long, default_value = DEFAULT_AGENT)]
        agent: String,

        #[arg(long, default_value = "weekly_ai_discovery")]
        search_type: String,

        #[arg(long)]
        approach: Option<String>,

        #[arg(long)]
        quality: Option<String>,
    },

    /// List searches
    List {
        /// Filter by user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Show a search and its discovered jobs
    Show {
        id: i64,
    },

    /// Delete a search
    Delete {
        id: i64,

        /// Owning user
        #[arg(short, long)]
        user: i64,
    },
}

#[derive(Subcommand)]
enum RecruiterCommands {
    /// Search recruiters by name or title
    Search {
        query: String,

        /// Acting user
        #[arg(short, long)]
        user: i64,

        #[arg(short, long, default_value = "1")]
        page: u32,

        #[arg(short = 's', long, default_value = "20")]
        page_size: u32,
    },

    /// Import recruiters from a JSON array
    Import {
        file: PathBuf,
    },

    /// Record outreach to a recruiter
    Contact {
        recruiter_id: i64,

        /// Acting user
        #[arg(short, long)]
        user: i64,

        /// not_contacted, contacted, responded, declined
        #[arg(short, long, default_value = "contacted")]
        status: String,

        #[arg(short, long)]
        notes: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scout=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn parse_json_object(raw: Option<&str>, what: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    match raw {
        None => Ok(serde_json::Map::new()),
        Some(raw) => match serde_json::from_str(raw).with_context(|| format!("Invalid {} JSON", what))? {
            serde_json::Value::Object(map) => Ok(map),
            _ => bail!("{} must be a JSON object", what),
        },
    }
}

struct App {
    config: Config,
    db: Arc<Database>,
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<AgentDispatcher>,
    reconciler: Arc<ScheduleReconciler>,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let db = Arc::new(Database::open(&config.db_path)?);
        db.ensure_initialized().await?;

        let registry = Arc::new(AgentRegistry::load(db.clone()).await.context("Failed to load agents")?);
        let client = Arc::new(HttpCompletionClient::new());
        let dispatcher = Arc::new(
            AgentDispatcher::new(registry.clone(), DispatchPolicy::from_config(&config))
                .with_behaviors(default_behaviors(client)),
        );
        let reconciler = Arc::new(ScheduleReconciler::from_config(&config)?);

        Ok(Self {
            config,
            db,
            registry,
            dispatcher,
            reconciler,
        })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.db.clone(),
            self.dispatcher.clone(),
            self.reconciler.clone(),
            self.config.worker_limit,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = cli.db {
        config.db_path = path;
    }
    if let Some(workers) = cli.workers {
        config.worker_limit = workers.max(1);
    }

    match cli.command {
        Commands::Init => {
            let db = Database::open(&config.db_path)?;
            db.init().await?;
            println!("Database initialized at {}", db.path().display());
            Ok(())
        }
        command => run(App::open(config).await?, command).await,
    }
}

async fn run(app: App, command: Commands) -> Result<()> {
    match command {
        // Opening the app already required an initialized database
        Commands::Init => {}

        Commands::Agent { command } => match command {
            AgentCommands::Register {
                name,
                agent_type,
                endpoint,
                model,
                credential_env,
                config,
                params,
            } => {
                let agent_type: AgentType = agent_type.parse()?;
                let mut record = AgentRecord::new(
                    &name,
                    agent_type,
                    ApiBinding {
                        endpoint,
                        credential_ref: credential_env,
                        model_name: model,
                        parameters: parse_json_object(params.as_deref(), "params")?,
                    },
                );
                record.config = parse_json_object(config.as_deref(), "config")?;

                app.registry.register(record).await?;
                println!("Registered {} agent '{}'", agent_type, name);
            }

            AgentCommands::List => {
                let agents = app.registry.list().await;
                if agents.is_empty() {
                    println!("No agents registered.");
                } else {
                    println!(
                        "{:<20} {:<20} {:<8} {:>6} {:>9} {:>10}",
                        "NAME", "TYPE", "ACTIVE", "RUNS", "SUCCESS", "AVG MS"
                    );
                    println!("{}", "-".repeat(78));
                    for agent in agents {
                        println!(
                            "{:<20} {:<20} {:<8} {:>6} {:>8.0}% {:>10.0}",
                            truncate(&agent.name, 18),
                            agent.agent_type,
                            if agent.is_active { "yes" } else { "no" },
                            agent.performance.total_runs,
                            agent.performance.success_rate * 100.0,
                            agent.performance.average_response_time_ms
                        );
                    }
                }
            }

            AgentCommands::Show { name } => {
                let agent = app.registry.resolve(&name, false).await?;
                println!("Agent '{}' (version {})", agent.name, agent.version);
                println!("Type: {}", agent.agent_type);
                println!("Active: {}", agent.is_active);
                println!("Endpoint: {}", agent.api_binding.endpoint);
                println!("Model: {}", agent.api_binding.model_name);
                if agent.api_binding.credential_ref.is_some() {
                    println!("Credential: configured");
                }
                if !agent.config.is_empty() {
                    println!("Config: {}", serde_json::Value::Object(agent.config.clone()));
                }
                match agent.last_run_at {
                    Some(at) => println!("Last run: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("Last run: never"),
                }
                let perf = &agent.performance;
                println!(
                    "Runs: {} ({} ok, {:.1}% errors, avg {:.0} ms)",
                    perf.total_runs,
                    perf.success_count,
                    perf.error_rate * 100.0,
                    perf.average_response_time_ms
                );
            }

            AgentCommands::Enable { name } => {
                app.registry.set_active(&name, true).await?;
                println!("Enabled agent '{}'.", name);
            }

            AgentCommands::Disable { name } => {
                app.registry.set_active(&name, false).await?;
                println!("Disabled agent '{}'.", name);
            }

            AgentCommands::Remove { name } => {
                app.scheduler().remove_agent(&name).await?;
                println!("Removed agent '{}'.", name);
            }

            AgentCommands::Invoke { name, input, user } => {
                let input: serde_json::Value =
                    serde_json::from_str(&input).context("Input must be valid JSON")?;
                let ctx = InvocationContext {
                    user_id: user,
                    ..Default::default()
                };
                let output = app.dispatcher.invoke(&name, &input, &ctx).await?;
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        },

        Commands::Resume { command } => match command {
            ResumeCommands::Add { user, name, file } => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read resume file: {}", file.display()))?;
                let id = app.db.create_resume(user, &name, &content).await?;
                println!("Added resume '{}' (ID: {})", name, id);
            }

            ResumeCommands::Show { id } => match app.db.get_resume(id).await? {
                Some(resume) => {
                    println!("Resume '{}' (ID: {}, user {})", resume.name, resume.id, resume.user_id);
                    println!("Created: {}", resume.created_at.format("%Y-%m-%d %H:%M"));
                    println!("\n--- Content ---\n{}", resume.content);
                }
                None => println!("Resume #{} not found.", id),
            },
        },

        Commands::Schedule { command } => match command {
            ScheduleCommands::Add {
                user,
                keywords,
                location,
                resume,
                agent,
                search_type,
                approach,
                quality,
            } => {
                let new = NewSchedule {
                    user_id: user,
                    resume_id: resume,
                    agent_name: agent,
                    search_type,
                    search_approach: approach,
                    quality_level: quality,
                    criteria: SearchCriteria {
                        keywords: keywords
                            .split(',')
                            .map(|k| k.trim().to_string())
                            .filter(|k| !k.is_empty())
                            .collect(),
                        location,
                    },
                    schedule: ScheduleSpec::weekly(),
                };
                let id = app.scheduler().create_schedule(&new).await?;
                println!("Created weekly search #{}", id);
            }

            ScheduleCommands::List { user } => {
                let filter = user.map(ScheduleFilter::for_user).unwrap_or_default();
                let entries = app.db.find_schedules(&filter).await?;
                if entries.is_empty() {
                    println!("No searches found.");
                } else {
                    println!(
                        "{:<6} {:<6} {:<18} {:<10} {:<24} {:>6} {:<8}",
                        "ID", "USER", "AGENT", "FREQ", "KEYWORDS", "JOBS", "STATE"
                    );
                    println!("{}", "-".repeat(84));
                    for entry in entries {
                        let state = match app.reconciler.classify(&entry) {
                            Classification::Valid => "ok",
                            Classification::Legacy => "legacy",
                        };
                        println!(
                            "{:<6} {:<6} {:<18} {:<10} {:<24} {:>6} {:<8}",
                            entry.id,
                            entry.user_id,
                            truncate(&entry.agent_name, 16),
                            entry.schedule.frequency,
                            truncate(&entry.criteria.keywords.join(","), 22),
                            entry.jobs_found.len(),
                            state
                        );
                    }
                }
            }

            ScheduleCommands::Show { id } => {
                let entry = app
                    .db
                    .get_schedule(id)
                    .await?
                    .ok_or_else(|| anyhow!("Search #{} not found", id))?;
                println!("Search #{} (user {})", entry.id, entry.user_id);
                println!("Agent: {}", entry.agent_name);
                println!("Type: {}", entry.search_type);
                if let Some(approach) = &entry.search_approach {
                    println!("Approach: {}", approach);
                }
                if let Some(quality) = &entry.quality_level {
                    println!("Quality: {}", quality);
                }
                println!("Keywords: {}", entry.criteria.keywords.join(", "));
                if let Some(location) = &entry.criteria.location {
                    println!("Location: {}", location);
                }
                println!("Frequency: {}", entry.schedule.frequency);
                if let Some(next) = entry.schedule.next_run_at {
                    println!("Next run: {}", next.format("%Y-%m-%d %H:%M UTC"));
                }
                if let Some(last) = entry.last_run_at {
                    println!("Last run: {}", last.format("%Y-%m-%d %H:%M UTC"));
                }
                if let Some(err) = &entry.last_error {
                    println!("Last error: {}", err);
                }
                let reasons = app.reconciler.legacy_reasons(&entry);
                if !reasons.is_empty() {
                    println!("LEGACY: {}", reasons.join(", "));
                }
                if !entry.jobs_found.is_empty() {
                    println!("\nJobs ({}):", entry.jobs_found.len());
                    for job in &entry.jobs_found {
                        println!(
                            "  {} @ {} [{}] {}",
                            job.title,
                            job.company.as_deref().unwrap_or("-"),
                            job.api_source,
                            job.url.as_deref().unwrap_or("")
                        );
                    }
                }
            }

            ScheduleCommands::Delete { id, user } => {
                app.db.delete_schedule(id, user).await?;
                println!("Deleted search #{}", id);
            }
        },

        Commands::Run { watch, interval } => {
            let scheduler = app.scheduler();
            let cancel = CancellationToken::new();

            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, finishing running searches");
                    on_signal.cancel();
                }
            });

            if watch {
                let every = interval
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(app.config.tick_interval);
                scheduler.run_forever(every, cancel).await?;
            } else {
                let summary = scheduler.run_due(&cancel).await?;
                println!("Due:            {}", summary.due);
                println!("Dispatched:     {}", summary.dispatched);
                println!("Succeeded:      {}", summary.succeeded);
                println!("Failed:         {}", summary.failed);
                println!("Skipped legacy: {}", summary.skipped_legacy);
                if summary.not_started > 0 {
                    println!("Not started:    {}", summary.not_started);
                }
                println!("Jobs appended:  {}", summary.jobs_appended);
            }
        }

        Commands::Reconcile { dry_run, yes } => {
            let plan = app.reconciler.plan(&app.db).await?;
            println!("Scanned {} search(es); {} legacy.", plan.scanned, plan.legacy_found);

            if plan.legacy_found == 0 {
                println!("Nothing to remove.");
            } else if dry_run {
                for entry in app.db.find_schedules(&ScheduleFilter::all()).await? {
                    let reasons = app.reconciler.legacy_reasons(&entry);
                    if !reasons.is_empty() {
                        println!("  #{} (user {}): {}", entry.id, entry.user_id, reasons.join(", "));
                    }
                }
                println!("\n(Dry run - nothing was removed)");
            } else if !yes {
                println!("Deletion is permanent. Re-run with --yes to remove them.");
            } else {
                let report = app.reconciler.reconcile(&app.db).await?;
                println!("Removed {} legacy search(es); {} remain.", report.deleted, report.remaining);
            }
        }

        Commands::Recruiters { command } => {
            let engine = RecruiterMatchEngine::new(app.db.clone(), app.config.max_page_size);
            match command {
                RecruiterCommands::Search {
                    query,
                    user,
                    page,
                    page_size,
                } => {
                    let results = engine.search(&query, page, page_size, user).await?;
                    if results.results.is_empty() {
                        println!("No recruiters found.");
                    } else {
                        println!(
                            "{:<6} {:<24} {:<24} {:<18} {:<14}",
                            "ID", "NAME", "TITLE", "COMPANY", "OUTREACH"
                        );
                        println!("{}", "-".repeat(88));
                        for m in &results.results {
                            let r = &m.recruiter;
                            println!(
                                "{:<6} {:<24} {:<24} {:<18} {:<14}",
                                r.id,
                                truncate(&r.full_name(), 22),
                                truncate(r.title.as_deref().unwrap_or("-"), 22),
                                truncate(r.company.as_deref().unwrap_or("-"), 16),
                                m.outreach.as_ref().map(|o| o.status.as_str()).unwrap_or("-")
                            );
                        }
                    }
                    let pages = (results.total_count as u64).div_ceil(results.page_size as u64);
                    println!(
                        "\nPage {} of {} ({} match(es))",
                        results.page,
                        pages.max(1),
                        results.total_count
                    );
                }

                RecruiterCommands::Import { file } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let recruiters: Vec<Recruiter> =
                        serde_json::from_str(&raw).context("Expected a JSON array of recruiters")?;
                    for recruiter in &recruiters {
                        app.db.insert_recruiter(recruiter).await?;
                    }
                    println!("Imported {} recruiter(s)", recruiters.len());
                }

                RecruiterCommands::Contact {
                    recruiter_id,
                    user,
                    status,
                    notes,
                } => {
                    let status: OutreachStatus = status.parse()?;
                    engine
                        .record_outreach(user, recruiter_id, status, notes.as_deref())
                        .await?;
                    println!("Recruiter #{} marked {}", recruiter_id, status.as_str());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 8), "a lon...");
        assert_eq!(truncate("Zoë Müller-Ødegård", 6), "Zoë...");
    }

    #[test]
    fn test_parse_json_object() {
        assert!(parse_json_object(None, "config").unwrap().is_empty());
        let map = parse_json_object(Some(r#"{"min_score": 40}"#), "config").unwrap();
        assert_eq!(map["min_score"], 40);
        assert!(parse_json_object(Some("[1, 2]"), "config").is_err());
        assert!(parse_json_object(Some("{oops"), "config").is_err());
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "scout", "--db", "/tmp/x.db", "recruiters", "search", "smith", "--user", "3",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::Recruiters {
                command: RecruiterCommands::Search { query, user, page, page_size },
            } => {
                assert_eq!(query, "smith");
                assert_eq!(user, 3);
                assert_eq!(page, 1);
                assert_eq!(page_size, 20);
            }
            _ => panic!("expected recruiters search"),
        }
    }
}
