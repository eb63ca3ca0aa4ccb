//! SoulSnaps CLI
//!
//! Local memory management, plan inspection and manual sync.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use soulsnaps::access::{AccessGuard, CapacityGuard, FeatureToggles, PlanCatalog, PlanType};
use soulsnaps::affirmation::{AffirmationRequest, RuleBasedAffirmationGenerator};
use soulsnaps::clock::SystemClock;
use soulsnaps::config::SoulSnapsConfig;
use soulsnaps::service::MemoryService;
use soulsnaps::storage::queries::ListOptions;
use soulsnaps::storage::{KeyValueStore, Storage};
use soulsnaps::sync::SyncQueue;
use soulsnaps::types::*;

#[derive(Parser)]
#[command(name = "soulsnaps")]
#[command(about = "SoulSnaps journaling CLI")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, env = "SOULSNAPS_DB_PATH")]
    db_path: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available plans
    Plans,
    /// Show or change a user's plan
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Check whether a user may perform an action (consumes no quota)
    Check {
        user: String,
        /// Action, e.g. memory.create
        action: String,
        /// Quota key, e.g. memories.daily
        #[arg(short, long)]
        quota: Option<String>,
        /// Feature flag
        #[arg(short, long)]
        flag: Option<String>,
    },
    /// Capture a memory
    Create {
        user: String,
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value = "neutral")]
        mood: String,
        /// Local photo file
        #[arg(long)]
        photo: Option<String>,
        /// Local audio file
        #[arg(long)]
        audio: Option<String>,
    },
    /// List a user's memories
    List {
        user: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        favorites: bool,
    },
    /// Mark or unmark a favorite
    Favorite {
        id: i64,
        #[arg(long)]
        off: bool,
    },
    /// Delete a memory
    Delete { id: i64 },
    /// Show sync queue state
    Queue {
        /// Revive tasks that ran out of attempts
        #[arg(long)]
        retry_dead: bool,
    },
    /// Show usage against plan limits
    Usage { user: String },
    /// Print an affirmation for a mood
    Affirm {
        mood: String,
        #[arg(short, long, default_value = "")]
        seed: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Drain the sync queue against the configured backend
    Sync {
        /// Also pull remote rows for this user
        #[arg(long)]
        pull: Option<String>,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    Show { user: String },
    Set { user: String, plan: String },
}

struct App {
    config: SoulSnapsConfig,
    storage: Storage,
    access: Arc<AccessGuard>,
    capacity: Arc<CapacityGuard>,
    service: MemoryService,
}

impl App {
    fn open(config: SoulSnapsConfig) -> anyhow::Result<Self> {
        let storage_config = config.storage_config();
        let storage = Storage::open(storage_config.clone())
            .with_context(|| format!("opening {}", storage_config.db_path))?;

        let kv: Arc<dyn KeyValueStore> = Arc::new(storage.clone());
        let access = Arc::new(AccessGuard::new(
            Arc::new(PlanCatalog::standard()),
            kv,
            Arc::new(config.feature_toggles()),
            Arc::new(SystemClock),
        ));
        let capacity = Arc::new(CapacityGuard::new(access.clone(), Arc::new(storage.clone())));
        let service = MemoryService::new(storage.clone()).with_capacity_guard(capacity.clone());

        Ok(Self {
            config,
            storage,
            access,
            capacity,
            service,
        })
    }

    fn queue(&self) -> SyncQueue {
        SyncQueue::new(self.storage.clone(), self.config.sync.max_attempts)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("soulsnaps=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(filter)
        .init();

    let mut config = SoulSnapsConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path {
        config.storage.db_path = db_path;
    }

    if let Commands::Plans = cli.command {
        return print_plans();
    }
    if let Commands::Affirm { mood, seed, name } = &cli.command {
        let mood: Mood = mood.parse().map_err(anyhow::Error::msg)?;
        let mut request = AffirmationRequest::new(mood, seed.clone());
        if let Some(name) = name {
            request = request.with_name(name.clone());
        }
        println!("{}", RuleBasedAffirmationGenerator::new().pick(&request).text);
        return Ok(());
    }

    let app = App::open(config)?;

    match cli.command {
        Commands::Plans | Commands::Affirm { .. } => {}

        Commands::Plan { action } => match action {
            PlanAction::Show { user } => {
                let plan = app.access.plan_definition(&user);
                println!("{} is on {}", user, plan.display_name);
                for info in app.access.all_quota_info(&user)? {
                    let limit = match info.limit.value() {
                        Some(limit) => limit.to_string(),
                        None => "unlimited".to_string(),
                    };
                    println!(
                        "  {:<20} {}/{} {}",
                        info.key,
                        info.used,
                        limit,
                        info.window.label()
                    );
                }
            }
            PlanAction::Set { user, plan } => {
                let plan: PlanType = plan.parse().map_err(anyhow::Error::msg)?;
                app.access.change_plan(&user, plan)?;
                println!("{} is now on {}", user, plan);
            }
        },

        Commands::Check {
            user,
            action,
            quota,
            flag,
        } => {
            let result =
                app.access
                    .can_perform_action(&user, &action, quota.as_deref(), flag.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Create {
            user,
            title,
            description,
            mood,
            photo,
            audio,
        } => {
            let mood: Mood = mood.parse().map_err(anyhow::Error::msg)?;
            let media_size_bytes = [&photo, &audio]
                .into_iter()
                .flatten()
                .map(|path| std::fs::metadata(path).map(|m| m.len()))
                .sum::<std::io::Result<u64>>()
                .context("reading media file size")?;

            let memory = app.service.create(CreateMemoryInput {
                owner_id: user,
                title,
                description,
                mood,
                photo_uri: photo,
                audio_uri: audio,
                location: None,
                media_size_bytes,
            })?;
            println!("Captured memory #{}", memory.id);
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }

        Commands::List {
            user,
            limit,
            favorites,
        } => {
            let options = ListOptions {
                favorites_only: favorites,
                limit: Some(limit),
                ..Default::default()
            };
            for memory in app.service.list(&user, &options)? {
                println!(
                    "#{} [{}] {}{} ({})",
                    memory.id,
                    memory.mood.as_str(),
                    if memory.is_favorite { "* " } else { "" },
                    truncate(&memory.title, 60),
                    memory.sync_state.as_str()
                );
            }
        }

        Commands::Favorite { id, off } => {
            let memory = app.service.set_favorite(id, !off)?;
            println!(
                "#{} {}",
                memory.id,
                if memory.is_favorite {
                    "marked as favorite"
                } else {
                    "no longer a favorite"
                }
            );
        }

        Commands::Delete { id } => {
            app.service.delete(id)?;
            println!("Deleted memory #{}", id);
        }

        Commands::Queue { retry_dead } => {
            let queue = app.queue();
            if retry_dead {
                println!("Revived {} tasks", queue.retry_dead()?);
            }
            let status = app.service.sync_status(queue.max_attempts())?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            for entry in queue.dead_entries()? {
                println!(
                    "dead #{} {} after {} attempts: {}",
                    entry.id,
                    entry.task,
                    entry.attempts,
                    entry.last_error.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Usage { user } => {
            let usage = app.service.usage(&user)?;
            let check = app.capacity.check_memory_capacity(&user, 0)?;
            let recommendation = app.capacity.upgrade_urgency(&user)?;

            println!("Memories: {}", usage.memory_count);
            println!(
                "Storage:  {:.1} MB{}",
                usage.storage_bytes as f64 / (1024.0 * 1024.0),
                match check.storage_limit_bytes.value() {
                    Some(limit) => format!(" of {:.0} MB", limit as f64 / (1024.0 * 1024.0)),
                    None => String::new(),
                }
            );
            println!("Urgency:  {:?}", recommendation.urgency);
            for reason in &recommendation.reasons {
                println!("  - {}", reason);
            }
            if let Some(plan) = recommendation.recommended_plan {
                println!("Recommended plan: {}", plan);
            }
        }

        Commands::Sync { pull } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_sync(&app, pull))?;
        }
    }

    Ok(())
}

fn print_plans() -> anyhow::Result<()> {
    let catalog = PlanCatalog::standard();
    for plan in catalog.all() {
        let price = if plan.pricing.is_free() {
            "free".to_string()
        } else {
            format!(
                "{:.2} {}/month",
                plan.pricing.monthly_cents as f64 / 100.0,
                plan.pricing.currency
            )
        };
        println!("{} ({})", plan.display_name, price);
        for feature in &plan.features {
            println!("  + {}", feature);
        }
    }
    Ok(())
}

#[cfg(feature = "remote")]
async fn run_sync(app: &App, pull: Option<String>) -> anyhow::Result<()> {
    use soulsnaps::sync::{ObjectStore, RestRemoteStore, SyncProcessor};

    let sync = &app.config.sync;
    let (Some(url), Some(key)) = (&sync.remote_url, &sync.remote_api_key) else {
        bail!("no remote configured; set sync.remote_url or SOULSNAPS_REMOTE_URL");
    };
    let remote = Arc::new(RestRemoteStore::new(url, key).with_table(&sync.remote_table));
    let objects: Arc<dyn ObjectStore> = object_store(sync.object_endpoint.as_deref()).await?;

    let processor = SyncProcessor::new(app.storage.clone(), remote, objects)
        .with_buckets(sync.buckets());
    let queue = app.queue();

    if let Some(user) = pull {
        app.service.request_pull(&user)?;
    }
    let report = processor.drain(&queue, sync.batch_size).await?;
    println!(
        "Processed {} tasks: {} synced, {} failed, {} gave up",
        report.processed, report.succeeded, report.failed, report.dead
    );
    Ok(())
}

#[cfg(all(feature = "remote", feature = "cloud"))]
async fn object_store(
    endpoint: Option<&str>,
) -> anyhow::Result<Arc<dyn soulsnaps::sync::ObjectStore>> {
    use soulsnaps::sync::S3ObjectStore;

    Ok(match endpoint {
        Some(endpoint) => Arc::new(S3ObjectStore::with_endpoint(endpoint).await?),
        None => Arc::new(S3ObjectStore::from_env().await),
    })
}

#[cfg(all(feature = "remote", not(feature = "cloud")))]
async fn object_store(
    _endpoint: Option<&str>,
) -> anyhow::Result<Arc<dyn soulsnaps::sync::ObjectStore>> {
    bail!("media sync needs the `cloud` feature")
}

#[cfg(not(feature = "remote"))]
async fn run_sync(_app: &App, _pull: Option<String>) -> anyhow::Result<()> {
    bail!("this build has no remote backend; rebuild with --features remote")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
