//! # Stagehand — interview-feedback driven candidate advancement
//!
//! Usage:
//!   stagehand serve                       # Gateway + periodic jobs
//!   stagehand tick                        # One evaluation pass
//!   stagehand evaluate <schedule_id>      # Diagnostic verdict, nothing recorded
//!   stagehand reconcile --payload hook.json
//!   stagehand reject <application_id>
//!   stagehand remind                      # Send due interviewer reminders once
//!   stagehand rules import rules.json | list [--all] | deactivate <rule_id>
//!   stagehand stats

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use stagehand_ats::{AtsClient, WebhookAction, parse_webhook};
use stagehand_core::config::StagehandConfig;
use stagehand_core::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use stagehand_core::types::NewRule;
use stagehand_engine::{
    AdvancementEngine, DispatchNotifier, EngineContext, EngineSettings, EnrichmentSweep, FeedbackReminders,
    FeedbackSync, Reconciler, RetryPolicy, spawn_background_jobs,
};
use stagehand_gateway::AppState;
use stagehand_store::AdvanceDb;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stagehand",
    version,
    about = "🎬 Stagehand — moves candidates forward when interview feedback clears the bar"
)]
struct Cli {
    /// Config file (default: ~/.stagehand/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway and the periodic jobs until Ctrl-C
    Serve,
    /// Run one advancement evaluation pass
    Tick,
    /// Show the verdict for one schedule without acting on it
    Evaluate { schedule_id: String },
    /// Apply a webhook payload from a file
    Reconcile {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Archive an application after a confirmed rejection
    Reject { application_id: String },
    /// Pull feedback and refetch missing plans once
    Sync,
    /// Remind interviewers whose interview starts soon
    Remind,
    /// Manage advancement rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
    /// Advancement statistics
    Stats,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Create rules from a JSON file (one rule or an array)
    Import { file: PathBuf },
    /// List rules
    List {
        /// Include deactivated rules
        #[arg(long)]
        all: bool,
    },
    /// Deactivate a rule
    Deactivate { rule_id: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<NewRule>),
    One(NewRule),
}

/// Everything the commands need, wired from config.
struct Runtime {
    config: StagehandConfig,
    db: Arc<AdvanceDb>,
    clock: Arc<dyn Clock>,
    engine: Arc<AdvancementEngine>,
    reconciler: Arc<Reconciler>,
    sync: Arc<FeedbackSync>,
    sweep: Arc<EnrichmentSweep>,
    reminders: Arc<FeedbackReminders>,
}

impl Runtime {
    fn build(config: StagehandConfig) -> Result<Self> {
        let db_path = shellexpand::tilde(&config.database.path).to_string();
        let db = Arc::new(AdvanceDb::open(Path::new(&db_path))?);
        tracing::info!("💾 Database: {db_path}");

        let ats = Arc::new(AtsClient::new(&config.ats)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let notifier = Arc::new(DispatchNotifier::from_config(&config));
        tracing::info!("📣 Notification targets: {}", notifier.target_names().join(", "));

        let engine = AdvancementEngine::new(
            EngineContext {
                db: db.clone(),
                metadata: ats.clone(),
                advance: ats.clone(),
                archive: ats.clone(),
                candidates: ats.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
                sleeper: sleeper.clone(),
            },
            EngineSettings::from_config(&config),
        );
        let reconciler = Reconciler::new(
            db.clone(),
            ats.clone(),
            clock.clone(),
            sleeper.clone(),
            RetryPolicy::from_millis(config.enrichment.max_attempts, &config.enrichment.retry_delays_ms),
        );
        let sync = FeedbackSync::new(db.clone(), ats.clone(), clock.clone());
        let reminders = FeedbackReminders::new(
            db.clone(),
            ats.clone(),
            notifier,
            clock.clone(),
            &config.reminders,
            &config.ats.profile_url_base,
        );
        let sweep = EnrichmentSweep::new(db.clone(), ats, clock.clone(), sleeper, &config.enrichment);

        Ok(Self {
            config,
            db,
            clock,
            engine: Arc::new(engine),
            reconciler: Arc::new(reconciler),
            sync: Arc::new(sync),
            sweep: Arc::new(sweep),
            reminders: Arc::new(reminders),
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<StagehandConfig> {
    let config = match path {
        Some(p) => {
            let mut c = StagehandConfig::load_from(p)?;
            c.apply_env_overrides();
            c
        }
        None => StagehandConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = format!(
        "stagehand={level},stagehand_core={level},stagehand_store={level},stagehand_engine={level},\
         stagehand_ats={level},stagehand_gateway={level},tower_http={level}"
    );
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, cli.log_json || config.logging.json);

    let rt = Runtime::build(config)?;

    match cli.command {
        Command::Serve => serve(rt).await?,
        Command::Tick => match rt.engine.try_tick().await? {
            Some(report) => print_json(&report)?,
            None => println!("⏭️  An evaluation pass is already running"),
        },
        Command::Evaluate { schedule_id } => {
            print_json(&rt.engine.evaluate_schedule(&schedule_id).await?)?;
        }
        Command::Reconcile { payload } => {
            let body = std::fs::read(&payload)
                .with_context(|| format!("reading {}", payload.display()))?;
            match parse_webhook(&body)? {
                WebhookAction::ScheduleUpdate(change) => {
                    print_json(&rt.reconciler.reconcile(&change).await?)?;
                }
                WebhookAction::Ping => println!("ping"),
                WebhookAction::Ignored(action) => println!("ignored action: {action}"),
            }
        }
        Command::Reject { application_id } => {
            print_json(&rt.engine.execute_rejection(&application_id).await?)?;
        }
        Command::Sync => {
            print_json(&rt.sync.sync_all().await?)?;
            print_json(&rt.sweep.run().await?)?;
        }
        Command::Remind => print_json(&rt.reminders.run().await?)?,
        Command::Rules { action } => rules(&rt, action)?,
        Command::Stats => print_json(&rt.db.statistics(rt.clock.now())?)?,
    }
    Ok(())
}

fn rules(rt: &Runtime, action: RulesCommand) -> Result<()> {
    match action {
        RulesCommand::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let rules = match serde_json::from_str::<RuleFile>(&content)? {
                RuleFile::Many(rules) => rules,
                RuleFile::One(rule) => vec![rule],
            };
            for rule in &rules {
                let created = rt.db.create_rule(rule, rt.clock.now())?;
                println!(
                    "✅ Rule {} for stage {} ({} requirement(s))",
                    created.rule_id,
                    created.interview_stage_id,
                    created.requirements.len()
                );
            }
        }
        RulesCommand::List { all } => print_json(&rt.db.list_rules(!all)?)?,
        RulesCommand::Deactivate { rule_id } => {
            rt.db.deactivate_rule(&rule_id, rt.clock.now())?;
            println!("🗑️  Rule {rule_id} deactivated");
        }
    }
    Ok(())
}

async fn serve(rt: Runtime) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = spawn_background_jobs(
        rt.engine.clone(),
        rt.sync.clone(),
        rt.sweep.clone(),
        rt.reminders.clone(),
        &rt.config,
        shutdown_rx.clone(),
    );

    let state = Arc::new(AppState {
        engine: rt.engine.clone(),
        reconciler: rt.reconciler.clone(),
        db: rt.db.clone(),
        clock: rt.clock.clone(),
        start_time: Instant::now(),
    });
    let gateway_config = rt.config.gateway.clone();
    let mut server = tokio::spawn(async move {
        stagehand_gateway::start(state, &gateway_config, shutdown_rx).await
    });

    tracing::info!(
        dry_run = rt.config.advancement.dry_run,
        "🎬 Stagehand running (evaluation every {} min)",
        rt.config.advancement.evaluation_interval_mins
    );

    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("🛑 Shutdown requested, waiting for running jobs");
            let _ = shutdown_tx.send(true);
            server.await
        }
        finished = &mut server => {
            let _ = shutdown_tx.send(true);
            finished
        }
    };

    for job in jobs {
        job.await?;
    }
    server_result??;
    Ok(())
}
